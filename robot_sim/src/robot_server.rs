//! # Robot Server Module
//!
//! This module abstracts over the networking side of the robot simulator. The server binds the
//! link socket which the ground's transport connects to, answering scans with the robot's name and
//! applying channel writes to the drive outputs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    link::{decode_axis_value, Channel, LinkRequest, LinkResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::info;
use std::time::Instant;

use crate::{drive::DriveState, params::RobotSimParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the robot simulator.
///
/// The socket is a REP socket, so every request received must be answered with
/// [`RobotServer::send_response`] before the next one can be received.
pub struct RobotServer {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`RobotServer`]
#[derive(thiserror::Error, Debug)]
pub enum RobotServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not receive a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not parse the request: {0}")]
    BadRequest(String),

    #[error("Could not serialize the response: {0}")]
    SerializeError(serde_json::Error),

    #[error("Could not send data to the client: {0}")]
    SendError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotServer {
    /// Create a new instance of the robot server.
    ///
    /// This function will not wait for a connection from the ground before returning.
    pub fn new(ctx: &zmq::Context, params: &RobotSimParams) -> Result<Self, RobotServerError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: params.poll_ms,
            send_timeout: 10,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::REP, socket_options, &params.endpoint)?;

        Ok(Self { socket })
    }

    /// Receive the next request from the ground.
    ///
    /// `Ok(None)` is returned if nothing arrived within the poll period. A
    /// [`RobotServerError::BadRequest`] must still be answered.
    pub fn recv_request(&mut self) -> Result<Option<LinkRequest>, RobotServerError> {
        let msg = match self.socket.recv_msg(0) {
            Ok(m) => m,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(RobotServerError::RecvError(e)),
        };

        let text = msg
            .as_str()
            .ok_or_else(|| RobotServerError::BadRequest("request is not valid UTF-8".into()))?;

        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| RobotServerError::BadRequest(e.to_string()))
    }

    /// Send the response to the last request.
    pub fn send_response(&mut self, response: &LinkResponse) -> Result<(), RobotServerError> {
        let resp_str = serde_json::to_string(response).map_err(RobotServerError::SerializeError)?;

        self.socket
            .send(&resp_str, 0)
            .map_err(RobotServerError::SendError)
    }

    /// True if the ground is connected.
    pub fn connected(&self) -> bool {
        self.socket.connected()
    }
}

impl From<MonitoredSocketError> for RobotServerError {
    fn from(e: MonitoredSocketError) -> Self {
        RobotServerError::SocketError(e)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Work out the response to a request, applying any write to `drive`.
///
/// Every request gets a response, writes that can't be applied are answered
/// with [`LinkResponse::Invalid`].
pub fn handle_request(
    request: LinkRequest,
    name: &str,
    drive: &mut DriveState,
    now: Instant,
) -> LinkResponse {
    match request {
        LinkRequest::Advertise => LinkResponse::Advertise {
            name: name.to_owned(),
        },
        LinkRequest::Write {
            channel_id,
            payload,
        } => {
            let channel = match Channel::from_uuid(&channel_id) {
                Some(c) => c,
                None => return LinkResponse::Invalid(format!("Unknown channel {}", channel_id)),
            };

            match decode_axis_value(payload.as_bytes()) {
                Ok(value) => {
                    if drive.apply(channel, value, now) {
                        info!("Received valid demand, exiting safe mode");
                    }
                    LinkResponse::WriteOk
                }
                Err(e) => LinkResponse::Invalid(e.to_string()),
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
