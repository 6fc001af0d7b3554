//! # ZMQ Transport
//!
//! A [`Transport`] which reaches the robot through a REQ socket. Each request is a JSON encoded
//! [`LinkRequest`] and the robot replies with a JSON encoded [`LinkResponse`].
//!
//! Scanning probes a configured list of candidate endpoints with [`LinkRequest::Advertise`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use std::time::{Duration, Instant};

use super::{zmq, MonitoredSocket, SocketOptions};
use crate::link::{Channel, Device, LinkError, LinkRequest, LinkResponse, Transport};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Shortest time given to a single endpoint during a scan.
const MIN_PROBE_MS: u128 = 50;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Options for a [`ZmqTransport`].
#[derive(Debug, Clone)]
pub struct ZmqTransportOptions {
    /// Endpoints probed during a scan, such as `"tcp://192.168.4.1:5050"`.
    pub candidate_endpoints: Vec<String>,

    /// Maximum time to wait for the robot to acknowledge a request.
    pub request_timeout_ms: i32,

    /// Maximum time to wait for a connection to be established.
    pub connect_timeout_ms: i32,
}

/// A transport to the robot over a ZMQ REQ socket.
pub struct ZmqTransport {
    ctx: zmq::Context,

    options: ZmqTransportOptions,

    /// The socket of the current session, `None` while disconnected.
    session: Option<MonitoredSocket>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Failures of a single request/response exchange.
#[derive(Debug, thiserror::Error)]
enum ExchangeError {
    #[error("could not serialize the request: {0}")]
    Serialize(serde_json::Error),

    #[error("send failed: {0}")]
    Send(zmq::Error),

    #[error("no response within the timeout")]
    Timeout,

    #[error("receive failed: {0}")]
    Recv(zmq::Error),

    #[error("the response was not valid UTF-8")]
    NonUtf8,

    #[error("could not parse the response: {0}")]
    Deserialize(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqTransport {
    /// Create a new, disconnected, transport.
    pub fn new(ctx: &zmq::Context, options: ZmqTransportOptions) -> Self {
        Self {
            ctx: ctx.clone(),
            options,
            session: None,
        }
    }

    /// Socket options shared by every REQ socket this transport opens.
    fn req_options(&self, timeout_ms: i32, block_on_first_connect: bool) -> SocketOptions {
        SocketOptions {
            block_on_first_connect,
            connect_timeout: self.options.connect_timeout_ms,
            linger: 1,
            recv_timeout: timeout_ms,
            send_timeout: timeout_ms,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        }
    }

    /// Ask the endpoint for its name, allowing at most `timeout_ms` for the answer.
    fn probe(&self, endpoint: &str, timeout_ms: i32) -> Result<Device, LinkError> {
        let socket = MonitoredSocket::new(
            &self.ctx,
            zmq::REQ,
            self.req_options(timeout_ms, false),
            endpoint
        )?;

        match exchange(&socket, &LinkRequest::Advertise) {
            Ok(LinkResponse::Advertise { name }) => Ok(Device {
                name,
                address: endpoint.to_owned(),
            }),
            Ok(r) => Err(LinkError::Protocol(format!("{:?}", r))),
            Err(e) => Err(LinkError::Discovery(format!("{}: {}", endpoint, e))),
        }
    }
}

impl Transport for ZmqTransport {
    fn scan(&mut self, timeout: Duration) -> Result<Vec<Device>, LinkError> {
        if self.options.candidate_endpoints.is_empty() {
            return Err(LinkError::Discovery("no candidate endpoints configured".into()));
        }

        let start = Instant::now();
        let mut devices = Vec::new();

        for (i, endpoint) in self.options.candidate_endpoints.iter().enumerate() {
            // Share what's left of the scan budget between the remaining endpoints
            let remaining = timeout.checked_sub(start.elapsed()).unwrap_or_default();
            let left = (self.options.candidate_endpoints.len() - i) as u128;
            let budget_ms = (remaining.as_millis() / left).max(MIN_PROBE_MS);

            if remaining.as_millis() == 0 {
                warn!(
                    "Scan timed out with {} endpoint(s) left unprobed",
                    self.options.candidate_endpoints.len() - i
                );
                break;
            }

            match self.probe(endpoint, budget_ms.min(i32::MAX as u128) as i32) {
                Ok(d) => {
                    debug!("Found {:?} at {}", d.name, d.address);
                    devices.push(d)
                },
                Err(LinkError::Socket(e)) => {
                    return Err(LinkError::Discovery(format!("{}: {}", endpoint, e)))
                },
                Err(e) => debug!("No device at {}: {}", endpoint, e),
            }
        }

        Ok(devices)
    }

    fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        // Replace any existing session
        self.session = None;

        let connection_err = |reason: String| LinkError::Connection {
            address: address.to_owned(),
            reason,
        };

        let socket = MonitoredSocket::new(
            &self.ctx,
            zmq::REQ,
            self.req_options(self.options.request_timeout_ms, true),
            address
        ).map_err(|e| connection_err(e.to_string()))?;

        // Make sure there's a robot on the other end before accepting the session
        match exchange(&socket, &LinkRequest::Advertise) {
            Ok(LinkResponse::Advertise { name }) => {
                debug!("Session opened with {:?} at {}", name, address);
                self.session = Some(socket);
                Ok(())
            },
            Ok(r) => Err(connection_err(format!("unexpected handshake response {:?}", r))),
            Err(e) => Err(connection_err(e.to_string())),
        }
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        match self.session.take() {
            Some(_) => Ok(()),
            None => Err(LinkError::Disconnect("no session is open".into())),
        }
    }

    fn write(&mut self, channel: Channel, payload: &[u8]) -> Result<(), LinkError> {
        let socket = self.session.as_ref().ok_or(LinkError::NotConnected)?;

        if !socket.connected() {
            return Err(LinkError::NotConnected);
        }

        let payload = std::str::from_utf8(payload).map_err(|_| LinkError::Write {
            channel,
            reason: "payload is not valid UTF-8".into(),
        })?;

        let request = LinkRequest::Write {
            channel_id: channel.uuid().to_owned(),
            payload: payload.to_owned(),
        };

        trace!("Writing {:?} to {}", payload, channel);

        match exchange(socket, &request) {
            Ok(LinkResponse::WriteOk) => Ok(()),
            Ok(LinkResponse::Invalid(reason)) => Err(LinkError::Write { channel, reason }),
            Ok(r) => Err(LinkError::Protocol(format!("{:?}", r))),
            Err(ExchangeError::Serialize(e)) => Err(LinkError::Serialization(e.to_string())),
            Err(e) => Err(LinkError::Write {
                channel,
                reason: e.to_string(),
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Send one request and wait for the response.
fn exchange(socket: &zmq::Socket, request: &LinkRequest) -> Result<LinkResponse, ExchangeError> {
    let request_str = serde_json::to_string(request).map_err(ExchangeError::Serialize)?;

    socket.send(&request_str, 0).map_err(ExchangeError::Send)?;

    let response_str = match socket.recv_string(0) {
        Ok(Ok(s)) => s,
        Ok(Err(_)) => return Err(ExchangeError::NonUtf8),
        Err(zmq::Error::EAGAIN) => return Err(ExchangeError::Timeout),
        Err(e) => return Err(ExchangeError::Recv(e)),
    };

    serde_json::from_str(&response_str).map_err(ExchangeError::Deserialize)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn transport(endpoints: Vec<String>) -> ZmqTransport {
        ZmqTransport::new(
            &zmq::Context::new(),
            ZmqTransportOptions {
                candidate_endpoints: endpoints,
                request_timeout_ms: 100,
                connect_timeout_ms: 100,
            }
        )
    }

    #[test]
    fn test_write_without_session() {
        let mut t = transport(vec![]);

        assert_eq!(t.write(Channel::Throttle, b"10"), Err(LinkError::NotConnected));
        assert!(matches!(t.disconnect(), Err(LinkError::Disconnect(_))));
    }

    #[test]
    fn test_scan_without_candidates() {
        let mut t = transport(vec![]);

        assert!(matches!(
            t.scan(Duration::from_millis(100)),
            Err(LinkError::Discovery(_))
        ));
    }

    #[test]
    fn test_request_encoding() {
        let request = LinkRequest::Write {
            channel_id: Channel::Rotation.uuid().to_owned(),
            payload: "-42".into(),
        };
        let json = serde_json::to_string(&request).unwrap();

        assert_eq!(serde_json::from_str::<LinkRequest>(&json).unwrap(), request);
        assert!(json.contains("\"-42\""));
    }
}
