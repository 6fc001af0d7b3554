//! # Link Client
//!
//! Runs a blocking [`Transport`] on a worker thread so that the control loop never waits on the
//! network. Requests are queued to the worker and their completions come back as [`LinkEvent`]s,
//! which the control loop drains with [`LinkClient::poll_events`]. All completion handling
//! therefore happens on the control loop's own thread.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::link::{encode_axis_value, Channel, Device, LinkError, Transport};
use log::{debug, trace, warn};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::dispatch::{SendTicket, Snapshot, SnapshotSink};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Non-blocking interface to the robot link.
///
/// Each request returns once it is queued. Its outcome arrives later as a
/// [`LinkEvent`]. An `Err` means the request could not be queued at all.
pub trait Link: SnapshotSink {
    fn request_scan(&mut self, timeout: Duration) -> Result<(), LinkError>;

    fn request_connect(&mut self, address: &str) -> Result<(), LinkError>;

    fn request_disconnect(&mut self) -> Result<(), LinkError>;
}

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Handle to the link worker thread.
///
/// Dropping the client stops the worker once it finishes its current request.
pub struct LinkClient {
    cmd_tx: Sender<LinkCmd>,

    event_rx: Receiver<LinkEvent>,

    worker: Option<JoinHandle<()>>,
}

/// A snapshot could not be delivered in full.
///
/// Both channels are always attempted, `failures` holds one entry per
/// channel write that failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{snapshot} not delivered: {}", describe_failures(.failures))]
pub struct DeliveryError {
    pub snapshot: Snapshot,
    pub failures: Vec<LinkError>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Completion of a link request.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Every device heard during the scan, unfiltered.
    ScanComplete(Result<Vec<Device>, LinkError>),

    ConnectComplete {
        address: String,
        result: Result<(), LinkError>,
    },

    SendComplete {
        ticket: SendTicket,
        result: Result<(), DeliveryError>,
    },

    DisconnectComplete(Result<(), LinkError>),
}

/// Requests queued to the worker.
#[derive(Debug)]
enum LinkCmd {
    Scan(Duration),
    Connect(String),
    Send(SendTicket),
    Disconnect,
    Shutdown,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl LinkClient {
    /// Start the worker thread which owns `transport`.
    pub fn spawn<T>(transport: T) -> Result<Self, std::io::Error>
    where
        T: Transport + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = channel();
        let (event_tx, event_rx) = channel();

        let worker = thread::Builder::new()
            .name("link_worker".into())
            .spawn(move || link_worker(transport, cmd_rx, event_tx))?;

        Ok(Self {
            cmd_tx,
            event_rx,
            worker: Some(worker),
        })
    }

    /// Take every completion reported since the last poll, without blocking.
    pub fn poll_events(&self) -> Vec<LinkEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next completion.
    pub fn wait_event(&self, timeout: Duration) -> Option<LinkEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(e) => Some(e),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Link worker has exited");
                None
            }
        }
    }

    fn queue(&self, cmd: LinkCmd) -> Result<(), LinkError> {
        trace!("Queueing {:?}", cmd);
        self.cmd_tx.send(cmd).map_err(|_| LinkError::WorkerStopped)
    }
}

impl SnapshotSink for LinkClient {
    fn begin_send(&mut self, ticket: SendTicket) -> Result<(), LinkError> {
        self.queue(LinkCmd::Send(ticket))
    }
}

impl Link for LinkClient {
    fn request_scan(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.queue(LinkCmd::Scan(timeout))
    }

    fn request_connect(&mut self, address: &str) -> Result<(), LinkError> {
        self.queue(LinkCmd::Connect(address.to_owned()))
    }

    fn request_disconnect(&mut self) -> Result<(), LinkError> {
        self.queue(LinkCmd::Disconnect)
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        // The worker may already have gone, in which case there's nothing to stop
        self.cmd_tx.send(LinkCmd::Shutdown).ok();

        if let Some(jh) = self.worker.take() {
            if jh.join().is_err() {
                warn!("Link worker panicked");
            }
        }
    }
}

impl DeliveryError {
    /// True if every failure was caused by there being no connection.
    ///
    /// This is how a dropped connection shows up, since the transport has no
    /// other way of telling the ground about it.
    pub fn is_link_lost(&self) -> bool {
        !self.failures.is_empty()
            && self
                .failures
                .iter()
                .all(|f| matches!(f, LinkError::NotConnected))
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Write both channels of `snapshot` to the transport, throttle first.
///
/// The rotation write is made even if the throttle write failed. The send
/// only counts as delivered if both succeed.
pub fn send_snapshot<T>(transport: &mut T, snapshot: Snapshot) -> Result<(), DeliveryError>
where
    T: Transport + ?Sized,
{
    let failures: Vec<LinkError> = Channel::ALL
        .iter()
        .filter_map(|&channel| {
            transport
                .write(channel, &encode_axis_value(snapshot.value(channel)))
                .err()
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DeliveryError { snapshot, failures })
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn link_worker<T: Transport>(
    mut transport: T,
    cmd_rx: Receiver<LinkCmd>,
    event_tx: Sender<LinkEvent>,
) {
    debug!("Link worker started");

    for cmd in cmd_rx.iter() {
        let event = match cmd {
            LinkCmd::Scan(timeout) => LinkEvent::ScanComplete(transport.scan(timeout)),
            LinkCmd::Connect(address) => {
                let result = transport.connect(&address);
                LinkEvent::ConnectComplete { address, result }
            }
            LinkCmd::Send(ticket) => LinkEvent::SendComplete {
                ticket,
                result: send_snapshot(&mut transport, ticket.snapshot),
            },
            LinkCmd::Disconnect => LinkEvent::DisconnectComplete(transport.disconnect()),
            LinkCmd::Shutdown => break,
        };

        if event_tx.send(event).is_err() {
            break;
        }
    }

    debug!("Link worker stopped");
}

fn describe_failures(failures: &[LinkError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
