//! # Network Module
//!
//! ZMQ plumbing for the link between the ground and the robot. The main item is
//! [`MonitoredSocket`], a socket paired with a monitor thread so that callers can ask whether the
//! peer is actually there, which plain ZMQ sockets hide.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod zmq_transport;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;
pub use zmq_transport::{ZmqTransport, ZmqTransportOptions};

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

/// Apply `(setter, value)` pairs to a socket, naming the failing setter in the error.
macro_rules! apply_sockopts {
    ($socket:expr, $(($setter:ident, $val:expr)),+ $(,)?) => {
        $(
            $socket.$setter($val).map_err(|e| {
                MonitoredSocketError::SocketOptionError(stringify!($setter).into(), e)
            })?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout of the monitor socket. Dropping a socket waits at most this long for the
/// monitor thread.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Gives each monitor a unique inproc endpoint.
static MONITOR_COUNT: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A zmq socket which tracks whether its peer is connected.
///
/// Derefs to the underlying [`zmq::Socket`] for sending and receiving.
pub struct MonitoredSocket {
    socket: Socket,

    monitor_thread: Option<JoinHandle<()>>,

    monitor_endpoint: String,

    stop_monitor: Arc<AtomicBool>,

    connected: Arc<AtomicBool>,
}

/// How a [`MonitoredSocket`] is set up.
///
/// Timeouts are in milliseconds and follow zmq's conventions, `-1` meaning wait forever.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Bind to the endpoint instead of connecting to it. Servers bind.
    pub bind: bool,

    /// Don't return from [`MonitoredSocket::new`] until the peer is connected, failing after
    /// `connect_timeout`.
    pub block_on_first_connect: bool,

    /// `ZMQ_CONNECT_TIMEOUT`, zero uses the OS timeout
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`
    pub send_timeout: i32,

    /// `ZMQ_LINGER`, how long unsent messages are kept after the socket closes
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`
    pub reconnect_ivl: i32,

    /// `ZMQ_REQ_CORRELATE`, REQ sockets only
    pub req_correlate: bool,

    /// `ZMQ_REQ_RELAXED`, REQ sockets only. Lets a REQ socket send again after a request timed
    /// out without an answer.
    pub req_relaxed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a socket of `socket_type` on `endpoint`, with a monitor thread watching it.
    ///
    /// `endpoint` is a zmq endpoint such as `"tcp://192.168.4.1:5100"`.
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // The monitor has to be attached before connecting or the first events are missed
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            MONITOR_COUNT.fetch_add(1, Ordering::Relaxed)
        );
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;

        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        apply_sockopts!(monitor, (set_rcvtimeo, MONITOR_POLL_MS), (set_linger, 0));
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        options.apply(&socket)?;

        if options.bind {
            socket.bind(endpoint)
        } else {
            socket.connect(endpoint)
        }
        .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        let connected = Arc::new(AtomicBool::new(false));

        if options.block_on_first_connect {
            wait_for_connection(&monitor, options.connect_timeout)?;
            connected.store(true, Ordering::Relaxed);
        }

        let stop_monitor = Arc::new(AtomicBool::new(false));

        let monitor_thread = {
            let stop = stop_monitor.clone();
            let connected = connected.clone();
            let name = monitor_endpoint.clone();
            thread::spawn(move || watch_events(monitor, name, stop, connected))
        };

        Ok(Self {
            socket,
            monitor_thread: Some(monitor_thread),
            monitor_endpoint,
            stop_monitor,
            connected,
        })
    }

    /// True while the peer is connected.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.stop_monitor.store(true, Ordering::Relaxed);

        if let Some(jh) = self.monitor_thread.take() {
            if jh.join().is_err() {
                warn!("Monitor thread for {} panicked", self.monitor_endpoint);
            }
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Apply these options to `socket`.
    fn apply(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        apply_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
        );

        if let Ok(SocketType::REQ) = socket.get_socket_type() {
            apply_sockopts!(
                socket,
                (set_req_correlate, self.req_correlate),
                (set_req_relaxed, self.req_relaxed),
            );
        }

        Ok(())
    }
}

impl Default for SocketOptions {
    /// zmq's own defaults, except that sockets connect rather than bind and block on their
    /// first connection.
    fn default() -> Self {
        Self {
            bind: false,
            block_on_first_connect: true,
            connect_timeout: 0,
            recv_timeout: -1,
            send_timeout: -1,
            linger: 30_000,
            reconnect_ivl: 100,
            req_correlate: false,
            req_relaxed: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read one event from a monitor socket, discarding the address frame that follows it.
fn read_event(monitor: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = monitor.recv_msg(0)?;

    // First frame is a 16 bit event id then a 32 bit value
    if msg.len() < 2 {
        return Err(zmq::Error::EPROTO);
    }
    let id = u16::from_ne_bytes([msg[0], msg[1]]);

    if monitor.get_rcvmore()? {
        monitor.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(id))
}

/// Wait for the monitor to report a connection.
///
/// With a `connect_timeout_ms` of zero or less this waits for as long as zmq keeps reporting a
/// delayed connect.
fn wait_for_connection(monitor: &Socket, connect_timeout_ms: i32) -> Result<(), MonitoredSocketError> {
    let start = Instant::now();

    loop {
        match read_event(monitor) {
            Ok(SocketEvent::CONNECTED) => return Ok(()),
            Ok(SocketEvent::CONNECT_DELAYED) | Err(zmq::Error::EAGAIN) => (),
            Ok(_) => return Err(MonitoredSocketError::CouldNotConnect(None)),
            Err(e) => return Err(MonitoredSocketError::EventReadError(e)),
        }

        if connect_timeout_ms > 0 && start.elapsed().as_millis() >= connect_timeout_ms as u128 {
            return Err(MonitoredSocketError::CouldNotConnect(Some(zmq::Error::ETIMEDOUT)));
        }
    }
}

/// Monitor thread body, keeps `connected` up to date until `stop` is set.
fn watch_events(monitor: Socket, name: String, stop: Arc<AtomicBool>, connected: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(zmq::Error::ETERM) => break,
            Err(e) => {
                warn!("Error reading event from monitor {}: {}", name, e);
                break;
            }
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                connected.store(true, Ordering::Relaxed)
            }
            SocketEvent::DISCONNECTED => connected.store(false, Ordering::Relaxed),
            SocketEvent::MONITOR_STOPPED => break,
            _ => (),
        }
    }

    debug!("Monitor {} stopped", name);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bound_socket_starts_disconnected() {
        let ctx = zmq::Context::new();
        let socket = MonitoredSocket::new(
            &ctx,
            zmq::REP,
            SocketOptions {
                bind: true,
                block_on_first_connect: false,
                ..Default::default()
            },
            "inproc://test_bound_socket",
        )
        .unwrap();

        assert!(!socket.connected());
    }

    #[test]
    fn test_bad_endpoint() {
        let ctx = zmq::Context::new();
        let result = MonitoredSocket::new(
            &ctx,
            zmq::REQ,
            SocketOptions {
                block_on_first_connect: false,
                ..Default::default()
            },
            "not-an-endpoint",
        );

        assert!(matches!(result, Err(MonitoredSocketError::CouldNotConnect(Some(_)))));
    }
}
