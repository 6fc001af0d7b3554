//! # Session Control
//!
//! Owns the connection lifecycle: scanning for robots, connecting, disconnecting and noticing a
//! lost connection. The controller also owns the [`Dispatcher`] and arms it only while a session
//! is open, so control values never go out unless there is a robot to receive them.
//!
//! Disconnecting first sends an all-zero stop. The transport is only closed once that stop has
//! completed, or once the disconnect grace period has passed, whichever happens first.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::link::{filter_by_name, Device, LinkError};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

use crate::{
    dispatch::{DispatchStats, Dispatcher, Snapshot, StopOutcome},
    link_client::{Link, LinkEvent},
    params::GndExecParams,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Controller for the link session with the robot.
pub struct SessionCtrl<L: Link> {
    link: L,

    state: SessionState,

    dispatcher: Dispatcher,

    /// Robots found by the last scan
    devices: Vec<Device>,

    scanning: bool,

    name_filter: String,

    scan_timeout: Duration,

    disconnect_grace: Duration,

    /// When the current disconnect started
    disconnect_started: Option<Instant>,

    /// Set once the transport has been asked to close
    close_requested: bool,

    /// The robot of the current or last session
    peer: Option<Device>,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Connection status as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionCtrlError {
    #[error("Scanning is only possible while disconnected")]
    ScanUnavailable,

    #[error("A scan is already in progress")]
    AlreadyScanning,

    #[error("Connecting is only possible while disconnected and not scanning")]
    ConnectUnavailable,

    #[error("No device named {0:?} was found by the last scan")]
    UnknownDevice(String),

    #[error("No devices found, scan first")]
    NoDevices,

    #[error("Not connected")]
    DisconnectUnavailable,

    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Disconnecting => "Disconnecting",
        };
        write!(f, "{}", s)
    }
}

impl<L: Link> SessionCtrl<L> {
    pub fn new(link: L, params: &GndExecParams) -> Self {
        Self {
            link,
            state: SessionState::Disconnected,
            dispatcher: Dispatcher::new(params.min_send_interval()),
            devices: Vec::new(),
            scanning: false,
            name_filter: params.robot_name_filter.clone(),
            scan_timeout: params.scan_timeout(),
            disconnect_grace: params.disconnect_grace(),
            disconnect_started: None,
            close_requested: false,
            peer: None,
        }
    }

    /// Start a scan for robots. Results arrive through `handle_event`.
    pub fn scan(&mut self) -> Result<(), SessionCtrlError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionCtrlError::ScanUnavailable);
        }
        if self.scanning {
            return Err(SessionCtrlError::AlreadyScanning);
        }

        self.link.request_scan(self.scan_timeout)?;
        self.scanning = true;
        info!("Scanning for devices for {:.1} s...", self.scan_timeout.as_secs_f64());

        Ok(())
    }

    /// Connect to the named device from the last scan, or the first one if no name is given.
    pub fn connect(&mut self, name: Option<&str>) -> Result<(), SessionCtrlError> {
        if !self.can_connect() {
            return Err(SessionCtrlError::ConnectUnavailable);
        }

        let device = match name {
            Some(n) => self
                .devices
                .iter()
                .find(|d| d.name == n)
                .ok_or_else(|| SessionCtrlError::UnknownDevice(n.to_owned()))?,
            None => self.devices.first().ok_or(SessionCtrlError::NoDevices)?,
        }
        .clone();

        self.link.request_connect(&device.address)?;

        info!("Connecting to {} at {}...", device.name, device.address);
        self.peer = Some(device);
        self.set_state(SessionState::Connecting);

        Ok(())
    }

    /// Stop the robot and close the session.
    ///
    /// The transport is closed once the stop completes or the grace period
    /// runs out, see `tick`.
    pub fn disconnect(&mut self, now: Instant) -> Result<(), SessionCtrlError> {
        if self.state != SessionState::Connected {
            return Err(SessionCtrlError::DisconnectUnavailable);
        }

        self.set_state(SessionState::Disconnecting);
        self.disconnect_started = Some(now);
        self.close_requested = false;

        match self.dispatcher.force_send(Snapshot::STOP, now, &mut self.link) {
            StopOutcome::Sent => debug!("Final stop sent"),
            StopOutcome::Latched => debug!("Final stop queued behind in-flight send"),
            StopOutcome::NotArmed => warn!("Dispatcher not armed, no final stop sent"),
        }

        self.maybe_close(now);

        Ok(())
    }

    /// Send a stop as soon as possible.
    ///
    /// The caller is responsible for clearing the control state so the next
    /// routine send is also a stop.
    pub fn emergency_stop(&mut self, now: Instant) -> StopOutcome {
        let outcome = self.dispatcher.force_send(Snapshot::STOP, now, &mut self.link);

        match outcome {
            StopOutcome::Sent => info!("EMERGENCY STOP"),
            StopOutcome::Latched => info!("EMERGENCY STOP (queued behind in-flight send)"),
            StopOutcome::NotArmed => info!("EMERGENCY STOP (not connected, nothing sent)"),
        }

        outcome
    }

    /// Apply a completion reported by the link.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::ScanComplete(result) => self.on_scan_complete(result),
            LinkEvent::ConnectComplete { address, result } => {
                self.on_connect_complete(&address, result, now)
            }
            LinkEvent::SendComplete { ticket, result } => {
                let link_lost = matches!(&result, Err(e) if e.is_link_lost());

                self.dispatcher
                    .on_send_complete(ticket.id, result, now, &mut self.link);

                if link_lost
                    && matches!(
                        self.state,
                        SessionState::Connected | SessionState::Disconnecting
                    )
                {
                    warn!("Connection to the robot lost");
                    self.dispatcher.disarm();
                    self.set_state(SessionState::Disconnected);
                }
            }
            LinkEvent::DisconnectComplete(result) => {
                if let Err(e) = result {
                    warn!("{}", e);
                }
                self.dispatcher.disarm();
                if self.state != SessionState::Disconnected {
                    self.set_state(SessionState::Disconnected);
                }
            }
        }

        self.maybe_close(now);
    }

    /// Periodic update, hands `current` to the dispatcher while connected.
    pub fn tick(&mut self, now: Instant, current: Snapshot) {
        match self.state {
            SessionState::Connected => {
                self.dispatcher.tick(now, current, &mut self.link);
            }
            SessionState::Disconnecting => self.maybe_close(now),
            _ => (),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Robots found by the last scan, filtered by name.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// The robot of the current or most recent session.
    pub fn peer(&self) -> Option<&Device> {
        self.peer.as_ref()
    }

    pub fn can_scan(&self) -> bool {
        self.state == SessionState::Disconnected && !self.scanning
    }

    pub fn can_connect(&self) -> bool {
        self.state == SessionState::Disconnected && !self.scanning
    }

    pub fn can_disconnect(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn on_scan_complete(&mut self, result: Result<Vec<Device>, LinkError>) {
        self.scanning = false;

        match result {
            Ok(found) => {
                let total = found.len();
                self.devices = filter_by_name(found, &self.name_filter);

                if self.devices.is_empty() {
                    info!(
                        "Scan complete, no devices matching {:?} ({} heard)",
                        self.name_filter, total
                    );
                } else {
                    info!("Scan complete, found {} device(s):", self.devices.len());
                    for d in self.devices.iter() {
                        info!("    {} ({})", d.name, d.address);
                    }
                }
            }
            Err(e) => {
                self.devices.clear();
                error!("Scan error: {}", e);
            }
        }
    }

    fn on_connect_complete(&mut self, address: &str, result: Result<(), LinkError>, now: Instant) {
        if self.state != SessionState::Connecting {
            warn!(
                "Connection to {} completed while {}, closing it",
                address, self.state
            );
            if result.is_ok() {
                self.link.request_disconnect().ok();
            }
            return;
        }

        match result {
            Ok(()) => {
                self.dispatcher.reset(now);
                self.set_state(SessionState::Connected);
            }
            Err(e) => {
                error!("Connection error: {}", e);
                self.set_state(SessionState::Disconnected);
            }
        }
    }

    /// Close the transport once the final stop is out or the grace period has passed.
    fn maybe_close(&mut self, now: Instant) {
        if self.state != SessionState::Disconnecting || self.close_requested {
            return;
        }

        let grace_expired = self
            .disconnect_started
            .map(|t| now.saturating_duration_since(t) >= self.disconnect_grace)
            .unwrap_or(true);

        if !self.dispatcher.is_idle() && !grace_expired {
            return;
        }

        if grace_expired && !self.dispatcher.is_idle() {
            warn!("Final stop not confirmed within the grace period, disconnecting anyway");
        }

        // Nothing more goes out on this session
        self.dispatcher.disarm();
        self.close_requested = true;

        if let Err(e) = self.link.request_disconnect() {
            error!("Could not request disconnect: {}", e);
            self.set_state(SessionState::Disconnected);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Status: {}", state);
        }
        self.state = state;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
