//! # Link module
//!
//! Defines the interface between the ground executable and the robot: the two axis channels, the
//! way axis values are encoded onto them, the messages exchanged over the network and the
//! [`Transport`] trait which concrete links implement.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod msg;
mod payload;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, time::Duration};

use crate::net::MonitoredSocketError;

pub use msg::*;
pub use payload::*;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// UUID of the service the robot exposes its drive channels under.
pub const DRIVE_SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// UUID of the throttle channel.
pub const THROTTLE_CHANNEL_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// UUID of the rotation channel.
pub const ROTATION_CHANNEL_UUID: &str = "1c95d5e3-d8f7-413a-bf3d-7a2e5d7be87e";

/// Substring a device's advertised name must contain for it to be considered a robot.
pub const DEFAULT_ROBOT_NAME_FILTER: &str = "Robot";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A device found during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// The name the device advertises itself with
    pub name: String,

    /// The address used to connect to the device
    pub address: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// One of the two independent drive channels on the robot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Forwards/backwards demand
    Throttle,

    /// Turn demand, positive values turn right
    Rotation,
}

/// Errors which can occur on the link between the ground and the robot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("Device scan failed: {0}")]
    Discovery(String),

    #[error("Could not connect to {address}: {reason}")]
    Connection {
        address: String,
        reason: String,
    },

    #[error("Could not write the {channel} channel: {reason}")]
    Write {
        channel: Channel,
        reason: String,
    },

    #[error("Could not disconnect cleanly: {0}")]
    Disconnect(String),

    #[error("The link is not connected")]
    NotConnected,

    #[error("Socket error: {0}")]
    Socket(MonitoredSocketError),

    #[error("Could not serialize the request: {0}")]
    Serialization(String),

    #[error("Unexpected response from the robot: {0}")]
    Protocol(String),

    #[error("The link worker has stopped")]
    WorkerStopped,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A blocking, session oriented link to a robot.
///
/// Every method may block on I/O. Callers that must not block (such as the control loop) should
/// drive a transport from a separate thread.
pub trait Transport {
    /// Look for devices for at most `timeout`.
    ///
    /// Returns every device that answered, without any name filtering.
    fn scan(&mut self, timeout: Duration) -> Result<Vec<Device>, LinkError>;

    /// Open a session with the device at `address`.
    fn connect(&mut self, address: &str) -> Result<(), LinkError>;

    /// Close the current session.
    fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Write `payload` to the given channel of the connected device.
    fn write(&mut self, channel: Channel, payload: &[u8]) -> Result<(), LinkError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Channel {
    /// Both channels, in the order a snapshot is written.
    pub const ALL: [Channel; 2] = [Channel::Throttle, Channel::Rotation];

    /// The UUID identifying this channel on the robot.
    pub fn uuid(&self) -> &'static str {
        match self {
            Channel::Throttle => THROTTLE_CHANNEL_UUID,
            Channel::Rotation => ROTATION_CHANNEL_UUID,
        }
    }

    /// Find the channel with the given UUID, ignoring case.
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.uuid().eq_ignore_ascii_case(uuid))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Throttle => write!(f, "throttle"),
            Channel::Rotation => write!(f, "rotation"),
        }
    }
}

impl From<MonitoredSocketError> for LinkError {
    fn from(e: MonitoredSocketError) -> Self {
        LinkError::Socket(e)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Keep only those devices whose name contains `pattern`.
///
/// Devices are de-duplicated by name, the first address seen for a name wins. Scan order is
/// preserved.
pub fn filter_by_name(devices: Vec<Device>, pattern: &str) -> Vec<Device> {
    let mut seen = HashSet::new();

    devices
        .into_iter()
        .filter(|d| d.name.contains(pattern))
        .filter(|d| seen.insert(d.name.clone()))
        .collect()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn dev(name: &str, address: &str) -> Device {
        Device {
            name: name.into(),
            address: address.into(),
        }
    }

    #[test]
    fn test_filter_by_name() {
        let devices = vec![
            dev("Robot-1", "tcp://10.0.0.1:5000"),
            dev("Speaker", "tcp://10.0.0.2:5000"),
            dev("ESP32 Robot", "tcp://10.0.0.3:5000"),
            dev("Robot-1", "tcp://10.0.0.4:5000"),
            dev("robot-lowercase", "tcp://10.0.0.5:5000"),
        ];

        let robots = filter_by_name(devices, DEFAULT_ROBOT_NAME_FILTER);

        assert_eq!(
            robots,
            vec![
                dev("Robot-1", "tcp://10.0.0.1:5000"),
                dev("ESP32 Robot", "tcp://10.0.0.3:5000"),
            ]
        );
    }

    #[test]
    fn test_channel_uuids() {
        assert_eq!(Channel::from_uuid(THROTTLE_CHANNEL_UUID), Some(Channel::Throttle));
        assert_eq!(
            Channel::from_uuid(&ROTATION_CHANNEL_UUID.to_uppercase()),
            Some(Channel::Rotation)
        );
        assert_eq!(Channel::from_uuid(DRIVE_SERVICE_UUID), None);
        assert_eq!(format!("{}", Channel::Throttle), "throttle");
    }
}
