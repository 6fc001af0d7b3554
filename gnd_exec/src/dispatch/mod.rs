//! Control-value dispatch module
//!
//! Decides when the operator's control state is transmitted to the robot. Sends are triggered by a
//! change in value or by a keep-alive interval, at most one send is ever outstanding, and an
//! emergency stop jumps ahead of routine values without breaking that rule.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod policy;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::link::{clamp_axis, Channel};
use serde::Serialize;
use std::fmt;

pub use policy::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default minimum interval between sends, which is also the keep-alive period.
///
/// Units: milliseconds
pub const DEFAULT_MIN_SEND_INTERVAL_MS: u64 = 50;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pair of axis values captured at the moment a send begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Snapshot {
    /// Forwards/backwards demand, in [-100, 100]
    pub throttle: i32,

    /// Turn demand, in [-100, 100]
    pub rotation: i32,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Snapshot {
    /// Both axes at rest.
    pub const STOP: Snapshot = Snapshot {
        throttle: 0,
        rotation: 0,
    };

    /// Create a new snapshot, clamping both values into the axis range.
    pub fn new(throttle: i32, rotation: i32) -> Self {
        Self {
            throttle: clamp_axis(throttle),
            rotation: clamp_axis(rotation),
        }
    }

    /// The value carried on the given channel.
    pub fn value(&self, channel: Channel) -> i32 {
        match channel {
            Channel::Throttle => self.throttle,
            Channel::Rotation => self.rotation,
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:+}, {:+})", self.throttle, self.rotation)
    }
}
