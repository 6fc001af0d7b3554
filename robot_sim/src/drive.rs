//! # Drive Outputs
//!
//! The simulated robot's two drive outputs and its safe mode. If no write arrives for the command
//! timeout the outputs are zeroed, so a robot whose operator vanished comes to rest on its own.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::link::Channel;
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct DriveState {
    throttle: i32,

    rotation: i32,

    cmd_timeout: Duration,

    last_write: Option<Instant>,

    /// Starts in safe mode until the first write
    safe: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveState {
    pub fn new(cmd_timeout: Duration) -> Self {
        Self {
            throttle: 0,
            rotation: 0,
            cmd_timeout,
            last_write: None,
            safe: true,
        }
    }

    /// Set one output. Returns `true` if this write took the robot out of safe mode.
    pub fn apply(&mut self, channel: Channel, value: i32, now: Instant) -> bool {
        match channel {
            Channel::Throttle => self.throttle = value,
            Channel::Rotation => self.rotation = value,
        }
        self.last_write = Some(now);

        let was_safe = self.safe;
        self.safe = false;
        was_safe
    }

    /// Enter safe mode if the command timeout has passed. Returns `true` on entry.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if self.safe {
            return false;
        }

        let expired = self
            .last_write
            .map(|t| now.saturating_duration_since(t) >= self.cmd_timeout)
            .unwrap_or(true);

        if expired {
            self.throttle = 0;
            self.rotation = 0;
            self.safe = true;
        }

        expired
    }

    /// Current (throttle, rotation) outputs.
    pub fn outputs(&self) -> (i32, i32) {
        (self.throttle, self.rotation)
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_safe_mode_timeout() {
        let t0 = Instant::now();
        let mut d = DriveState::new(Duration::from_millis(500));

        assert!(d.is_safe());
        assert!(d.apply(Channel::Throttle, 80, t0));
        assert!(!d.apply(Channel::Rotation, -20, t0));
        assert_eq!(d.outputs(), (80, -20));

        assert!(!d.check_timeout(t0 + Duration::from_millis(499)));
        assert_eq!(d.outputs(), (80, -20));

        assert!(d.check_timeout(t0 + Duration::from_millis(500)));
        assert_eq!(d.outputs(), (0, 0));

        // Already safe, not reported again
        assert!(!d.check_timeout(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_writes_hold_off_timeout() {
        let t0 = Instant::now();
        let mut d = DriveState::new(Duration::from_millis(100));

        for i in 0..10 {
            let now = t0 + Duration::from_millis(i * 50);
            d.apply(Channel::Throttle, 100, now);
            assert!(!d.check_timeout(now + Duration::from_millis(49)));
        }
        assert_eq!(d.outputs(), (100, 0));
    }
}
