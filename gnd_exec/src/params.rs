//! # Ground Executable Parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::{link::DEFAULT_ROBOT_NAME_FILTER, net::ZmqTransportOptions};
use serde::Deserialize;
use std::time::Duration;

use crate::{ctrl_state::DEFAULT_SPEED, dispatch::DEFAULT_MIN_SEND_INTERVAL_MS};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Parameters for the ground executable, loaded from `gnd_exec.toml`.
///
/// Any field missing from the file takes its default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GndExecParams {
    /// Period of the control loop.
    ///
    /// Units: milliseconds
    pub tick_period_ms: u64,

    /// Minimum interval between sends, also the keep-alive period.
    ///
    /// Units: milliseconds
    pub min_send_interval_ms: u64,

    /// Initial speed setting, 0 to 100
    pub speed: i32,

    /// How long a scan listens for devices.
    ///
    /// Units: milliseconds
    pub scan_timeout_ms: u64,

    /// Substring a device name must contain to be listed
    pub robot_name_filter: String,

    /// Endpoints probed during a scan
    pub candidate_endpoints: Vec<String>,

    /// Units: milliseconds
    pub connect_timeout_ms: u64,

    /// Timeout for a single channel write.
    ///
    /// Units: milliseconds
    pub write_timeout_ms: u64,

    /// How long a disconnect waits for the final stop to be delivered before closing anyway.
    ///
    /// Units: milliseconds
    pub disconnect_grace_ms: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl Default for GndExecParams {
    fn default() -> Self {
        Self {
            tick_period_ms: 10,
            min_send_interval_ms: DEFAULT_MIN_SEND_INTERVAL_MS,
            speed: DEFAULT_SPEED,
            scan_timeout_ms: 5000,
            robot_name_filter: DEFAULT_ROBOT_NAME_FILTER.into(),
            candidate_endpoints: vec!["tcp://localhost:5100".into()],
            connect_timeout_ms: 2000,
            write_timeout_ms: 500,
            disconnect_grace_ms: 200,
        }
    }
}

impl GndExecParams {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Options for the network transport.
    pub fn transport_options(&self) -> ZmqTransportOptions {
        ZmqTransportOptions {
            candidate_endpoints: self.candidate_endpoints.clone(),
            request_timeout_ms: clamp_ms(self.write_timeout_ms),
            connect_timeout_ms: clamp_ms(self.connect_timeout_ms),
        }
    }
}

/// zmq takes its timeouts as `i32`.
fn clamp_ms(ms: u64) -> i32 {
    ms.min(i32::MAX as u64) as i32
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_file_takes_defaults() {
        let params: GndExecParams = util::params::from_toml_str(
            "min_send_interval_ms = 80\ncandidate_endpoints = [\"tcp://10.0.0.7:5100\"]\n",
        )
        .unwrap();

        assert_eq!(params.min_send_interval(), Duration::from_millis(80));
        assert_eq!(params.tick_period_ms, 10);
        assert_eq!(params.robot_name_filter, "Robot");
        assert_eq!(
            params.transport_options().candidate_endpoints,
            vec!["tcp://10.0.0.7:5100".to_string()]
        );
    }

    #[test]
    fn test_timeouts_clamped_for_zmq() {
        let params = GndExecParams {
            write_timeout_ms: u64::MAX,
            ..Default::default()
        };

        assert_eq!(params.transport_options().request_timeout_ms, i32::MAX);
        assert_eq!(params.transport_options().connect_timeout_ms, 2000);
    }
}
