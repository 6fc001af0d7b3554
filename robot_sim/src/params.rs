//! # Robot Simulator Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RobotSimParams {
    /// Endpoint the link socket binds to
    pub endpoint: String,

    /// Name returned to scans, should contain the ground's robot name filter
    pub advertised_name: String,

    /// Time without a write after which the outputs are zeroed.
    ///
    /// Units: milliseconds
    pub cmd_timeout_ms: u64,

    /// Receive timeout of the link socket, bounds how late safe mode can be entered.
    ///
    /// Units: milliseconds
    pub poll_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for RobotSimParams {
    fn default() -> Self {
        Self {
            endpoint: "tcp://*:5100".into(),
            advertised_name: "ESP32 Robot".into(),
            cmd_timeout_ms: 500,
            poll_ms: 20,
        }
    }
}
