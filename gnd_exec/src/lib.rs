//! # Ground library.
//!
//! This library allows other crates in the workspace, and the integration tests, to access items
//! defined inside the ground crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control state - which drive keys are held and the demands they produce
pub mod ctrl_state;

/// Dispatch - decides when demands are sent to the robot
pub mod dispatch;

/// Link client - runs the transport on a worker thread
pub mod link_client;

/// Operator commands - console and script command parsing and execution
pub mod operator;

/// Parameters for the ground executable
pub mod params;

/// Session control - scanning, connecting and disconnecting
pub mod session_ctrl;
