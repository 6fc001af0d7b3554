//! # Communications interface crate.
//!
//! Provides all common communications interfaces between the ground executable and the robot.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Link definitions: axis channels, payload encoding, protocol messages and the transport trait
pub mod link;

/// Network module
pub mod net;
