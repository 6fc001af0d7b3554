//! Messages exchanged between the ground and the robot over the network link.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A request sent from the ground to the robot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRequest {
    /// Ask the robot to identify itself.
    Advertise,

    /// Write a value to one of the robot's channels.
    Write {
        /// UUID of the channel to write
        channel_id: String,

        /// Channel payload, the decimal ASCII text of an axis value
        payload: String,
    },
}

/// The robot's answer to a [`LinkRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkResponse {
    /// Answer to [`LinkRequest::Advertise`]
    Advertise { name: String },

    /// The write was accepted
    WriteOk,

    /// The request was rejected, with the reason
    Invalid(String),
}
