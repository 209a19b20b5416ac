use crate::error::frame::FrameError;

use common::ErrorLocation;

use std::panic::Location;
use std::time::Duration;

use thiserror::Error as ThisError;

/// Client-side call failures.
///
/// `Timeout` and `Disconnected` are deliberately distinct so retrying logic
/// can tell "host is slow" from "host is gone".
#[derive(Debug, ThisError)]
pub enum ConnectorError {
    /// No response arrived within the caller's deadline. The host may still
    /// finish; its late response is discarded by id as orphaned.
    #[error("Timeout Error: no response within {waited:?} {location}")]
    Timeout {
        waited: Duration,
        location: ErrorLocation,
    },

    /// The connection dropped mid-flight, or no healthy connection exists.
    #[error("Disconnected Error: {message} {location}")]
    Disconnected {
        message: String,
        location: ErrorLocation,
    },

    /// The request could not be put on the wire.
    #[error("Protocol Error: {message} {location}")]
    Protocol {
        message: String,
        location: ErrorLocation,
    },
}

impl From<FrameError> for ConnectorError {
    #[track_caller]
    fn from(error: FrameError) -> Self {
        ConnectorError::Protocol {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
