use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

/// Host-side socket listener errors.
///
/// Everything here is scoped to the listening socket or a single connection,
/// never to the host process.
#[derive(Debug, ThisError)]
pub enum ListenerError {
    #[error("Bind Error: {message} {location}")]
    Bind {
        message: String,
        location: ErrorLocation,
    },

    #[error("IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },
}

impl From<IoError> for ListenerError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        ListenerError::Io {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
