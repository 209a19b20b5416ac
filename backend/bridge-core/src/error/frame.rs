use common::ErrorLocation;

use thiserror::Error as ThisError;

/// Protocol errors on the framed byte stream.
///
/// Any of these on the receive path is grounds for closing the connection:
/// once a length prefix can't be trusted there is no way to resynchronize.
#[derive(Debug, ThisError)]
pub enum FrameError {
    #[error("Frame Length Error: declared {declared} bytes exceeds maximum {max} {location}")]
    Oversized {
        declared: usize,
        max: usize,
        location: ErrorLocation,
    },

    #[error("Frame Length Error: zero-length frame {location}")]
    Empty { location: ErrorLocation },

    #[error("Frame Decode Error: {message} {location}")]
    Decode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Frame Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },
}
