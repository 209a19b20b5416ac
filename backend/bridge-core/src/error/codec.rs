use common::ErrorLocation;

use thiserror::Error as ThisError;

/// Failures while converting a host-native value into the wire model.
///
/// These never cross the socket as-is: the dispatcher converts them into an
/// ERROR response describing the encoding failure, so a bad value can spoil
/// its own response but never corrupt a frame.
#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error("Codec Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },
}
