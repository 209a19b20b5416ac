//! Length-prefixed framing over the byte stream.
//!
//! Each frame is a 4-byte big-endian unsigned length followed by that many
//! bytes of JSON-encoded [`WireMessage`]. Command payloads carry arbitrary
//! code strings, so delimiter- or line-based framing is off the table; the
//! prefix is the only thing the receiver has to trust, and a prefix of zero
//! or beyond the configured maximum terminates the connection.
//!
//! The decoder is transport-agnostic: the host side feeds it from blocking
//! `std::net` reads, the client side from tokio reads. Partial reads are
//! normal - bytes accumulate until a full frame is available.

use crate::error::frame::FrameError;
use crate::wire::WireMessage;

use common::ErrorLocation;

use std::panic::Location;

/// Width of the length prefix.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Serialize a message into one wire frame (prefix + payload).
pub fn encode_frame(
    message: &WireMessage,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(message).map_err(|e| FrameError::Encode {
        message: format!("failed to serialize message: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if payload.len() > max_frame_bytes {
        return Err(FrameError::Oversized {
            declared: payload.len(),
            max: max_frame_bytes,
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Incremental frame decoder with a growable receive buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Append freshly read bytes. A short read is not an error; the decoder
    /// simply waits for more.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] on an untrustworthy prefix (zero or oversized
    /// length) or undecodable payload. The caller must treat any error as
    /// fatal for the connection.
    pub fn next_frame(&mut self) -> Result<Option<WireMessage>, FrameError> {
        if self.buffer.len() < LENGTH_PREFIX_BYTES {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_BYTES]);
        let declared = u32::from_be_bytes(prefix) as usize;

        if declared == 0 {
            return Err(FrameError::Empty {
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if declared > self.max_frame_bytes {
            return Err(FrameError::Oversized {
                declared,
                max: self.max_frame_bytes,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.buffer.len() < LENGTH_PREFIX_BYTES + declared {
            return Ok(None);
        }

        let payload: Vec<u8> = self
            .buffer
            .drain(..LENGTH_PREFIX_BYTES + declared)
            .skip(LENGTH_PREFIX_BYTES)
            .collect();

        let message = serde_json::from_slice(&payload).map_err(|e| FrameError::Decode {
            message: format!("failed to decode frame payload: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        Ok(Some(message))
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
