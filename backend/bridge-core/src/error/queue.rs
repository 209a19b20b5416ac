use common::ErrorLocation;

use thiserror::Error as ThisError;

/// Errors from the command queue hand-off.
#[derive(Debug, ThisError)]
pub enum QueueError {
    /// Backpressure: the bounded FIFO is at capacity. The connection stays
    /// open; the listener stops reading frames until space frees.
    #[error("Queue Full: {capacity} commands already pending {location}")]
    Full {
        capacity: usize,
        location: ErrorLocation,
    },

    /// The submitting connection's generation is no longer current; its
    /// request must not land on the superseding connection.
    #[error("Queue Superseded: generation {generation} is no longer current {location}")]
    Superseded {
        generation: u64,
        location: ErrorLocation,
    },

    /// The queue was closed while a producer was waiting on it.
    #[error("Queue Closed {location}")]
    Closed { location: ErrorLocation },
}
