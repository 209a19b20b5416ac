pub mod codec;
pub mod config;
pub mod connector;
pub mod frame;
pub mod listener;
pub mod queue;

use common::ErrorLocation;

use thiserror::Error;

/// Aggregate error for callers that drive the whole bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] codec::CodecError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Connector(#[from] connector::ConnectorError),

    #[error(transparent)]
    Frame(#[from] frame::FrameError),

    #[error(transparent)]
    Listener(#[from] listener::ListenerError),

    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error("Logger Error: {message} {location}")]
    Logger {
        message: String,
        location: ErrorLocation,
    },
}
