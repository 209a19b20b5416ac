//! Command bridge between an automation client and a single-threaded host.
//!
//! The host (a GUI application that owns its one execution thread) exposes a
//! loopback TCP socket; an automation client sends code-execution and query
//! commands and receives correlated results. This crate is the bridge in the
//! middle:
//!
//! - [`wire`] - the request/response data model carried on the wire
//! - [`frame`] - length-prefixed framing over the byte stream
//! - [`codec`] - host-native values made safely transmissible
//! - [`queue`] - the thread-safe hand-off between I/O and the host thread
//! - [`listener`] - the host-side socket loops
//! - [`dispatcher`] - the main-thread drain called from the host's own tick
//! - [`connector`] - the client side: correlation, timeouts, reconnection
//!
//! # Architecture
//!
//! The host is only ever touched from its own thread: the listener's I/O
//! threads stop at the [`queue::CommandQueue`] boundary, and the host calls
//! [`dispatcher::Dispatcher::tick`] from its periodic scheduler to drain one
//! command at a time. The client side runs in the caller's tokio runtime and
//! may have many calls outstanding; the host still executes them one by one.

pub mod codec;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod listener;
pub mod logger;
pub mod queue;
pub mod wire;

#[cfg(test)]
mod tests;

/// Loopback address the bridge binds and connects to.
pub const BRIDGE_HOSTNAME: &str = "127.0.0.1";

/// Default bridge port.
pub const DEFAULT_BRIDGE_PORT: u16 = 9876;

/// Default `host:port` string for both sides of the bridge.
pub const DEFAULT_BRIDGE_ADDR: &str =
    const_format::concatcp!(BRIDGE_HOSTNAME, ":", DEFAULT_BRIDGE_PORT);
