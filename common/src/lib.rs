//! Shared plumbing for the bridge workspace.
//!
//! This crate holds the pieces every other crate's error types lean on.
//! It has no business logic - keeping it dependency-light means the error
//! enums in `bridge-core` can embed an [`ErrorLocation`] without dragging
//! the whole bridge in.

pub mod error;


pub use error::error_location::ErrorLocation;
