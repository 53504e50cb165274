//! Shared utilities

pub mod error;

pub use error::{ProtocolError, ProtocolResult, TransitionError, TransitionResult};
