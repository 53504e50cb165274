//! Error types and handling
//!
//! Common error types used across the crate, split by concern: state
//! transitions, recording protocol traffic, and persistence.

use std::time::Duration;

use thiserror::Error;

use crate::state::record::RoundState;

/// Errors raised by the round state machine
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("illegal transition from {current} to {attempted}")]
    Illegal {
        current: RoundState,
        attempted: RoundState,
    },

    #[error("no more rounds available: round {round} of {total_rounds}")]
    RoundsExhausted { round: u32, total_rounds: u32 },

    #[error("failed to persist round record: {0}")]
    Persist(#[from] std::io::Error),

    #[error("failed to encode round record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised by the recording protocol client
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection to recording backend failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("authentication rejected by recording backend")]
    AuthRejected,

    #[error("connection closed by recording backend")]
    Closed,

    #[error("invalid wire frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("request '{request_type}' failed after reconnect")]
    RetryExhausted { request_type: String },
}

/// Result type alias for state machine operations
pub type TransitionResult<T> = Result<T, TransitionError>;

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
