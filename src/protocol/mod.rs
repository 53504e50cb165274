//! Recording protocol module
//!
//! Wire messages, handshake authentication, and the persistent client for
//! the external recording backend.

pub mod auth;
pub mod client;
pub mod message;

pub use client::RecordingClient;
pub use message::{Frame, RequestStatus, ResponsePayload};
