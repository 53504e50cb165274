//! Recording protocol wire messages
//!
//! JSON frames exchanged with the recording backend over a persistent
//! connection. Each frame is `{ "op": <opcode>, "d": <payload> }`; the
//! payloads the client cares about are typed below, everything else (events)
//! is carried as raw JSON and skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server -> client greeting, may carry an authentication challenge
pub const OP_HELLO: u8 = 0;
/// Client -> server identification reply
pub const OP_IDENTIFY: u8 = 1;
/// Server -> client handshake confirmation
pub const OP_IDENTIFIED: u8 = 2;
/// Client -> server request
pub const OP_REQUEST: u8 = 6;
/// Server -> client response, correlated by request id
pub const OP_REQUEST_RESPONSE: u8 = 7;

/// A single wire frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl Frame {
    pub fn new<T: Serialize>(op: u8, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            op,
            d: serde_json::to_value(payload)?,
        })
    }
}

/// Challenge material from the server's hello
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthChallenge {
    #[serde(default)]
    pub challenge: String,
    #[serde(default)]
    pub salt: String,
}

/// Payload of the hello frame
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    #[serde(default)]
    pub rpc_version: Option<u32>,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Payload of the identify frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    pub rpc_version: u32,
    pub event_subscriptions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl IdentifyPayload {
    /// Identify with rpc version 1 and the default event subscription
    pub fn new() -> Self {
        Self {
            rpc_version: 1,
            event_subscriptions: 1,
            authentication: None,
            password: None,
        }
    }
}

impl Default for IdentifyPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of an outbound request frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// Payload of a response frame
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

impl ResponsePayload {
    /// Whether the request succeeded, counting soft "already in that state"
    /// replies as success
    pub fn is_effectively_ok(&self) -> bool {
        self.request_status.result || self.request_status.is_soft_state_mismatch()
    }

    /// A string field out of `response_data`, if present and non-empty
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.response_data
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Result and comment attached to every response
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl RequestStatus {
    /// Whether a failed status only says the target was already in the
    /// requested state ("already active" / "not active" / "already
    /// inactive"); these are logged at warning level and treated as success.
    pub fn is_soft_state_mismatch(&self) -> bool {
        let comment = match &self.comment {
            Some(c) => c.to_ascii_lowercase(),
            None => return false,
        };
        comment.contains("already active")
            || comment.contains("already inactive")
            || comment.contains("not active")
    }

    pub fn comment_or_default(&self) -> &str {
        self.comment.as_deref().unwrap_or("no comment")
    }
}
