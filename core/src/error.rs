//! Error types for the API client.
//!
//! # Design
//! A failed call surfaces exactly one value to the caller. When the server
//! answered with a decodable JSON error body, that body is what the caller
//! gets (`Rejected`). Anything else, such as a refused connection or a 502
//! with an HTML page, is handed over as the raw `TransportError`.

use serde_json::Value;
use thiserror::Error;

/// Raw failure reported by a [`crate::Transport`], or a non-2xx response
/// whose body could not be decoded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The server answered with a non-2xx status and an undecodable body.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (DNS, connect, TLS, I/O).
    #[error("network error: {0}")]
    Network(String),
}

/// Errors returned by `ApiClient` calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned a non-2xx status with a JSON error body.
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: Value },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

impl ApiError {
    /// The decoded error body, when the server sent one.
    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Rejected { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Transport(TransportError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}
