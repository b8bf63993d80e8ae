//! Error types for flowgate.

use thiserror::Error;

/// Main error type for all flowgate operations.
#[derive(Debug, Error)]
pub enum FlowgateError {
    /// I/O error during transport operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (event payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Context accessed outside the dynamic scope of an exchange.
    #[error("connection context unavailable outside an exchange scope")]
    ContextUnavailable,

    /// The peer aborted the exchange before it completed.
    #[error("peer aborted the exchange")]
    PeerAborted,

    /// The inbound body stream was already taken for this exchange.
    #[error("request body already consumed")]
    BodyAlreadyConsumed,

    /// The transport reported a write failure. Handled like an abort
    /// on the outbound path: no response is possible.
    #[error("transport write failed: {0}")]
    WriteFailed(String),

    /// Malformed event-stream record (e.g. unparseable `data` payload).
    #[error("event stream decode error: {0}")]
    Decode(String),

    /// Failed to bind the server listener.
    #[error("failed to listen: {0}")]
    Listen(String),
}

impl FlowgateError {
    /// True for the error kinds that terminate an exchange silently:
    /// the peer is gone, so there is nobody left to answer.
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            FlowgateError::PeerAborted | FlowgateError::WriteFailed(_)
        )
    }
}

/// Result type alias using FlowgateError.
pub type Result<T> = std::result::Result<T, FlowgateError>;
