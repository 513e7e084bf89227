//! Error types for the fabric.

use thiserror::Error;

use starsync_core::WireError;

/// Transport-level failures, absorbed at the session boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The stream or endpoint is closed.
    #[error("connection closed")]
    Closed,

    /// Dial or initial metadata exchange failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Errors surfaced to hosts by the syncer engine.
#[derive(Debug, Error)]
pub enum SyncerError {
    /// `connect_to_leader` was called while a leader stream is live.
    #[error("leader already connected")]
    LeaderAlreadyConnected,

    /// Initial metadata did not carry the `node_id` key.
    #[error("missing node_id metadata")]
    MissingNodeId,

    /// The `node_id` metadata value is not valid lowercase hex.
    #[error("malformed node_id metadata: {0:?}")]
    MalformedNodeId(String),

    /// Failure while dialing or streaming.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The engine's event loop has shut down.
    #[error("syncer closed")]
    Closed,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncerError>;
