//! Error types for the core crate.

use thiserror::Error;

/// Errors produced by the wire codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The frame is not well-formed CBOR or not a frame at all.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A required field is absent from the frame.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but carries the wrong shape of value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The component wire value is reserved.
    #[error("unknown component id: {0}")]
    UnknownComponent(u32),

    /// The message type wire value is reserved.
    #[error("reserved message type: {0}")]
    ReservedMessageType(u32),

    /// The origin field is not a node id.
    #[error("origin must be {expected} bytes, got {got}")]
    InvalidOriginLength {
        /// Required length.
        expected: usize,
        /// Length found in the frame.
        got: usize,
    },
}
