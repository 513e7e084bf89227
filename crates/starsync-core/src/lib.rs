//! # Starsync Core
//!
//! Pure primitives for the starsync fabric: node identities, the closed
//! component enumeration, sync messages, and the binary wire codec.
//!
//! This crate contains no I/O, no tasks, no transport. It is pure data
//! shared between the engine, the transport layer, and host code.
//!
//! ## Key Types
//!
//! - [`NodeId`] - 16-byte identifier, unique per participant
//! - [`ComponentId`] - index into the closed component enumeration
//! - [`ComponentArray`] - fixed-size array with one slot per component
//! - [`SyncMessage`] - one versioned state record, immutable once built
//! - [`MessageBatch`] - the wire frame, a sequence of messages
//!
//! ## Wire Encoding
//!
//! Frames are CBOR maps with fixed small-integer keys, so unknown fields
//! added by newer peers are skipped by older ones. See [`wire`].

pub mod component;
pub mod error;
pub mod message;
pub mod node;
pub mod wire;

pub use component::{ComponentArray, ComponentId, COMPONENT_COUNT};
pub use error::WireError;
pub use message::{MessageBatch, MessageType, SyncMessage};
pub use node::{NodeId, NODE_ID_LEN};
pub use wire::{decode_batch, encode_batch};
