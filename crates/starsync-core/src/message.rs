//! Sync messages and batches.
//!
//! A [`SyncMessage`] is one versioned state record for a single
//! (origin, component) pair. Messages are immutable once built and are
//! shared by reference between the cluster view and outbound buffers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::component::ComponentId;
use crate::node::NodeId;

/// How a message is treated by receivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Authoritative state for one (origin, component) pair. Retained in
    /// the cluster view, delivered to the matching receiver.
    Snapshot = 0,
    /// Fan-out only. Never stored, never delivered to a receiver.
    Aggregate = 1,
}

impl MessageType {
    /// Wire value for this type.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value. Returns `None` for reserved values.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(MessageType::Snapshot),
            1 => Some(MessageType::Aggregate),
            _ => None,
        }
    }
}

/// One versioned state record.
///
/// Fields are private so a message cannot be altered after construction;
/// everything downstream (view, outbound buffers, receivers) may hold
/// shared references to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    origin: NodeId,
    component: ComponentId,
    message_type: MessageType,
    version: u64,
    payload: Bytes,
}

impl SyncMessage {
    /// Build a snapshot message.
    pub fn snapshot(
        origin: NodeId,
        component: ComponentId,
        version: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            origin,
            component,
            message_type: MessageType::Snapshot,
            version,
            payload: payload.into(),
        }
    }

    /// Build an aggregate message.
    pub fn aggregate(
        origin: NodeId,
        component: ComponentId,
        version: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            origin,
            component,
            message_type: MessageType::Aggregate,
            version,
            payload: payload.into(),
        }
    }

    /// The node that produced this message.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// The component this message belongs to.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Snapshot or aggregate.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Version counter, monotonic per (origin, component).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Opaque payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// True for [`MessageType::Aggregate`].
    pub fn is_aggregate(&self) -> bool {
        self.message_type == MessageType::Aggregate
    }
}

/// One wire frame: a sequence of messages, the unit of read and write.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBatch {
    /// Messages in wire order.
    pub messages: Vec<SyncMessage>,
}

impl MessageBatch {
    /// Number of messages in the frame.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the frame carries no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<SyncMessage>> for MessageBatch {
    fn from(messages: Vec<SyncMessage>) -> Self {
        Self { messages }
    }
}

impl IntoIterator for MessageBatch {
    type Item = SyncMessage;
    type IntoIter = std::vec::IntoIter<SyncMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
