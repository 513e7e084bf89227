//! Proptest strategies for fabric types.

use proptest::prelude::*;

use starsync_core::{ComponentId, MessageBatch, NodeId, SyncMessage, COMPONENT_COUNT};

/// Any node id.
pub fn arb_node_id() -> impl Strategy<Value = NodeId> {
    any::<[u8; 16]>().prop_map(NodeId::from_bytes)
}

/// Node ids drawn from a small pool, so generated histories revisit the
/// same origins.
pub fn arb_pooled_node_id() -> impl Strategy<Value = NodeId> {
    (0u8..4).prop_map(|i| NodeId::from_bytes([i; 16]))
}

/// Any component.
pub fn arb_component() -> impl Strategy<Value = ComponentId> {
    (0..COMPONENT_COUNT).prop_map(|i| ComponentId::ALL[i])
}

/// A snapshot message with a bounded version and payload.
pub fn arb_snapshot() -> impl Strategy<Value = SyncMessage> {
    (
        arb_pooled_node_id(),
        arb_component(),
        1u64..100,
        prop::collection::vec(any::<u8>(), 0..32),
    )
        .prop_map(|(origin, component, version, payload)| {
            SyncMessage::snapshot(origin, component, version, payload)
        })
}

/// A snapshot or, occasionally, an aggregate.
pub fn arb_message() -> impl Strategy<Value = SyncMessage> {
    prop_oneof![
        4 => arb_snapshot(),
        1 => (
            arb_pooled_node_id(),
            arb_component(),
            0u64..100,
            prop::collection::vec(any::<u8>(), 0..32),
        )
            .prop_map(|(origin, component, version, payload)| {
                SyncMessage::aggregate(origin, component, version, payload)
            }),
    ]
}

/// A batch of up to `max` messages.
pub fn arb_batch(max: usize) -> impl Strategy<Value = MessageBatch> {
    prop::collection::vec(arb_message(), 0..max).prop_map(MessageBatch::from)
}
