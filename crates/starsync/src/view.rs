//! The cluster view: latest known state per (origin, component).

use std::collections::HashMap;
use std::sync::Arc;

use starsync_core::{ComponentArray, ComponentId, NodeId, SyncMessage};

/// Outcome of offering a message to the view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceptance {
    /// The message is newer than anything stored for its key and was
    /// installed.
    Accepted,
    /// Something at least as new is already stored. Ties count as stale
    /// so duplicate delivery is idempotent.
    Stale,
    /// An aggregate: forwarded to peers but never stored.
    FanoutOnly,
}

/// In-memory store of the highest-version message observed for every
/// (origin, component) pair.
///
/// Version comparison is strict; wall-clock time is never consulted.
#[derive(Default)]
pub struct ClusterView {
    entries: HashMap<NodeId, ComponentArray<Option<Arc<SyncMessage>>>>,
}

impl ClusterView {
    /// An empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a message. Installs it when it is news, reports how it was
    /// treated either way.
    pub fn accept(&mut self, message: &Arc<SyncMessage>) -> Acceptance {
        if message.is_aggregate() {
            return Acceptance::FanoutOnly;
        }

        let slot = &mut self.entries.entry(message.origin()).or_default()[message.component()];
        if let Some(current) = slot {
            if current.version() >= message.version() {
                return Acceptance::Stale;
            }
        }
        *slot = Some(Arc::clone(message));
        Acceptance::Accepted
    }

    /// The stored message for one (origin, component), if any.
    pub fn get(&self, origin: &NodeId, component: ComponentId) -> Option<&Arc<SyncMessage>> {
        self.entries.get(origin)?[component].as_ref()
    }

    /// Version stored for one (origin, component), zero when absent.
    pub fn version_of(&self, origin: &NodeId, component: ComponentId) -> u64 {
        self.get(origin, component).map_or(0, |m| m.version())
    }

    /// Every stored message whose origin differs from `exclude`. Used to
    /// bring a freshly connected peer current.
    pub fn snapshot_excluding(&self, exclude: &NodeId) -> Vec<Arc<SyncMessage>> {
        self.entries
            .iter()
            .filter(|(origin, _)| *origin != exclude)
            .flat_map(|(_, slots)| slots.iter().filter_map(|(_, slot)| slot.as_ref()))
            .map(Arc::clone)
            .collect()
    }

    /// All stored messages, cloned out for inspection.
    pub fn messages(&self) -> Vec<SyncMessage> {
        self.entries
            .values()
            .flat_map(|slots| slots.iter().filter_map(|(_, slot)| slot.as_deref()))
            .cloned()
            .collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .map(|slots| slots.iter().filter(|(_, slot)| slot.is_some()).count())
            .sum()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deterministic digest of the view contents.
    ///
    /// Two nodes whose views hold the same entries produce the same
    /// digest, so convergence can be checked without exchanging full
    /// views.
    pub fn digest(&self) -> [u8; 32] {
        let mut stored: Vec<&Arc<SyncMessage>> = self
            .entries
            .values()
            .flat_map(|slots| slots.iter().filter_map(|(_, slot)| slot.as_ref()))
            .collect();
        stored.sort_by_key(|m| (m.origin(), m.component().index()));

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"starsync-view-v0:");
        for message in stored {
            hasher.update(message.origin().as_bytes());
            hasher.update(&message.component().as_u32().to_le_bytes());
            hasher.update(&message.version().to_le_bytes());
            hasher.update(&(message.payload().len() as u64).to_le_bytes());
            hasher.update(message.payload());
        }
        *hasher.finalize().as_bytes()
    }
}
