//! Host-supplied component hooks.
//!
//! A host registers a [`Reporter`] to produce local snapshots and a
//! [`Receiver`] to consume accepted remote state, per component.

use starsync_core::{ComponentArray, ComponentId, SyncMessage};

/// Produces snapshots of local component state.
///
/// Called on the engine's event loop at the component's publish cadence,
/// so implementations must not block. The returned message must carry
/// the local node as origin, the registered component, and a version
/// strictly greater than `current_version`; a message that fails the
/// version rule is discarded as stale.
pub trait Reporter: Send {
    /// Return fresh state, or `None` when nothing changed since
    /// `current_version`.
    fn snapshot(&self, current_version: u64) -> Option<SyncMessage>;
}

/// Consumes state accepted from other nodes.
///
/// Called on the engine's event loop, once per accepted remote message
/// for the component; must not block.
pub trait Receiver: Send {
    /// Deliver one accepted message.
    fn update(&mut self, message: &SyncMessage);
}

/// Per-component hook slots.
#[derive(Default)]
pub(crate) struct Registry {
    reporters: ComponentArray<Option<Box<dyn Reporter>>>,
    receivers: ComponentArray<Option<Box<dyn Receiver>>>,
}

impl Registry {
    /// Install hooks for a component, replacing any prior ones.
    pub(crate) fn install(
        &mut self,
        component: ComponentId,
        reporter: Option<Box<dyn Reporter>>,
        receiver: Option<Box<dyn Receiver>>,
    ) {
        self.reporters[component] = reporter;
        self.receivers[component] = receiver;
    }

    pub(crate) fn reporter(&self, component: ComponentId) -> Option<&dyn Reporter> {
        self.reporters[component].as_deref()
    }

    pub(crate) fn receiver_mut(
        &mut self,
        component: ComponentId,
    ) -> Option<&mut (dyn Receiver + '_)> {
        match &mut self.receivers[component] {
            Some(receiver) => Some(&mut **receiver),
            None => None,
        }
    }
}
