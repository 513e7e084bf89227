//! The closed component enumeration.
//!
//! Components identify the kind of state a message carries. The set is
//! closed at build time, so per-component storage is a plain fixed-size
//! array indexed by the enumeration value.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Number of component slots.
pub const COMPONENT_COUNT: usize = 4;

/// Identifier for one kind of per-node state.
///
/// The discriminants are the wire values; see [`crate::wire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentId {
    /// Resource availability reported by each node.
    Resources = 0,
    /// Scheduling hints.
    Scheduler = 1,
    /// Node-targeted commands.
    Commands = 2,
    /// Liveness and health summaries.
    Health = 3,
}

impl ComponentId {
    /// Every component, in discriminant order.
    pub const ALL: [ComponentId; COMPONENT_COUNT] = [
        ComponentId::Resources,
        ComponentId::Scheduler,
        ComponentId::Commands,
        ComponentId::Health,
    ];

    /// Array index for this component.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Wire value for this component.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value. Returns `None` for reserved values.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ComponentId::Resources),
            1 => Some(ComponentId::Scheduler),
            2 => Some(ComponentId::Commands),
            3 => Some(ComponentId::Health),
            _ => None,
        }
    }
}

/// A fixed-size array with one slot per component.
///
/// This is the storage shape for the cluster view columns, the hook
/// registry, and per-peer version vectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentArray<T>([T; COMPONENT_COUNT]);

impl<T> ComponentArray<T> {
    /// Build an array from one value per component.
    pub fn from_fn(mut f: impl FnMut(ComponentId) -> T) -> Self {
        Self(std::array::from_fn(|i| f(ComponentId::ALL[i])))
    }

    /// Iterate slots together with their component ids.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &T)> {
        ComponentId::ALL.iter().copied().zip(self.0.iter())
    }

    /// Mutable variant of [`ComponentArray::iter`].
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ComponentId, &mut T)> {
        ComponentId::ALL.iter().copied().zip(self.0.iter_mut())
    }
}

impl<T: Default> Default for ComponentArray<T> {
    fn default() -> Self {
        Self(std::array::from_fn(|_| T::default()))
    }
}

impl<T> Index<ComponentId> for ComponentArray<T> {
    type Output = T;

    fn index(&self, component: ComponentId) -> &T {
        &self.0[component.index()]
    }
}

impl<T> IndexMut<ComponentId> for ComponentArray<T> {
    fn index_mut(&mut self, component: ComponentId) -> &mut T {
        &mut self.0[component.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_value_roundtrip() {
        for component in ComponentId::ALL {
            assert_eq!(ComponentId::from_u32(component.as_u32()), Some(component));
        }
    }

    #[test]
    fn test_reserved_values_rejected() {
        assert_eq!(ComponentId::from_u32(COMPONENT_COUNT as u32), None);
        assert_eq!(ComponentId::from_u32(u32::MAX), None);
    }

    #[test]
    fn test_component_array_indexing() {
        let mut versions = ComponentArray::<u64>::default();
        assert_eq!(versions[ComponentId::Scheduler], 0);
        versions[ComponentId::Scheduler] = 7;
        assert_eq!(versions[ComponentId::Scheduler], 7);
        assert_eq!(versions[ComponentId::Resources], 0);
    }

    #[test]
    fn test_component_array_iter_order() {
        let array = ComponentArray::from_fn(|c| c.index());
        let collected: Vec<_> = array.iter().map(|(c, v)| (c.index(), *v)).collect();
        assert_eq!(collected, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }
}
