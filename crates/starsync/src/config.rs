//! Engine configuration.

use std::time::Duration;

use starsync_core::{ComponentArray, ComponentId, NodeId};

/// Configuration for a [`crate::Syncer`].
///
/// Transport addressing is not configured here: the engine consumes an
/// already-built connector, so where the leader lives is the host's
/// concern.
#[derive(Clone, Debug)]
pub struct SyncerConfig {
    /// This node's identity.
    pub node_id: NodeId,
    /// Publish period used when neither the per-component override nor
    /// the `register` call supplies one.
    pub default_publish_period: Duration,
    /// Per-component publish period overrides.
    pub publish_periods: ComponentArray<Option<Duration>>,
}

impl SyncerConfig {
    /// Default snapshot cadence.
    pub const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_millis(100);

    /// Configuration with default cadences.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            default_publish_period: Self::DEFAULT_PUBLISH_PERIOD,
            publish_periods: ComponentArray::default(),
        }
    }

    /// Override the publish period for one component.
    pub fn with_publish_period(mut self, component: ComponentId, period: Duration) -> Self {
        self.publish_periods[component] = Some(period);
        self
    }

    /// Override the default publish period.
    pub fn with_default_publish_period(mut self, period: Duration) -> Self {
        self.default_publish_period = period;
        self
    }
}
