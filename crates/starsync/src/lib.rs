//! # Starsync
//!
//! Hub-and-spoke state synchronization for a cluster of identical
//! processes. One node is the leader; every other node keeps a single
//! bidirectional stream to it. Each node publishes versioned per-component
//! state, and the fabric converges every node's view to the latest
//! snapshot for every (origin, component) pair.
//!
//! ## Topology
//!
//! ```text
//!             follower B
//!                 |
//!   follower A - leader - follower C
//!                 |
//!             follower D
//! ```
//!
//! Followers send their local updates up the stream; the leader merges
//! everything it hears and fans the news back out. Delivery is
//! at-least-once on the wire and exactly-once into host [`Receiver`]s,
//! with strictly increasing versions per (origin, component).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use starsync::transport::memory;
//! use starsync::{NodeId, SyncService, Syncer, SyncerConfig};
//!
//! # async fn example() -> starsync::Result<()> {
//! // Leader side.
//! let leader = Syncer::spawn(SyncerConfig::new(NodeId::random()));
//! let (endpoint, listener) = memory::endpoint();
//! tokio::spawn(SyncService::new(leader.clone()).serve(listener));
//!
//! // Follower side.
//! let follower = Syncer::spawn(SyncerConfig::new(NodeId::random()));
//! follower.connect_to_leader(Box::new(endpoint)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Hosts plug in per-component [`Reporter`]s (periodic snapshot
//! producers) and [`Receiver`]s (delivery callbacks) through
//! [`Syncer::register`].
//!
//! ## Guarantees
//!
//! - Versions delivered for one (origin, component) strictly increase.
//! - A quiet cluster converges: every view ends up with the same
//!   entries, checkable via [`Syncer::view_digest`].
//! - No receiver ever sees a message its own node produced.
//! - One outbound frame carries at most one message per origin, the
//!   newest buffered.

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod service;
mod session;
pub mod transport;
pub mod view;

pub use config::SyncerConfig;
pub use engine::Syncer;
pub use error::{Result, SyncerError, TransportError};
pub use registry::{Receiver, Reporter};
pub use service::SyncService;
pub use view::{Acceptance, ClusterView};

pub use starsync_core::{
    ComponentArray, ComponentId, MessageBatch, MessageType, NodeId, SyncMessage, COMPONENT_COUNT,
};
