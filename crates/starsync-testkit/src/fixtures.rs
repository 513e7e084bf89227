//! Test fixtures and helpers.
//!
//! Common setup code for unit and integration tests: hosts' sides of the
//! hook traits with inspectable state, and a ready-made in-memory
//! cluster.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use starsync::transport::memory::{self, MemoryEndpoint};
use starsync::{Receiver, Reporter, SyncService, Syncer, SyncerConfig};
use starsync_core::{ComponentId, NodeId, SyncMessage};

/// Handle for feeding a [`ScriptedReporter`] from test code.
#[derive(Clone, Default)]
pub struct ReporterScript {
    pending: Arc<Mutex<VecDeque<(u64, Bytes)>>>,
}

impl ReporterScript {
    /// Queue one snapshot for the reporter to publish on a future tick.
    pub fn publish(&self, version: u64, payload: impl Into<Bytes>) {
        self.pending
            .lock()
            .unwrap()
            .push_back((version, payload.into()));
    }
}

/// A [`Reporter`] that publishes exactly what the test scripted.
pub struct ScriptedReporter {
    origin: NodeId,
    component: ComponentId,
    script: ReporterScript,
}

impl Reporter for ScriptedReporter {
    fn snapshot(&self, current_version: u64) -> Option<SyncMessage> {
        let mut pending = self.script.pending.lock().unwrap();
        while let Some((version, payload)) = pending.pop_front() {
            if version > current_version {
                return Some(SyncMessage::snapshot(
                    self.origin,
                    self.component,
                    version,
                    payload,
                ));
            }
        }
        None
    }
}

/// A scripted reporter for `origin`/`component` plus its feeding handle.
pub fn scripted_reporter(
    origin: NodeId,
    component: ComponentId,
) -> (ScriptedReporter, ReporterScript) {
    let script = ReporterScript::default();
    (
        ScriptedReporter {
            origin,
            component,
            script: script.clone(),
        },
        script,
    )
}

/// Shared log of everything a [`RecordingReceiver`] was handed.
#[derive(Clone, Default)]
pub struct DeliveryLog {
    delivered: Arc<Mutex<Vec<SyncMessage>>>,
}

impl DeliveryLog {
    /// Everything delivered so far, in delivery order.
    pub fn messages(&self) -> Vec<SyncMessage> {
        self.delivered.lock().unwrap().clone()
    }

    /// Number of deliveries so far.
    pub fn len(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    /// True when nothing was delivered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Versions delivered for one (origin, component), in order.
    pub fn versions_for(&self, origin: NodeId, component: ComponentId) -> Vec<u64> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.origin() == origin && m.component() == component)
            .map(|m| m.version())
            .collect()
    }
}

/// A [`Receiver`] that records every delivery.
pub struct RecordingReceiver {
    log: DeliveryLog,
}

impl Receiver for RecordingReceiver {
    fn update(&mut self, message: &SyncMessage) {
        self.log.delivered.lock().unwrap().push(message.clone());
    }
}

/// A recording receiver plus its inspection handle.
pub fn recording_receiver() -> (RecordingReceiver, DeliveryLog) {
    let log = DeliveryLog::default();
    (RecordingReceiver { log: log.clone() }, log)
}

/// A leader plus followers wired up over the in-memory transport.
pub struct TestCluster {
    /// The hub node.
    pub leader: Syncer,
    /// Spoke nodes, in connection order.
    pub followers: Vec<Syncer>,
    /// Endpoint for dialing additional followers in.
    pub endpoint: MemoryEndpoint,
    serve: JoinHandle<()>,
}

impl TestCluster {
    /// Start a leader and `follower_count` connected followers.
    pub async fn start(follower_count: usize) -> Self {
        let leader = Syncer::spawn(SyncerConfig::new(NodeId::random()));
        let (endpoint, listener) = memory::endpoint();
        let serve = tokio::spawn(SyncService::new(leader.clone()).serve(listener));

        let mut followers = Vec::with_capacity(follower_count);
        for _ in 0..follower_count {
            let follower = Syncer::spawn(SyncerConfig::new(NodeId::random()));
            follower
                .connect_to_leader(Box::new(endpoint.clone()))
                .await
                .expect("follower failed to connect");
            followers.push(follower);
        }

        Self {
            leader,
            followers,
            endpoint,
            serve,
        }
    }

    /// Spawn one more follower and connect it.
    pub async fn add_follower(&mut self, node_id: NodeId) -> Syncer {
        let follower = Syncer::spawn(SyncerConfig::new(node_id));
        follower
            .connect_to_leader(Box::new(self.endpoint.clone()))
            .await
            .expect("follower failed to connect");
        self.followers.push(follower.clone());
        follower
    }

    /// Leader and followers together.
    pub fn nodes(&self) -> impl Iterator<Item = &Syncer> {
        std::iter::once(&self.leader).chain(self.followers.iter())
    }

    /// True when every node's view digest matches.
    pub async fn converged(&self) -> bool {
        let reference = self.leader.view_digest().await.expect("leader digest");
        for follower in &self.followers {
            if follower.view_digest().await.expect("follower digest") != reference {
                return false;
            }
        }
        true
    }

    /// Poll until every view digest matches.
    ///
    /// Panics when `timeout` elapses first.
    pub async fn wait_converged(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.converged().await {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "cluster failed to converge within {:?}",
                timeout
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until `predicate` holds.
    ///
    /// Panics when `timeout` elapses first.
    pub async fn wait_until<F>(&self, timeout: Duration, what: &str, mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while !predicate() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {}",
                what
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop every node and the serve loop.
    pub fn shutdown(self) {
        for node in self.nodes() {
            node.shutdown();
        }
        self.serve.abort();
    }
}
