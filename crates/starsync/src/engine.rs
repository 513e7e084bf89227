//! The syncer engine.
//!
//! All mutable state (cluster view, hook registry, peer sessions,
//! publish tickers) is owned by a single task. [`Syncer`] is a cheap
//! cloneable handle that feeds ops into that task; internal events from
//! stream tasks and tickers arrive on the same queue, so everything is
//! applied strictly in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use starsync_core::{ComponentArray, ComponentId, MessageBatch, NodeId, SyncMessage};

use crate::config::SyncerConfig;
use crate::error::{Result, SyncerError, TransportError};
use crate::registry::{Receiver, Registry, Reporter};
use crate::session::PeerSession;
use crate::transport::{node_id_from_metadata, node_id_metadata, Channel, LeaderConnector, Metadata};
use crate::view::{Acceptance, ClusterView};

/// Ops processed by the engine task. Host calls and internal events
/// share one queue.
pub(crate) enum Op {
    Register {
        component: ComponentId,
        reporter: Option<Box<dyn Reporter>>,
        receiver: Option<Box<dyn Receiver>>,
        period: Option<Duration>,
    },
    Update {
        message: SyncMessage,
    },
    ConnectLeader {
        connector: Box<dyn LeaderConnector>,
        reply: oneshot::Sender<Result<NodeId>>,
    },
    LeaderDialed {
        result: std::result::Result<(Metadata, Channel), TransportError>,
        reply: oneshot::Sender<Result<NodeId>>,
    },
    Accept {
        peer: NodeId,
        channel: Channel,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        peer: NodeId,
    },
    Inbound {
        peer: NodeId,
        token: u64,
        batch: MessageBatch,
    },
    WriteDone {
        peer: NodeId,
        token: u64,
        result: std::result::Result<(), TransportError>,
    },
    PeerClosed {
        peer: NodeId,
        token: u64,
    },
    Tick {
        component: ComponentId,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    ClusterState {
        reply: oneshot::Sender<Vec<SyncMessage>>,
    },
    ViewDigest {
        reply: oneshot::Sender<[u8; 32]>,
    },
    Shutdown,
}

/// Handle to a running syncer engine.
///
/// One node runs one engine. The leader accepts follower streams through
/// [`Syncer::accept`] (usually via [`crate::SyncService`]); a follower
/// dials with [`Syncer::connect_to_leader`]. Local state flows in through
/// registered [`Reporter`]s or direct [`Syncer::update`] calls and is
/// reconciled and fanned out to every connected peer.
#[derive(Clone)]
pub struct Syncer {
    node_id: NodeId,
    ops: mpsc::UnboundedSender<Op>,
}

impl Syncer {
    /// Start an engine on the current tokio runtime.
    pub fn spawn(config: SyncerConfig) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let node_id = config.node_id;
        let state = EngineState::new(config, ops_tx.clone());
        tokio::spawn(state.run(ops_rx));
        Self {
            node_id,
            ops: ops_tx,
        }
    }

    /// This node's identity.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Install hooks for a component, replacing any prior ones. A
    /// reporter arms the periodic snapshot driver at `period` (falling
    /// back to the configured cadence).
    pub fn register(
        &self,
        component: ComponentId,
        reporter: Option<Box<dyn Reporter>>,
        receiver: Option<Box<dyn Receiver>>,
        period: Option<Duration>,
    ) {
        let _ = self.ops.send(Op::Register {
            component,
            reporter,
            receiver,
            period,
        });
    }

    /// Inject one message. This is the single write path: the message is
    /// reconciled against the cluster view and, when it is news, fanned
    /// out to every connected peer.
    pub fn update(&self, message: SyncMessage) {
        let _ = self.ops.send(Op::Update { message });
    }

    /// Dial the leader and run the initial metadata exchange. At most
    /// one leader stream may be live at a time.
    pub async fn connect_to_leader(&self, connector: Box<dyn LeaderConnector>) -> Result<NodeId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops
            .send(Op::ConnectLeader {
                connector,
                reply: reply_tx,
            })
            .map_err(|_| SyncerError::Closed)?;
        reply_rx.await.map_err(|_| SyncerError::Closed)?
    }

    /// Register an established follower stream under the peer's id. An
    /// existing stream for the same peer is replaced.
    pub async fn accept(&self, peer: NodeId, channel: Channel) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops
            .send(Op::Accept {
                peer,
                channel,
                reply: reply_tx,
            })
            .map_err(|_| SyncerError::Closed)?;
        reply_rx.await.map_err(|_| SyncerError::Closed)?
    }

    /// Drop the stream to `peer`, if any.
    pub fn disconnect(&self, peer: NodeId) {
        let _ = self.ops.send(Op::Disconnect { peer });
    }

    /// Ids of every connected peer (leader and followers).
    pub async fn connected_peers(&self) -> Result<Vec<NodeId>> {
        self.query(|reply| Op::ConnectedPeers { reply }).await
    }

    /// The current cluster view contents.
    pub async fn cluster_state(&self) -> Result<Vec<SyncMessage>> {
        self.query(|reply| Op::ClusterState { reply }).await
    }

    /// Digest of the current cluster view; equal digests mean converged
    /// views.
    pub async fn view_digest(&self) -> Result<[u8; 32]> {
        self.query(|reply| Op::ViewDigest { reply }).await
    }

    /// Stop the engine. Streams and tickers are torn down.
    pub fn shutdown(&self) {
        let _ = self.ops.send(Op::Shutdown);
    }

    async fn query<T>(&self, op: impl FnOnce(oneshot::Sender<T>) -> Op) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ops
            .send(op(reply_tx))
            .map_err(|_| SyncerError::Closed)?;
        reply_rx.await.map_err(|_| SyncerError::Closed)
    }
}

struct EngineState {
    node_id: NodeId,
    config: SyncerConfig,
    ops: mpsc::UnboundedSender<Op>,
    view: ClusterView,
    registry: Registry,
    tickers: ComponentArray<Option<JoinHandle<()>>>,
    leader: Option<PeerSession>,
    leader_pending: bool,
    followers: HashMap<NodeId, PeerSession>,
    next_token: u64,
}

impl EngineState {
    fn new(config: SyncerConfig, ops: mpsc::UnboundedSender<Op>) -> Self {
        Self {
            node_id: config.node_id,
            config,
            ops,
            view: ClusterView::new(),
            registry: Registry::default(),
            tickers: ComponentArray::default(),
            leader: None,
            leader_pending: false,
            followers: HashMap::new(),
            next_token: 0,
        }
    }

    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<Op>) {
        debug!(node = %self.node_id, "syncer started");
        while let Some(op) = ops.recv().await {
            if !self.handle(op) {
                break;
            }
        }
        self.teardown();
        debug!(node = %self.node_id, "syncer stopped");
    }

    /// Apply one op. Returns false when the loop should stop.
    fn handle(&mut self, op: Op) -> bool {
        match op {
            Op::Register {
                component,
                reporter,
                receiver,
                period,
            } => self.handle_register(component, reporter, receiver, period),
            Op::Update { message } => self.apply_update(message, None),
            Op::ConnectLeader { connector, reply } => self.handle_connect_leader(connector, reply),
            Op::LeaderDialed { result, reply } => self.handle_leader_dialed(result, reply),
            Op::Accept {
                peer,
                channel,
                reply,
            } => {
                let result = self.handle_accept(peer, channel);
                let _ = reply.send(result);
            }
            Op::Disconnect { peer } => self.drop_peer(&peer, None, "disconnect requested"),
            Op::Inbound { peer, token, batch } => self.handle_inbound(peer, token, batch),
            Op::WriteDone {
                peer,
                token,
                result,
            } => match result {
                Ok(()) => {
                    if let Some(session) = self.session_mut(&peer, token) {
                        session.on_write_done();
                    }
                }
                Err(err) => {
                    warn!(%peer, error = %err, "sync write failed");
                    self.drop_peer(&peer, Some(token), "write failed");
                }
            },
            Op::PeerClosed { peer, token } => {
                self.drop_peer(&peer, Some(token), "stream closed")
            }
            Op::Tick { component } => self.handle_tick(component),
            Op::ConnectedPeers { reply } => {
                let mut peers: Vec<NodeId> = self.followers.keys().copied().collect();
                if let Some(leader) = &self.leader {
                    peers.push(leader.peer());
                }
                let _ = reply.send(peers);
            }
            Op::ClusterState { reply } => {
                let _ = reply.send(self.view.messages());
            }
            Op::ViewDigest { reply } => {
                let _ = reply.send(self.view.digest());
            }
            Op::Shutdown => return false,
        }
        true
    }

    fn handle_register(
        &mut self,
        component: ComponentId,
        reporter: Option<Box<dyn Reporter>>,
        receiver: Option<Box<dyn Receiver>>,
        period: Option<Duration>,
    ) {
        let has_reporter = reporter.is_some();
        self.registry.install(component, reporter, receiver);

        if let Some(ticker) = self.tickers[component].take() {
            ticker.abort();
        }
        if has_reporter {
            let period = period
                .or(self.config.publish_periods[component])
                .unwrap_or(self.config.default_publish_period);
            assert!(!period.is_zero(), "publish period must be positive");

            let ops = self.ops.clone();
            self.tickers[component] = Some(tokio::spawn(async move {
                let mut ticks = interval_at(Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticks.tick().await;
                    if ops.send(Op::Tick { component }).is_err() {
                        break;
                    }
                }
            }));
        }
    }

    fn handle_tick(&mut self, component: ComponentId) {
        let current = self.view.version_of(&self.node_id, component);
        let produced = match self.registry.reporter(component) {
            Some(reporter) => reporter.snapshot(current),
            None => None,
        };
        if let Some(message) = produced {
            assert_eq!(
                message.origin(),
                self.node_id,
                "reporter must publish for the local node"
            );
            assert_eq!(
                message.component(),
                component,
                "reporter must publish for its own component"
            );
            self.apply_update(message, None);
        }
    }

    /// The single write path into the cluster view, shared by local
    /// injection and the inbound stream path. `source` names the peer a
    /// message arrived from, so fan-out skips that stream.
    fn apply_update(&mut self, message: SyncMessage, source: Option<NodeId>) {
        let message = Arc::new(message);
        let outcome = self.view.accept(&message);
        match outcome {
            Acceptance::Stale => {
                debug!(
                    origin = %message.origin(),
                    component = ?message.component(),
                    version = message.version(),
                    "stale update dropped"
                );
            }
            Acceptance::Accepted | Acceptance::FanoutOnly => {
                self.fan_out(&message, source);
                if outcome == Acceptance::Accepted && message.origin() != self.node_id {
                    if let Some(receiver) = self.registry.receiver_mut(message.component()) {
                        receiver.update(&message);
                    }
                }
            }
        }
    }

    fn fan_out(&mut self, message: &Arc<SyncMessage>, source: Option<NodeId>) {
        if let Some(leader) = self.leader.as_mut() {
            if source != Some(leader.peer()) {
                leader.offer(message);
            }
        }
        for (peer, session) in self.followers.iter_mut() {
            if source != Some(*peer) {
                session.offer(message);
            }
        }
    }

    fn handle_connect_leader(
        &mut self,
        mut connector: Box<dyn LeaderConnector>,
        reply: oneshot::Sender<Result<NodeId>>,
    ) {
        if self.leader.is_some() || self.leader_pending {
            let _ = reply.send(Err(SyncerError::LeaderAlreadyConnected));
            return;
        }
        self.leader_pending = true;

        let ops = self.ops.clone();
        let local = node_id_metadata(&self.node_id);
        tokio::spawn(async move {
            let result = connector.connect(local).await;
            let _ = ops.send(Op::LeaderDialed { result, reply });
        });
    }

    fn handle_leader_dialed(
        &mut self,
        result: std::result::Result<(Metadata, Channel), TransportError>,
        reply: oneshot::Sender<Result<NodeId>>,
    ) {
        self.leader_pending = false;
        let (metadata, channel) = match result {
            Ok(established) => established,
            Err(err) => {
                warn!(error = %err, "leader dial failed");
                let _ = reply.send(Err(err.into()));
                return;
            }
        };
        let peer = match node_id_from_metadata(&metadata) {
            Ok(peer) => peer,
            Err(err) => {
                warn!(error = %err, "leader metadata rejected");
                let _ = reply.send(Err(err));
                return;
            }
        };

        let session = self.start_session(peer, channel);
        self.leader = Some(session);
        info!(leader = %peer, "connected to leader");
        let _ = reply.send(Ok(peer));
    }

    fn handle_accept(&mut self, peer: NodeId, channel: Channel) -> Result<()> {
        if let Some(old) = self.followers.remove(&peer) {
            info!(%peer, "replacing follower stream");
            old.shutdown();
        }
        let session = self.start_session(peer, channel);
        self.followers.insert(peer, session);
        info!(%peer, "follower connected");
        Ok(())
    }

    /// Start a session and bring the peer current by replaying the view.
    fn start_session(&mut self, peer: NodeId, channel: Channel) -> PeerSession {
        self.next_token += 1;
        let mut session = PeerSession::start(peer, self.next_token, channel, self.ops.clone());
        for message in self.view.snapshot_excluding(&peer) {
            session.offer(&message);
        }
        session
    }

    fn handle_inbound(&mut self, peer: NodeId, token: u64, batch: MessageBatch) {
        match self.session_mut(&peer, token) {
            Some(session) => {
                for message in &batch.messages {
                    session.observe_inbound(message);
                }
            }
            // The stream was torn down or replaced after this frame was
            // queued.
            None => return,
        }
        for message in batch {
            self.apply_update(message, Some(peer));
        }
    }

    fn session_mut(&mut self, peer: &NodeId, token: u64) -> Option<&mut PeerSession> {
        if let Some(session) = self.followers.get_mut(peer) {
            return (session.token() == token).then_some(session);
        }
        match self.leader.as_mut() {
            Some(session) if session.peer() == *peer && session.token() == token => Some(session),
            _ => None,
        }
    }

    fn drop_peer(&mut self, peer: &NodeId, token: Option<u64>, reason: &str) {
        let matches = |session: &PeerSession| token.is_none() || token == Some(session.token());

        if self.followers.get(peer).is_some_and(&matches) {
            if let Some(session) = self.followers.remove(peer) {
                info!(%peer, reason, "follower disconnected");
                session.shutdown();
            }
            return;
        }
        if self
            .leader
            .as_ref()
            .is_some_and(|session| session.peer() == *peer && matches(session))
        {
            if let Some(session) = self.leader.take() {
                info!(%peer, reason, "leader disconnected");
                session.shutdown();
            }
        }
    }

    fn teardown(&mut self) {
        for (_, ticker) in self.tickers.iter_mut() {
            if let Some(ticker) = ticker.take() {
                ticker.abort();
            }
        }
        for (_, session) in self.followers.drain() {
            session.shutdown();
        }
        if let Some(session) = self.leader.take() {
            session.shutdown();
        }
    }
}
