//! Per-peer session: one bidirectional stream's data plane.
//!
//! A session owns the stream's read and write halves through two small
//! tasks; everything else (version accounting, the outbound buffer,
//! batch building) is plain state mutated only on the engine's event
//! loop. The write path keeps at most one frame in flight and coalesces
//! whatever accumulates behind it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use starsync_core::{ComponentArray, MessageBatch, NodeId, SyncMessage};

use crate::engine::Op;
use crate::transport::Channel;

/// Data-plane state for one connected peer. Client and server streams
/// behave identically once established.
pub(crate) struct PeerSession {
    peer: NodeId,
    /// Distinguishes this session from an earlier one to the same peer,
    /// so late events from a replaced stream are ignored.
    token: u64,
    /// Highest version this peer is known to hold, per (origin,
    /// component), fed by both what we sent and what it sent us.
    peer_versions: HashMap<NodeId, ComponentArray<u64>>,
    /// Messages awaiting transmission, oldest first.
    outbuf: VecDeque<Arc<SyncMessage>>,
    /// Entries of `outbuf` covered by the frame currently in flight.
    consumed: usize,
    writing: bool,
    batches: mpsc::Sender<MessageBatch>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl PeerSession {
    /// Take over an established stream and start its I/O tasks.
    pub(crate) fn start(
        peer: NodeId,
        token: u64,
        channel: Channel,
        ops: mpsc::UnboundedSender<Op>,
    ) -> Self {
        let Channel {
            mut sender,
            mut receiver,
        } = channel;

        // One slot: the loop hands over a frame only while idle.
        let (batch_tx, mut batch_rx) = mpsc::channel::<MessageBatch>(1);

        let writer_ops = ops.clone();
        let writer = tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                let result = sender.send(batch).await;
                let failed = result.is_err();
                if writer_ops
                    .send(Op::WriteDone {
                        peer,
                        token,
                        result,
                    })
                    .is_err()
                    || failed
                {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(batch)) => {
                        if ops.send(Op::Inbound { peer, token, batch }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = ops.send(Op::PeerClosed { peer, token });
                        break;
                    }
                    Err(err) => {
                        warn!(%peer, error = %err, "sync stream read failed");
                        let _ = ops.send(Op::PeerClosed { peer, token });
                        break;
                    }
                }
            }
        });

        Self {
            peer,
            token,
            peer_versions: HashMap::new(),
            outbuf: VecDeque::new(),
            consumed: 0,
            writing: false,
            batches: batch_tx,
            writer,
            reader,
        }
    }

    pub(crate) fn peer(&self) -> NodeId {
        self.peer
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Record a version observed on the inbound path so the same update
    /// is not echoed back. Aggregates carry no reconcilable version and
    /// leave no trace.
    pub(crate) fn observe_inbound(&mut self, message: &SyncMessage) {
        if message.is_aggregate() {
            return;
        }
        let versions = self.peer_versions.entry(message.origin()).or_default();
        let slot = &mut versions[message.component()];
        if *slot < message.version() {
            *slot = message.version();
        }
    }

    /// Queue a message for this peer if it is news to it.
    ///
    /// Snapshots are gated on the per-peer version vector; aggregates
    /// always go out and never touch it.
    pub(crate) fn offer(&mut self, message: &Arc<SyncMessage>) {
        if message.is_aggregate() {
            self.outbuf.push_back(Arc::clone(message));
        } else {
            let versions = self.peer_versions.entry(message.origin()).or_default();
            let slot = &mut versions[message.component()];
            if *slot >= message.version() {
                return;
            }
            *slot = message.version();
            self.outbuf.push_back(Arc::clone(message));
        }
        if !self.writing {
            self.pump();
        }
    }

    /// The in-flight frame was written; release what it covered and keep
    /// pumping.
    pub(crate) fn on_write_done(&mut self) {
        self.outbuf.drain(..self.consumed);
        self.consumed = 0;
        self.writing = false;
        if !self.outbuf.is_empty() {
            self.pump();
        }
    }

    /// Build one coalesced frame from the buffer and hand it to the
    /// writer task.
    ///
    /// The buffer is scanned newest to oldest and each origin is
    /// included at most once, so a burst from one origin collapses to
    /// its latest message.
    fn pump(&mut self) {
        debug_assert!(!self.writing);
        if self.outbuf.is_empty() {
            return;
        }

        let mut included: HashSet<NodeId> = HashSet::new();
        let mut messages = Vec::new();
        for message in self.outbuf.iter().rev() {
            if included.insert(message.origin()) {
                messages.push(SyncMessage::clone(message));
            }
        }
        messages.reverse();
        self.consumed = self.outbuf.len();

        let batch = MessageBatch::from(messages);
        debug!(peer = %self.peer, frame = batch.len(), buffered = self.consumed, "frame queued");
        self.writing = true;
        // If the writer task is already gone its terminal event removes
        // this session; the lost frame no longer matters.
        let _ = self.batches.try_send(batch);
    }

    /// Stop the I/O tasks. Dropping the write half closes the stream for
    /// the peer.
    pub(crate) fn shutdown(&self) {
        self.writer.abort();
        self.reader.abort();
    }
}
