//! Transport abstraction for sync streams.
//!
//! The fabric assumes an ordered, reliable, bidirectional stream of
//! frames with initial metadata in both directions. Implementations may
//! sit on any such transport; the [`memory`] module provides the one
//! used by tests and examples.

use std::collections::HashMap;

use async_trait::async_trait;

use starsync_core::{MessageBatch, NodeId};

use crate::error::{SyncerError, TransportError};

/// Initial metadata exchanged when a stream is established.
pub type Metadata = HashMap<String, String>;

/// Metadata key carrying the lowercase-hex node id. Required in both
/// directions; a stream without it is rejected.
pub const NODE_ID_KEY: &str = "node_id";

/// Metadata announcing `node_id`.
pub fn node_id_metadata(node_id: &NodeId) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(NODE_ID_KEY.to_string(), node_id.to_hex());
    metadata
}

/// Extract and validate the peer id from stream metadata.
pub fn node_id_from_metadata(metadata: &Metadata) -> Result<NodeId, SyncerError> {
    let value = metadata
        .get(NODE_ID_KEY)
        .ok_or(SyncerError::MissingNodeId)?;
    NodeId::from_hex(value).map_err(|_| SyncerError::MalformedNodeId(value.clone()))
}

/// Write half of one sync stream.
#[async_trait]
pub trait BatchSender: Send + 'static {
    /// Send one frame. An error is terminal for the stream.
    async fn send(&mut self, batch: MessageBatch) -> Result<(), TransportError>;
}

/// Read half of one sync stream.
#[async_trait]
pub trait BatchReceiver: Send + 'static {
    /// Receive the next frame. `Ok(None)` is a clean end of stream; an
    /// error is terminal.
    async fn recv(&mut self) -> Result<Option<MessageBatch>, TransportError>;
}

/// One established bidirectional sync stream.
pub struct Channel {
    /// Write half.
    pub sender: Box<dyn BatchSender>,
    /// Read half.
    pub receiver: Box<dyn BatchReceiver>,
}

/// Dials the leader and performs the initial metadata exchange.
#[async_trait]
pub trait LeaderConnector: Send + 'static {
    /// Establish a stream, announcing `local` metadata and returning the
    /// leader's metadata together with the stream.
    async fn connect(&mut self, local: Metadata) -> Result<(Metadata, Channel), TransportError>;
}

pub mod memory {
    //! In-memory transport over tokio channels.
    //!
    //! Frames pass through the wire codec, so every exchange exercises
    //! the same encoding a network transport would use.

    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use starsync_core::{decode_batch, encode_batch, MessageBatch};

    use super::{Channel, LeaderConnector, Metadata};
    use crate::error::TransportError;

    /// Frames buffered per direction before senders wait.
    const FRAME_BUFFER: usize = 16;

    struct MemorySender {
        frames: mpsc::Sender<Vec<u8>>,
    }

    #[async_trait]
    impl super::BatchSender for MemorySender {
        async fn send(&mut self, batch: MessageBatch) -> Result<(), TransportError> {
            let bytes = encode_batch(&batch)?;
            self.frames
                .send(bytes)
                .await
                .map_err(|_| TransportError::Closed)
        }
    }

    struct MemoryReceiver {
        frames: mpsc::Receiver<Vec<u8>>,
    }

    #[async_trait]
    impl super::BatchReceiver for MemoryReceiver {
        async fn recv(&mut self) -> Result<Option<MessageBatch>, TransportError> {
            match self.frames.recv().await {
                Some(bytes) => Ok(Some(decode_batch(&bytes)?)),
                None => Ok(None),
            }
        }
    }

    /// Two connected stream halves. Dropping either half's sender is
    /// seen as a clean end of stream by the other side.
    pub fn channel_pair() -> (Channel, Channel) {
        let (left_tx, right_rx) = mpsc::channel(FRAME_BUFFER);
        let (right_tx, left_rx) = mpsc::channel(FRAME_BUFFER);
        let left = Channel {
            sender: Box::new(MemorySender { frames: left_tx }),
            receiver: Box::new(MemoryReceiver { frames: left_rx }),
        };
        let right = Channel {
            sender: Box::new(MemorySender { frames: right_tx }),
            receiver: Box::new(MemoryReceiver { frames: right_rx }),
        };
        (left, right)
    }

    /// One stream offered to a listener.
    pub struct Incoming {
        /// The dialer's metadata.
        pub metadata: Metadata,
        /// Answer with local metadata to accept. Dropping this rejects
        /// the stream.
        pub reply: oneshot::Sender<Metadata>,
        /// The server-side stream.
        pub channel: Channel,
    }

    /// Accept side of an in-memory endpoint.
    pub struct MemoryListener {
        incoming: mpsc::Receiver<Incoming>,
    }

    impl MemoryListener {
        /// Next incoming stream, or `None` once every endpoint handle is
        /// gone.
        pub async fn accept(&mut self) -> Option<Incoming> {
            self.incoming.recv().await
        }
    }

    /// Dial side of an in-memory endpoint. Cheap to clone.
    #[derive(Clone)]
    pub struct MemoryEndpoint {
        incoming: mpsc::Sender<Incoming>,
    }

    /// A connected endpoint and its listener.
    pub fn endpoint() -> (MemoryEndpoint, MemoryListener) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        (
            MemoryEndpoint { incoming: tx },
            MemoryListener { incoming: rx },
        )
    }

    impl MemoryEndpoint {
        /// Dial the listener, exchanging initial metadata.
        pub async fn dial(&self, local: Metadata) -> Result<(Metadata, Channel), TransportError> {
            let (dialer, listener) = channel_pair();
            let (reply_tx, reply_rx) = oneshot::channel();
            self.incoming
                .send(Incoming {
                    metadata: local,
                    reply: reply_tx,
                    channel: listener,
                })
                .await
                .map_err(|_| TransportError::Closed)?;
            let remote = reply_rx
                .await
                .map_err(|_| TransportError::Connect("stream rejected".into()))?;
            Ok((remote, dialer))
        }
    }

    #[async_trait]
    impl LeaderConnector for MemoryEndpoint {
        async fn connect(
            &mut self,
            local: Metadata,
        ) -> Result<(Metadata, Channel), TransportError> {
            self.dial(local).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starsync_core::{ComponentId, SyncMessage};

    #[test]
    fn test_node_id_metadata_roundtrip() {
        let node_id = NodeId::from_bytes([7; 16]);
        let metadata = node_id_metadata(&node_id);
        assert_eq!(node_id_from_metadata(&metadata).unwrap(), node_id);
    }

    #[test]
    fn test_missing_node_id_rejected() {
        match node_id_from_metadata(&Metadata::new()) {
            Err(SyncerError::MissingNodeId) => {}
            other => panic!("expected missing node id, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_node_id_rejected() {
        let mut metadata = Metadata::new();
        metadata.insert(NODE_ID_KEY.to_string(), "not-hex".to_string());
        match node_id_from_metadata(&metadata) {
            Err(SyncerError::MalformedNodeId(_)) => {}
            other => panic!("expected malformed node id, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_pair_carries_frames() {
        let (mut left, mut right) = memory::channel_pair();
        let message =
            SyncMessage::snapshot(NodeId::from_bytes([1; 16]), ComponentId::Resources, 1, &b"x"[..]);
        left.sender
            .send(MessageBatch::from(vec![message.clone()]))
            .await
            .unwrap();

        let received = right.receiver.recv().await.unwrap().unwrap();
        assert_eq!(received.messages, vec![message]);
    }

    #[tokio::test]
    async fn test_channel_close_is_clean_end() {
        let (left, mut right) = memory::channel_pair();
        drop(left);
        assert!(matches!(right.receiver.recv().await, Ok(None)));
    }

    #[tokio::test]
    async fn test_dial_exchanges_metadata() {
        let (endpoint, mut listener) = memory::endpoint();
        let dialer_id = NodeId::from_bytes([1; 16]);
        let listener_id = NodeId::from_bytes([2; 16]);

        let accept = tokio::spawn(async move {
            let incoming = listener.accept().await.unwrap();
            let peer = node_id_from_metadata(&incoming.metadata).unwrap();
            incoming
                .reply
                .send(node_id_metadata(&listener_id))
                .ok()
                .unwrap();
            peer
        });

        let (remote, _channel) = endpoint.dial(node_id_metadata(&dialer_id)).await.unwrap();
        assert_eq!(node_id_from_metadata(&remote).unwrap(), listener_id);
        assert_eq!(accept.await.unwrap(), dialer_id);
    }

    #[tokio::test]
    async fn test_rejected_dial_errors() {
        let (endpoint, mut listener) = memory::endpoint();
        let reject = tokio::spawn(async move {
            let incoming = listener.accept().await.unwrap();
            drop(incoming.reply);
        });

        let result = endpoint.dial(Metadata::new()).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        reject.await.unwrap();
    }
}
