//! Service adapter: glue between a transport's stream-accept side and
//! the engine.

use tracing::warn;

use crate::engine::Syncer;
use crate::error::Result;
use crate::transport::memory::MemoryListener;
use crate::transport::{node_id_from_metadata, node_id_metadata, Channel, Metadata};

/// Accept-side adapter for a [`Syncer`].
///
/// For each new stream the adapter validates the dialer's metadata,
/// registers the stream with the engine, and answers with this node's
/// metadata. A stream without a valid `node_id` is rejected and no other
/// stream is affected.
#[derive(Clone)]
pub struct SyncService {
    syncer: Syncer,
}

impl SyncService {
    /// Adapter over a running engine.
    pub fn new(syncer: Syncer) -> Self {
        Self { syncer }
    }

    /// Handle one incoming stream. Returns the metadata to answer the
    /// dialer with.
    pub async fn start_sync(&self, metadata: Metadata, channel: Channel) -> Result<Metadata> {
        let peer = node_id_from_metadata(&metadata)?;
        self.syncer.accept(peer, channel).await?;
        Ok(node_id_metadata(&self.syncer.node_id()))
    }

    /// Drive an in-memory listener until it closes. Rejected streams are
    /// logged and dropped.
    pub async fn serve(self, mut listener: MemoryListener) {
        while let Some(incoming) = listener.accept().await {
            match self.start_sync(incoming.metadata, incoming.channel).await {
                Ok(reply) => {
                    // A dialer that hung up already is its own problem.
                    let _ = incoming.reply.send(reply);
                }
                Err(err) => {
                    warn!(error = %err, "rejected sync stream");
                }
            }
        }
    }
}
