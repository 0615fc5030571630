//! Transport abstraction for the backfill protocol.
//!
//! The transport delivers messages to named remote endpoints. It may
//! reorder or duplicate deliveries but never silently drops them; the
//! ordering layer on top restores each peer's send order.

use async_trait::async_trait;

use rangefill_core::NodeId;

use crate::error::{Result, SyncError};
use crate::messages::Message;

/// Transport trait for sending and receiving backfill messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &NodeId, message: Message) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Returns the sender's NodeId and the message. Blocks until a
    /// message is available or an error occurs.
    async fn recv(&self) -> Result<(NodeId, Message)>;

    /// Receive with timeout.
    ///
    /// Returns None if the timeout expires before a message arrives.
    async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<(NodeId, Message)>>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate message passing between nodes. Every send
/// round-trips through the CBOR codec, so tests exercise the real wire
/// shape of each message.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    use crate::messages;

    const CHANNEL_DEPTH: usize = 1024;

    /// Encoded message in flight.
    #[derive(Debug)]
    struct Envelope {
        from: NodeId,
        frame: Vec<u8>,
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        /// Sender channels for each node.
        senders: RwLock<HashMap<NodeId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                senders: RwLock::new(HashMap::new()),
            })
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: tokio::sync::Mutex::new(rx),
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, message: Message) -> Result<()> {
            let frame = messages::encode(&message)?;
            let senders = self.network.senders.read().await;
            let sender = senders
                .get(peer)
                .ok_or_else(|| SyncError::Transport("peer not found".into()))?;
            sender
                .send(Envelope {
                    from: self.node_id,
                    frame,
                })
                .await
                .map_err(|_| SyncError::Transport("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(NodeId, Message)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, messages::decode(&envelope.frame)?)),
                None => Err(SyncError::Transport("channel closed".into())),
            }
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(NodeId, Message)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Ok(Some((envelope.from, messages::decode(&envelope.frame)?))),
                Ok(None) => Err(SyncError::Transport("channel closed".into())),
                Err(_) => Ok(None), // Timeout
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }
    }
}
