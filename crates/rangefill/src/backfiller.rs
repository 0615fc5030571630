//! The backfiller: the source-side coordinator.
//!
//! One backfiller serves one store instance. It publishes a descriptor
//! peers use to find it, and creates one [`PeerSession`] per registered
//! peer; the set of live peer sessions is exactly the set of currently
//! registered peers. Peers are fully independent — they share only the
//! read-only store and the history oracle.
//!
//! The backfiller assumes that while it exists the only change to the
//! underlying store is the application of new writes; it would misbehave
//! if the store itself were backfilled or erased underneath it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use rangefill_core::{KeyRange, NodeId};
use rangefill_history::{BranchId, HistoryOracle, Relation};
use rangefill_store::Store;
use rangefill_sync::{BackfillConfig, Message, PeerIntro, PeerSession, Transport, PROTOCOL_VERSION};

use crate::error::Result;

/// The published "business card": everything a peer needs to find and
/// address this backfiller. Its wire encoding belongs to the discovery
/// collaborator, not to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillerDescriptor {
    /// The region this source serves authoritatively.
    pub region: KeyRange,
    /// Where registration handshakes should be sent.
    pub address: NodeId,
}

/// The source-side backfill coordinator.
pub struct Backfiller {
    store: Arc<dyn Store>,
    history: Arc<dyn HistoryOracle>,
    branch: BranchId,
    transport: Arc<dyn Transport>,
    config: BackfillConfig,
    peers: Mutex<HashMap<NodeId, Arc<PeerSession>>>,
}

impl Backfiller {
    /// Create a coordinator for `store`, whose data lives on `branch`.
    ///
    /// The configuration is validated here, so flow-control
    /// misconfiguration is caught before any session can start.
    pub fn new(
        store: Arc<dyn Store>,
        history: Arc<dyn HistoryOracle>,
        branch: BranchId,
        transport: Arc<dyn Transport>,
        config: BackfillConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            history,
            branch,
            transport,
            config,
            peers: Mutex::new(HashMap::new()),
        })
    }

    /// The published descriptor. Pure and side-effect free; safe to call
    /// concurrently and repeatedly.
    pub fn descriptor(&self) -> BackfillerDescriptor {
        BackfillerDescriptor {
            region: self.store.region(),
            address: self.transport.local_node_id(),
        }
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// The session serving `peer`, if registered.
    pub fn peer(&self, peer: &NodeId) -> Option<Arc<PeerSession>> {
        self.peers.lock().unwrap().get(peer).cloned()
    }

    /// Serve until `shutdown` fires or the transport closes, then tear
    /// down every peer session and wait for each to fully unwind.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.transport.recv() => match received {
                    Ok((from, message)) => self.route(from, message, &shutdown).await,
                    Err(error) => {
                        tracing::warn!(%error, "transport closed; backfiller stopping");
                        break;
                    }
                },
            }
        }

        let peers: Vec<Arc<PeerSession>> =
            self.peers.lock().unwrap().drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.shutdown().await;
        }
        tracing::debug!("backfiller torn down");
    }

    async fn route(&self, from: NodeId, message: Message, shutdown: &CancellationToken) {
        match message {
            Message::Intro(intro) => self.on_intro(from, intro, shutdown).await,
            Message::Bye => self.on_bye(from).await,
            message if message.token().is_some() => {
                let peer = self.peers.lock().unwrap().get(&from).cloned();
                match peer {
                    Some(peer) => peer.deliver(message).await,
                    None => {
                        tracing::warn!(peer = %from, "message from unregistered peer dropped");
                    }
                }
            }
            other => {
                tracing::warn!(peer = %from, ?other, "unexpected message kind dropped");
            }
        }
    }

    /// Registration: validate the handshake, establish the common
    /// version from branch lineage, and create the peer session.
    ///
    /// A malformed or incompatible handshake is logged and ignored — a
    /// misbehaving peer must not tear down the coordinator.
    async fn on_intro(&self, from: NodeId, intro: PeerIntro, shutdown: &CancellationToken) {
        if intro.peer != from {
            tracing::warn!(peer = %from, claimed = %intro.peer, "intro peer identity mismatch");
            return;
        }
        if intro.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                peer = %from,
                version = intro.protocol_version,
                "unsupported protocol version"
            );
            return;
        }
        let region = self.store.region();
        if !region.contains_range(&intro.region) {
            tracing::warn!(
                peer = %from,
                requested = ?intro.region,
                served = ?region,
                "intro region not served here"
            );
            return;
        }

        let ours = match self.history.lookup(&self.branch).await {
            Ok(lineage) => lineage,
            Err(error) => {
                tracing::error!(%error, "own branch lineage unavailable");
                return;
            }
        };
        let theirs = match self.history.lookup(&intro.branch).await {
            Ok(lineage) => lineage,
            Err(error) => {
                tracing::warn!(peer = %from, %error, "peer branch unknown; intro ignored");
                return;
            }
        };
        let common_version = match ours.relation(&theirs) {
            Relation::Unrelated => {
                tracing::warn!(peer = %from, "no common ancestry; intro ignored");
                return;
            }
            Relation::SameLine => intro.caught_up_to,
            Relation::Diverged(at) => at.min(intro.caught_up_to),
        };

        // Re-registration replaces the old session (reconnect semantics).
        let previous = self.peers.lock().unwrap().remove(&from);
        if let Some(previous) = previous {
            tracing::debug!(peer = %from, "peer re-registered; retiring previous session");
            previous.shutdown().await;
        }

        let session = Arc::new(PeerSession::spawn(
            from,
            intro.region.clone(),
            common_version,
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.config.clone(),
            shutdown,
        ));
        self.peers.lock().unwrap().insert(from, session);
        tracing::debug!(
            peer = %from,
            region = ?intro.region,
            common = %common_version,
            "peer registered"
        );
    }

    async fn on_bye(&self, from: NodeId) {
        let peer = self.peers.lock().unwrap().remove(&from);
        match peer {
            Some(peer) => {
                peer.shutdown().await;
                tracing::debug!(peer = %from, "peer deregistered");
            }
            None => {
                tracing::debug!(peer = %from, "bye from unregistered peer ignored");
            }
        }
    }
}
