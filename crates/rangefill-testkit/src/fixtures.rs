//! Test fixtures: a wired-up backfiller and a scripted backfillee.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rangefill::{BackfillConfig, Backfiller, Message, PeerIntro};
use rangefill_core::{Atom, KeyRange, NodeId, PreAtom, SessionId, Version};
use rangefill_history::{BranchId, MemoryHistory};
use rangefill_store::{range_digest, MemoryStore, Store};
use rangefill_sync::{MemoryNetwork, MemoryTransport, TokenIssuer, Transport, PROTOCOL_VERSION};

/// Build the pre-atom a peer would send for `range` of `store`.
pub async fn pre_atom_for<S: Store + ?Sized>(store: &S, range: &KeyRange) -> PreAtom {
    let (digest, version) = range_digest(store, range, 64)
        .await
        .expect("digest over a test store");
    PreAtom {
        range: range.clone(),
        version,
        digest,
    }
}

/// A backfiller wired to an in-memory network, running on its own task.
pub struct TestCluster {
    pub store: Arc<MemoryStore>,
    pub history: Arc<MemoryHistory>,
    pub source_branch: BranchId,
    pub backfiller: Arc<Backfiller>,
    network: Arc<MemoryNetwork>,
    source: NodeId,
    shutdown: CancellationToken,
    run_task: JoinHandle<()>,
}

impl TestCluster {
    /// Spin up a backfiller serving `region` with default configuration.
    pub async fn new(region: KeyRange) -> rangefill::Result<Self> {
        Self::with_config(region, test_config()).await
    }

    /// Spin up a backfiller with an explicit configuration.
    pub async fn with_config(
        region: KeyRange,
        config: BackfillConfig,
    ) -> rangefill::Result<Self> {
        let store = Arc::new(MemoryStore::new(region));
        let history = Arc::new(MemoryHistory::new());
        let source_branch = history.register_root();

        let network = MemoryNetwork::new();
        let source = NodeId::random();
        let transport = Arc::new(network.create_transport(source).await);

        let backfiller = Arc::new(Backfiller::new(
            store.clone() as Arc<dyn Store>,
            history.clone(),
            source_branch,
            transport,
            config,
        )?);

        let shutdown = CancellationToken::new();
        let run_task = tokio::spawn({
            let backfiller = Arc::clone(&backfiller);
            let shutdown = shutdown.clone();
            async move { backfiller.run(shutdown).await }
        });

        Ok(Self {
            store,
            history,
            source_branch,
            backfiller,
            network,
            source,
            shutdown,
            run_task,
        })
    }

    /// Seed the source store with explicit entries.
    pub fn seed(&self, entries: &[(&str, &str, u64)]) {
        for (key, value, version) in entries {
            self.store
                .insert(*key, value.as_bytes().to_vec(), Version(*version));
        }
    }

    /// A new backfillee on the source's own branch line.
    pub async fn backfillee(&self) -> Backfillee {
        self.backfillee_on_branch(self.source_branch).await
    }

    /// A new backfillee claiming its data lives on `branch`.
    pub async fn backfillee_on_branch(&self, branch: BranchId) -> Backfillee {
        let node = NodeId::random();
        let transport = self.network.create_transport(node).await;
        Backfillee {
            node,
            branch,
            source: self.source,
            transport,
            issuer: TokenIssuer::new(),
        }
    }

    /// Stop the coordinator and wait for it to drain all peers.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.run_task.await;
    }
}

/// The replica's side of the protocol, scripted.
pub struct Backfillee {
    pub node: NodeId,
    pub branch: BranchId,
    source: NodeId,
    transport: MemoryTransport,
    issuer: TokenIssuer,
}

impl Backfillee {
    /// Send the registration handshake.
    pub async fn register(&self, region: KeyRange, caught_up_to: Version) {
        self.send(Message::Intro(PeerIntro {
            peer: self.node,
            protocol_version: PROTOCOL_VERSION,
            region,
            branch: self.branch,
            caught_up_to,
        }))
        .await;
    }

    /// Send the deregistration notice.
    pub async fn deregister(&self) {
        self.send(Message::Bye).await;
    }

    /// Send delta hints covering `range`.
    pub async fn send_pre_atoms(&mut self, range: KeyRange, atoms: Vec<PreAtom>) {
        let token = self.issuer.issue();
        self.send(Message::PreAtoms {
            token,
            range,
            atoms,
        })
        .await;
    }

    /// Start a session over `range` with a fresh id.
    pub async fn go(&mut self, range: KeyRange) -> SessionId {
        let session_id = SessionId::random();
        self.go_as(session_id, range).await;
        session_id
    }

    /// Start a session with an explicit id.
    pub async fn go_as(&mut self, session_id: SessionId, range: KeyRange) {
        let token = self.issuer.issue();
        self.send(Message::Go {
            token,
            session_id,
            range,
        })
        .await;
    }

    /// Ask the source to cancel a session.
    pub async fn stop(&mut self, session_id: SessionId) {
        let token = self.issuer.issue();
        self.send(Message::Stop { token, session_id }).await;
    }

    /// Return credit for received atoms.
    pub async fn ack(&mut self, session_id: SessionId, range: KeyRange, size: u64) {
        let token = self.issuer.issue();
        self.send(Message::AckAtoms {
            token,
            session_id,
            range,
            size,
        })
        .await;
    }

    /// Receive the next message from the source, if one arrives in time.
    pub async fn recv(&self, timeout: Duration) -> Option<Message> {
        match self.transport.recv_timeout(timeout).await {
            Ok(Some((from, message))) if from == self.source => Some(message),
            _ => None,
        }
    }

    /// Collect atoms for `session` until its completion marker, acking
    /// every batch so the stream never starves for credit.
    ///
    /// Panics if the stream stalls for five seconds — a stuck backfill
    /// is a test failure, not something to wait out.
    pub async fn collect_until_done(&mut self, session: SessionId) -> (Vec<Atom>, Version) {
        let mut collected = Vec::new();
        loop {
            let message = self
                .recv(Duration::from_secs(5))
                .await
                .expect("backfill stalled");
            match message {
                Message::Atoms { session_id, atoms } if session_id == session => {
                    let size: u64 = atoms.iter().map(Atom::size).sum();
                    let acked = span_of(&atoms);
                    collected.extend(atoms);
                    self.ack(session, acked, size).await;
                }
                Message::Done {
                    session_id,
                    version,
                } if session_id == session => return (collected, version),
                _ => {}
            }
        }
    }

    async fn send(&self, message: Message) {
        self.transport
            .send(&self.source, message)
            .await
            .expect("source reachable from test peer");
    }
}

/// The key span covered by one atom batch, for ack bookkeeping.
fn span_of(atoms: &[Atom]) -> KeyRange {
    match (atoms.first(), atoms.last()) {
        (Some(first), Some(last)) => {
            KeyRange::new(first.key.clone(), last.key.successor()).expect("atoms are key-ordered")
        }
        _ => KeyRange::all(),
    }
}

/// A configuration tuned for fast tests: small pages and batches, short
/// hint wait.
fn test_config() -> BackfillConfig {
    BackfillConfig {
        credit_capacity: 64 * 1024,
        max_atom_bytes: 4 * 1024,
        max_batch_bytes: 8 * 1024,
        scan_page: 8,
        hint_wait: Duration::from_millis(25),
        inbox_depth: 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cluster_round_trip() {
        let cluster = TestCluster::new(KeyRange::all()).await.unwrap();
        cluster.seed(&[("a", "1", 1), ("b", "2", 2)]);

        let mut peer = cluster.backfillee().await;
        peer.register(KeyRange::all(), Version::ZERO).await;
        let session = peer.go(KeyRange::all()).await;
        let (atoms, version) = peer.collect_until_done(session).await;

        assert_eq!(atoms.len(), 2);
        assert_eq!(version, Version(2));
        cluster.shutdown().await;
    }
}
