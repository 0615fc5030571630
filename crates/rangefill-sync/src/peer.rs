//! Per-peer session: serializes and routes one backfillee's messages.
//!
//! All of a peer's sequenced messages are applied on a single pump task,
//! in the order the peer sent them (the sequencer reorders early
//! arrivals). The pump owns the peer's negotiated version map, the
//! pre-atom hint queue, and at most one active backfill session; starting
//! a new session retires the previous one and waits for it to fully
//! unwind, so no two sessions ever run concurrently for the same peer.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rangefill_core::{KeyRange, NodeId, PreAtom, RangeEnd, SessionId, Version, VersionMap};
use rangefill_store::Store;

use crate::config::BackfillConfig;
use crate::messages::Message;
use crate::sequencer::{Admission, Sequencer};
use crate::session::{BackfillSession, SessionContext, SessionPhase};
use crate::throttle::Throttle;
use crate::transport::Transport;

/// How many finished sessions to keep observable per peer.
const SESSION_LOG_DEPTH: usize = 8;

/// State shared between the pump task and the session task it spawns.
pub(crate) struct PeerShared {
    pub hints: Mutex<HintState>,
    pub hints_notify: Notify,
    pub version_map: Mutex<VersionMap>,
    recent: Mutex<VecDeque<SessionRecord>>,
}

/// Pending pre-atom hints for this peer.
pub(crate) struct HintState {
    /// Hints in arrival order (the peer sends them in key order).
    pub queue: VecDeque<PreAtom>,
    /// Furthest end the peer has declared fully described by hints.
    /// `None` until the first `pre_atoms` message.
    pub horizon: Option<RangeEnd>,
}

struct SessionRecord {
    id: SessionId,
    phase: watch::Receiver<SessionPhase>,
    throttle: Throttle,
}

/// Execution-affinity tag: handlers must run on the pump task that bound
/// it. Violations are programming errors, caught by debug assertion.
struct TaskAffinity {
    id: OnceLock<tokio::task::Id>,
}

impl TaskAffinity {
    fn new() -> Self {
        Self { id: OnceLock::new() }
    }

    fn bind(&self) {
        if let Some(id) = tokio::task::try_id() {
            let _ = self.id.set(id);
        }
    }

    fn check(&self) {
        debug_assert_eq!(
            self.id.get().copied(),
            tokio::task::try_id(),
            "peer session handler invoked off its pump task"
        );
    }
}

/// Handle to one connected backfillee's server-side state.
///
/// Created by the coordinator when the peer registers; torn down when the
/// peer deregisters or the coordinator shuts down.
pub struct PeerSession {
    peer: NodeId,
    region: KeyRange,
    mailbox: mpsc::Sender<Message>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    shared: Arc<PeerShared>,
}

impl PeerSession {
    /// Spawn the pump task for a newly registered peer.
    ///
    /// `region` must be a sub-region of the store's region and
    /// `common_version` the version up to which the peer's data is known
    /// to match the source (from the branch lineage comparison).
    pub fn spawn(
        peer: NodeId,
        region: KeyRange,
        common_version: Version,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        config: BackfillConfig,
        parent_cancel: &CancellationToken,
    ) -> Self {
        debug_assert!(config.validate().is_ok());
        let (tx, rx) = mpsc::channel(config.inbox_depth);
        let cancel = parent_cancel.child_token();
        let shared = Arc::new(PeerShared {
            hints: Mutex::new(HintState {
                queue: VecDeque::new(),
                horizon: None,
            }),
            hints_notify: Notify::new(),
            version_map: Mutex::new(VersionMap::new(region.clone(), common_version)),
            recent: Mutex::new(VecDeque::new()),
        });

        let pump = PeerPump {
            peer,
            region: region.clone(),
            store,
            transport,
            config,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
            rx,
            sequencer: Sequencer::new(),
            active: None,
            affinity: TaskAffinity::new(),
        };
        let task = tokio::spawn(pump.run());

        Self {
            peer,
            region,
            mailbox: tx,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
            shared,
        }
    }

    /// The peer this session serves.
    pub fn peer(&self) -> NodeId {
        self.peer
    }

    /// The negotiated region.
    pub fn region(&self) -> &KeyRange {
        &self.region
    }

    /// Snapshot of the peer's version map.
    pub fn version_map(&self) -> VersionMap {
        self.shared.version_map.lock().unwrap().clone()
    }

    /// Observe the phase of a current or recent session.
    pub fn session_phase(&self, id: &SessionId) -> Option<watch::Receiver<SessionPhase>> {
        let recent = self.shared.recent.lock().unwrap();
        recent
            .iter()
            .rev()
            .find(|r| r.id == *id)
            .map(|r| r.phase.clone())
    }

    /// Unacknowledged bytes held by a current or recent session.
    pub fn session_outstanding(&self, id: &SessionId) -> Option<u64> {
        let recent = self.shared.recent.lock().unwrap();
        recent
            .iter()
            .rev()
            .find(|r| r.id == *id)
            .map(|r| r.throttle.outstanding())
    }

    /// The most recent session that has not reached a terminal phase.
    pub fn active_session(&self) -> Option<SessionId> {
        let recent = self.shared.recent.lock().unwrap();
        recent
            .iter()
            .rev()
            .find(|r| !r.phase.borrow().is_terminal())
            .map(|r| r.id)
    }

    /// Hand a message to the pump. Messages are applied in ordering-token
    /// order regardless of the order they are delivered here.
    pub async fn deliver(&self, message: Message) {
        if self.mailbox.send(message).await.is_err() {
            tracing::warn!(peer = %self.peer, "peer session inbox closed; message dropped");
        }
    }

    /// Tear down: cancel the pump and the active session, then wait for
    /// both to fully unwind. Idempotent; a second call returns once the
    /// first has drained the task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(peer = %self.peer, %error, "peer pump aborted abnormally");
            }
        }
    }
}

/// The pump: owns all mutable per-peer state.
struct PeerPump {
    peer: NodeId,
    region: KeyRange,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    config: BackfillConfig,
    shared: Arc<PeerShared>,
    cancel: CancellationToken,
    rx: mpsc::Receiver<Message>,
    sequencer: Sequencer<Message>,
    active: Option<ActiveSession>,
    affinity: TaskAffinity,
}

/// The one session allowed to run for this peer.
struct ActiveSession {
    id: SessionId,
    cancel: CancellationToken,
    stop_requested: Arc<AtomicBool>,
    throttle: Throttle,
    task: JoinHandle<()>,
}

impl PeerPump {
    async fn run(mut self) {
        self.affinity.bind();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => self.on_message(message).await,
                    None => break,
                },
            }
        }
        self.retire_active(false).await;
        tracing::debug!(peer = %self.peer, "peer session torn down");
    }

    async fn on_message(&mut self, message: Message) {
        let Some(token) = message.token() else {
            tracing::warn!(peer = %self.peer, "unsequenced message reached peer session; dropped");
            return;
        };
        if let Err(error) = message.validate_limits() {
            tracing::warn!(peer = %self.peer, %error, "oversized message dropped");
            return;
        }
        match self.sequencer.admit(token, message) {
            Admission::Ready(batch) => {
                for message in batch {
                    self.dispatch(message).await;
                }
            }
            Admission::Buffered => {
                tracing::trace!(peer = %self.peer, ?token, "message buffered for ordering");
            }
            Admission::Stale => {
                tracing::debug!(peer = %self.peer, ?token, "stale token discarded");
            }
        }
    }

    async fn dispatch(&mut self, message: Message) {
        match message {
            Message::PreAtoms { range, atoms, .. } => self.on_pre_atoms(range, atoms),
            Message::Go {
                session_id, range, ..
            } => self.on_go(session_id, range).await,
            Message::Stop { session_id, .. } => self.on_stop(session_id).await,
            Message::AckAtoms {
                session_id, size, ..
            } => self.on_ack_atoms(session_id, size),
            other => {
                tracing::warn!(peer = %self.peer, ?other, "unexpected message kind for peer session");
            }
        }
    }

    /// Stage delta-optimization hints.
    ///
    /// The declared range is clipped to the negotiated region, and each
    /// descriptor is clipped to the declared range; descriptors left
    /// empty by clipping are dropped. Retransmissions are harmless: the
    /// duplicate token is discarded before this handler runs, and a
    /// re-sent hint for an already-consumed sub-range is a no-op in the
    /// session loop.
    fn on_pre_atoms(&mut self, range: KeyRange, atoms: Vec<PreAtom>) {
        self.affinity.check();
        let declared = if self.region.contains_range(&range) {
            range
        } else {
            tracing::warn!(
                peer = %self.peer,
                range = ?range,
                region = ?self.region,
                "pre-atom range exceeds negotiated region; clipping"
            );
            match range.intersect(&self.region) {
                Some(clipped) => clipped,
                None => return,
            }
        };

        let mut hints = self.shared.hints.lock().unwrap();
        hints.horizon = Some(match hints.horizon.take() {
            None => declared.end().clone(),
            Some(h) => h.max(declared.end().clone()),
        });
        for pre in atoms {
            match pre.clip_to(&declared) {
                Some(clipped) => {
                    if clipped.range != pre.range {
                        tracing::debug!(peer = %self.peer, "pre-atom clipped to declared range");
                    }
                    hints.queue.push_back(clipped);
                }
                None => {
                    tracing::debug!(peer = %self.peer, "pre-atom outside declared range dropped");
                }
            }
        }
        drop(hints);
        self.shared.hints_notify.notify_waiters();
    }

    /// Start a session, retiring the current one first.
    async fn on_go(&mut self, session_id: SessionId, range: KeyRange) {
        self.affinity.check();
        if !self.region.contains_range(&range) {
            tracing::warn!(
                peer = %self.peer,
                session = %session_id,
                range = ?range,
                "go for a range outside the negotiated region ignored"
            );
            return;
        }
        self.retire_active(false).await;

        let throttle = match Throttle::new(self.config.credit_capacity) {
            Ok(throttle) => throttle,
            Err(error) => {
                tracing::error!(peer = %self.peer, %error, "cannot start session");
                return;
            }
        };
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Initializing);
        let cancel = self.cancel.child_token();
        let stop_requested = Arc::new(AtomicBool::new(false));

        let session = BackfillSession::new(SessionContext {
            id: session_id,
            peer: self.peer,
            range: range.clone(),
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            throttle: throttle.clone(),
            cancel: cancel.clone(),
            stop_requested: Arc::clone(&stop_requested),
            config: self.config.clone(),
            phase: phase_tx,
        });
        let task = tokio::spawn(session.run());

        let mut recent = self.shared.recent.lock().unwrap();
        recent.push_back(SessionRecord {
            id: session_id,
            phase: phase_rx,
            throttle: throttle.clone(),
        });
        while recent.len() > SESSION_LOG_DEPTH {
            recent.pop_front();
        }
        drop(recent);

        self.active = Some(ActiveSession {
            id: session_id,
            cancel,
            stop_requested,
            throttle,
            task,
        });
        tracing::debug!(peer = %self.peer, session = %session_id, range = ?range, "session started");
    }

    /// Cancel the active session if the id still matches; a stale id is
    /// an expected race and is silently ignored.
    async fn on_stop(&mut self, session_id: SessionId) {
        self.affinity.check();
        match &self.active {
            Some(active) if active.id == session_id => {
                self.retire_active(true).await;
                tracing::debug!(peer = %self.peer, session = %session_id, "session stopped");
            }
            _ => {
                tracing::debug!(peer = %self.peer, session = %session_id, "stop for inactive session ignored");
            }
        }
    }

    /// Return credit to the active session; stale ids are ignored.
    fn on_ack_atoms(&mut self, session_id: SessionId, size: u64) {
        self.affinity.check();
        match &self.active {
            Some(active) if active.id == session_id => {
                active.throttle.release(size);
            }
            _ => {
                tracing::trace!(peer = %self.peer, session = %session_id, "ack for inactive session ignored");
            }
        }
    }

    /// Cancel the active session and wait for it to fully unwind.
    async fn retire_active(&mut self, stop: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        if stop {
            active
                .stop_requested
                .store(true, std::sync::atomic::Ordering::Release);
        }
        active.cancel.cancel();
        match active.task.await {
            Ok(()) => debug_assert_eq!(active.throttle.outstanding(), 0),
            Err(error) => {
                tracing::warn!(session = %active.id, %error, "session task aborted abnormally");
                // A panicked session skipped its unwind; reclaim for it.
                active.throttle.release_all();
            }
        }
    }
}
