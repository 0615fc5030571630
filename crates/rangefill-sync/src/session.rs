//! One backfill session: the production loop that brings a peer to
//! parity for a fixed key range.
//!
//! The session walks its range front to back. Wherever the peer supplied
//! a pre-atom hint, the hinted sub-range is digest-compared against the
//! store and skipped on a match; everything else is enumerated in key
//! order and shipped as credit-gated atom batches. Only a full traversal
//! commits: the observed version is merged into the peer's version map
//! and a completion marker is sent. A cancelled, stopped, or failed
//! session merges nothing, so a later session can redo the range — at
//! worst re-sending data, never corrupting the map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use rangefill_core::{Atom, KeyRange, NodeId, PreAtom, RangeEnd, SessionId, Version};
use rangefill_store::{range_digest, Store};

use crate::config::BackfillConfig;
use crate::error::{Result, SyncError};
use crate::messages::{limits, Message};
use crate::peer::PeerShared;
use crate::throttle::Throttle;
use crate::transport::Transport;

/// Lifecycle of a backfill session.
///
/// `Completed`, `Stopped`, `Interrupted`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, production loop not yet running.
    Initializing,
    /// Producing atoms.
    Streaming,
    /// Full range traversed; version map merged.
    Completed,
    /// Cancelled by an explicit `stop` from the peer.
    Stopped,
    /// Cancelled by supersession, peer teardown, or shutdown.
    Interrupted,
    /// A store read or send failed; nothing was merged.
    Failed,
}

impl SessionPhase {
    /// Whether no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionPhase::Initializing | SessionPhase::Streaming)
    }
}

/// Everything a session needs from its owning peer session.
///
/// The session never holds its owner; it borrows only the shared state
/// whose lifetime the owner guarantees to outlast the session task.
pub(crate) struct SessionContext {
    pub id: SessionId,
    pub peer: NodeId,
    pub range: KeyRange,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn Transport>,
    pub shared: Arc<PeerShared>,
    pub throttle: Throttle,
    pub cancel: CancellationToken,
    pub stop_requested: Arc<AtomicBool>,
    pub config: BackfillConfig,
    pub phase: watch::Sender<SessionPhase>,
}

/// What the production loop should do next.
enum Step {
    /// Consume one hint. `usable` is false when clipping changed the
    /// hinted range, making its digest meaningless.
    Hint { pre: PreAtom, usable: bool },
    /// No hints apply up to `end`; stream the store's data there.
    StreamTo(RangeEnd),
    /// Hints for the remaining range may still arrive; wait.
    Wait,
}

pub(crate) struct BackfillSession {
    ctx: SessionContext,
    /// The not-yet-processed suffix of the session range.
    remaining: Option<KeyRange>,
    /// Newest version observed across streamed atoms and matched hints.
    max_version: Version,
    /// Set once the hint wait timed out; from then on the session
    /// streams without waiting for further hints.
    gave_up_on_hints: bool,
}

impl BackfillSession {
    pub(crate) fn new(ctx: SessionContext) -> Self {
        let remaining = (!ctx.range.is_empty()).then(|| ctx.range.clone());
        Self {
            ctx,
            remaining,
            max_version: Version::ZERO,
            gave_up_on_hints: false,
        }
    }

    /// Run to a terminal phase. Credit is released on every exit path.
    pub(crate) async fn run(mut self) {
        let _ = self.ctx.phase.send(SessionPhase::Streaming);
        let result = self.produce().await;
        self.ctx.throttle.release_all();

        let phase = match result {
            Ok(()) => SessionPhase::Completed,
            Err(SyncError::Interrupted) => {
                if self.ctx.stop_requested.load(Ordering::Acquire) {
                    SessionPhase::Stopped
                } else {
                    SessionPhase::Interrupted
                }
            }
            Err(error) => {
                tracing::error!(
                    session = %self.ctx.id,
                    peer = %self.ctx.peer,
                    %error,
                    "backfill session failed"
                );
                SessionPhase::Failed
            }
        };
        tracing::debug!(session = %self.ctx.id, peer = %self.ctx.peer, ?phase, "session finished");
        let _ = self.ctx.phase.send(phase);
    }

    async fn produce(&mut self) -> Result<()> {
        debug_assert!(self.ctx.config.validate().is_ok());

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(SyncError::Interrupted);
            }
            let Some(remaining) = self.remaining.clone() else {
                break;
            };

            // Register interest before inspecting the hint state, so a
            // hint arriving in between still wakes the wait below.
            let shared = Arc::clone(&self.ctx.shared);
            let notified = shared.hints_notify.notified();

            match self.next_step(&remaining) {
                Step::Hint { pre, usable } => {
                    if pre.range.start() > remaining.start() {
                        let gap = KeyRange::new(
                            remaining.start().clone(),
                            pre.range.start().clone(),
                        )?;
                        self.stream_range(&gap).await?;
                    }
                    let matched = if usable {
                        self.hint_matches(&pre).await?
                    } else {
                        None
                    };
                    match matched {
                        Some(version) => {
                            tracing::trace!(
                                session = %self.ctx.id,
                                range = ?pre.range,
                                "pre-atom matched; skipping"
                            );
                            self.max_version = self.max_version.max(version);
                        }
                        None => self.stream_range(&pre.range).await?,
                    }
                    self.advance(pre.range.end().clone());
                }
                Step::StreamTo(end) => {
                    let span = KeyRange::from_parts(remaining.start().clone(), end.clone())?;
                    self.stream_range(&span).await?;
                    self.advance(end);
                }
                Step::Wait => {
                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => return Err(SyncError::Interrupted),
                        _ = notified => {}
                        _ = tokio::time::sleep(self.ctx.config.hint_wait) => {
                            self.gave_up_on_hints = true;
                        }
                    }
                }
            }
        }

        self.finish().await
    }

    /// Decide the next step from the current hint state.
    ///
    /// Hints are consumed from the front of the queue in arrival order;
    /// a hint whose range was already passed is dropped (a late hint for
    /// a consumed sub-range is a no-op), and a hint beyond this session's
    /// range stays queued for a future session.
    fn next_step(&self, remaining: &KeyRange) -> Step {
        let mut hints = self.ctx.shared.hints.lock().unwrap();
        loop {
            let Some(front) = hints.queue.front() else {
                if self.gave_up_on_hints {
                    return Step::StreamTo(remaining.end().clone());
                }
                return match &hints.horizon {
                    Some(h) if h >= remaining.end() => Step::StreamTo(remaining.end().clone()),
                    Some(h) if h.is_above(remaining.start()) => Step::StreamTo(h.clone()),
                    _ => Step::Wait,
                };
            };

            // Entirely behind the cursor: consumed.
            if !front.range.end().is_above(remaining.start()) {
                hints.queue.pop_front();
                continue;
            }
            // Entirely beyond this session: not ours to consume.
            if let RangeEnd::Key(end) = remaining.end() {
                if front.range.start() >= end {
                    return Step::StreamTo(remaining.end().clone());
                }
            }

            let pre = hints.queue.pop_front().expect("front was just inspected");
            match pre.clip_to(remaining) {
                Some(clipped) => {
                    let usable = clipped.range == pre.range;
                    return Step::Hint {
                        pre: clipped,
                        usable,
                    };
                }
                None => continue,
            }
        }
    }

    /// Check the store's current content for the hinted range against
    /// the peer's claim.
    ///
    /// On a match, returns the newest version the store actually holds
    /// there — the peer's own `version` field is not trusted for the
    /// merge.
    async fn hint_matches(&self, pre: &PreAtom) -> Result<Option<Version>> {
        let (digest, observed) = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Err(SyncError::Interrupted),
            result = range_digest(
                self.ctx.store.as_ref(),
                &pre.range,
                self.ctx.config.scan_page,
            ) => result?,
        };
        Ok((digest == pre.digest).then_some(observed))
    }

    /// Enumerate `range` from the store and ship it as atom batches.
    async fn stream_range(&mut self, range: &KeyRange) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let mut cursor = range.clone();
        let mut batch: Vec<Atom> = Vec::new();
        let mut batch_bytes: u64 = 0;

        loop {
            let page = tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Err(SyncError::Interrupted),
                page = self.ctx.store.scan(&cursor, self.ctx.config.scan_page) => page?,
            };

            for entry in &page.entries {
                let atom = Atom {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                    version: entry.version,
                };
                let size = atom.size();
                if size > self.ctx.config.max_atom_bytes {
                    return Err(SyncError::Config(format!(
                        "atom of {size} bytes exceeds max_atom_bytes {}",
                        self.ctx.config.max_atom_bytes
                    )));
                }
                if !batch.is_empty()
                    && (batch_bytes + size > self.ctx.config.max_batch_bytes
                        || batch.len() >= limits::MAX_ATOMS_PER_MESSAGE)
                {
                    self.flush(&mut batch, &mut batch_bytes).await?;
                }
                self.max_version = self.max_version.max(atom.version);
                batch_bytes += size;
                batch.push(atom);
            }

            if !page.more {
                break;
            }
            let last = page.entries.last().expect("non-final page is non-empty");
            cursor = KeyRange::from_parts(last.key.successor(), cursor.end().clone())
                .expect("successor of an in-range key never passes the bound");
        }

        self.flush(&mut batch, &mut batch_bytes).await
    }

    /// Acquire credit for the pending batch and send it.
    async fn flush(&mut self, batch: &mut Vec<Atom>, batch_bytes: &mut u64) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Err(SyncError::Interrupted),
            acquired = self.ctx.throttle.acquire(*batch_bytes) => acquired?,
        }
        let message = Message::Atoms {
            session_id: self.ctx.id,
            atoms: std::mem::take(batch),
        };
        *batch_bytes = 0;
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(SyncError::Interrupted),
            sent = self.ctx.transport.send(&self.ctx.peer, message) => sent,
        }
    }

    /// Advance past `to`, shrinking the remaining range.
    fn advance(&mut self, to: RangeEnd) {
        let Some(remaining) = &self.remaining else {
            return;
        };
        self.remaining = match to {
            RangeEnd::Unbounded => None,
            RangeEnd::Key(key) => match remaining.end() {
                RangeEnd::Key(end) if &key >= end => None,
                _ => Some(
                    KeyRange::from_parts(key, remaining.end().clone())
                        .expect("cursor stays within the session range"),
                ),
            },
        };
    }

    /// Commit: merge the observed version for exactly the session range
    /// and tell the peer the range is complete.
    async fn finish(&mut self) -> Result<()> {
        {
            let mut map = self.ctx.shared.version_map.lock().unwrap();
            map.merge(&self.ctx.range, self.max_version)?;
        }
        let done = Message::Done {
            session_id: self.ctx.id,
            version: self.max_version,
        };
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(SyncError::Interrupted),
            sent = self.ctx.transport.send(&self.ctx.peer, done) => sent,
        }
    }
}
