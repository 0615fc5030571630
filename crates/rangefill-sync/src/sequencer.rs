//! The ordering layer: per-peer FIFO enforcement over an unordered
//! transport.
//!
//! The transport may deliver one peer's messages out of order (never
//! silently dropping them). Each message carries an [`OrderingToken`]
//! issued monotonically by the sender; the receiving [`Sequencer`] admits
//! messages strictly in token order, buffering early arrivals and
//! discarding duplicates. Handlers that only consume messages released by
//! the sequencer therefore observe the peer's original send order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A per-peer monotonic sequence number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingToken(pub u64);

impl OrderingToken {
    /// The first token a peer issues.
    pub const FIRST: Self = Self(0);

    /// The token after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for OrderingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// The sending side: issues consecutive tokens.
///
/// Lives on the backfillee; here it drives tests and the scripted peer.
#[derive(Debug, Default)]
pub struct TokenIssuer {
    next: u64,
}

impl TokenIssuer {
    /// Start issuing from [`OrderingToken::FIRST`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next token.
    pub fn issue(&mut self) -> OrderingToken {
        let token = OrderingToken(self.next);
        self.next += 1;
        token
    }
}

/// Outcome of admitting one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<M> {
    /// The message (and possibly buffered successors) may run now, in
    /// the order given.
    Ready(Vec<M>),
    /// Arrived early; held until the gap before it closes.
    Buffered,
    /// Duplicate or already-superseded token; the message is discarded.
    Stale,
}

/// The receiving side: validates tokens and releases messages in order.
#[derive(Debug)]
pub struct Sequencer<M> {
    next: u64,
    buffered: BTreeMap<u64, M>,
}

impl<M> Sequencer<M> {
    /// A sequencer expecting [`OrderingToken::FIRST`].
    pub fn new() -> Self {
        Self {
            next: 0,
            buffered: BTreeMap::new(),
        }
    }

    /// The token the next in-order message must carry.
    pub fn next_expected(&self) -> OrderingToken {
        OrderingToken(self.next)
    }

    /// Number of early arrivals currently held.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Admit one message.
    ///
    /// A message carrying exactly the next expected token is released
    /// together with every buffered successor that now forms a contiguous
    /// run; a higher token is buffered; a lower or duplicate token is
    /// discarded.
    pub fn admit(&mut self, token: OrderingToken, message: M) -> Admission<M> {
        if token.0 < self.next || self.buffered.contains_key(&token.0) {
            return Admission::Stale;
        }
        if token.0 > self.next {
            self.buffered.insert(token.0, message);
            return Admission::Buffered;
        }

        let mut ready = vec![message];
        self.next += 1;
        while let Some(msg) = self.buffered.remove(&self.next) {
            ready.push(msg);
            self.next += 1;
        }
        Admission::Ready(ready)
    }
}

impl<M> Default for Sequencer<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_in_order_released_immediately() {
        let mut seq = Sequencer::new();
        assert_eq!(seq.admit(OrderingToken(0), "a"), Admission::Ready(vec!["a"]));
        assert_eq!(seq.admit(OrderingToken(1), "b"), Admission::Ready(vec!["b"]));
        assert_eq!(seq.next_expected(), OrderingToken(2));
    }

    #[test]
    fn test_gap_buffers_until_closed() {
        let mut seq = Sequencer::new();
        assert_eq!(seq.admit(OrderingToken(2), "c"), Admission::Buffered);
        assert_eq!(seq.admit(OrderingToken(1), "b"), Admission::Buffered);
        assert_eq!(seq.buffered_len(), 2);
        assert_eq!(
            seq.admit(OrderingToken(0), "a"),
            Admission::Ready(vec!["a", "b", "c"])
        );
        assert_eq!(seq.buffered_len(), 0);
    }

    #[test]
    fn test_duplicates_discarded() {
        let mut seq = Sequencer::new();
        assert_eq!(seq.admit(OrderingToken(0), "a"), Admission::Ready(vec!["a"]));
        assert_eq!(seq.admit(OrderingToken(0), "a2"), Admission::Stale);

        assert_eq!(seq.admit(OrderingToken(5), "f"), Admission::Buffered);
        assert_eq!(seq.admit(OrderingToken(5), "f2"), Admission::Stale);
    }

    #[test]
    fn test_issuer_matches_sequencer() {
        let mut issuer = TokenIssuer::new();
        let mut seq = Sequencer::new();
        for i in 0..4u64 {
            let token = issuer.issue();
            assert_eq!(token, OrderingToken(i));
            assert_eq!(seq.admit(token, i), Admission::Ready(vec![i]));
        }
    }

    proptest! {
        /// For any delivery permutation of tokens 0..n, the released
        /// order is exactly 0..n.
        #[test]
        fn prop_release_order_is_send_order(perm in prop::sample::subsequence(
            (0u64..32).collect::<Vec<_>>(), 0..32
        ).prop_shuffle()) {
            let mut seq = Sequencer::new();
            let mut released = Vec::new();
            let mut sorted = perm.clone();
            sorted.sort_unstable();
            // Only a prefix-complete set releases fully; admit the
            // permutation, then fill in the missing tokens in order.
            for &t in &perm {
                if let Admission::Ready(batch) = seq.admit(OrderingToken(t), t) {
                    released.extend(batch);
                }
            }
            for t in 0..32u64 {
                if !sorted.contains(&t) {
                    if let Admission::Ready(batch) = seq.admit(OrderingToken(t), t) {
                        released.extend(batch);
                    }
                }
            }
            prop_assert_eq!(released, (0..32u64).collect::<Vec<_>>());
        }
    }
}
