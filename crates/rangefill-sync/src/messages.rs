//! Backfill protocol message types and wire codec.
//!
//! Four message kinds flow backfillee → source (`PreAtoms`, `Go`, `Stop`,
//! `AckAtoms`), each carrying an [`OrderingToken`]; atoms and the
//! completion marker flow back. Registration events (`Intro`, `Bye`)
//! model the handshake the registration collaborator delivers and carry
//! no token — they bracket the peer's token stream rather than being part
//! of it.

use serde::{Deserialize, Serialize};

use rangefill_core::{Atom, KeyRange, NodeId, PreAtom, SessionId, Version};
use rangefill_history::BranchId;

use crate::error::{Result, SyncError};
use crate::sequencer::OrderingToken;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max pre-atoms in one `PreAtoms` message.
    pub const MAX_PRE_ATOMS_PER_MESSAGE: usize = 256;
    /// Max atoms in one `Atoms` message.
    pub const MAX_ATOMS_PER_MESSAGE: usize = 256;
}

/// A backfillee's introductory handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIntro {
    /// The registering peer.
    pub peer: NodeId,
    /// Protocol version for compatibility checking.
    pub protocol_version: u8,
    /// The sub-region of the source's region the peer wants to catch up.
    pub region: KeyRange,
    /// The branch the peer's existing data lives on.
    pub branch: BranchId,
    /// How far along that branch the peer claims parity.
    pub caught_up_to: Version,
}

/// Backfill protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Registration handshake; creates the peer session.
    Intro(PeerIntro),

    /// Deregistration; tears the peer session down.
    Bye,

    /// Delta-optimization hints. `range` declares the span now fully
    /// described by hints; gaps inside it hold nothing the peer has.
    PreAtoms {
        token: OrderingToken,
        range: KeyRange,
        atoms: Vec<PreAtom>,
    },

    /// Start a backfill session, retiring any current one.
    Go {
        token: OrderingToken,
        session_id: SessionId,
        range: KeyRange,
    },

    /// Cancel the session if it is still the active one.
    Stop {
        token: OrderingToken,
        session_id: SessionId,
    },

    /// Return flow-control credit for received atoms.
    AckAtoms {
        token: OrderingToken,
        session_id: SessionId,
        range: KeyRange,
        size: u64,
    },

    /// Source → backfillee: a batch of atoms, in key order.
    Atoms {
        session_id: SessionId,
        atoms: Vec<Atom>,
    },

    /// Source → backfillee: the session completed; `version` is the
    /// version the transferred range is now known to hold.
    Done {
        session_id: SessionId,
        version: Version,
    },
}

impl Message {
    /// The ordering token, for the four sequenced message kinds.
    pub fn token(&self) -> Option<OrderingToken> {
        match self {
            Message::PreAtoms { token, .. }
            | Message::Go { token, .. }
            | Message::Stop { token, .. }
            | Message::AckAtoms { token, .. } => Some(*token),
            _ => None,
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<()> {
        match self {
            Message::PreAtoms { atoms, .. } => {
                if atoms.len() > limits::MAX_PRE_ATOMS_PER_MESSAGE {
                    return Err(SyncError::Protocol("too many pre-atoms".into()));
                }
            }
            Message::Atoms { atoms, .. } => {
                if atoms.len() > limits::MAX_ATOMS_PER_MESSAGE {
                    return Err(SyncError::Protocol("too many atoms".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Encode a message to its CBOR wire form.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decode a message from its CBOR wire form.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    ciborium::from_reader(bytes).map_err(|e| SyncError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rangefill_core::RangeDigest;

    fn range(start: &str, end: &str) -> KeyRange {
        KeyRange::new(start.into(), end.into()).unwrap()
    }

    #[test]
    fn test_codec_round_trip() {
        let messages = vec![
            Message::Intro(PeerIntro {
                peer: NodeId::random(),
                protocol_version: PROTOCOL_VERSION,
                region: range("a", "z"),
                branch: BranchId::random(),
                caught_up_to: Version(5),
            }),
            Message::Bye,
            Message::PreAtoms {
                token: OrderingToken(0),
                range: range("a", "m"),
                atoms: vec![PreAtom {
                    range: range("a", "f"),
                    version: Version(3),
                    digest: RangeDigest::from_bytes([7; 32]),
                }],
            },
            Message::Go {
                token: OrderingToken(1),
                session_id: SessionId::random(),
                range: range("a", "z"),
            },
            Message::Stop {
                token: OrderingToken(2),
                session_id: SessionId::random(),
            },
            Message::AckAtoms {
                token: OrderingToken(3),
                session_id: SessionId::random(),
                range: range("a", "c"),
                size: 4096,
            },
            Message::Atoms {
                session_id: SessionId::random(),
                atoms: vec![Atom {
                    key: "k".into(),
                    value: Bytes::from_static(b"v"),
                    version: Version(9),
                }],
            },
            Message::Done {
                session_id: SessionId::random(),
                version: Version(12),
            },
        ];
        for message in messages {
            let bytes = encode(&message).unwrap();
            assert_eq!(decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"not cbor at all").is_err());
    }

    #[test]
    fn test_token_only_on_sequenced_kinds() {
        assert!(Message::Bye.token().is_none());
        let stop = Message::Stop {
            token: OrderingToken(4),
            session_id: SessionId::random(),
        };
        assert_eq!(stop.token(), Some(OrderingToken(4)));
    }

    #[test]
    fn test_limits_enforced() {
        let atom = Atom {
            key: "k".into(),
            value: Bytes::new(),
            version: Version(0),
        };
        let msg = Message::Atoms {
            session_id: SessionId::random(),
            atoms: vec![atom; limits::MAX_ATOMS_PER_MESSAGE + 1],
        };
        assert!(msg.validate_limits().is_err());
    }
}
