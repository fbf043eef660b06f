use super::session::SessionState;
use thiserror::Error;

/// Coarse classification of a [`PeerError`], used for counters and for
/// deciding whether a peer deserves the blacklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Decode,
    Protocol,
    Timeout,
    Validation,
    Network,
    Aborted,
}

/// Errors that can end a metadata session.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The TCP connection could not be established.
    #[error("dial failed: {0}")]
    Dial(std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid handshake")]
    InvalidHandshake,

    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// The peer did not set the BEP-10 reserved bit.
    #[error("peer does not support the extension protocol")]
    ExtensionUnsupported,

    #[error("peer does not support ut_metadata")]
    MetadataUnsupported,

    #[error("invalid metadata size: {0:?}")]
    InvalidMetadataSize(Option<i64>),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("peer rejected metadata piece {0}")]
    PieceRejected(u32),

    #[error("unexpected metadata piece {got}, wanted {expected}")]
    PieceOutOfRange { got: u32, expected: u32 },

    #[error("metadata piece {piece} is {len} bytes, expected {expected}")]
    OversizedPiece {
        piece: u32,
        len: usize,
        expected: usize,
    },

    #[error("metadata piece {piece} is {len} bytes, expected {expected}")]
    UndersizedPiece {
        piece: u32,
        len: usize,
        expected: usize,
    },

    #[error("total_size {got} disagrees with metadata_size {expected}")]
    TotalSizeMismatch { got: i64, expected: usize },

    /// SHA-1 of the reassembled metadata is not the info hash.
    #[error("metadata hash mismatch")]
    HashMismatch,

    #[error("metadata is not a dictionary")]
    NotADictionary,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout while {0}")]
    Timeout(SessionState),

    /// The whole session ran past its deadline.
    #[error("session deadline exceeded")]
    Deadline,

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("session aborted")]
    Aborted,
}

impl PeerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PeerError::Bencode(_) => FailureKind::Decode,
            PeerError::Timeout(_) | PeerError::Deadline => FailureKind::Timeout,
            PeerError::HashMismatch => FailureKind::Validation,
            PeerError::Dial(_) | PeerError::Io(_) | PeerError::ConnectionClosed => {
                FailureKind::Network
            }
            PeerError::Aborted => FailureKind::Aborted,
            PeerError::InvalidHandshake
            | PeerError::InfoHashMismatch
            | PeerError::ExtensionUnsupported
            | PeerError::MetadataUnsupported
            | PeerError::InvalidMetadataSize(_)
            | PeerError::InvalidMessage(_)
            | PeerError::PieceRejected(_)
            | PeerError::PieceOutOfRange { .. }
            | PeerError::OversizedPiece { .. }
            | PeerError::UndersizedPiece { .. }
            | PeerError::TotalSizeMismatch { .. }
            | PeerError::NotADictionary => FailureKind::Protocol,
        }
    }

    /// Failures after which the same peer is not worth dialing again soon.
    pub fn blacklists_peer(&self) -> bool {
        matches!(self, PeerError::Dial(_))
            || matches!(
                self.kind(),
                FailureKind::Protocol | FailureKind::Validation
            )
    }
}
