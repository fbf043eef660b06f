//! Peer wire protocol, as much of it as a metadata fetch needs
//! (BEP-3 handshake, BEP-10 extension protocol, BEP-9 ut_metadata).
//!
//! [`fetch_metadata`] dials a peer that announced an info hash, downloads
//! the info dictionary piece by piece and checks it against the hash.

mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod session;
mod transport;

pub use error::{FailureKind, PeerError};
pub use extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA};
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use metadata::{
    metadata_piece_count, metadata_piece_size, MetadataMessage, MetadataMessageType,
    METADATA_PIECE_SIZE,
};
pub use peer_id::PeerId;
pub use session::{
    fetch_metadata, validate_metadata, Metadata, MetadataSession, SessionConfig, SessionState,
    CLIENT_VERSION, OUR_UT_METADATA_ID,
};
pub use transport::{PeerTransport, MAX_MESSAGE_SIZE};

#[cfg(test)]
mod tests;
