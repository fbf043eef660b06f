//! Distributed Hash Table crawler (BEP-5)
//!
//! A single UDP event loop that joins the Kademlia DHT, keeps its routing
//! table filled by walking sparse regions of the id space, answers the
//! four KRPC queries, and turns every valid `announce_peer` it receives
//! into an [`AnnounceEvent`].
//!
//! It never looks up peers itself: the only peers this node learns about
//! are the ones that announce to it.

mod announce;
mod crawler;
mod error;
mod message;
mod node;
mod routing;
mod server;
mod token;
mod transaction;

pub use announce::{AnnounceEvent, AnnounceSink};
pub use crawler::{CrawlPlan, Crawler, Probe};
pub use error::DhtError;
pub use message::{
    decode_compact_peer, encode_compact_peer, DhtBody, DhtMessage, DhtQuery, DhtResponse,
    TransactionId, ERROR_GENERIC, ERROR_METHOD_UNKNOWN, ERROR_PROTOCOL, ERROR_SERVER,
};
pub use node::{decode_compact_nodes, encode_compact_nodes, Node, NodeId, COMPACT_NODE_LEN};
pub use routing::{InsertOutcome, RoutingTable, K};
pub use server::{DhtConfig, DhtHandle, DhtServer, DhtStats, BOOTSTRAP_NODES};
pub use token::TokenSecrets;
