//! dhtharvest - A passive BitTorrent DHT crawler
//!
//! Joins the mainline DHT as an ordinary node, listens for `announce_peer`
//! traffic, and fetches the info dictionary of each announced torrent
//! straight from the announcing peer.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5 DHT node and crawl loop
//! - [`peer`] - BEP-3/9/10 handshake, extension protocol, ut_metadata fetch
//! - [`scheduler`] - Bounded pool of metadata sessions
//! - [`record`] - Torrent records built from verified metadata
//! - [`config`] - Environment configuration

pub mod bencode;
pub mod config;
pub mod dht;
pub mod info_hash;
pub mod peer;
pub mod record;
pub mod scheduler;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::Config;
pub use dht::{
    AnnounceEvent, AnnounceSink, DhtConfig, DhtError, DhtHandle, DhtMessage, DhtServer, DhtStats,
    Node, NodeId, RoutingTable,
};
pub use info_hash::InfoHash;
pub use peer::{fetch_metadata, Metadata, PeerError, PeerId, SessionConfig};
pub use record::{FileEntry, RecordError, TorrentRecord};
pub use scheduler::{
    MetadataFetcher, PeerFetcher, Scheduler, SchedulerConfig, StatsSnapshot, Submission,
};
