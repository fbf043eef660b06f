use crate::info_hash::InfoHash;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// A third-party peer announced that it is in the swarm for `info_hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnounceEvent {
    pub info_hash: InfoHash,
    pub peer: SocketAddr,
}

/// Where the DHT loop publishes announces.
///
/// `offer` must not block: it either accepts the event or reports that it
/// was dropped.
pub trait AnnounceSink: Send + Sync + 'static {
    fn offer(&self, event: AnnounceEvent) -> bool;
}

impl AnnounceSink for mpsc::Sender<AnnounceEvent> {
    fn offer(&self, event: AnnounceEvent) -> bool {
        self.try_send(event).is_ok()
    }
}
