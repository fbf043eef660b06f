//! Bounded pool of metadata sessions fed by DHT announces.
//!
//! [`Scheduler::submit`] never blocks: an announce either starts a session
//! at once (a worker permit is free), waits in a bounded FIFO, or is
//! dropped and counted. A finishing session hands its slot to the oldest
//! queued announce, so a burst of `queue + workers + n` announces starts
//! exactly `queue + workers` sessions.
//!
//! | Outcome | When |
//! |---------|------|
//! | [`Submission::Started`] | a worker permit was free |
//! | [`Submission::Queued`] | all workers busy, queue has room |
//! | [`Submission::Dropped`] | workers and queue full |
//! | [`Submission::Duplicate`] | same info hash and peer already pending |
//! | [`Submission::Blacklisted`] | peer failed recently |
//! | [`Submission::ShutDown`] | [`Scheduler::shutdown`] was called |

mod blacklist;
mod stats;

pub use stats::{SchedulerStats, StatsSnapshot};

use crate::dht::{AnnounceEvent, AnnounceSink};
use crate::info_hash::InfoHash;
use crate::peer::{fetch_metadata, Metadata, PeerError, PeerId, SessionConfig};
use crate::record::TorrentRecord;
use blacklist::Blacklist;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sessions allowed to run at once.
    pub workers: usize,
    /// Announces allowed to wait for a worker.
    pub queue: usize,
    /// Hard limit on one session, dial to validation.
    pub session_deadline: Duration,
    pub blacklist_ttl: Duration,
    pub blacklist_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 1024,
            queue: 1024,
            session_deadline: Duration::from_secs(30),
            blacklist_ttl: Duration::from_secs(10 * 60),
            blacklist_capacity: 65_536,
        }
    }
}

/// Downloads the info dictionary for one announce.
pub trait MetadataFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        info_hash: InfoHash,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<Metadata, PeerError>> + Send;
}

/// Fetches over TCP with the ut_metadata session.
pub struct PeerFetcher {
    peer_id: PeerId,
    config: SessionConfig,
}

impl PeerFetcher {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            peer_id: PeerId::generate(),
            config,
        }
    }
}

impl MetadataFetcher for PeerFetcher {
    fn fetch(
        &self,
        info_hash: InfoHash,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<Metadata, PeerError>> + Send {
        fetch_metadata(peer, info_hash, self.peer_id, &self.config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Started,
    Queued,
    Duplicate,
    Blacklisted,
    Dropped,
    ShutDown,
}

struct Shared {
    queue: VecDeque<AnnounceEvent>,
    /// Running and queued announces.
    pending: HashSet<AnnounceEvent>,
    blacklist: Blacklist,
}

struct Inner<F> {
    config: SchedulerConfig,
    fetcher: F,
    permits: Arc<Semaphore>,
    shared: Mutex<Shared>,
    stats: SchedulerStats,
    records: mpsc::UnboundedSender<TorrentRecord>,
    shutdown: watch::Sender<bool>,
}

/// Turns announces into [`TorrentRecord`]s.
///
/// ```no_run
/// use dhtharvest::peer::SessionConfig;
/// use dhtharvest::scheduler::{PeerFetcher, Scheduler, SchedulerConfig};
///
/// # async fn example() {
/// let fetcher = PeerFetcher::new(SessionConfig::default());
/// let (scheduler, mut records) = Scheduler::new(SchedulerConfig::default(), fetcher);
///
/// // hand `scheduler.clone()` to the DHT as its announce sink, then:
/// while let Some(record) = records.recv().await {
///     println!("{} {}", record.info_hash, record.name);
/// }
/// # }
/// ```
pub struct Scheduler<F = PeerFetcher> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for Scheduler<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: MetadataFetcher> Scheduler<F> {
    pub fn new(
        mut config: SchedulerConfig,
        fetcher: F,
    ) -> (Self, mpsc::UnboundedReceiver<TorrentRecord>) {
        // Zero permits would park every announce in the queue forever.
        config.workers = config.workers.max(1);
        let (records, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            queue: VecDeque::with_capacity(config.queue.min(4096)),
            pending: HashSet::new(),
            blacklist: Blacklist::new(config.blacklist_ttl, config.blacklist_capacity),
        };

        let inner = Inner {
            permits: Arc::new(Semaphore::new(config.workers)),
            shared: Mutex::new(shared),
            stats: SchedulerStats::default(),
            fetcher,
            records,
            shutdown,
            config,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn submit(&self, event: AnnounceEvent) -> Submission {
        let inner = &self.inner;
        SchedulerStats::bump(&inner.stats.submitted);

        // Checked under the lock so nothing is queued after `shutdown` drains.
        let mut shared = inner.shared.lock();
        if *inner.shutdown.borrow() {
            return Submission::ShutDown;
        }

        if shared.blacklist.contains(&event.peer, Instant::now()) {
            SchedulerStats::bump(&inner.stats.blacklisted);
            trace!(peer = %event.peer, "skipping blacklisted peer");
            return Submission::Blacklisted;
        }

        if shared.pending.contains(&event) {
            SchedulerStats::bump(&inner.stats.duplicates);
            return Submission::Duplicate;
        }

        match Arc::clone(&inner.permits).try_acquire_owned() {
            Ok(permit) => {
                shared.pending.insert(event);
                start_session(Arc::clone(inner), event, permit);
                Submission::Started
            }
            Err(_) if shared.queue.len() < inner.config.queue => {
                shared.pending.insert(event);
                shared.queue.push_back(event);
                SchedulerStats::bump(&inner.stats.queued);
                Submission::Queued
            }
            Err(_) => {
                SchedulerStats::bump(&inner.stats.dropped_full);
                trace!(info_hash = %event.info_hash, peer = %event.peer, "scheduler full, dropping announce");
                Submission::Dropped
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let queue_len = self.inner.shared.lock().queue.len();
        let active = self
            .inner
            .config
            .workers
            .saturating_sub(self.inner.permits.available_permits());
        self.inner.stats.snapshot(active, queue_len)
    }

    /// Aborts running sessions, forgets queued announces and refuses new
    /// ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let mut guard = self.inner.shared.lock();
        let shared = &mut *guard;
        let dropped = shared.queue.len();
        for event in shared.queue.drain(..) {
            shared.pending.remove(&event);
        }

        info!("Scheduler shutting down, {} queued announces dropped", dropped);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Resolves once no session holds a worker slot. Meant for use after
    /// [`shutdown`](Self::shutdown); while announces still arrive it may
    /// never resolve.
    pub async fn wait_idle(&self) {
        let workers = u32::try_from(self.inner.config.workers).unwrap_or(u32::MAX);
        if let Ok(all) = self.inner.permits.acquire_many(workers).await {
            drop(all);
        }
    }
}

impl<F: MetadataFetcher> AnnounceSink for Scheduler<F> {
    fn offer(&self, event: AnnounceEvent) -> bool {
        matches!(
            self.submit(event),
            Submission::Started | Submission::Queued
        )
    }
}

impl<F: MetadataFetcher> Inner<F> {
    async fn run(&self, event: AnnounceEvent) {
        let mut shutdown = self.shutdown.subscribe();
        let fetch = timeout(
            self.config.session_deadline,
            self.fetcher.fetch(event.info_hash, event.peer),
        );

        let result = tokio::select! {
            r = fetch => r.unwrap_or_else(|_| Err(PeerError::Deadline)),
            _ = shutdown.wait_for(|stop| *stop) => Err(PeerError::Aborted),
        };

        self.finish(event, result);
    }

    fn finish(&self, event: AnnounceEvent, result: Result<Metadata, PeerError>) {
        let metadata = match result {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(info_hash = %event.info_hash, peer = %event.peer, error = %e, "metadata fetch failed");
                if e.blacklists_peer() {
                    self.shared
                        .lock()
                        .blacklist
                        .insert(event.peer, Instant::now());
                }
                self.stats.record_failure(e.kind());
                return;
            }
        };

        match TorrentRecord::from_metadata(event.info_hash, &metadata.info) {
            Ok(record) => {
                debug!(info_hash = %event.info_hash, peer = %event.peer, name = %record.name, "metadata fetched");
                let _ = self.records.send(record);
                SchedulerStats::bump(&self.stats.completed);
            }
            Err(e) => {
                SchedulerStats::bump(&self.stats.discarded);
                debug!(info_hash = %event.info_hash, error = %e, "discarding metadata");
            }
        }
    }
}

/// A worker's hold on the pool. Dropping it, however the session ended,
/// frees the slot and starts the next queued announce.
struct Slot<F: MetadataFetcher> {
    inner: Arc<Inner<F>>,
    event: AnnounceEvent,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: MetadataFetcher> Drop for Slot<F> {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        shared.pending.remove(&self.event);
        drop(self.permit.take());

        if *self.inner.shutdown.borrow() || tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        let Some(next) = shared.queue.pop_front() else {
            return;
        };
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => start_session(Arc::clone(&self.inner), next, permit),
            Err(_) => shared.queue.push_front(next),
        }
    }
}

fn start_session<F: MetadataFetcher>(
    inner: Arc<Inner<F>>,
    event: AnnounceEvent,
    permit: OwnedSemaphorePermit,
) {
    SchedulerStats::bump(&inner.stats.started);
    trace!(info_hash = %event.info_hash, peer = %event.peer, "starting metadata session");

    let slot = Slot {
        inner,
        event,
        permit: Some(permit),
    };

    tokio::spawn(async move {
        slot.inner.run(slot.event).await;
        drop(slot);
    });
}

#[cfg(test)]
mod tests;
