use super::*;
use crate::bencode::{encode, Value};
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Record,
    Unnamed,
    DialRefused,
    Hang,
}

/// Counts calls and optionally holds each fetch until the gate opens.
struct MockFetcher {
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    outcome: Outcome,
}

impl MockFetcher {
    fn new(outcome: Outcome) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
            outcome,
        }
    }

    fn gated(outcome: Outcome, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(outcome)
        }
    }
}

impl MetadataFetcher for MockFetcher {
    fn fetch(
        &self,
        info_hash: InfoHash,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<Metadata, PeerError>> + Send {
        let calls = Arc::clone(&self.calls);
        let gate = self.gate.clone();
        let outcome = self.outcome;

        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = gate {
                let _pass = gate.acquire().await;
            }

            match outcome {
                Outcome::Record => Ok(metadata(info_hash, Some(&format!("file-{}", peer.port())))),
                Outcome::Unnamed => Ok(metadata(info_hash, None)),
                Outcome::DialRefused => Err(PeerError::Dial(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                ))),
                Outcome::Hang => std::future::pending().await,
            }
        }
    }
}

fn metadata(info_hash: InfoHash, name: Option<&str>) -> Metadata {
    let info = match name {
        Some(name) => Value::dict([
            ("length", Value::Integer(42)),
            ("name", Value::string(name)),
        ]),
        None => Value::dict([("length", Value::Integer(42))]),
    };
    let raw = Bytes::from(encode(&info));
    Metadata {
        info_hash,
        info,
        raw,
    }
}

fn event(hash: u8, port: u16) -> AnnounceEvent {
    AnnounceEvent {
        info_hash: InfoHash([hash; 20]),
        peer: SocketAddr::from(([10, 0, 0, 1], port)),
    }
}

fn config(workers: usize, queue: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        queue,
        session_deadline: Duration::from_secs(5),
        ..SchedulerConfig::default()
    }
}

async fn wait_until<F: MetadataFetcher>(
    scheduler: &Scheduler<F>,
    done: impl Fn(&StatsSnapshot) -> bool,
) -> StatsSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = scheduler.stats();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scheduler did not reach the expected state")
}

#[tokio::test]
async fn test_backpressure() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = MockFetcher::gated(Outcome::Record, Arc::clone(&gate));
    let calls = Arc::clone(&fetcher.calls);
    let (scheduler, mut records) = Scheduler::new(config(4, 3), fetcher);

    let outcomes: Vec<_> = (0..10).map(|i| scheduler.submit(event(1, 1000 + i))).collect();
    assert_eq!(&outcomes[..4], &[Submission::Started; 4]);
    assert_eq!(&outcomes[4..7], &[Submission::Queued; 3]);
    assert_eq!(&outcomes[7..], &[Submission::Dropped; 3]);

    let stats = scheduler.stats();
    assert_eq!(stats.active, 4);
    assert_eq!(stats.queue_len, 3);
    assert_eq!(stats.dropped_full, 3);

    gate.add_permits(1);
    let stats = wait_until(&scheduler, |s| s.finished() == 7 && s.active == 0).await;

    assert_eq!(calls.load(Ordering::SeqCst), 7);
    assert_eq!(stats.started, 7);
    assert_eq!(stats.completed, 7);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queue_len, 0);

    let mut names = Vec::new();
    while let Ok(record) = records.try_recv() {
        names.push(record.name);
    }
    names.sort();
    let expected: Vec<String> = (1000..1007).map(|p| format!("file-{}", p)).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_deadline_frees_slot() {
    let fetcher = MockFetcher::new(Outcome::Hang);
    let cfg = SchedulerConfig {
        session_deadline: Duration::from_millis(50),
        ..config(1, 1)
    };
    let (scheduler, _records) = Scheduler::new(cfg, fetcher);

    assert_eq!(scheduler.submit(event(1, 1)), Submission::Started);
    assert_eq!(scheduler.submit(event(1, 2)), Submission::Queued);

    let stats = wait_until(&scheduler, |s| s.finished() == 2 && s.active == 0).await;
    assert_eq!(stats.failed_timeout, 2);
    assert_eq!(stats.started, 2);

    // Timeouts are not the peer's fault.
    assert_eq!(scheduler.submit(event(2, 1)), Submission::Started);
}

#[tokio::test]
async fn test_dial_failure_blacklists_peer() {
    let (scheduler, _records) = Scheduler::new(config(4, 4), MockFetcher::new(Outcome::DialRefused));

    assert_eq!(scheduler.submit(event(1, 7)), Submission::Started);
    let stats = wait_until(&scheduler, |s| s.finished() == 1 && s.active == 0).await;
    assert_eq!(stats.failed_network, 1);

    assert_eq!(scheduler.submit(event(2, 7)), Submission::Blacklisted);
    assert_eq!(scheduler.submit(event(2, 8)), Submission::Started);
    assert_eq!(scheduler.stats().blacklisted, 1);
}

#[tokio::test]
async fn test_duplicate_pending() {
    let gate = Arc::new(Semaphore::new(0));
    let (scheduler, _records) = Scheduler::new(
        config(1, 1),
        MockFetcher::gated(Outcome::Record, Arc::clone(&gate)),
    );

    assert_eq!(scheduler.submit(event(1, 1)), Submission::Started);
    assert_eq!(scheduler.submit(event(1, 1)), Submission::Duplicate);
    assert_eq!(scheduler.submit(event(1, 2)), Submission::Queued);
    assert_eq!(scheduler.submit(event(1, 2)), Submission::Duplicate);

    gate.add_permits(1);
    wait_until(&scheduler, |s| s.finished() == 2 && s.active == 0).await;

    // Finished announces may be fetched again.
    assert_eq!(scheduler.submit(event(1, 1)), Submission::Started);
    assert_eq!(scheduler.stats().duplicates, 2);
}

#[tokio::test]
async fn test_shutdown_aborts_sessions() {
    let (scheduler, _records) = Scheduler::new(config(2, 2), MockFetcher::new(Outcome::Hang));

    for port in 1..=4 {
        scheduler.submit(event(1, port));
    }
    assert_eq!(scheduler.stats().queue_len, 2);

    scheduler.shutdown();
    assert!(scheduler.is_shut_down());

    tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
        .await
        .unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.aborted, 2);
    assert_eq!(stats.started, 2);
    assert_eq!(stats.queue_len, 0);
    assert_eq!(stats.active, 0);

    assert_eq!(scheduler.submit(event(1, 9)), Submission::ShutDown);
}

#[tokio::test]
async fn test_record_emitted() {
    let (scheduler, mut records) = Scheduler::new(config(1, 0), MockFetcher::new(Outcome::Record));

    let e = event(5, 6881);
    assert_eq!(scheduler.submit(e), Submission::Started);

    let record = tokio::time::timeout(Duration::from_secs(5), records.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.info_hash, e.info_hash);
    assert_eq!(record.name, "file-6881");
    assert_eq!(record.length, Some(42));
}

#[tokio::test]
async fn test_unusable_metadata_discarded() {
    let (scheduler, mut records) = Scheduler::new(config(1, 0), MockFetcher::new(Outcome::Unnamed));

    scheduler.submit(event(1, 1));
    let stats = wait_until(&scheduler, |s| s.finished() == 1 && s.active == 0).await;

    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.completed, 0);
    assert!(records.try_recv().is_err());
}

#[tokio::test]
async fn test_offer_reports_acceptance() {
    let gate = Arc::new(Semaphore::new(0));
    let (scheduler, _records) = Scheduler::new(
        config(1, 1),
        MockFetcher::gated(Outcome::Record, Arc::clone(&gate)),
    );

    assert!(scheduler.offer(event(1, 1)));
    assert!(scheduler.offer(event(1, 2)));
    assert!(!scheduler.offer(event(1, 2)));
    assert!(!scheduler.offer(event(1, 3)));

    let stats = scheduler.stats();
    assert_eq!(stats.submitted, 4);
    assert_eq!(stats.dropped_full, 1);
}

#[tokio::test]
async fn test_zero_workers_still_runs() {
    let (scheduler, mut records) = Scheduler::new(config(0, 1), MockFetcher::new(Outcome::Record));

    assert_eq!(scheduler.submit(event(3, 1)), Submission::Started);
    assert_eq!(scheduler.submit(event(3, 2)), Submission::Queued);

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), records.recv())
            .await
            .unwrap()
            .unwrap();
    }
    let stats = wait_until(&scheduler, |s| s.finished() == 2 && s.active == 0).await;
    assert_eq!(stats.completed, 2);
}
