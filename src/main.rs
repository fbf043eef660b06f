use anyhow::Context;
use dhtharvest::config::Config;
use dhtharvest::dht::DhtServer;
use dhtharvest::record::TorrentRecord;
use dhtharvest::scheduler::{PeerFetcher, Scheduler};
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STATS_EVERY: Duration = Duration::from_secs(60);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Records go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;

    let fetcher = PeerFetcher::new(config.session.clone());
    let (scheduler, mut records) = Scheduler::new(config.scheduler.clone(), fetcher);

    let (server, dht) = DhtServer::bind(config.dht.clone(), scheduler.clone())
        .await
        .with_context(|| format!("bind DHT socket on {}", config.dht.bind))?;
    info!(addr = %dht.local_addr(), id = %dht.id(), "DHT node listening");

    let mut dht_task = server.spawn();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut stats_tick = tokio::time::interval(STATS_EVERY);
    stats_tick.tick().await;

    let dht_exit = loop {
        tokio::select! {
            Some(record) = records.recv() => emit(&record)?,
            _ = stats_tick.tick() => {
                let s = scheduler.stats();
                info!(
                    active = s.active,
                    queued = s.queue_len,
                    started = s.started,
                    completed = s.completed,
                    dropped = s.dropped_full,
                    blacklisted = s.blacklisted,
                    timeouts = s.failed_timeout,
                    protocol_errors = s.failed_protocol,
                    "scheduler stats"
                );
                match dht.stats().await {
                    Ok(d) => info!(
                        nodes = d.nodes,
                        verified = d.verified_nodes,
                        pending = d.pending_queries,
                        announces = d.announces,
                        bad_tokens = d.bad_tokens,
                        "dht stats"
                    ),
                    Err(e) => warn!(error = %e, "dht stats unavailable"),
                }
            }
            res = &mut dht_task => break Some(res),
            res = &mut ctrl_c => {
                res.context("listen for ctrl-c")?;
                info!("Shutting down");
                break None;
            }
        }
    };

    scheduler.shutdown();

    let dht_result = match dht_exit {
        Some(res) => res,
        None => {
            dht.shutdown().await;
            dht_task.await
        }
    };
    match dht_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "DHT loop failed"),
        Err(e) => warn!(error = %e, "DHT task failed"),
    }

    if tokio::time::timeout(DRAIN_TIMEOUT, scheduler.wait_idle())
        .await
        .is_err()
    {
        warn!("metadata sessions still running at exit");
    }

    while let Ok(record) = records.try_recv() {
        emit(&record)?;
    }

    Ok(())
}

/// Writes one record as a JSON line.
fn emit(record: &TorrentRecord) -> anyhow::Result<()> {
    let line = serde_json::to_string(record).context("serialize record")?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}").context("write record")?;
    out.flush().context("flush stdout")
}
