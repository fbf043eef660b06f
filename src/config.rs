//! Process configuration read from `DHTHARVEST_*` environment variables.
//!
//! Every setting has a default; a malformed number or flag falls back to it,
//! as does a zero duration or worker count.
//! Only the bind address is strict, since silently listening elsewhere is
//! worse than refusing to start.

use crate::dht::{DhtConfig, BOOTSTRAP_NODES};
use crate::peer::SessionConfig;
use crate::scheduler::SchedulerConfig;
use anyhow::Context;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const PREFIX: &str = "DHTHARVEST_";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub dht: DhtConfig,
    pub session: SessionConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // Process env wins over .env, which wins over defaults.
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, which maps a full variable name
    /// (`DHTHARVEST_WORKERS`) to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env { lookup };
        let dht_defaults = DhtConfig::default();
        let session_defaults = SessionConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        let bind = match env.opt_string("DHT_BIND") {
            Some(s) => SocketAddr::from_str(&s)
                .with_context(|| format!("parse {PREFIX}DHT_BIND {s:?}"))?,
            None => dht_defaults.bind,
        };

        let dht = DhtConfig {
            bind,
            bootstrap: env.csv_strings("BOOTSTRAP", BOOTSTRAP_NODES),
            query_timeout: env.secs("QUERY_TIMEOUT_SECS", dht_defaults.query_timeout),
            ping_retries: env.u8("PING_RETRIES", dht_defaults.ping_retries),
            refresh_interval: env.secs("REFRESH_SECS", dht_defaults.refresh_interval),
            neighbor_mode: env.enabled("NEIGHBOR_MODE", dht_defaults.neighbor_mode),
            verify_tokens: env.enabled("VERIFY_TOKENS", dht_defaults.verify_tokens),
            ..dht_defaults
        };

        let session = SessionConfig {
            connect_timeout: env.secs("CONNECT_TIMEOUT_SECS", session_defaults.connect_timeout),
            handshake_timeout: env.secs(
                "HANDSHAKE_TIMEOUT_SECS",
                session_defaults.handshake_timeout,
            ),
            piece_timeout: env.secs("PIECE_TIMEOUT_SECS", session_defaults.piece_timeout),
            max_metadata_size: env.usize(
                "MAX_METADATA_BYTES",
                session_defaults.max_metadata_size,
            ),
        };

        let scheduler = SchedulerConfig {
            workers: env.positive("WORKERS", scheduler_defaults.workers),
            queue: env.usize("QUEUE", scheduler_defaults.queue),
            session_deadline: env.secs(
                "SESSION_DEADLINE_SECS",
                scheduler_defaults.session_deadline,
            ),
            blacklist_ttl: env.secs("BLACKLIST_TTL_SECS", scheduler_defaults.blacklist_ttl),
            ..scheduler_defaults
        };

        Ok(Self {
            dht,
            session,
            scheduler,
        })
    }
}

struct Env<L> {
    lookup: L,
}

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn opt_string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{name}"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.opt_string(name).and_then(|v| v.parse::<T>().ok())
    }

    fn u8(&self, name: &str, default: u8) -> u8 {
        self.parse(name).unwrap_or(default)
    }

    fn usize(&self, name: &str, default: usize) -> usize {
        self.parse(name).unwrap_or(default)
    }

    fn positive(&self, name: &str, default: usize) -> usize {
        self.parse(name).filter(|&n| n > 0).unwrap_or(default)
    }

    fn secs(&self, name: &str, default: Duration) -> Duration {
        self.parse::<u64>(name)
            .filter(|&n| n > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    fn csv_strings(&self, name: &str, defaults: &[&str]) -> Vec<String> {
        if let Some(s) = self.opt_string(name) {
            let v: Vec<String> = s
                .split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect();
            if !v.is_empty() {
                return v;
            }
        }
        defaults.iter().map(|s| s.to_string()).collect()
    }

    fn enabled(&self, name: &str, default: bool) -> bool {
        match self.opt_string(name) {
            None => default,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "0" | "false" | "off" | "no" => false,
                "1" | "true" | "on" | "yes" => true,
                _ => default,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{PREFIX}{k}"), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.dht.bind, SocketAddr::from(([0, 0, 0, 0], 6881)));
        assert_eq!(config.dht.bootstrap.len(), 3);
        assert_eq!(config.dht.bootstrap[0], "router.bittorrent.com:6881");
        assert!(config.dht.verify_tokens);
        assert!(!config.dht.neighbor_mode);
        assert_eq!(config.scheduler.workers, 1024);
        assert_eq!(config.scheduler.queue, 1024);
        assert_eq!(config.scheduler.session_deadline, Duration::from_secs(30));
        assert_eq!(config.session.max_metadata_size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DHT_BIND", "127.0.0.1:7000"),
            ("BOOTSTRAP", " a.example:1 , ,b.example:2"),
            ("WORKERS", "16"),
            ("QUEUE", "32"),
            ("PIECE_TIMEOUT_SECS", "3"),
            ("NEIGHBOR_MODE", "yes"),
            ("VERIFY_TOKENS", "off"),
            ("PING_RETRIES", "4"),
            ("BLACKLIST_TTL_SECS", "60"),
        ])
        .unwrap();

        assert_eq!(config.dht.bind, SocketAddr::from(([127, 0, 0, 1], 7000)));
        assert_eq!(config.dht.bootstrap, vec!["a.example:1", "b.example:2"]);
        assert_eq!(config.scheduler.workers, 16);
        assert_eq!(config.scheduler.queue, 32);
        assert_eq!(config.session.piece_timeout, Duration::from_secs(3));
        assert!(config.dht.neighbor_mode);
        assert!(!config.dht.verify_tokens);
        assert_eq!(config.dht.ping_retries, 4);
        assert_eq!(config.scheduler.blacklist_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = config_from(&[
            ("WORKERS", "many"),
            ("PING_RETRIES", "300"),
            ("VERIFY_TOKENS", "maybe"),
        ])
        .unwrap();

        assert_eq!(config.scheduler.workers, 1024);
        assert_eq!(config.dht.ping_retries, 2);
        assert!(config.dht.verify_tokens);
    }

    #[test]
    fn test_zero_values_fall_back() {
        let config = config_from(&[
            ("REFRESH_SECS", "0"),
            ("QUERY_TIMEOUT_SECS", "0"),
            ("SESSION_DEADLINE_SECS", "0"),
            ("WORKERS", "0"),
        ])
        .unwrap();
        let defaults = Config::default();

        assert_eq!(config.dht.refresh_interval, defaults.dht.refresh_interval);
        assert_eq!(config.dht.query_timeout, defaults.dht.query_timeout);
        assert_eq!(
            config.scheduler.session_deadline,
            defaults.scheduler.session_deadline
        );
        assert_eq!(config.scheduler.workers, 1024);
    }

    #[test]
    fn test_invalid_bind_is_error() {
        let err = config_from(&[("DHT_BIND", "not-an-address")]).unwrap_err();
        assert!(err.to_string().contains("DHTHARVEST_DHT_BIND"));
    }
}
