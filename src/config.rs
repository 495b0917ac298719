use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Longest hold TTL accepted from the environment: one week.
const MAX_HOLD_TTL_SECS: u64 = 7 * 24 * 3600;

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Process configuration, read from `COURTBOOK_*` environment variables.
/// Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub hold_ttl: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub catalog_path: Option<PathBuf>,
    pub accounts_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            hold_ttl: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            metrics_port: None,
            catalog_path: None,
            accounts_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("COURTBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "COURTBOOK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("COURTBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_connections: parsed(&lookup, "COURTBOOK_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            hold_ttl: parsed(&lookup, "COURTBOOK_HOLD_TTL_SECS")
                .filter(|s: &u64| (1..=MAX_HOLD_TTL_SECS).contains(s))
                .map_or(defaults.hold_ttl, Duration::from_secs),
            sweep_interval: parsed(&lookup, "COURTBOOK_SWEEP_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            compact_threshold: parsed(&lookup, "COURTBOOK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "COURTBOOK_METRICS_PORT"),
            catalog_path: lookup("COURTBOOK_CATALOG").map(PathBuf::from),
            accounts_path: lookup("COURTBOOK_ACCOUNTS").map(PathBuf::from),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
