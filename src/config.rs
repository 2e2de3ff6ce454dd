//! Server settings read from `APPOINTD_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{EngineError, EngineSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Catalog JSON file; the built-in catalog is used when unset.
    pub catalog: Option<PathBuf>,
    pub interval_minutes: u32,
    pub default_days: u32,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7878,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            catalog: None,
            interval_minutes: 10,
            default_days: 7,
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Numbers that fail to parse keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            port: parse_var(&lookup, "APPOINTD_PORT").unwrap_or(defaults.port),
            bind: lookup("APPOINTD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("APPOINTD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            catalog: lookup("APPOINTD_CATALOG")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            interval_minutes: parse_var(&lookup, "APPOINTD_INTERVAL_MINUTES").unwrap_or(defaults.interval_minutes),
            default_days: parse_var(&lookup, "APPOINTD_DEFAULT_DAYS").unwrap_or(defaults.default_days),
            max_connections: parse_var(&lookup, "APPOINTD_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "APPOINTD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "APPOINTD_METRICS_PORT"),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            interval_minutes: self.interval_minutes,
            default_number_of_days: self.default_days,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.engine_settings().validate()?;
        if self.max_connections == 0 {
            return Err(EngineError::InvalidRequest("max connections must be positive"));
        }
        Ok(())
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointments.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
