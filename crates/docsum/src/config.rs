//! Runtime configuration.
//!
//! Every knob is read from a `DOCSUM_*` environment variable with a
//! documented default, so a bare worker process starts against a local
//! engine without any setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the job/summary/audit database.
    pub database_path: PathBuf,
    /// Path to the broker's message store.
    pub queue_path: PathBuf,
    /// Base URL of the summarization engine.
    pub engine_url: String,
    /// Timeout for a single engine call, in seconds.
    pub engine_timeout_secs: u64,
    /// Retry budget assigned to newly created jobs.
    pub max_retries: u32,
    /// How often the reconciliation sweep runs, in seconds.
    pub sweep_interval_secs: u64,
    /// Age after which a pending job is considered stuck and republished.
    pub pending_stale_secs: u64,
    /// Audit records older than this many days are removed by cleanup.
    pub audit_retention_days: u32,
    /// Root directory of the document object store.
    pub document_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database_path: data_dir.join("docsum.db"),
            queue_path: data_dir.join("queue.db"),
            engine_url: "http://localhost:8000".to_string(),
            engine_timeout_secs: 600,
            max_retries: 3,
            sweep_interval_secs: 60,
            pending_stale_secs: 300,
            audit_retention_days: 30,
            document_root: data_dir.join("documents"),
        }
    }
}

impl Config {
    /// Builds a config from `DOCSUM_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Self {
            database_path: env_path("DOCSUM_DB_PATH", defaults.database_path),
            queue_path: env_path("DOCSUM_QUEUE_PATH", defaults.queue_path),
            engine_url: env_string("DOCSUM_ENGINE_URL", defaults.engine_url),
            engine_timeout_secs: env_parse("DOCSUM_ENGINE_TIMEOUT", defaults.engine_timeout_secs)?,
            max_retries: env_parse("DOCSUM_MAX_RETRIES", defaults.max_retries)?,
            sweep_interval_secs: env_parse("DOCSUM_SWEEP_INTERVAL", defaults.sweep_interval_secs)?,
            pending_stale_secs: env_parse("DOCSUM_PENDING_STALE_AFTER", defaults.pending_stale_secs)?,
            audit_retention_days: env_parse(
                "DOCSUM_AUDIT_RETENTION_DAYS",
                defaults.audit_retention_days,
            )?,
            document_root: env_path("DOCSUM_DOCUMENT_ROOT", defaults.document_root),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "engine_url must not be empty".to_string(),
            });
        }
        if self.engine_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "engine_timeout_secs must be > 0".to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "sweep_interval_secs must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn pending_stale_after(&self) -> Duration {
        Duration::from_secs(self.pending_stale_secs)
    }
}

/// Canonical data directory: `~/.docsum/data`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docsum")
        .join("data")
}

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default,
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => PathBuf::from(v),
        _ => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: v,
        }),
        _ => Ok(default),
    }
}
