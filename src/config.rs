// Configuration - TOML file with defaults for every key
//
// Example:
//
//   database = "ratings.db"
//   recompute_interval_secs = 60
//   failure_policy = "retry"
//   max_backoff_secs = 900

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::StoreOptions;
use crate::error::{EngineError, Result};
use crate::scheduler::{FailurePolicy, SchedulerSettings};
use crate::stream::DEFAULT_STREAM_BUFFER;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub busy_timeout_ms: u64,
    pub recompute_interval_secs: u64,
    pub recompute_on_start: bool,
    pub failure_policy: FailurePolicy,
    pub max_backoff_secs: u64,
    pub stream_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("ratings.db"),
            busy_timeout_ms: 15_000,
            recompute_interval_secs: 60,
            recompute_on_start: true,
            failure_policy: FailurePolicy::Fatal,
            max_backoff_secs: 15 * 60,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.recompute_interval_secs == 0 {
            return Err(EngineError::Config("recompute_interval_secs must be positive".to_string()));
        }
        if self.stream_buffer == 0 {
            return Err(EngineError::Config("stream_buffer must be positive".to_string()));
        }
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            stream_buffer: self.stream_buffer,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_secs(self.recompute_interval_secs),
            policy: self.failure_policy,
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            run_on_start: self.recompute_on_start,
        }
    }
}
