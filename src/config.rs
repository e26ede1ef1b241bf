//! Agent configuration from environment variables

use crate::pipeline::checkpoint::CHECKPOINT_INTERVAL_SECS;
use crate::pipeline::retry::{RetryPolicy, BACKOFF_TIME, NUM_RETRIES};
use crate::pipeline::window::{IntervalUnit, WindowPolicy};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Name the agent posts as `eventSource` and prints for `--name`
pub const AGENT_NAME: &str = "FrequentVisitorIdentificationAgent";

pub const STREAM_NAME: &str = "ema-event-stream";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for the frequent visitor agent
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_name: String,
    pub stream_name: String,
    /// JSONL files consumed as shards (one shard per file)
    pub shard_paths: Vec<PathBuf>,
    pub checkpoint_db_path: PathBuf,
    pub tag_output_path: PathBuf,
    pub worker_id: String,
    /// Records handed to the dispatcher per batch
    pub batch_size: usize,
    pub window: WindowPolicy,
    pub retry: RetryPolicy,
    pub checkpoint_interval_secs: i64,
}

impl AgentConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `AGENT_NAME` (default: FrequentVisitorIdentificationAgent)
    /// - `STREAM_NAME` (default: ema-event-stream)
    /// - `SHARD_PATHS` (comma-separated, default: none)
    /// - `CHECKPOINT_DB_PATH` (default: data/checkpoints.db)
    /// - `TAG_OUTPUT_PATH` (default: streams/tags.jsonl)
    /// - `WORKER_ID` (default: worker-<pid>)
    /// - `BATCH_SIZE` (default: 100)
    /// - `FREQUENCY_INTERVAL_UNIT` (minute|month, default: minute)
    /// - `FREQUENCY_WINDOW` (default: 5)
    /// - `FREQUENCY_THRESHOLD` (default: 2)
    /// - `NUM_RETRIES` (default: 10)
    /// - `BACKOFF_TIME_MS` (default: 3000)
    /// - `CHECKPOINT_INTERVAL_SECS` (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AgentConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let unit_str = lookup("FREQUENCY_INTERVAL_UNIT").unwrap_or_else(|| "minute".to_string());
        let unit = IntervalUnit::from_str(&unit_str).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "FREQUENCY_INTERVAL_UNIT must be minute or month, got '{}'",
                unit_str
            ))
        })?;

        let window = parse_or(&lookup, "FREQUENCY_WINDOW", 5u32)?;
        let threshold = parse_or(&lookup, "FREQUENCY_THRESHOLD", 2u32)?;
        if window == 0 {
            return Err(ConfigError::InvalidValue("FREQUENCY_WINDOW must be at least 1".to_string()));
        }
        if threshold == 0 {
            return Err(ConfigError::InvalidValue("FREQUENCY_THRESHOLD must be at least 1".to_string()));
        }

        let max_attempts = parse_or(&lookup, "NUM_RETRIES", NUM_RETRIES)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue("NUM_RETRIES must be at least 1".to_string()));
        }
        let backoff_ms = parse_or(&lookup, "BACKOFF_TIME_MS", BACKOFF_TIME.as_millis() as u64)?;

        let batch_size = parse_or(&lookup, "BATCH_SIZE", 100usize)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue("BATCH_SIZE must be at least 1".to_string()));
        }

        let shard_paths = lookup("SHARD_PATHS")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            agent_name: lookup("AGENT_NAME").unwrap_or_else(|| AGENT_NAME.to_string()),
            stream_name: lookup("STREAM_NAME").unwrap_or_else(|| STREAM_NAME.to_string()),
            shard_paths,
            checkpoint_db_path: lookup("CHECKPOINT_DB_PATH")
                .unwrap_or_else(|| "data/checkpoints.db".to_string())
                .into(),
            tag_output_path: lookup("TAG_OUTPUT_PATH")
                .unwrap_or_else(|| "streams/tags.jsonl".to_string())
                .into(),
            worker_id: lookup("WORKER_ID").unwrap_or_else(|| format!("worker-{}", std::process::id())),
            batch_size,
            window: WindowPolicy::new(unit, window, threshold),
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(backoff_ms)),
            checkpoint_interval_secs: parse_or(&lookup, "CHECKPOINT_INTERVAL_SECS", CHECKPOINT_INTERVAL_SECS)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_paths.is_empty() {
            return Err(ConfigError::MissingVariable("SHARD_PATHS".to_string()));
        }
        if self.checkpoint_interval_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "CHECKPOINT_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has unparseable value '{}'", key, raw))),
    }
}
