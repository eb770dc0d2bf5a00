use std::time::Duration;

use chrono::Weekday;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::time_window::{parse_weekday, TimeRange};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] envy::Error),
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

/// envy lowercases variable names, so fields match `RECORD_STORE` etc. as-is.
#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    #[serde(default = "default_record_store")]
    record_store: String,
    redis_url: Option<String>,
    worker_id: Option<String>,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_prometheus_port")]
    prometheus_port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_record_key")]
    redis_record_key: String,
    #[serde(default = "default_insert_channel")]
    redis_insert_channel: String,
    #[serde(default = "default_time_range")]
    default_time_range: String,
    #[serde(default = "default_week_start")]
    week_start: String,
    #[serde(default = "default_fetch_timeout")]
    fetch_timeout_sec: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_backoff_base")]
    retry_backoff_base: f64,
    #[serde(default)]
    reaggregate_debounce_ms: u64,
    #[serde(default = "default_command_queue_capacity")]
    command_queue_capacity: usize,
    #[serde(default = "default_feed_buffer")]
    feed_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub record_store: StoreBackend,
    pub redis_url: Option<String>,
    pub worker_id: String,
    pub http_port: u16,
    pub prometheus_port: u16,
    pub log_level: String,
    pub redis_record_key: String,
    pub redis_insert_channel: String,
    pub default_time_range: TimeRange,
    pub week_start: Weekday,
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_base: f64,
    pub reaggregate_debounce: Duration,
    pub command_queue_capacity: usize,
    pub feed_buffer: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw: RawSettings = envy::from_env()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let worker_id = raw
            .worker_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()))
            .to_lowercase();

        let record_store = match raw.record_store.trim().to_ascii_lowercase().as_str() {
            "redis" => StoreBackend::Redis,
            "memory" => StoreBackend::Memory,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "RECORD_STORE",
                    value: raw.record_store,
                })
            }
        };
        let redis_url = raw.redis_url.filter(|url| !url.trim().is_empty());
        if record_store == StoreBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::Invalid {
                key: "REDIS_URL",
                value: String::new(),
            });
        }

        let default_time_range = raw
            .default_time_range
            .parse::<TimeRange>()
            .map_err(|_| ConfigError::Invalid {
                key: "DEFAULT_TIME_RANGE",
                value: raw.default_time_range.clone(),
            })?;
        let week_start = parse_weekday(&raw.week_start).ok_or_else(|| ConfigError::Invalid {
            key: "WEEK_START",
            value: raw.week_start.clone(),
        })?;

        Ok(Self {
            record_store,
            redis_url,
            worker_id,
            http_port: raw.http_port,
            prometheus_port: raw.prometheus_port,
            log_level: raw.log_level.to_ascii_lowercase(),
            redis_record_key: raw.redis_record_key,
            redis_insert_channel: raw.redis_insert_channel,
            default_time_range,
            week_start,
            fetch_timeout: Duration::from_secs(raw.fetch_timeout_sec.max(1)),
            max_retries: raw.max_retries,
            retry_backoff_base: raw.retry_backoff_base.max(0.0),
            reaggregate_debounce: Duration::from_millis(raw.reaggregate_debounce_ms),
            command_queue_capacity: raw.command_queue_capacity.max(1),
            feed_buffer: raw.feed_buffer.max(1),
        })
    }
}

fn default_record_store() -> String {
    "redis".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_prometheus_port() -> u16 {
    8001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_record_key() -> String {
    "face_analytics:records".to_string()
}

fn default_insert_channel() -> String {
    "face_analytics:inserts".to_string()
}

fn default_time_range() -> String {
    "today".to_string()
}

fn default_week_start() -> String {
    "sunday".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_base() -> f64 {
    0.5
}

fn default_command_queue_capacity() -> usize {
    16
}

fn default_feed_buffer() -> usize {
    1024
}
