//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (caller-provided)
//! 2. `~/.muninn/config.toml` (user)
//! 3. `/etc/muninn/config.toml` (system)
//!
//! `RECOMMENDATION_API_URL`, when set, overrides `engine.base_url`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::cache::CacheConfig;
use crate::forward::engine::{BASE_URL_ENV, DEFAULT_BASE_URL};
use crate::forward::{
    DeliveryMode, EngineClient, ForwardQueue, Forwarder, InteractionSink, QueueConfig,
    QueueTotals, RetryConfig,
};
use crate::recorder::{DedupMode, RecorderConfig};
use crate::{MuninnError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub interactions: InteractionsConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub cache: CacheSection,
}

/// Recommendation engine endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Engine base URL (default: http://localhost:8001).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Forward request timeout in milliseconds (default: 2000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    2_000
}

/// Interaction recorder settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionsConfig {
    /// Duplicate window in seconds (default: 60).
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    #[serde(default)]
    pub dedup_mode: DedupMode,
    /// Log `view` events at debug level (default: false).
    #[serde(default)]
    pub log_view_events: bool,
}

impl Default for InteractionsConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window(),
            dedup_mode: DedupMode::default(),
            log_view_events: false,
        }
    }
}

fn default_dedup_window() -> u64 {
    60
}

/// Forward delivery mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryModeKind {
    #[default]
    Inline,
    Queued,
}

/// Forward delivery settings. Queue and retry fields only apply to `queued`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryModeKind,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryModeKind::default(),
            queue_capacity: default_queue_capacity(),
            dead_letter_capacity: default_dead_letter_capacity(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1_024
}

fn default_dead_letter_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_minutes: default_ttl_minutes(),
            max_entries: default_max_entries(),
            max_age_days: default_max_age_days(),
            sweep_batch_size: default_sweep_batch_size(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

fn default_ttl_minutes() -> u64 {
    60
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_age_days() -> u64 {
    7
}

fn default_sweep_batch_size() -> usize {
    500
}

fn default_maintenance_interval() -> u64 {
    3_600
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.muninn/config.toml`
    /// 3. `/etc/muninn/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no config
    /// file exists anywhere. An explicit path that does not exist is still
    /// an error.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path) {
            Ok(path) => Self::load_from_file(&path),
            Err(_) if explicit_path.is_none() => Ok(Self::default().with_env_overrides()),
            Err(e) => Err(e),
        }
    }

    /// Parse a config from a TOML string, applying environment overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| {
            MuninnError::Configuration(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MuninnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            MuninnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.engine.base_url = url;
            }
        }
        self
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(MuninnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muninn").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/muninn/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(MuninnError::Configuration(
            "No config file found. Create ~/.muninn/config.toml or /etc/muninn/config.toml"
                .to_string(),
        ))
    }

    /// Check that every duration in the file fits the runtime types.
    pub fn validate(&self) -> Result<()> {
        self.recorder_config()?;
        self.cache_config()?;
        Ok(())
    }

    pub fn recorder_config(&self) -> Result<RecorderConfig> {
        let secs = self.interactions.dedup_window_secs;
        let window = i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                MuninnError::Configuration(format!(
                    "interactions.dedup_window_secs out of range: {secs}"
                ))
            })?;
        Ok(RecorderConfig::new()
            .dedup_window(window)
            .dedup_mode(self.interactions.dedup_mode)
            .log_view_events(self.interactions.log_view_events))
    }

    pub fn cache_config(&self) -> Result<CacheConfig> {
        let cache = &self.cache;
        let default_ttl = scaled_secs("cache.default_ttl_minutes", cache.default_ttl_minutes, 60)?;
        let max_age = scaled_secs("cache.max_age_days", cache.max_age_days, 24 * 3600)?;
        Ok(CacheConfig::new()
            .default_ttl(default_ttl)
            .max_entries(cache.max_entries)
            .max_age(max_age)
            .sweep_batch_size(cache.sweep_batch_size)
            .maintenance_interval(Duration::from_secs(cache.maintenance_interval_secs)))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.delivery.max_attempts)
            .initial_delay(Duration::from_millis(self.delivery.initial_delay_ms))
            .max_delay(Duration::from_millis(self.delivery.max_delay_ms))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new()
            .capacity(self.delivery.queue_capacity)
            .dead_letter_capacity(self.delivery.dead_letter_capacity)
            .attempt_timeout(self.engine_timeout())
            .retry(self.retry_config())
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.timeout_ms)
    }

    /// Build the HTTP engine client described by `[engine]`.
    pub fn engine_client(&self) -> Result<Arc<EngineClient>> {
        EngineClient::with_timeout(&self.engine.base_url, self.engine_timeout()).map(Arc::new)
    }

    /// Build the forwarder selected by `delivery.mode`.
    ///
    /// Queued mode spawns the queue worker on the current tokio runtime and
    /// returns its handle alongside the forwarder.
    pub fn forwarder(
        &self,
        sink: Arc<dyn InteractionSink>,
    ) -> (Forwarder, Option<JoinHandle<QueueTotals>>) {
        match self.delivery.mode {
            DeliveryModeKind::Inline => {
                let mode = DeliveryMode::Inline {
                    timeout: self.engine_timeout(),
                };
                (Forwarder::new(sink, mode), None)
            }
            DeliveryModeKind::Queued => {
                let (queue, worker) = ForwardQueue::spawn(sink.clone(), self.queue_config());
                (Forwarder::queued(sink, queue), Some(worker))
            }
        }
    }
}

/// `value * unit` seconds, or a configuration error naming `field`.
fn scaled_secs(field: &str, value: u64, unit: u64) -> Result<Duration> {
    value
        .checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(|| MuninnError::Configuration(format!("{field} out of range: {value}")))
}
