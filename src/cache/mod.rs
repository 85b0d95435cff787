//! Response cache for external API calls.
//!
//! [`ResponseCache`] keeps upstream responses keyed by `(endpoint,
//! parameters)` with an expiry, on top of any [`CacheStore`].
//!
//! # Fail-soft contract
//!
//! Caching is an optimisation, never a correctness dependency. No method
//! here returns an error: storage failures are logged and read as a miss,
//! a skipped write, a zero count or an empty listing. The one exception is
//! [`ResponseCache::remember`], which propagates errors from the caller's
//! own fetch (the cache never masks an upstream failure).
//!
//! # Keys
//!
//! Writes and invalidations use exact `(endpoint, parameters)` equality.
//! Lookups use containment (see [`params`]): a stored entry matches if its
//! parameters include every queried pair.
//!
//! # Maintenance
//!
//! Expired, stale, excess and invalid entries are removed by
//! [`ResponseCache::perform_maintenance`], typically on a timer via
//! [`MaintenanceTask`].

pub mod maintenance;
pub mod params;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::clock::{self, Clock};
use crate::store::CacheStore;
use crate::telemetry;
use crate::types::{CacheEntry, CacheLookup, CacheStats, EndpointUsage, Parameters};
use crate::{MuninnError, Result};

pub use maintenance::{MaintenanceTask, MaintenanceTotals};

/// Configuration for the response cache.
///
/// ```rust
/// # use muninn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(5_000)
///     .default_ttl(Duration::from_secs(15 * 60));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used by [`ResponseCache::store_default_ttl`]. Default: 60 minutes.
    pub default_ttl: Duration,
    /// Entry cap enforced by maintenance. Default: 10,000.
    pub max_entries: usize,
    /// Entries created longer ago than this are purged regardless of
    /// expiry. Default: 7 days.
    pub max_age: Duration,
    /// Rows deleted per expired-sweep chunk. Default: 500.
    pub sweep_batch_size: usize,
    /// Period of the background maintenance task. Default: 1 hour.
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60 * 60),
            max_entries: 10_000,
            max_age: Duration::from_secs(7 * 24 * 3600),
            sweep_batch_size: 500,
            maintenance_interval: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }

    pub fn sweep_batch_size(mut self, n: usize) -> Self {
        self.sweep_batch_size = n;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }
}

/// Fail-soft response cache over a [`CacheStore`].
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            clock: clock::system(),
            config,
        }
    }

    /// Use a custom time source (defaults to the system clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// First valid entry for `endpoint` whose parameters contain `parameters`.
    ///
    /// Storage failures are logged and reported as a miss.
    pub async fn lookup(&self, endpoint: &str, parameters: &Parameters) -> Option<CacheEntry> {
        self.lookup_entry(endpoint, parameters).await.into_entry()
    }

    /// Like [`lookup`](Self::lookup), but keeps "store unavailable" distinct
    /// from a plain miss.
    pub async fn lookup_entry(&self, endpoint: &str, parameters: &Parameters) -> CacheLookup {
        let now = self.clock.now();
        match self.store.find_matching(endpoint, parameters, now).await {
            Ok(Some(entry)) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "endpoint" => endpoint.to_owned())
                    .increment(1);
                CacheLookup::Hit(entry)
            }
            Ok(None) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "endpoint" => endpoint.to_owned())
                    .increment(1);
                CacheLookup::Miss
            }
            Err(e) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "endpoint" => endpoint.to_owned())
                    .increment(1);
                warn!(endpoint, error = %e, "cache lookup failed, treating as miss");
                CacheLookup::Unavailable(e.to_string())
            }
        }
    }

    /// Cache `response` for `ttl_minutes`, replacing any entry with exactly
    /// the same key.
    ///
    /// Returns `None` without writing if the response is empty (`null`, `{}`
    /// or `[]`) or the store fails.
    #[instrument(skip(self, parameters, response))]
    pub async fn store(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        ttl_minutes: u32,
    ) -> Option<CacheEntry> {
        let ttl = Duration::from_secs(u64::from(ttl_minutes) * 60);
        self.store_with_ttl(endpoint, parameters, response, ttl)
            .await
    }

    /// [`store`](Self::store) with the configured default TTL.
    pub async fn store_default_ttl(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
    ) -> Option<CacheEntry> {
        self.store_with_ttl(endpoint, parameters, response, self.config.default_ttl)
            .await
    }

    async fn store_with_ttl(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        ttl: Duration,
    ) -> Option<CacheEntry> {
        if params::is_empty_response(&response) {
            metrics::counter!(telemetry::CACHE_WRITES_TOTAL, "status" => "rejected").increment(1);
            warn!(endpoint, "refusing to cache empty response");
            return None;
        }

        match self.write(endpoint, parameters, response, ttl).await {
            Ok(entry) => {
                metrics::counter!(telemetry::CACHE_WRITES_TOTAL, "status" => "ok").increment(1);
                debug!(endpoint, id = entry.id, expires_at = %entry.expires_at, "response cached");
                Some(entry)
            }
            Err(e) => {
                metrics::counter!(telemetry::CACHE_WRITES_TOTAL, "status" => "error").increment(1);
                warn!(endpoint, error = %e, "cache store failed, continuing without cache");
                None
            }
        }
    }

    async fn write(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| MuninnError::InvalidInput(format!("ttl out of range: {ttl:?}")))?;
        self.store
            .replace(endpoint, parameters, response, expires_at, now)
            .await
    }

    /// Serve from cache, or run `fetch` and cache its result.
    ///
    /// A failing fetch propagates its error and nothing is cached. An empty
    /// fetch result is returned but not cached.
    pub async fn remember<F, Fut>(
        &self,
        endpoint: &str,
        parameters: Parameters,
        ttl_minutes: u32,
        fetch: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(entry) = self.lookup(endpoint, &parameters).await {
            return Ok(entry.response);
        }
        let response = fetch().await?;
        if !params::is_empty_response(&response) {
            self.store(endpoint, parameters, response.clone(), ttl_minutes)
                .await;
        }
        Ok(response)
    }

    /// Remove the entry stored under exactly `(endpoint, parameters)`.
    pub async fn invalidate(&self, endpoint: &str, parameters: &Parameters) -> usize {
        self.store
            .delete_exact(endpoint, parameters)
            .await
            .unwrap_or_else(|e| {
                warn!(endpoint, error = %e, "cache invalidation failed");
                0
            })
    }

    /// Remove every entry for `endpoint`.
    pub async fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        self.store
            .delete_endpoint(endpoint)
            .await
            .unwrap_or_else(|e| {
                warn!(endpoint, error = %e, "endpoint invalidation failed");
                0
            })
    }

    /// Remove every entry.
    pub async fn clear(&self) -> usize {
        self.store.clear().await.unwrap_or_else(|e| {
            warn!(error = %e, "cache clear failed");
            0
        })
    }

    /// Aggregate counts over the whole cache. Zeroed on failure.
    pub async fn stats(&self) -> CacheStats {
        let entries = match self.store.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache stats unavailable");
                return CacheStats::default();
            }
        };

        let now = self.clock.now();
        let valid = entries.iter().filter(|e| !e.is_expired(now)).count();
        let endpoints: std::collections::BTreeSet<_> =
            entries.iter().map(|e| e.endpoint.as_str()).collect();
        CacheStats {
            total_entries: entries.len(),
            valid_entries: valid,
            expired_entries: entries.len() - valid,
            endpoints: endpoints.len(),
            oldest_entry: entries.iter().map(|e| e.created_at).min(),
            newest_entry: entries.iter().map(|e| e.created_at).max(),
        }
    }

    /// Distinct endpoints with a valid entry, sorted. Empty on failure.
    pub async fn endpoints(&self) -> Vec<String> {
        self.usage()
            .await
            .into_iter()
            .filter(|u| u.valid_entries > 0)
            .map(|u| u.endpoint)
            .collect()
    }

    /// Entry counts per endpoint, sorted by endpoint. Empty on failure.
    pub async fn usage(&self) -> Vec<EndpointUsage> {
        let entries = match self.store.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache usage unavailable");
                return Vec::new();
            }
        };

        let now = self.clock.now();
        let mut by_endpoint: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for entry in &entries {
            let counts = by_endpoint.entry(entry.endpoint.clone()).or_default();
            counts.0 += 1;
            if !entry.is_expired(now) {
                counts.1 += 1;
            }
        }
        by_endpoint
            .into_iter()
            .map(|(endpoint, (entries, valid_entries))| EndpointUsage {
                endpoint,
                entries,
                valid_entries,
            })
            .collect()
    }
}
