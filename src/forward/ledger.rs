//! At-most-once delivery ledger.
//!
//! Remembers which idempotency keys have already had a delivery attempt in
//! this process. Moka-backed LRU + TTL; a key is claimed atomically, so two
//! concurrent forwards of the same event cannot both proceed.

use std::time::Duration;

use moka::sync::Cache;

/// Configuration for the delivery ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Maximum remembered keys. Default: 100,000.
    pub max_entries: u64,
    /// How long a key is remembered. Default: 1 hour.
    pub ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Set of idempotency keys with an attempted delivery.
pub struct DeliveryLedger {
    claimed: Cache<String, ()>,
}

impl DeliveryLedger {
    pub fn new(config: &LedgerConfig) -> Self {
        let claimed = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self { claimed }
    }

    /// Claim `key` for delivery. Returns `false` if it was already claimed.
    pub fn claim(&self, key: &str) -> bool {
        self.claimed.entry(key.to_string()).or_insert(()).is_fresh()
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        self.claimed.contains_key(key)
    }
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new(&LedgerConfig::default())
    }
}
