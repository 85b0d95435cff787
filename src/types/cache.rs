//! Response cache types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request parameters that disambiguate calls to the same endpoint.
pub type Parameters = serde_json::Map<String, Value>;

/// A stored copy of an upstream API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: u64,
    pub endpoint: String,
    pub parameters: Parameters,
    pub response: Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is expired once `expires_at` is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a cache lookup with the failure case made explicit.
///
/// Storage failures surface as [`CacheLookup::Unavailable`] rather than an
/// error, so a caller can never accidentally propagate one.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
    Unavailable(String),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Collapse to an option; an unavailable store reads as a miss.
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Miss | Self::Unavailable(_) => None,
        }
    }
}

/// A maintenance stage that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_removed: usize,
    pub old_removed: usize,
    pub excess_removed: usize,
    pub invalid_removed: usize,
    /// Entries left after the pass (0 if the final count failed).
    pub remaining: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stage_errors: Vec<StageError>,
    /// First failure message, if any stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MaintenanceReport {
    pub fn total_removed(&self) -> usize {
        self.expired_removed + self.old_removed + self.excess_removed + self.invalid_removed
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn record_failure(&mut self, stage: &str, message: String) {
        if self.error.is_none() {
            self.error = Some(format!("{stage}: {message}"));
        }
        self.stage_errors.push(StageError {
            stage: stage.to_string(),
            message,
        });
    }
}

/// Aggregate view of the cache table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    /// Number of distinct endpoints with at least one entry.
    pub endpoints: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Per-endpoint entry counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointUsage {
    pub endpoint: String,
    pub entries: usize,
    pub valid_entries: usize,
}
