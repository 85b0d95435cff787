//! Storage traits for interaction events and cache entries.
//!
//! The recorder and the cache manager talk to storage only through these
//! traits, injected as `Arc<dyn …>`. Relational backends live with the
//! host application; [`memory`] provides the in-process implementation used
//! by tests and single-node deployments.
//!
//! # Contract
//!
//! - Every method may fail with [`MuninnError::Storage`](crate::MuninnError::Storage).
//!   Callers decide whether that is fatal (event persistence) or absorbed
//!   (every cache operation).
//! - Deletions are idempotent: deleting rows that another caller already
//!   removed is not an error, it simply counts fewer rows.
//! - No method requires exclusive access to the table.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::Result;
use crate::types::{CacheEntry, InteractionEvent, InteractionType, NewInteraction, Parameters};

pub use memory::{MemoryCacheStore, MemoryInteractionStore};

// ============================================================================
// Interaction events
// ============================================================================

/// Outcome of an atomic insert-or-ignore.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(InteractionEvent),
    /// A matching event inside the window already exists; nothing was written.
    Duplicate(InteractionEvent),
}

/// Append-only table of interaction events.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Newest event for the triple whose `created_at` is strictly after `since`.
    async fn find_recent(
        &self,
        user_id: &str,
        project_id: &str,
        interaction_type: InteractionType,
        since: DateTime<Utc>,
    ) -> Result<Option<InteractionEvent>>;

    /// Persist an event unconditionally.
    async fn insert(
        &self,
        interaction: NewInteraction,
        created_at: DateTime<Utc>,
    ) -> Result<InteractionEvent>;

    /// Persist an event unless one with the same triple exists less than
    /// `window` before `created_at`. Check and insert happen atomically.
    async fn insert_unless_recent(
        &self,
        interaction: NewInteraction,
        created_at: DateTime<Utc>,
        window: Duration,
    ) -> Result<InsertOutcome>;

    /// Total number of persisted events.
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Cache entries
// ============================================================================

/// Table of cached upstream responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// First unexpired entry for `endpoint` whose parameters contain `query`.
    async fn find_matching(
        &self,
        endpoint: &str,
        query: &Parameters,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>>;

    /// Delete entries whose endpoint and parameters equal the key exactly.
    async fn delete_exact(&self, endpoint: &str, parameters: &Parameters) -> Result<usize>;

    async fn insert(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<CacheEntry>;

    /// Replace whatever is stored under exactly `(endpoint, parameters)`
    /// with a new entry.
    ///
    /// The default runs [`delete_exact`](Self::delete_exact) then
    /// [`insert`](Self::insert) as two calls; concurrent writers to one key
    /// can then both insert. Backends that can do both in one transaction or
    /// lock should override it.
    async fn replace(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        self.delete_exact(endpoint, &parameters).await?;
        self.insert(endpoint, parameters, response, expires_at, created_at)
            .await
    }

    /// Delete at most `limit` entries with `expires_at <= now`.
    async fn delete_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// Delete every entry created strictly before `cutoff`.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Delete the `n` oldest entries by creation time (ties broken by id).
    async fn delete_oldest(&self, n: usize) -> Result<usize>;

    /// Delete entries whose response is null, `{}` or `[]`.
    async fn delete_invalid(&self) -> Result<usize>;

    async fn delete_endpoint(&self, endpoint: &str) -> Result<usize>;

    async fn clear(&self) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    /// Snapshot of every entry, for aggregate reads.
    async fn entries(&self) -> Result<Vec<CacheEntry>>;
}
