//! In-process storage backed by `RwLock`-guarded vectors.
//!
//! Ids are assigned from a per-store counter starting at 1, so insertion
//! order is recoverable from ids alone.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::{CacheStore, InsertOutcome, InteractionStore};
use crate::cache::params;
use crate::types::{CacheEntry, InteractionEvent, InteractionType, NewInteraction, Parameters};
use crate::{MuninnError, Result};

fn poisoned<T>(e: std::sync::PoisonError<T>) -> MuninnError {
    MuninnError::storage(format!("lock poisoned: {e}"))
}

// ============================================================================
// MemoryInteractionStore
// ============================================================================

#[derive(Debug, Default)]
struct InteractionTable {
    next_id: u64,
    rows: Vec<InteractionEvent>,
}

impl InteractionTable {
    fn newest_matching(
        &self,
        user_id: &str,
        project_id: &str,
        interaction_type: InteractionType,
        since: DateTime<Utc>,
    ) -> Option<&InteractionEvent> {
        self.rows
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && e.project_id == project_id
                    && e.interaction_type == interaction_type
                    && e.created_at > since
            })
            .max_by_key(|e| (e.created_at, e.id))
    }

    fn push(&mut self, interaction: NewInteraction, created_at: DateTime<Utc>) -> InteractionEvent {
        self.next_id += 1;
        let event = InteractionEvent::from_new(self.next_id, interaction, created_at);
        self.rows.push(event.clone());
        event
    }
}

/// Interaction table held in memory.
#[derive(Debug, Default)]
pub struct MemoryInteractionStore {
    table: RwLock<InteractionTable>,
}

impl MemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored event, oldest first.
    pub fn events(&self) -> Result<Vec<InteractionEvent>> {
        Ok(self.table.read().map_err(poisoned)?.rows.clone())
    }
}

#[async_trait]
impl InteractionStore for MemoryInteractionStore {
    async fn find_recent(
        &self,
        user_id: &str,
        project_id: &str,
        interaction_type: InteractionType,
        since: DateTime<Utc>,
    ) -> Result<Option<InteractionEvent>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table
            .newest_matching(user_id, project_id, interaction_type, since)
            .cloned())
    }

    async fn insert(
        &self,
        interaction: NewInteraction,
        created_at: DateTime<Utc>,
    ) -> Result<InteractionEvent> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.push(interaction, created_at))
    }

    async fn insert_unless_recent(
        &self,
        interaction: NewInteraction,
        created_at: DateTime<Utc>,
        window: Duration,
    ) -> Result<InsertOutcome> {
        let mut table = self.table.write().map_err(poisoned)?;
        let since = created_at - window;
        if let Some(existing) = table.newest_matching(
            &interaction.user_id,
            &interaction.project_id,
            interaction.interaction_type,
            since,
        ) {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }
        Ok(InsertOutcome::Inserted(table.push(interaction, created_at)))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.table.read().map_err(poisoned)?.rows.len())
    }
}

// ============================================================================
// MemoryCacheStore
// ============================================================================

#[derive(Debug, Default)]
struct CacheTable {
    next_id: u64,
    rows: Vec<CacheEntry>,
}

impl CacheTable {
    /// Remove rows matching `pred`, returning how many went.
    fn remove_where(&mut self, mut pred: impl FnMut(&CacheEntry) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|e| !pred(e));
        before - self.rows.len()
    }

    fn push(
        &mut self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> CacheEntry {
        self.next_id += 1;
        let entry = CacheEntry {
            id: self.next_id,
            endpoint: endpoint.to_string(),
            parameters,
            response,
            expires_at,
            created_at,
        };
        self.rows.push(entry.clone());
        entry
    }
}

/// Cache table held in memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    table: RwLock<CacheTable>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn find_matching(
        &self,
        endpoint: &str,
        query: &Parameters,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table
            .rows
            .iter()
            .find(|e| {
                e.endpoint == endpoint && !e.is_expired(now) && params::contains(&e.parameters, query)
            })
            .cloned())
    }

    async fn delete_exact(&self, endpoint: &str, parameters: &Parameters) -> Result<usize> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.remove_where(|e| e.endpoint == endpoint && &e.parameters == parameters))
    }

    async fn insert(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.push(endpoint, parameters, response, expires_at, created_at))
    }

    async fn replace(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let mut table = self.table.write().map_err(poisoned)?;
        table.remove_where(|e| e.endpoint == endpoint && e.parameters == parameters);
        Ok(table.push(endpoint, parameters, response, expires_at, created_at))
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        let mut table = self.table.write().map_err(poisoned)?;
        let mut budget = limit;
        Ok(table.remove_where(|e| {
            if budget > 0 && e.is_expired(now) {
                budget -= 1;
                true
            } else {
                false
            }
        }))
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.remove_where(|e| e.created_at < cutoff))
    }

    async fn delete_oldest(&self, n: usize) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        let mut table = self.table.write().map_err(poisoned)?;
        let mut by_age: Vec<_> = table.rows.iter().map(|e| (e.created_at, e.id)).collect();
        by_age.sort_unstable();
        let doomed: HashSet<u64> = by_age.into_iter().take(n).map(|(_, id)| id).collect();
        Ok(table.remove_where(|e| doomed.contains(&e.id)))
    }

    async fn delete_invalid(&self) -> Result<usize> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.remove_where(|e| params::is_empty_response(&e.response)))
    }

    async fn delete_endpoint(&self, endpoint: &str) -> Result<usize> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.remove_where(|e| e.endpoint == endpoint))
    }

    async fn clear(&self) -> Result<usize> {
        let mut table = self.table.write().map_err(poisoned)?;
        Ok(table.remove_where(|_| true))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.table.read().map_err(poisoned)?.rows.len())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.table.read().map_err(poisoned)?.rows.clone())
    }
}
