//! Tests for cache maintenance: the four sweep stages, stage isolation and
//! the periodic [`MaintenanceTask`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::watch;

use muninn::{
    CacheConfig, CacheEntry, CacheStore, Clock, MaintenanceTask, ManualClock, MemoryCacheStore,
    MuninnError, Parameters, ResponseCache, Result,
};

fn params(v: Value) -> Parameters {
    v.as_object().cloned().unwrap_or_default()
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn cache_over(
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
) -> (ResponseCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(base_time()));
    let cache = ResponseCache::new(store, config).with_clock(clock.clone());
    (cache, clock)
}

/// Insert `n` live entries straight into the store, one second apart.
async fn seed(store: &MemoryCacheStore, endpoint: &str, n: usize, start: DateTime<Utc>) {
    for i in 0..n {
        let created = start + Duration::seconds(i as i64);
        store
            .insert(
                endpoint,
                params(json!({"i": i})),
                json!([i]),
                created + Duration::days(30),
                created,
            )
            .await
            .unwrap();
    }
}

// =============================================================================
// Stages
// =============================================================================

#[tokio::test]
async fn removes_expired_entries_in_chunks() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, clock) = cache_over(store.clone(), CacheConfig::new().sweep_batch_size(3));

    for i in 0..7 {
        cache
            .store("trending", params(json!({"i": i})), json!([i]), 1)
            .await
            .unwrap();
    }
    cache
        .store("markets", Parameters::new(), json!({"btc": 1}), 60)
        .await
        .unwrap();

    clock.advance(Duration::minutes(2));
    let report = cache.perform_maintenance().await;

    assert!(report.is_ok());
    assert_eq!(report.expired_removed, 7);
    assert_eq!(report.remaining, 1);
    assert_eq!(cache.endpoints().await, vec!["markets".to_string()]);
}

#[tokio::test]
async fn caps_entry_count_by_removing_oldest() {
    let store = Arc::new(MemoryCacheStore::new());
    seed(&store, "trending", 10_050, base_time()).await;
    let (cache, clock) = cache_over(store.clone(), CacheConfig::default());
    clock.set(base_time() + Duration::days(1));

    let report = cache.perform_maintenance().await;

    assert_eq!(report.excess_removed, 50);
    assert_eq!(report.remaining, 10_000);
    assert_eq!(report.total_removed(), 50);

    let oldest = store
        .entries()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.created_at)
        .min()
        .unwrap();
    assert_eq!(oldest, base_time() + Duration::seconds(50));
}

#[tokio::test]
async fn purges_entries_older_than_max_age_even_if_unexpired() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, clock) = cache_over(store.clone(), CacheConfig::default());

    store
        .insert(
            "trending",
            Parameters::new(),
            json!([1]),
            base_time() + Duration::days(365),
            base_time(),
        )
        .await
        .unwrap();
    clock.advance(Duration::days(8));
    cache
        .store("markets", Parameters::new(), json!([2]), 60)
        .await
        .unwrap();

    let report = cache.perform_maintenance().await;
    assert_eq!(report.expired_removed, 0);
    assert_eq!(report.old_removed, 1);
    assert_eq!(report.remaining, 1);
}

#[tokio::test]
async fn purges_invalid_responses_written_behind_the_cache() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, clock) = cache_over(store.clone(), CacheConfig::default());
    let expires = clock.now() + Duration::hours(1);

    for (i, empty) in [Value::Null, json!({}), json!([])].into_iter().enumerate() {
        store
            .insert("legacy", params(json!({"i": i})), empty, expires, clock.now())
            .await
            .unwrap();
    }
    cache
        .store("legacy", params(json!({"i": 99})), json!(["ok"]), 60)
        .await
        .unwrap();

    let report = cache.perform_maintenance().await;
    assert_eq!(report.invalid_removed, 3);
    assert_eq!(report.remaining, 1);
}

#[tokio::test]
async fn huge_max_age_purges_nothing_instead_of_overflowing() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, _clock) = cache_over(
        store.clone(),
        CacheConfig::new().max_age(StdDuration::from_secs(100_000_000 * 24 * 3600)),
    );
    cache
        .store("trending", Parameters::new(), json!([1]), 60)
        .await
        .unwrap();

    let report = cache.perform_maintenance().await;
    assert!(report.is_ok());
    assert_eq!(report.old_removed, 0);
    assert_eq!(report.remaining, 1);
}

#[tokio::test]
async fn idle_cache_reports_nothing_removed() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, _clock) = cache_over(store, CacheConfig::default());

    let report = cache.perform_maintenance().await;
    assert!(report.is_ok());
    assert_eq!(report.total_removed(), 0);
    assert_eq!(report.remaining, 0);
}

// =============================================================================
// Stage isolation
// =============================================================================

/// Wraps a memory store and fails the expired sweep on demand.
struct FlakyExpirySweep {
    inner: MemoryCacheStore,
    fail_expired: AtomicBool,
}

#[async_trait]
impl CacheStore for FlakyExpirySweep {
    async fn find_matching(
        &self,
        endpoint: &str,
        query: &Parameters,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        self.inner.find_matching(endpoint, query, now).await
    }

    async fn delete_exact(&self, endpoint: &str, parameters: &Parameters) -> Result<usize> {
        self.inner.delete_exact(endpoint, parameters).await
    }

    async fn insert(
        &self,
        endpoint: &str,
        parameters: Parameters,
        response: Value,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        self.inner
            .insert(endpoint, parameters, response, expires_at, created_at)
            .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        if self.fail_expired.load(Ordering::Relaxed) {
            return Err(MuninnError::Storage("lock wait timeout".into()));
        }
        self.inner.delete_expired(now, limit).await
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.delete_created_before(cutoff).await
    }

    async fn delete_oldest(&self, n: usize) -> Result<usize> {
        self.inner.delete_oldest(n).await
    }

    async fn delete_invalid(&self) -> Result<usize> {
        self.inner.delete_invalid().await
    }

    async fn delete_endpoint(&self, endpoint: &str) -> Result<usize> {
        self.inner.delete_endpoint(endpoint).await
    }

    async fn clear(&self) -> Result<usize> {
        self.inner.clear().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        self.inner.entries().await
    }
}

#[tokio::test]
async fn failing_stage_does_not_stop_later_stages() {
    let store = Arc::new(FlakyExpirySweep {
        inner: MemoryCacheStore::new(),
        fail_expired: AtomicBool::new(true),
    });
    let (cache, clock) = cache_over(store.clone(), CacheConfig::new().max_entries(2));

    for i in 0..4 {
        cache
            .store("trending", params(json!({"i": i})), json!([i]), 60)
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
    }

    let report = cache.perform_maintenance().await;

    assert!(!report.is_ok());
    assert_eq!(report.stage_errors.len(), 1);
    assert_eq!(report.stage_errors[0].stage, "expired");
    assert!(report.error.as_deref().unwrap().contains("lock wait timeout"));
    assert_eq!(report.excess_removed, 2);
    assert_eq!(report.remaining, 2);

    store.fail_expired.store(false, Ordering::Relaxed);
    assert!(cache.perform_maintenance().await.is_ok());
}

// =============================================================================
// MaintenanceTask
// =============================================================================

#[tokio::test(start_paused = true)]
async fn task_runs_immediately_then_every_period_until_shutdown() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, clock) = cache_over(store.clone(), CacheConfig::default());
    let cache = Arc::new(cache);

    cache
        .store("trending", Parameters::new(), json!([1]), 1)
        .await
        .unwrap();
    clock.advance(Duration::minutes(5));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle =
        MaintenanceTask::spawn_every(cache.clone(), StdDuration::from_secs(60), shutdown_rx);

    // First pass fires without waiting a period.
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    assert_eq!(store.count().await.unwrap(), 0);

    tokio::time::sleep(StdDuration::from_secs(125)).await;
    shutdown_tx.send(true).unwrap();
    let totals = handle.await.unwrap();

    assert_eq!(totals.passes, 3);
    assert_eq!(totals.removed, 1);
    assert_eq!(totals.failed_passes, 0);
}

#[tokio::test(start_paused = true)]
async fn task_stops_when_shutdown_sender_is_dropped() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, _clock) = cache_over(store, CacheConfig::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = MaintenanceTask::spawn(Arc::new(cache), shutdown_rx);

    tokio::time::sleep(StdDuration::from_millis(10)).await;
    drop(shutdown_tx);
    let totals = handle.await.unwrap();
    assert_eq!(totals.passes, 1);
}

#[tokio::test(start_paused = true)]
async fn task_period_comes_from_cache_config() {
    let store = Arc::new(MemoryCacheStore::new());
    let (cache, _clock) = cache_over(
        store,
        CacheConfig::new().maintenance_interval(StdDuration::from_secs(10)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = MaintenanceTask::spawn(Arc::new(cache), shutdown_rx);

    // Passes at 0s, 10s, 20s and 30s.
    tokio::time::sleep(StdDuration::from_secs(35)).await;
    shutdown_tx.send(true).unwrap();
    let totals = handle.await.unwrap();
    assert_eq!(totals.passes, 4);
}
