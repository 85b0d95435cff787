//! Cache maintenance: the four-stage sweep and its periodic runner.
//!
//! Stages run in a fixed order: expired entries, entries older than
//! `max_age`, oldest entries over `max_entries`, invalid (empty) responses.
//! A failing stage is recorded in the report and the next stage still runs.
//! Every deletion is idempotent, so a sweep can overlap normal traffic or
//! another sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::ResponseCache;
use crate::telemetry;
use crate::types::MaintenanceReport;

impl ResponseCache {
    /// Run one maintenance pass. Never fails; problems land in the report.
    pub async fn perform_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let now = self.clock.now();

        // 1. Expired entries, in bounded chunks.
        let batch = self.config.sweep_batch_size.max(1);
        loop {
            match self.store.delete_expired(now, batch).await {
                Ok(n) => {
                    report.expired_removed += n;
                    if n < batch {
                        break;
                    }
                }
                Err(e) => {
                    report.record_failure("expired", e.to_string());
                    break;
                }
            }
        }

        // 2. Entries past max age, whatever their expiry says. A max age that
        // reaches past the earliest representable instant matches nothing.
        let cutoff = chrono::Duration::from_std(self.config.max_age)
            .ok()
            .and_then(|max_age| now.checked_sub_signed(max_age));
        if let Some(cutoff) = cutoff {
            match self.store.delete_created_before(cutoff).await {
                Ok(n) => report.old_removed = n,
                Err(e) => report.record_failure("old", e.to_string()),
            }
        }

        // 3. Size cap, oldest first.
        match self.store.count().await {
            Ok(count) if count > self.config.max_entries => {
                match self.store.delete_oldest(count - self.config.max_entries).await {
                    Ok(n) => report.excess_removed = n,
                    Err(e) => report.record_failure("excess", e.to_string()),
                }
            }
            Ok(_) => {}
            Err(e) => report.record_failure("excess", e.to_string()),
        }

        // 4. Empty responses that slipped in.
        match self.store.delete_invalid().await {
            Ok(n) => report.invalid_removed = n,
            Err(e) => report.record_failure("invalid", e.to_string()),
        }

        match self.store.count().await {
            Ok(n) => report.remaining = n,
            Err(e) => report.record_failure("count", e.to_string()),
        }

        for (reason, n) in [
            ("expired", report.expired_removed),
            ("old", report.old_removed),
            ("excess", report.excess_removed),
            ("invalid", report.invalid_removed),
        ] {
            if n > 0 {
                metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "reason" => reason)
                    .increment(n as u64);
            }
        }

        if let Some(error) = &report.error {
            warn!(
                error = %error,
                failed_stages = report.stage_errors.len(),
                removed = report.total_removed(),
                "cache maintenance finished with errors"
            );
        } else {
            info!(
                expired = report.expired_removed,
                old = report.old_removed,
                excess = report.excess_removed,
                invalid = report.invalid_removed,
                remaining = report.remaining,
                "cache maintenance finished"
            );
        }
        report
    }
}

/// Lifetime counts from a [`MaintenanceTask`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceTotals {
    pub passes: u64,
    pub removed: u64,
    pub failed_passes: u64,
}

/// Periodic runner for [`ResponseCache::perform_maintenance`].
pub struct MaintenanceTask;

impl MaintenanceTask {
    /// Run maintenance every `maintenance_interval` from the cache's config
    /// until `shutdown` flips to `true` (or its sender is dropped). The first
    /// pass runs immediately.
    ///
    /// ```ignore
    /// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    /// let handle = MaintenanceTask::spawn(cache.clone(), shutdown_rx);
    /// // ...
    /// let _ = shutdown_tx.send(true);
    /// let totals = handle.await?;
    /// ```
    pub fn spawn(
        cache: Arc<ResponseCache>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<MaintenanceTotals> {
        let period = cache.config().maintenance_interval;
        Self::spawn_every(cache, period, shutdown)
    }

    /// Like [`spawn`](Self::spawn), with an explicit period.
    pub fn spawn_every(
        cache: Arc<ResponseCache>,
        period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<MaintenanceTotals> {
        tokio::spawn(run(cache, period, shutdown))
    }
}

async fn run(
    cache: Arc<ResponseCache>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> MaintenanceTotals {
    let mut totals = MaintenanceTotals::default();
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(period_secs = period.as_secs(), "cache maintenance task started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let report = cache.perform_maintenance().await;
                totals.passes += 1;
                totals.removed += report.total_removed() as u64;
                if !report.is_ok() {
                    totals.failed_passes += 1;
                }
                debug!(pass = totals.passes, removed = report.total_removed(), "maintenance tick");
            }
        }
    }

    info!(
        passes = totals.passes,
        removed = totals.removed,
        failed_passes = totals.failed_passes,
        "cache maintenance task stopped"
    );
    totals
}
