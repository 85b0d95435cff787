//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `outcome`: interaction outcome: "recorded", "skipped" or "error"
//! - `status`: forward or write status (e.g. "delivered", "failed", "ok")
//! - `endpoint`: cached upstream API endpoint
//! - `reason`: cache eviction reason: "expired", "old", "excess", "invalid"
//! - `sink`: delivery sink name

/// Total interactions handled by the recorder.
///
/// Labels: `outcome` ("recorded" | "skipped" | "error").
pub const INTERACTIONS_TOTAL: &str = "muninn_interactions_total";

/// Total forward attempts to the recommendation engine.
///
/// Labels: `status` ("delivered" | "failed" | "queued" | "suppressed" | "dead_lettered").
pub const FORWARDS_TOTAL: &str = "muninn_forwards_total";

/// Forward retry attempts made by the delivery queue (not counting the first try).
///
/// Labels: `sink` (sink name, e.g. "recommendation-engine").
pub const FORWARD_RETRIES_TOTAL: &str = "muninn_forward_retries_total";

/// Duration of a single forward request, in seconds.
pub const FORWARD_DURATION_SECONDS: &str = "muninn_forward_duration_seconds";

/// Total cache hits.
///
/// Labels: `endpoint`.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total cache misses (including lookups that failed and were treated as misses).
///
/// Labels: `endpoint`.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total cache writes.
///
/// Labels: `status` ("ok" | "rejected" | "error").
pub const CACHE_WRITES_TOTAL: &str = "muninn_cache_writes_total";

/// Total cache entries removed by maintenance.
///
/// Labels: `reason` ("expired" | "old" | "excess" | "invalid").
pub const CACHE_EVICTIONS_TOTAL: &str = "muninn_cache_evictions_total";
