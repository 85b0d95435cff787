//! Tests for [`InteractionRecorder`]: dedup window, persistence errors and
//! forwarding isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use muninn::store::InsertOutcome;
use muninn::{
    Clock, DedupMode, ForwardPayload, ForwardStatus, Forwarder, InteractionEvent, InteractionRecorder,
    InteractionSink, InteractionStore, InteractionType, ManualClock, MemoryInteractionStore,
    MuninnError, NewInteraction, RecordResult, RecorderConfig, Result,
};

// ============================================================================
// Mocks
// ============================================================================

/// Sink that remembers every delivery and optionally fails them.
#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<(ForwardPayload, String)>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl InteractionSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, payload: &ForwardPayload, key: &str) -> Result<()> {
        self.deliveries
            .lock()
            .unwrap()
            .push((payload.clone(), key.to_string()));
        if self.fail {
            return Err(MuninnError::Http("connection refused".into()));
        }
        Ok(())
    }
}

/// Sink that never answers within any reasonable timeout.
struct HangingSink;

#[async_trait]
impl InteractionSink for HangingSink {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn deliver(&self, _payload: &ForwardPayload, _key: &str) -> Result<()> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(())
    }
}

/// Store whose every call fails.
struct BrokenStore;

#[async_trait]
impl InteractionStore for BrokenStore {
    async fn find_recent(
        &self,
        _user_id: &str,
        _project_id: &str,
        _interaction_type: InteractionType,
        _since: DateTime<Utc>,
    ) -> Result<Option<InteractionEvent>> {
        Err(MuninnError::Storage("database unavailable".into()))
    }

    async fn insert(
        &self,
        _interaction: NewInteraction,
        _created_at: DateTime<Utc>,
    ) -> Result<InteractionEvent> {
        Err(MuninnError::Storage("database unavailable".into()))
    }

    async fn insert_unless_recent(
        &self,
        _interaction: NewInteraction,
        _created_at: DateTime<Utc>,
        _window: Duration,
    ) -> Result<InsertOutcome> {
        Err(MuninnError::Storage("database unavailable".into()))
    }

    async fn count(&self) -> Result<usize> {
        Err(MuninnError::Storage("database unavailable".into()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    recorder: InteractionRecorder,
    store: Arc<MemoryInteractionStore>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

fn harness_with(sink: RecordingSink, config: RecorderConfig) -> Harness {
    let store = Arc::new(MemoryInteractionStore::new());
    let sink = Arc::new(sink);
    let clock = Arc::new(ManualClock::starting_now());
    let recorder = InteractionRecorder::builder(store.clone(), Forwarder::inline(sink.clone()))
        .clock(clock.clone())
        .config(config)
        .build()
        .unwrap();
    Harness {
        recorder,
        store,
        sink,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(RecordingSink::default(), RecorderConfig::default())
}

fn view(user: &str, project: &str) -> NewInteraction {
    NewInteraction::new(user, project, InteractionType::View).weight(1)
}

// ============================================================================
// Dedup window
// ============================================================================

#[tokio::test]
async fn record_then_immediate_duplicate_is_skipped() {
    let h = harness();

    let first = h.recorder.record(view("u1", "p1")).await.unwrap();
    assert!(first.is_recorded());
    assert!(first.forwarded());

    let second = h.recorder.record(view("u1", "p1")).await.unwrap();
    let first_id = first.event().unwrap().id;
    assert_eq!(second, RecordResult::Skipped { existing_id: first_id });

    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_inside_window_is_skipped() {
    let h = harness();

    h.recorder.record(view("u1", "p1")).await.unwrap();
    h.clock.advance(Duration::seconds(59));
    let result = h.recorder.record(view("u1", "p1")).await.unwrap();

    assert!(result.is_skipped());
    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn same_triple_61_seconds_apart_both_persist() {
    let h = harness();

    h.recorder.record(view("u1", "p1")).await.unwrap();
    h.clock.advance(Duration::seconds(61));
    let result = h.recorder.record(view("u1", "p1")).await.unwrap();

    assert!(result.is_recorded());
    assert_eq!(h.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn same_triple_exactly_window_apart_persists() {
    let h = harness();

    h.recorder.record(view("u1", "p1")).await.unwrap();
    h.clock.advance(Duration::seconds(60));
    let result = h.recorder.record(view("u1", "p1")).await.unwrap();

    assert!(result.is_recorded());
}

#[tokio::test]
async fn different_triples_are_independent() {
    let h = harness();

    for new in [
        view("u1", "p1"),
        view("u2", "p1"),
        view("u1", "p2"),
        NewInteraction::new("u1", "p1", InteractionType::Favorite),
    ] {
        assert!(h.recorder.record(new).await.unwrap().is_recorded());
    }
    assert_eq!(h.store.count().await.unwrap(), 4);
}

#[tokio::test]
async fn check_then_insert_mode_applies_same_window() {
    let h = harness_with(
        RecordingSink::default(),
        RecorderConfig::new().dedup_mode(DedupMode::CheckThenInsert),
    );

    assert!(h.recorder.record(view("u1", "p1")).await.unwrap().is_recorded());
    assert!(h.recorder.record(view("u1", "p1")).await.unwrap().is_skipped());
    h.clock.advance(Duration::seconds(61));
    assert!(h.recorder.record(view("u1", "p1")).await.unwrap().is_recorded());
    assert_eq!(h.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn custom_dedup_window_is_honoured() {
    let h = harness_with(
        RecordingSink::default(),
        RecorderConfig::new().dedup_window(Duration::seconds(5)),
    );

    h.recorder.record(view("u1", "p1")).await.unwrap();
    h.clock.advance(Duration::seconds(6));
    assert!(h.recorder.record(view("u1", "p1")).await.unwrap().is_recorded());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_persist_exactly_once() {
    let h = harness();
    let recorder = Arc::new(h.recorder);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let recorder = recorder.clone();
        handles.push(tokio::spawn(
            async move { recorder.record(view("u1", "p1")).await },
        ));
    }

    let mut recorded = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_recorded() {
            recorded += 1;
        }
    }

    assert_eq!(recorded, 1);
    assert_eq!(h.store.count().await.unwrap(), 1);
    assert_eq!(h.sink.count(), 1);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn persisted_event_carries_clock_time_and_fields() {
    let h = harness();
    let now = h.clock.now();

    let result = h
        .recorder
        .record(
            NewInteraction::new("u1", "p1", InteractionType::PortfolioAdd)
                .context(serde_json::json!({"source": "dashboard"}))
                .session_id("s-42"),
        )
        .await
        .unwrap();

    let event = result.event().unwrap();
    assert_eq!(event.created_at, now);
    assert_eq!(event.weight, 5);
    assert_eq!(event.session_id.as_deref(), Some("s-42"));
    assert_eq!(h.store.events().unwrap(), vec![event.clone()]);
}

#[tokio::test]
async fn persistence_failure_propagates_and_skips_forward() {
    let sink = Arc::new(RecordingSink::default());
    let recorder = InteractionRecorder::builder(Arc::new(BrokenStore), Forwarder::inline(sink.clone()))
        .build()
        .unwrap();

    let err = recorder.record(view("u1", "p1")).await.unwrap_err();
    assert!(matches!(err, MuninnError::Storage(_)));
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn persistence_failure_propagates_in_check_then_insert_mode() {
    let recorder = InteractionRecorder::builder(
        Arc::new(BrokenStore),
        Forwarder::inline(Arc::new(RecordingSink::default())),
    )
    .config(RecorderConfig::new().dedup_mode(DedupMode::CheckThenInsert))
    .build()
    .unwrap();

    assert!(recorder.record(view("u1", "p1")).await.is_err());
}

#[tokio::test]
async fn blank_ids_are_rejected_before_storage() {
    let h = harness();

    let err = h.recorder.record(view("", "p1")).await.unwrap_err();
    assert!(matches!(err, MuninnError::InvalidInput(_)));
    assert_eq!(h.store.count().await.unwrap(), 0);
    assert_eq!(h.sink.count(), 0);
}

#[test]
fn negative_window_is_a_configuration_error() {
    let result = InteractionRecorder::builder(
        Arc::new(MemoryInteractionStore::new()),
        Forwarder::inline(Arc::new(RecordingSink::default())),
    )
    .config(RecorderConfig::new().dedup_window(Duration::seconds(-1)))
    .build();
    assert!(matches!(result, Err(MuninnError::Configuration(_))));
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn forward_attempted_once_per_recorded_event_and_never_on_skip() {
    let h = harness();

    h.recorder.record(view("u1", "p1")).await.unwrap();
    h.recorder.record(view("u1", "p1")).await.unwrap(); // skipped
    h.recorder.record(view("u1", "p2")).await.unwrap();

    assert_eq!(h.sink.count(), 2);
}

#[tokio::test]
async fn forward_payload_mirrors_event() {
    let h = harness();

    let result = h
        .recorder
        .record(view("u1", "p1").context(serde_json::json!({"page": "home"})))
        .await
        .unwrap();
    let event = result.event().unwrap();

    let deliveries = h.sink.deliveries.lock().unwrap();
    let (payload, key) = &deliveries[0];
    assert_eq!(payload.user_id, "u1");
    assert_eq!(payload.project_id, "p1");
    assert_eq!(payload.interaction_type, InteractionType::View);
    assert_eq!(payload.weight, 1);
    assert_eq!(payload.context, Some(serde_json::json!({"page": "home"})));
    assert_eq!(payload.timestamp, event.created_at.to_rfc3339());
    assert_eq!(key, &muninn::forward::idempotency_key(event));
}

#[tokio::test]
async fn forward_failure_does_not_fail_record() {
    let h = harness_with(RecordingSink::failing(), RecorderConfig::default());

    let result = h.recorder.record(view("u1", "p1")).await.unwrap();

    assert!(result.is_recorded());
    assert!(!result.forwarded());
    assert!(matches!(
        result,
        RecordResult::Recorded {
            forward: ForwardStatus::Failed,
            ..
        }
    ));
    assert_eq!(h.store.count().await.unwrap(), 1);
    assert_eq!(h.sink.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn forward_timeout_does_not_fail_record() {
    let store = Arc::new(MemoryInteractionStore::new());
    let recorder = InteractionRecorder::builder(store.clone(), Forwarder::inline(Arc::new(HangingSink)))
        .build()
        .unwrap();

    let result = recorder.record(view("u1", "p1")).await.unwrap();

    assert!(matches!(
        result,
        RecordResult::Recorded {
            forward: ForwardStatus::Failed,
            ..
        }
    ));
    assert_eq!(store.count().await.unwrap(), 1);
}
