//! Forwarding recorded interactions to the recommendation engine.
//!
//! Forwarding is best-effort: a failure here never undoes or fails a
//! recorded event. The pieces:
//!
//! - [`InteractionSink`]: where payloads go. [`EngineClient`] is the HTTP
//!   implementation; tests plug in their own.
//! - [`DeliveryLedger`]: claims each event's idempotency key so a given
//!   event gets at most one delivery attempt per process.
//! - [`Forwarder`]: ledger + sink + delivery mode. Inline mode makes one
//!   bounded attempt inside the caller's request; queued mode hands the
//!   job to a [`ForwardQueue`] worker that retries with backoff.

pub mod engine;
pub mod ledger;
pub mod queue;
pub mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::Result;
use crate::telemetry;
use crate::types::{ForwardStatus, InteractionEvent, InteractionType};

pub use engine::EngineClient;
pub use ledger::{DeliveryLedger, LedgerConfig};
pub use queue::{DeadLetter, ForwardJob, ForwardQueue, QueueConfig, QueueTotals};
pub use retry::RetryConfig;

/// Destination for recorded interactions.
#[async_trait]
pub trait InteractionSink: Send + Sync {
    /// Sink name for logging/metrics.
    fn name(&self) -> &str;

    /// Target address, when the sink has one worth logging.
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Per-request timeout the sink already enforces, if any. Inline
    /// delivery uses it as its bound so the two never disagree.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Deliver one payload. Any error means "not delivered".
    async fn deliver(&self, payload: &ForwardPayload, idempotency_key: &str) -> Result<()>;
}

/// Body posted to the engine for each recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardPayload {
    pub user_id: String,
    pub project_id: String,
    pub interaction_type: InteractionType,
    pub weight: i32,
    pub context: Option<serde_json::Value>,
    /// RFC 3339 timestamp with offset, taken from `created_at`.
    pub timestamp: String,
}

impl From<&InteractionEvent> for ForwardPayload {
    fn from(event: &InteractionEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            project_id: event.project_id.clone(),
            interaction_type: event.interaction_type,
            weight: event.weight,
            context: event.context.clone(),
            timestamp: event.created_at.to_rfc3339(),
        }
    }
}

/// Deterministic delivery key for an event.
///
/// Hex SHA-256 over `user_id|project_id|interaction_type|created_at` (epoch
/// seconds). Retried deliveries of the same event carry the same key.
pub fn idempotency_key(event: &InteractionEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event.project_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event.interaction_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(event.created_at.timestamp().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// How the forwarder hands events to the sink.
#[derive(Clone)]
pub enum DeliveryMode {
    /// One attempt inside `record()`, bounded by the timeout.
    Inline { timeout: Duration },
    /// Hand off to a background queue that retries.
    Queued(ForwardQueue),
}

/// Delivers recorded events to a sink, at most once per event.
pub struct Forwarder {
    sink: Arc<dyn InteractionSink>,
    ledger: DeliveryLedger,
    mode: DeliveryMode,
}

impl Forwarder {
    /// Inline delivery bounded by the sink's own timeout, or 2s when the
    /// sink has none.
    pub fn inline(sink: Arc<dyn InteractionSink>) -> Self {
        let timeout = sink.timeout().unwrap_or(engine::DEFAULT_TIMEOUT);
        Self::new(sink, DeliveryMode::Inline { timeout })
    }

    /// Queued delivery through a queue started with [`ForwardQueue::spawn`].
    ///
    /// `sink` only names the destination in logs; the queue's own sink does
    /// the delivering.
    pub fn queued(sink: Arc<dyn InteractionSink>, queue: ForwardQueue) -> Self {
        Self::new(sink, DeliveryMode::Queued(queue))
    }

    pub fn new(sink: Arc<dyn InteractionSink>, mode: DeliveryMode) -> Self {
        Self {
            sink,
            ledger: DeliveryLedger::default(),
            mode,
        }
    }

    /// Replace the default delivery ledger.
    pub fn with_ledger(mut self, ledger: DeliveryLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn mode(&self) -> &DeliveryMode {
        &self.mode
    }

    /// Forward a freshly persisted event. Never fails; the status says what happened.
    pub async fn forward(&self, event: &InteractionEvent) -> ForwardStatus {
        let key = idempotency_key(event);
        if !self.ledger.claim(&key) {
            debug!(event_id = event.id, key = %key, "forward already attempted, suppressing");
            return self.finish(ForwardStatus::Suppressed);
        }

        let payload = ForwardPayload::from(event);
        let status = match &self.mode {
            DeliveryMode::Inline { timeout } => {
                self.deliver_inline(event, &payload, &key, *timeout).await
            }
            DeliveryMode::Queued(queue) => {
                let job = ForwardJob {
                    payload,
                    idempotency_key: key,
                };
                match queue.enqueue(job) {
                    Ok(()) => ForwardStatus::Queued,
                    Err(e) => {
                        warn!(
                            sink = self.sink.name(),
                            event_id = event.id,
                            user_id = %event.user_id,
                            project_id = %event.project_id,
                            interaction_type = %event.interaction_type,
                            error = %e,
                            "failed to queue interaction forward"
                        );
                        ForwardStatus::Failed
                    }
                }
            }
        };
        self.finish(status)
    }

    async fn deliver_inline(
        &self,
        event: &InteractionEvent,
        payload: &ForwardPayload,
        key: &str,
        timeout: Duration,
    ) -> ForwardStatus {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.sink.deliver(payload, key)).await {
            Ok(result) => result,
            Err(_) => Err(crate::MuninnError::Timeout(timeout)),
        };
        metrics::histogram!(telemetry::FORWARD_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                debug!(event_id = event.id, sink = self.sink.name(), "interaction forwarded");
                ForwardStatus::Delivered
            }
            Err(e) => {
                warn!(
                    sink = self.sink.name(),
                    endpoint = self.sink.endpoint().unwrap_or("-"),
                    event_id = event.id,
                    user_id = %event.user_id,
                    project_id = %event.project_id,
                    interaction_type = %event.interaction_type,
                    error = %e,
                    "interaction forward failed"
                );
                ForwardStatus::Failed
            }
        }
    }

    fn finish(&self, status: ForwardStatus) -> ForwardStatus {
        metrics::counter!(telemetry::FORWARDS_TOTAL, "status" => status.as_str()).increment(1);
        status
    }
}
