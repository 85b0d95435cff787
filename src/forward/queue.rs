//! Background delivery queue with retry and dead-lettering.
//!
//! [`ForwardQueue::spawn`] starts a worker task that drains a bounded
//! channel, delivering each job through the sink with
//! [`RetryConfig`] backoff. The same idempotency key is sent on every
//! attempt. Jobs that exhaust their attempts (or hit a permanent error) land
//! in a bounded dead-letter buffer, oldest dropped first.
//!
//! The worker exits once every [`ForwardQueue`] handle is dropped and the
//! channel is drained; its `JoinHandle` yields the lifetime [`QueueTotals`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::retry::{RetryConfig, with_retry};
use super::{ForwardPayload, InteractionSink};
use crate::telemetry;
use crate::{MuninnError, Result};

/// Configuration for the background delivery queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pending jobs before `enqueue` starts failing. Default: 1,024.
    pub capacity: usize,
    /// Dead letters kept for inspection. Default: 256.
    pub dead_letter_capacity: usize,
    /// Per-attempt timeout. Default: 2s.
    pub attempt_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_024,
            dead_letter_capacity: 256,
            attempt_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }

    pub fn dead_letter_capacity(mut self, n: usize) -> Self {
        self.dead_letter_capacity = n;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// One pending delivery.
#[derive(Debug, Clone)]
pub struct ForwardJob {
    pub payload: ForwardPayload,
    pub idempotency_key: String,
}

/// A delivery that was given up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: ForwardJob,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Lifetime counts reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueTotals {
    pub delivered: u64,
    pub dead_lettered: u64,
}

type DeadLetters = Arc<Mutex<VecDeque<DeadLetter>>>;

/// Sending half of the delivery queue.
#[derive(Clone)]
pub struct ForwardQueue {
    tx: mpsc::Sender<ForwardJob>,
    dead_letters: DeadLetters,
}

impl ForwardQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(
        sink: Arc<dyn InteractionSink>,
        config: QueueConfig,
    ) -> (Self, JoinHandle<QueueTotals>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let dead_letters: DeadLetters = Arc::new(Mutex::new(VecDeque::new()));
        let worker = tokio::spawn(run_worker(sink, config, rx, dead_letters.clone()));
        (Self { tx, dead_letters }, worker)
    }

    /// Queue a job without waiting. Fails when the queue is full or the
    /// worker has stopped.
    pub fn enqueue(&self, job: ForwardJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MuninnError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => MuninnError::QueueClosed,
        })
    }

    /// Snapshot of the dead-letter buffer, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .map(|dl| dl.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every dead letter, e.g. to replay them.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .map(|mut dl| dl.drain(..).collect())
            .unwrap_or_default()
    }
}

async fn run_worker(
    sink: Arc<dyn InteractionSink>,
    config: QueueConfig,
    mut rx: mpsc::Receiver<ForwardJob>,
    dead_letters: DeadLetters,
) -> QueueTotals {
    let mut totals = QueueTotals::default();
    info!(
        sink = sink.name(),
        capacity = config.capacity,
        max_attempts = config.retry.max_attempts,
        "forward queue started"
    );

    while let Some(job) = rx.recv().await {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&config.retry, sink.name(), || {
            attempts.fetch_add(1, Ordering::Relaxed);
            attempt(sink.as_ref(), &job, config.attempt_timeout)
        })
        .await;

        match result {
            Ok(()) => {
                totals.delivered += 1;
                metrics::counter!(telemetry::FORWARDS_TOTAL, "status" => "delivered").increment(1);
                debug!(
                    user_id = %job.payload.user_id,
                    project_id = %job.payload.project_id,
                    interaction_type = %job.payload.interaction_type,
                    "queued interaction delivered"
                );
            }
            Err(e) => {
                totals.dead_lettered += 1;
                metrics::counter!(telemetry::FORWARDS_TOTAL, "status" => "dead_lettered")
                    .increment(1);
                warn!(
                    sink = sink.name(),
                    endpoint = sink.endpoint().unwrap_or("-"),
                    user_id = %job.payload.user_id,
                    project_id = %job.payload.project_id,
                    interaction_type = %job.payload.interaction_type,
                    attempts = attempts.load(Ordering::Relaxed),
                    error = %e,
                    "interaction forward dead-lettered"
                );
                push_dead_letter(
                    &dead_letters,
                    config.dead_letter_capacity,
                    DeadLetter {
                        job,
                        attempts: attempts.load(Ordering::Relaxed),
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    },
                );
            }
        }
    }

    info!(
        delivered = totals.delivered,
        dead_lettered = totals.dead_lettered,
        "forward queue stopped"
    );
    totals
}

async fn attempt(sink: &dyn InteractionSink, job: &ForwardJob, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, sink.deliver(&job.payload, &job.idempotency_key)).await {
        Ok(result) => result,
        Err(_) => Err(MuninnError::Timeout(timeout)),
    }
}

fn push_dead_letter(dead_letters: &DeadLetters, capacity: usize, letter: DeadLetter) {
    if capacity == 0 {
        return;
    }
    // Never fail the worker over a poisoned buffer.
    let mut dl = dead_letters.lock().unwrap_or_else(|e| e.into_inner());
    while dl.len() >= capacity {
        dl.pop_front();
    }
    dl.push_back(letter);
}
