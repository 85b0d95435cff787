//! Interaction recorder: de-duplicate, persist, forward.
//!
//! [`InteractionRecorder::record`] is the single ingestion entry point for
//! interaction events. Within one call persistence happens-before
//! forwarding, and forwarding never turns a recorded event into an error.
//!
//! # Duplicate detection
//!
//! An event is a duplicate when another event with the same
//! `(user_id, project_id, interaction_type)` was persisted less than the
//! dedup window (60s) earlier. Duplicates are skipped without side effects.
//!
//! With [`DedupMode::Atomic`] (the default) the check and the insert run as
//! one store operation, so concurrent calls for the same triple cannot both
//! get through. [`DedupMode::CheckThenInsert`] runs them as two steps and
//! tolerates that race; it exists for stores that cannot offer an atomic
//! insert-or-ignore.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, instrument, trace, warn};

use crate::clock::{self, Clock};
use crate::forward::Forwarder;
use crate::store::{InsertOutcome, InteractionStore};
use crate::telemetry;
use crate::types::{InteractionEvent, InteractionType, NewInteraction, RecordResult};
use crate::{MuninnError, Result};

/// Default window inside which a repeated triple counts as a duplicate.
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 60;

/// How the duplicate check is sequenced against the insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    #[default]
    Atomic,
    CheckThenInsert,
}

/// Recorder settings.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub dedup_window: Duration,
    pub dedup_mode: DedupMode,
    /// Log recorded `view` events at debug level. Views are by far the most
    /// frequent event, so this defaults to off (trace level).
    pub log_view_events: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
            dedup_mode: DedupMode::Atomic,
            log_view_events: false,
        }
    }
}

impl RecorderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn dedup_mode(mut self, mode: DedupMode) -> Self {
        self.dedup_mode = mode;
        self
    }

    pub fn log_view_events(mut self, enabled: bool) -> Self {
        self.log_view_events = enabled;
        self
    }
}

/// Records interaction events and forwards them to the engine.
pub struct InteractionRecorder {
    store: Arc<dyn InteractionStore>,
    forwarder: Forwarder,
    clock: Arc<dyn Clock>,
    config: RecorderConfig,
}

impl InteractionRecorder {
    pub fn builder(store: Arc<dyn InteractionStore>, forwarder: Forwarder) -> RecorderBuilder {
        RecorderBuilder {
            store,
            forwarder,
            clock: clock::system(),
            config: RecorderConfig::default(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record one interaction.
    ///
    /// Returns [`RecordResult::Skipped`] for duplicates and
    /// [`RecordResult::Recorded`] otherwise, whatever happened to forwarding.
    /// Fails only on invalid input or when the event could not be persisted.
    #[instrument(
        skip(self, interaction),
        fields(
            user_id = %interaction.user_id,
            project_id = %interaction.project_id,
            interaction_type = %interaction.interaction_type,
        )
    )]
    pub async fn record(&self, interaction: NewInteraction) -> Result<RecordResult> {
        interaction.validate()?;

        let now = self.clock.now();
        let persisted = match self.config.dedup_mode {
            DedupMode::Atomic => {
                self.store
                    .insert_unless_recent(interaction, now, self.config.dedup_window)
                    .await
            }
            DedupMode::CheckThenInsert => self.check_then_insert(interaction, now).await,
        };

        let event = match persisted {
            Ok(InsertOutcome::Inserted(event)) => event,
            Ok(InsertOutcome::Duplicate(existing)) => {
                metrics::counter!(telemetry::INTERACTIONS_TOTAL, "outcome" => "skipped")
                    .increment(1);
                debug!(existing_id = existing.id, "duplicate interaction skipped");
                return Ok(RecordResult::Skipped {
                    existing_id: existing.id,
                });
            }
            Err(e) => {
                metrics::counter!(telemetry::INTERACTIONS_TOTAL, "outcome" => "error").increment(1);
                warn!(error = %e, "failed to persist interaction");
                return Err(e);
            }
        };

        metrics::counter!(telemetry::INTERACTIONS_TOTAL, "outcome" => "recorded").increment(1);
        self.log_recorded(&event);

        let forward = self.forwarder.forward(&event).await;
        Ok(RecordResult::Recorded { event, forward })
    }

    async fn check_then_insert(
        &self,
        interaction: NewInteraction,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<InsertOutcome> {
        let since = now - self.config.dedup_window;
        if let Some(existing) = self
            .store
            .find_recent(
                &interaction.user_id,
                &interaction.project_id,
                interaction.interaction_type,
                since,
            )
            .await?
        {
            return Ok(InsertOutcome::Duplicate(existing));
        }
        let event = self.store.insert(interaction, now).await?;
        Ok(InsertOutcome::Inserted(event))
    }

    fn log_recorded(&self, event: &InteractionEvent) {
        if event.interaction_type == InteractionType::View && !self.config.log_view_events {
            trace!(event_id = event.id, "interaction recorded");
        } else {
            debug!(event_id = event.id, weight = event.weight, "interaction recorded");
        }
    }
}

/// Builder for [`InteractionRecorder`].
pub struct RecorderBuilder {
    store: Arc<dyn InteractionStore>,
    forwarder: Forwarder,
    clock: Arc<dyn Clock>,
    config: RecorderConfig,
}

impl RecorderBuilder {
    /// Use a custom time source (defaults to the system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<InteractionRecorder> {
        if self.config.dedup_window < Duration::zero() {
            return Err(MuninnError::Configuration(
                "dedup window must not be negative".into(),
            ));
        }
        Ok(InteractionRecorder {
            store: self.store,
            forwarder: self.forwarder,
            clock: self.clock,
            config: self.config,
        })
    }
}
