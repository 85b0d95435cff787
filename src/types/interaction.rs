//! Interaction event types.
//!
//! A [`NewInteraction`] is what a collaborator hands to the recorder; an
//! [`InteractionEvent`] is what the store hands back once it has been
//! persisted with an id and a `created_at` timestamp.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MuninnError, Result};

/// The kind of user action an interaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Favorite,
    PortfolioAdd,
    Research,
    Click,
}

impl InteractionType {
    /// All interaction types, in declaration order.
    pub const ALL: [InteractionType; 5] = [
        Self::View,
        Self::Favorite,
        Self::PortfolioAdd,
        Self::Research,
        Self::Click,
    ];

    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Favorite => "favorite",
            Self::PortfolioAdd => "portfolio_add",
            Self::Research => "research",
            Self::Click => "click",
        }
    }

    /// Relative signal strength used when the caller gives no explicit weight.
    pub fn default_weight(&self) -> i32 {
        match self {
            Self::View | Self::Click => 1,
            Self::Research => 2,
            Self::Favorite => 3,
            Self::PortfolioAdd => 5,
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = MuninnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "favorite" => Ok(Self::Favorite),
            "portfolio_add" => Ok(Self::PortfolioAdd),
            "research" => Ok(Self::Research),
            "click" => Ok(Self::Click),
            other => Err(MuninnError::InvalidInput(format!(
                "unknown interaction type '{other}'"
            ))),
        }
    }
}

/// An interaction as submitted by a collaborator, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInteraction {
    pub user_id: String,
    pub project_id: String,
    pub interaction_type: InteractionType,
    pub weight: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl NewInteraction {
    /// Create an interaction with the type's default weight.
    pub fn new(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        interaction_type: InteractionType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            interaction_type,
            weight: interaction_type.default_weight(),
            context: None,
            session_id: None,
        }
    }

    /// Override the weight.
    pub fn weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// Attach structured context metadata.
    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach the session the interaction happened in.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Reject interactions the store could not meaningfully key.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(MuninnError::InvalidInput("user_id must not be empty".into()));
        }
        if self.project_id.trim().is_empty() {
            return Err(MuninnError::InvalidInput(
                "project_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// A persisted interaction. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: u64,
    pub user_id: String,
    pub project_id: String,
    pub interaction_type: InteractionType,
    pub weight: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InteractionEvent {
    /// Materialise a submitted interaction with its storage identity.
    pub fn from_new(id: u64, new: NewInteraction, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            project_id: new.project_id,
            interaction_type: new.interaction_type,
            weight: new.weight,
            context: new.context,
            session_id: new.session_id,
            created_at,
        }
    }

    /// Whether this event shares the dedup triple with `new`.
    pub fn same_triple(&self, new: &NewInteraction) -> bool {
        self.user_id == new.user_id
            && self.project_id == new.project_id
            && self.interaction_type == new.interaction_type
    }
}

/// What happened to the event after a successful persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    /// The engine acknowledged the event with a 2xx.
    Delivered,
    /// The single delivery attempt failed; the event stays recorded.
    Failed,
    /// Handed to the background delivery queue.
    Queued,
    /// This event's idempotency key was already attempted in this process.
    Suppressed,
}

impl ForwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Queued => "queued",
            Self::Suppressed => "suppressed",
        }
    }
}

/// Outcome of [`InteractionRecorder::record`](crate::InteractionRecorder::record).
#[derive(Debug, Clone, PartialEq)]
pub enum RecordResult {
    /// A matching event was recorded inside the dedup window. Nothing was written.
    Skipped { existing_id: u64 },
    /// The event was persisted; `forward` tells whether the engine got it.
    Recorded {
        event: InteractionEvent,
        forward: ForwardStatus,
    },
}

impl RecordResult {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// `true` only when the engine acknowledged delivery synchronously.
    pub fn forwarded(&self) -> bool {
        matches!(
            self,
            Self::Recorded {
                forward: ForwardStatus::Delivered,
                ..
            }
        )
    }

    /// The persisted event, if one was written.
    pub fn event(&self) -> Option<&InteractionEvent> {
        match self {
            Self::Recorded { event, .. } => Some(event),
            Self::Skipped { .. } => None,
        }
    }
}
