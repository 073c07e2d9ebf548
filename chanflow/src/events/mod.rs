//! Item lifecycle events and the sinks that receive them.
//!
//! Every item emits `item.created` when it enters the pipeline,
//! `item.stage_started`/`item.stage_completed` around each transform,
//! `item.failed` when a transform rejects it, and exactly one
//! `item.released` when its scope is disposed. Consumers such as the
//! processor's delivery worker may add `item.delivered` per result.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::context::{ItemId, ItemOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The item was admitted and its scope acquired.
    #[serde(rename = "item.created")]
    ItemCreated,
    /// A stage started transforming the item.
    #[serde(rename = "item.stage_started")]
    StageStarted,
    /// A stage finished transforming the item.
    #[serde(rename = "item.stage_completed")]
    StageCompleted,
    /// A stage transform failed for the item.
    #[serde(rename = "item.failed")]
    ItemFailed,
    /// The item's scope was released.
    #[serde(rename = "item.released")]
    ItemReleased,
    /// A consumer handed the released result on.
    #[serde(rename = "item.delivered")]
    ItemDelivered,
}

impl EventKind {
    /// Returns the dotted event type string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ItemCreated => "item.created",
            Self::StageStarted => "item.stage_started",
            Self::StageCompleted => "item.stage_completed",
            Self::ItemFailed => "item.failed",
            Self::ItemReleased => "item.released",
            Self::ItemDelivered => "item.delivered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The item concerned.
    pub item_id: ItemId,
    /// The pipeline the item belongs to.
    pub pipeline: String,
    /// The stage, for stage-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Stage duration in milliseconds, for `item.stage_completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Final outcome, for `item.released`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ItemOutcome>,
    /// Error message, for `item.failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(kind: EventKind, item_id: ItemId, pipeline: impl Into<String>) -> Self {
        Self {
            kind,
            item_id,
            pipeline: pipeline.into(),
            stage: None,
            timestamp: Utc::now(),
            duration_ms: None,
            outcome: None,
            error: None,
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the stage duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub const fn with_outcome(mut self, outcome: ItemOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Converts the event to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
