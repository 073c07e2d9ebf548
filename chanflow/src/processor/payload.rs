//! Payloads flowing through the processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::span::Id;

/// Metadata key under which the producer's span id travels.
pub const PARENT_SPAN_KEY: &str = "span_id";

/// A unit of work submitted to the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Name of the task.
    pub name: String,
    /// When the payload was created.
    pub created_at: DateTime<Utc>,
    /// Trace propagation entries written by the producer.
    #[serde(default)]
    pub tracing_metadata: HashMap<String, String>,
}

impl Payload {
    /// Creates a payload stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_created_at(name, Utc::now())
    }

    /// Creates a payload with an explicit creation time.
    #[must_use]
    pub fn with_created_at(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created_at,
            tracing_metadata: HashMap::new(),
        }
    }

    /// Records `span` as the producer span of this payload.
    pub fn set_parent_span(&mut self, span: &Id) {
        self.tracing_metadata
            .insert(PARENT_SPAN_KEY.to_string(), span.into_u64().to_string());
    }

    /// The producer span id carried in the metadata, if any.
    #[must_use]
    pub fn parent_span_id(&self) -> Option<u64> {
        self.tracing_metadata.get(PARENT_SPAN_KEY)?.parse().ok()
    }
}

/// A payload after the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedPayload {
    /// Name of the task.
    pub name: String,
    /// When the first step finished.
    pub created_at: DateTime<Utc>,
    /// What the first step did.
    pub message: String,
    /// Producer span id read from the payload's metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<u64>,
}

/// The final result of the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadResult {
    /// Name of the task.
    pub name: String,
    /// When the first step finished.
    pub created_at: DateTime<Utc>,
    /// What the first step did.
    pub message: String,
    /// When the second step finished.
    pub finished_at: DateTime<Utc>,
    /// Producer span id carried over from step 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<u64>,
}

impl PayloadResult {
    /// Time spent between the two steps' stamps.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.created_at
    }
}
