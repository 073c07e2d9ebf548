//! Error types for the chanflow pipeline engine.
//!
//! Queue-level errors abort only the operation that raised them; item-level
//! errors ([`TransformError`]) never abort sibling items or the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Convenience result alias used across the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An enqueue was attempted after the queue entered Draining/Completed.
    #[error("Queue '{queue}' is closed")]
    QueueClosed {
        /// Name of the queue that rejected the operation.
        queue: String,
    },

    /// The pipeline was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// A stage transform failed for one item.
    #[error("{0}")]
    Transform(#[from] TransformError),

    /// A stage descriptor violates its invariants.
    #[error("Invalid stage '{stage}': {reason}")]
    InvalidStage {
        /// The stage name.
        stage: String,
        /// Why the descriptor was rejected.
        reason: String,
    },

    /// Settings failed to load or validate.
    #[error("{0}")]
    Settings(#[from] SettingsError),

    /// The pipeline was built outside a Tokio runtime.
    #[error("Pipeline '{0}' must be built inside a Tokio runtime")]
    NoRuntime(String),

    /// The results sequence was already handed out.
    #[error("Pipeline results have already been taken")]
    ResultsTaken,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Creates a queue-closed error.
    #[must_use]
    pub fn queue_closed(queue: impl Into<String>) -> Self {
        Self::QueueClosed {
            queue: queue.into(),
        }
    }

    /// Creates an invalid-stage error.
    #[must_use]
    pub fn invalid_stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidStage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this is a closed-queue rejection.
    #[must_use]
    pub const fn is_queue_closed(&self) -> bool {
        matches!(self, Self::QueueClosed { .. })
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised by a stage transform for a single item.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Transform '{stage}' failed: {message}")]
pub struct TransformError {
    /// The stage that failed. Filled in by the worker if left empty.
    pub stage: String,
    /// The error message.
    pub message: String,
    /// Whether the failure was a caught panic.
    #[serde(default)]
    pub panicked: bool,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl TransformError {
    /// Creates a transform error with just a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            stage: String::new(),
            message: message.into(),
            panicked: false,
            context: HashMap::new(),
        }
    }

    /// Creates an error describing a caught panic.
    #[must_use]
    pub fn panicked(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            panicked: true,
            context: HashMap::new(),
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl From<anyhow::Error> for TransformError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Error raised when settings fail to load or validate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// A numeric field is outside its allowed range.
    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        /// Dotted path of the offending field.
        field: String,
        /// The rejected value.
        value: usize,
        /// Inclusive lower bound.
        min: usize,
        /// Inclusive upper bound.
        max: usize,
    },

    /// A pipeline was configured without stages.
    #[error("Pipeline '{0}' has no stages")]
    NoStages(String),

    /// Two stages share a name.
    #[error("Duplicate stage name '{0}'")]
    DuplicateStage(String),

    /// The settings document could not be parsed.
    #[error("Invalid settings document: {0}")]
    Parse(String),
}

impl SettingsError {
    /// Checks `value` against an inclusive range.
    pub fn check_range(
        field: impl Into<String>,
        value: usize,
        min: usize,
        max: usize,
    ) -> Result<(), Self> {
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(Self::OutOfRange {
                field: field.into(),
                value,
                min,
                max,
            })
        }
    }
}
