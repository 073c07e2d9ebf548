//! Item identity and lifecycle states.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identity of one item travelling through a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where an item is in its lifecycle.
///
/// Created → InFlight → Finalizing → Released. Every item reaches
/// `Released` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Scope and span allocated at entry.
    Created,
    /// Travelling through stages.
    InFlight,
    /// Being released.
    Finalizing,
    /// Scope disposed and span closed.
    Released,
}

/// How an item left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Delivered to the consumer.
    Finished,
    /// A stage transform failed.
    Failed,
    /// The pipeline was cancelled while the item was in flight.
    Cancelled,
    /// Dropped without cancellation, e.g. its queue was dropped.
    Dropped,
}

impl ItemOutcome {
    /// Returns the outcome as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Dropped => "dropped",
        }
    }

    /// Returns true only for `Finished`.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl std::fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
