//! Per-item resource scopes.

use super::{Clock, ItemId, SystemClock};
use crate::cancellation::CleanupRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The fixed dependency set a pipeline hands to every item scope.
///
/// Chosen once when the pipeline is built; scopes never look anything up
/// dynamically.
#[derive(Clone)]
pub struct Dependencies {
    clock: Arc<dyn Clock>,
}

impl Dependencies {
    /// Creates dependencies backed by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Builds the scope for one item.
    #[must_use]
    pub fn create_scope(&self, item_id: ItemId) -> ResourceScope {
        ResourceScope {
            item_id,
            dependencies: self.clone(),
            cleanup: CleanupRegistry::new(),
            acquired_at: Instant::now(),
        }
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}

/// Resources owned by exactly one item from entry to exit.
///
/// Transforms read dependencies from the scope and may register per-item
/// resources to dispose with [`on_release`](Self::on_release). Disposal
/// callbacks run in LIFO order when the item is released.
pub struct ResourceScope {
    item_id: ItemId,
    dependencies: Dependencies,
    cleanup: CleanupRegistry,
    acquired_at: Instant,
}

impl ResourceScope {
    /// The item owning this scope.
    #[must_use]
    pub const fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The clock from the pipeline's dependency set.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.dependencies.clock.as_ref()
    }

    /// Shorthand for `clock().now()`.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.dependencies.clock.now()
    }

    /// How long the scope has been held.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Registers a disposal callback for a per-item resource.
    pub fn on_release<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup.register(name, callback);
    }

    /// Number of disposal callbacks still pending.
    #[must_use]
    pub fn pending_releases(&self) -> usize {
        self.cleanup.pending_count()
    }

    /// Runs the disposal callbacks. Returns the ones that panicked.
    pub(crate) fn dispose(&self) -> Vec<(String, String)> {
        self.cleanup.run_all()
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScope")
            .field("item_id", &self.item_id)
            .field("pending_releases", &self.pending_releases())
            .finish()
    }
}
