//! Cleanup registry for per-item resources.

use parking_lot::Mutex;
use tracing::warn;

/// A named cleanup callback.
struct CleanupCallback {
    /// The callback function.
    callback: Box<dyn FnOnce() + Send>,
    /// Name used in logs and failure reports.
    name: String,
}

/// Registry for cleanup callbacks executed in LIFO order.
///
/// Runs synchronously so it can be driven from a `Drop` implementation.
#[derive(Default)]
pub struct CleanupRegistry {
    /// Registered callbacks.
    callbacks: Mutex<Vec<CleanupCallback>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup callback.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.lock().push(CleanupCallback {
            callback: Box::new(callback),
            name: name.into(),
        });
    }

    /// Removes every callback registered under `name` without running it.
    ///
    /// Returns true if a callback was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut callbacks = self.callbacks.lock();
        let initial_len = callbacks.len();
        callbacks.retain(|cb| cb.name != name);
        callbacks.len() < initial_len
    }

    /// Runs all cleanup callbacks in LIFO order and empties the registry.
    ///
    /// Panics are caught; every callback is attempted. Returns the
    /// `(name, message)` pairs of the callbacks that failed.
    pub fn run_all(&self) -> Vec<(String, String)> {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        let mut failures = Vec::new();

        for entry in callbacks.into_iter().rev() {
            let CleanupCallback { callback, name } = entry;
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
                let msg = format!("Cleanup callback panicked: {panic:?}");
                warn!(cleanup = %name, "{}", msg);
                failures.push((name, msg));
            }
        }

        failures
    }

    /// Returns the number of pending cleanup callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.lock().len()
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_registry_lifo_order() {
        let registry = CleanupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 1..=3 {
            let order = order.clone();
            registry.register(format!("cb{i}"), move || order.lock().push(i));
        }

        let failures = registry.run_all();

        assert!(failures.is_empty());
        assert_eq!(*order.lock(), vec![3, 2, 1]);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_registry_continues_on_failure() {
        let registry = CleanupRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter1 = counter.clone();
        registry.register("first", move || {
            counter1.fetch_add(1, Ordering::SeqCst);
        });
        registry.register("panics", || panic!("Intentional"));
        let counter2 = counter.clone();
        registry.register("third", move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });

        let failures = registry.run_all();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "panics");
    }

    #[test]
    fn test_run_all_twice_runs_once() {
        let registry = CleanupRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        registry.register("once", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.run_all();
        registry.run_all();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = CleanupRegistry::new();
        registry.register("keep", || {});
        registry.register("remove", || {});

        assert!(registry.unregister("remove"));
        assert!(!registry.unregister("missing"));
        assert_eq!(registry.pending_count(), 1);
    }
}
