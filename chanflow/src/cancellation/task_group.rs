//! Structured task group for stage workers and their supervisors.

use super::CancellationToken;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

/// A group of related tasks sharing one cancellation token.
///
/// [`join`](Self::join) waits for every task; a panicked task is reported
/// but never aborts its siblings.
pub struct TaskGroup {
    /// Name used in logs.
    name: String,
    /// The cancellation token handed to every task.
    cancel_token: Arc<CancellationToken>,
    /// Handles to spawned tasks, with their names.
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskGroup {
    /// Creates a new task group bound to `cancel_token`.
    #[must_use]
    pub fn new(name: impl Into<String>, cancel_token: Arc<CancellationToken>) -> Self {
        Self {
            name: name.into(),
            cancel_token,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the group's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a task in the group.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.cancel_token.clone()));
        self.handles.lock().push((name.into(), handle));
    }

    /// Waits for all tasks to complete.
    ///
    /// Returns the names and messages of the tasks that panicked or were
    /// aborted.
    pub async fn join(&self) -> Vec<(String, String)> {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut failures = Vec::new();

        for (name, handle) in handles {
            if let Err(join_error) = handle.await {
                let msg = format!("Task join error: {join_error}");
                error!(group = %self.name, task = %name, "{}", msg);
                failures.push((name, msg));
            }
        }

        failures
    }

    /// Returns the number of tasks not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", &self.name)
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_waits_for_all() {
        let group = TaskGroup::new("workers", CancellationToken::shared());
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..3u64 {
            let counter = counter.clone();
            group.spawn(format!("worker-{i}"), move |_token| async move {
                tokio::time::sleep(Duration::from_millis(5 * i)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(group.task_count(), 3);

        let failures = group.join().await;

        assert!(failures.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(group.task_count(), 0);
    }

    #[tokio::test]
    async fn test_panicked_task_reported() {
        let group = TaskGroup::new("workers", CancellationToken::shared());
        group.spawn("ok", |_token| async {});
        group.spawn("boom", |_token| async { panic!("worker bug") });

        let failures = group.join().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "boom");
    }

    #[tokio::test]
    async fn test_task_respects_cancellation() {
        let group = TaskGroup::new("workers", CancellationToken::shared());
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        group.spawn("long_task", move |token| async move {
            for _ in 0..100 {
                if token.is_cancelled() {
                    return;
                }
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        group.cancel_token().cancel("Manual cancel");
        group.join().await;

        assert!(counter.load(Ordering::SeqCst) < 100);
    }
}
