//! Bounded multi-producer multi-consumer queue with explicit completion.

use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Lifecycle state of a [`BoundedQueue`]. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Accepting items.
    Open,
    /// Completion requested; buffered items can still be read.
    Draining,
    /// Completed and empty; no further reads or writes.
    Completed,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Draining => write!(f, "draining"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

struct Inner<T> {
    buffer: VecDeque<T>,
    completing: bool,
}

/// A FIFO queue of fixed capacity connecting two pipeline boundaries.
///
/// - `enqueue` suspends while the queue is full and fails with
///   [`PipelineError::QueueClosed`] once completion was requested.
/// - `dequeue` suspends while the queue is empty and returns `Ok(None)`
///   (end of stream) once it is drained and completed.
/// - Both fail with [`PipelineError::Cancelled`] once the pipeline token is
///   cancelled. Cancellation also drops every buffered item, so the items'
///   own `Drop` impls run immediately.
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Notify,
    not_full: Notify,
    cancel: Arc<CancellationToken>,
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Creates a queue. `capacity` is clamped to at least 1.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        cancel: Arc<CancellationToken>,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            name: name.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(capacity.max(1)),
                completing: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            cancel: cancel.clone(),
        });

        let weak: Weak<Self> = Arc::downgrade(&queue);
        cancel.on_cancel(move || {
            if let Some(queue) = weak.upgrade() {
                queue.discard_buffered();
            }
        });

        queue
    }

    /// Appends an item, waiting for room if the queue is full.
    pub async fn enqueue(&self, item: T) -> Result<()> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if self.cancel.is_cancelled() {
                    drop(inner);
                    return Err(self.cancelled_error());
                }
                if inner.completing {
                    return Err(PipelineError::queue_closed(&self.name));
                }
                if inner.buffer.len() < self.capacity {
                    inner.buffer.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            trace!(queue = %self.name, "Enqueue waiting for capacity");
            tokio::select! {
                () = &mut notified => {}
                () = self.cancel.cancelled() => return Err(self.cancelled_error()),
            }
        }
    }

    /// Removes the oldest item, waiting while the queue is empty.
    ///
    /// Returns `Ok(None)` once the queue is drained and completed.
    pub async fn dequeue(&self) -> Result<Option<T>> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if self.cancel.is_cancelled() {
                    drop(inner);
                    return Err(self.cancelled_error());
                }
                if let Some(item) = inner.buffer.pop_front() {
                    let drained = inner.completing && inner.buffer.is_empty();
                    drop(inner);
                    self.not_full.notify_one();
                    if drained {
                        debug!(queue = %self.name, "Queue drained and completed");
                        self.not_empty.notify_waiters();
                    }
                    return Ok(Some(item));
                }
                if inner.completing {
                    return Ok(None);
                }
            }

            tokio::select! {
                () = &mut notified => {}
                () = self.cancel.cancelled() => return Err(self.cancelled_error()),
            }
        }
    }

    /// Requests completion. Idempotent.
    ///
    /// Waiting producers fail with `QueueClosed`; consumers keep reading
    /// until the buffer is empty and then observe end of stream.
    pub fn complete(&self) {
        let first = {
            let mut inner = self.inner.lock();
            !std::mem::replace(&mut inner.completing, true)
        };
        if first {
            debug!(queue = %self.name, buffered = self.len(), "Queue completion requested");
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    fn discard_buffered(&self) {
        let discarded: Vec<T> = {
            let mut inner = self.inner.lock();
            inner.completing = true;
            inner.buffer.drain(..).collect()
        };
        if !discarded.is_empty() {
            debug!(queue = %self.name, discarded = discarded.len(), "Discarding buffered items on cancellation");
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
        drop(discarded);
    }

    fn cancelled_error(&self) -> PipelineError {
        PipelineError::Cancelled(
            self.cancel
                .reason()
                .unwrap_or_else(|| "cancelled".to_string()),
        )
    }
}

impl<T> BoundedQueue<T> {
    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cancellation token the queue observes.
    #[must_use]
    pub const fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns the maximum number of buffered items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().buffer.is_empty()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueueState {
        let inner = self.inner.lock();
        match (inner.completing, inner.buffer.is_empty()) {
            (false, _) => QueueState::Open,
            (true, false) => QueueState::Draining,
            (true, true) => QueueState::Completed,
        }
    }

    /// Returns true once the queue is completed and drained.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state() == QueueState::Completed
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    fn queue<T: Send + 'static>(capacity: usize) -> Arc<BoundedQueue<T>> {
        BoundedQueue::new("test", capacity, CancellationToken::shared())
    }

    #[derive(Debug)]
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = queue(3);
        for i in 1..=3 {
            q.enqueue(i).await.unwrap();
        }
        q.complete();

        let mut out = Vec::new();
        while let Some(item) = q.dequeue().await.unwrap() {
            out.push(item);
        }
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let q = queue(2);
        assert_eq!(q.state(), QueueState::Open);

        q.enqueue("a").await.unwrap();
        q.complete();
        assert_eq!(q.state(), QueueState::Draining);

        assert_eq!(q.dequeue().await.unwrap(), Some("a"));
        assert_eq!(q.state(), QueueState::Completed);
        assert_eq!(q.dequeue().await.unwrap(), None);

        // Completion is idempotent and never reopens.
        q.complete();
        assert!(q.is_completed());
    }

    #[tokio::test]
    async fn test_enqueue_after_complete_fails() {
        let q = queue(2);
        q.complete();

        let err = q.enqueue(1).await.unwrap_err();
        assert!(err.is_queue_closed());
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_dequeue() {
        let q = queue(1);
        q.enqueue(1).await.unwrap();

        let mut blocked = tokio_test::task::spawn(q.enqueue(2));
        assert_pending!(blocked.poll());
        assert!(!blocked.is_woken());

        assert_eq!(q.dequeue().await.unwrap(), Some(1));

        assert!(blocked.is_woken());
        assert!(assert_ready!(blocked.poll()).is_ok());
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_blocks_until_enqueue() {
        let q = queue::<u32>(1);

        let mut waiting = tokio_test::task::spawn(q.dequeue());
        assert_pending!(waiting.poll());

        q.enqueue(7).await.unwrap();

        assert!(waiting.is_woken());
        assert_eq!(assert_ready!(waiting.poll()).unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_complete_wakes_blocked_producer_with_closed() {
        let q = queue(1);
        q.enqueue(1).await.unwrap();

        let mut blocked = tokio_test::task::spawn(q.enqueue(2));
        assert_pending!(blocked.poll());

        q.complete();

        assert!(blocked.is_woken());
        assert!(assert_ready!(blocked.poll()).unwrap_err().is_queue_closed());
        // The buffered item is still readable.
        assert_eq!(q.dequeue().await.unwrap(), Some(1));
        assert_eq!(q.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_complete_wakes_blocked_consumer_with_end_of_stream() {
        let q = queue::<u32>(1);

        let mut waiting = tokio_test::task::spawn(q.dequeue());
        assert_pending!(waiting.poll());

        q.complete();

        assert!(waiting.is_woken());
        assert_eq!(assert_ready!(waiting.poll()).unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_see_each_item_once() {
        let q = queue(4);
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = q.dequeue().await.unwrap() {
                    seen.push(item);
                }
                seen
            }));
        }

        for i in 0..200u32 {
            q.enqueue(i).await.unwrap();
        }
        q.complete();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 200);
        assert_eq!(all.into_iter().collect::<HashSet<_>>().len(), 200);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_and_discards_buffer() {
        let token = CancellationToken::shared();
        let q = BoundedQueue::new("test", 1, token.clone());
        let drops = Arc::new(AtomicUsize::new(0));

        q.enqueue(DropCounter(drops.clone())).await.unwrap();
        let producer = {
            let q = q.clone();
            let drops = drops.clone();
            tokio::spawn(async move { q.enqueue(DropCounter(drops)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        token.cancel("shutdown");

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
        // Both the buffered item and the rejected item were dropped.
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(q.dequeue().await.unwrap_err().is_cancelled());
    }
}
