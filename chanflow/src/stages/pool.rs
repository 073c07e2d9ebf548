//! Unordered stage worker pools.

use super::runner::StageRunner;
use super::StageDescriptor;
use crate::cancellation::TaskGroup;
use crate::context::{Admit, ItemContext, ItemRuntime};
use crate::queue::BoundedQueue;
use crate::router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handle to a running stage.
///
/// The supervisor task completes the stage's output queue once every
/// worker has exited, so downstream stages observe end of stream only
/// after the last item of this stage was handed on or released.
#[derive(Debug)]
pub struct StageHandle {
    name: String,
    concurrency: usize,
    in_flight: Arc<AtomicUsize>,
    supervisor: JoinHandle<()>,
}

impl StageHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        concurrency: usize,
        in_flight: Arc<AtomicUsize>,
        supervisor: JoinHandle<()>,
    ) -> Self {
        Self {
            name: name.into(),
            concurrency,
            in_flight,
            supervisor,
        }
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Items currently inside this stage's transform.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns true once the supervisor has completed the output.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Waits for the workers and the supervisor to exit.
    pub async fn join(self) {
        if let Err(err) = self.supervisor.await {
            error!(stage = %self.name, error = %err, "Stage supervisor failed");
        }
    }
}

/// Launches the workers of stages that do not preserve order.
///
/// Items are taken from `input` by `concurrency` workers. With one worker
/// the output order equals the input order; with more, items leave in
/// completion order.
#[derive(Debug, Clone, Copy)]
pub struct StageWorkerPool;

impl StageWorkerPool {
    /// Starts `descriptor.concurrency()` workers sharing `input`.
    pub fn launch<I, T, U>(
        descriptor: &StageDescriptor<T, U>,
        input: Arc<BoundedQueue<I>>,
        output: Arc<BoundedQueue<ItemContext<U>>>,
        runtime: Arc<ItemRuntime>,
    ) -> StageHandle
    where
        I: Admit<T>,
        T: Send + 'static,
        U: Send + 'static,
    {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let runner = StageRunner::new(
            descriptor.name(),
            descriptor.transform().clone(),
            runtime.clone(),
            in_flight.clone(),
        );
        let group = TaskGroup::new(descriptor.name(), runtime.cancel_token().clone());

        for worker in 0..descriptor.concurrency() {
            let runner = runner.clone();
            let input = input.clone();
            let output = output.clone();
            group.spawn(format!("{}-{worker}", descriptor.name()), move |_cancel| {
                runner.run_worker(worker, input, output)
            });
        }

        info!(
            stage = %descriptor.name(),
            concurrency = descriptor.concurrency(),
            capacity = descriptor.capacity(),
            "Stage workers started"
        );

        let stage = descriptor.name().to_string();
        let supervisor = tokio::spawn(async move {
            let failures = group.join().await;
            output.complete();
            debug!(stage = %stage, failed_workers = failures.len(), "Stage output completed");
        });

        StageHandle::new(descriptor.name(), descriptor.concurrency(), in_flight, supervisor)
    }

    /// Starts one worker per partition of `input`.
    ///
    /// Items are dealt round-robin to `concurrency` sub-queues and the
    /// worker outputs are merged into `output` without reordering.
    pub fn launch_partitioned<I, T, U>(
        descriptor: &StageDescriptor<T, U>,
        input: Arc<BoundedQueue<I>>,
        output: Arc<BoundedQueue<ItemContext<U>>>,
        runtime: Arc<ItemRuntime>,
    ) -> StageHandle
    where
        I: Admit<T>,
        T: Send + 'static,
        U: Send + 'static,
    {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let runner = StageRunner::new(
            descriptor.name(),
            descriptor.transform().clone(),
            runtime,
            in_flight.clone(),
        );

        info!(
            stage = %descriptor.name(),
            partitions = descriptor.concurrency(),
            capacity = descriptor.capacity(),
            "Partitioned stage workers started"
        );

        let supervisor = router::pipe_partitioned(
            input,
            descriptor.concurrency(),
            descriptor.capacity(),
            output,
            move |worker, partition, merged| runner.clone().run_worker(worker, partition, merged),
        );

        StageHandle::new(descriptor.name(), descriptor.concurrency(), in_flight, supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::context::{Dependencies, ResourceScope, Submission};
    use crate::errors::TransformError;
    use crate::events::{CollectingEventSink, EventKind};
    use crate::observability::{Observability, PipelineMetrics, SpanParent};
    use crate::stages::FnTransform;
    use crate::testing::delayed;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Harness {
        runtime: Arc<ItemRuntime>,
        sink: Arc<CollectingEventSink>,
        metrics: Arc<PipelineMetrics>,
        cancel: Arc<CancellationToken>,
    }

    fn harness() -> Harness {
        let sink = Arc::new(CollectingEventSink::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let cancel = CancellationToken::shared();
        let runtime = Arc::new(ItemRuntime::new(
            "pool",
            Dependencies::new(),
            Observability::new(sink.clone(), metrics.clone()),
            cancel.clone(),
            SpanParent::Producer,
        ));
        Harness {
            runtime,
            sink,
            metrics,
            cancel,
        }
    }

    async fn feed(queue: &BoundedQueue<Submission<u64>>, items: impl IntoIterator<Item = u64>) {
        for item in items {
            queue.enqueue(Submission::new(item)).await.unwrap();
        }
        queue.complete();
    }

    async fn drain(queue: &BoundedQueue<ItemContext<u64>>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(item) = queue.dequeue().await.unwrap() {
            out.push(item.finish());
        }
        out
    }

    #[tokio::test]
    async fn test_single_worker_preserves_order() {
        let h = harness();
        let input = BoundedQueue::new("in", 1, h.cancel.clone());
        let output = BoundedQueue::new("out", 1, h.cancel.clone());
        let stage = StageDescriptor::new(
            "square",
            1,
            1,
            FnTransform::new(|x: u64, _: &ResourceScope| Ok(x * x)),
        )
        .unwrap();

        let handle = StageWorkerPool::launch(&stage, input.clone(), output.clone(), h.runtime.clone());
        let producer = tokio::spawn(async move { feed(&input, [1, 2, 3]).await });

        assert_eq!(drain(&output).await, vec![1, 4, 9]);
        producer.await.unwrap();
        handle.join().await;
        assert!(h.metrics.snapshot().is_leak_free());
        assert_eq!(h.metrics.finished(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_emit_every_item_once() {
        let h = harness();
        let input = BoundedQueue::new("in", 4, h.cancel.clone());
        let output = BoundedQueue::new("out", 4, h.cancel.clone());
        let stage = StageDescriptor::new(
            "slow-double",
            4,
            3,
            delayed(Duration::from_millis(5), |x: u64| x * 2),
        )
        .unwrap();

        let handle = StageWorkerPool::launch(&stage, input.clone(), output.clone(), h.runtime.clone());
        let producer = tokio::spawn(async move { feed(&input, 1..=20).await });

        let mut out = drain(&output).await;
        out.sort_unstable();
        assert_eq!(out, (1..=20).map(|x| x * 2).collect::<Vec<_>>());
        producer.await.unwrap();
        handle.join().await;
        assert_eq!(h.metrics.stage_in_progress("slow-double"), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_worker() {
        let h = harness();
        let input = BoundedQueue::new("in", 8, h.cancel.clone());
        let output = BoundedQueue::new("out", 8, h.cancel.clone());
        let stage = StageDescriptor::new(
            "odd-only",
            8,
            1,
            FnTransform::new(|x: u64, _: &ResourceScope| {
                if x % 2 == 0 {
                    Err(TransformError::new("even"))
                } else {
                    Ok(x)
                }
            }),
        )
        .unwrap();

        let handle = StageWorkerPool::launch(&stage, input.clone(), output.clone(), h.runtime.clone());
        feed(&input, 1..=6).await;

        assert_eq!(drain(&output).await, vec![1, 3, 5]);
        handle.join().await;
        assert_eq!(h.sink.count(EventKind::ItemFailed), 3);
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.finished, 3);
        assert!(snapshot.is_leak_free());
    }

    #[tokio::test]
    async fn test_output_completes_only_after_workers_exit() {
        let h = harness();
        let input = BoundedQueue::new("in", 2, h.cancel.clone());
        let output = BoundedQueue::<ItemContext<u64>>::new("out", 2, h.cancel.clone());
        let stage = StageDescriptor::new(
            "slow",
            2,
            2,
            delayed(Duration::from_millis(20), |x: u64| x),
        )
        .unwrap();

        let handle = StageWorkerPool::launch(&stage, input.clone(), output.clone(), h.runtime.clone());
        feed(&input, [1, 2]).await;

        assert!(!output.is_completed());
        assert_eq!(drain(&output).await.len(), 2);
        handle.join().await;
        assert!(output.is_completed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partitioned_dispatch_yields_all_items() {
        let h = harness();
        let input = BoundedQueue::new("in", 4, h.cancel.clone());
        let output = BoundedQueue::new("out", 4, h.cancel.clone());
        let stage = StageDescriptor::new(
            "inc",
            2,
            3,
            FnTransform::new(|x: u64, _: &ResourceScope| Ok(x + 1)),
        )
        .unwrap();

        let handle =
            StageWorkerPool::launch_partitioned(&stage, input.clone(), output.clone(), h.runtime.clone());
        let producer = tokio::spawn(async move { feed(&input, 0..30).await });

        let mut out = drain(&output).await;
        out.sort_unstable();
        assert_eq!(out, (1..=30).collect::<Vec<_>>());
        producer.await.unwrap();
        handle.join().await;
        assert!(h.metrics.snapshot().is_leak_free());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_releases_in_flight_items() {
        let h = harness();
        let input = BoundedQueue::new("in", 4, h.cancel.clone());
        let output = BoundedQueue::<ItemContext<u64>>::new("out", 1, h.cancel.clone());
        let stage = StageDescriptor::new(
            "slow",
            1,
            2,
            delayed(Duration::from_millis(30), |x: u64| x),
        )
        .unwrap();

        let handle = StageWorkerPool::launch(&stage, input.clone(), output.clone(), h.runtime.clone());
        for i in 0..4 {
            input.enqueue(Submission::new(i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.cancel.cancel("test shutdown");

        handle.join().await;
        drop(output);

        let snapshot = h.metrics.snapshot();
        assert!(snapshot.is_leak_free(), "{snapshot:?}");
        assert!(snapshot.cancelled >= 2);
        assert_eq!(snapshot.finished, 0);
    }
}
