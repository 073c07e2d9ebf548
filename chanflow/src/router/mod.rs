//! Fan-out and fan-in between bounded queues.
//!
//! [`fan_out`] deals items round-robin from one queue to `k` sub-queues and
//! [`fan_in`] merges several queues into one. The merge forwards items in
//! whatever order they become available; it does **not** preserve the
//! order in which items entered the fan-out. Stages that need input order
//! on output use [`OrderedStagePool`](crate::stages::OrderedStagePool).

use crate::cancellation::{CancellationToken, TaskGroup};
use crate::queue::BoundedQueue;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Splits `source` into `k` sub-queues of `capacity` each.
///
/// Item `i` goes to sub-queue `i mod k`. Every sub-queue is completed once
/// the source is drained and completed, or the pipeline is cancelled.
pub fn fan_out<T>(source: Arc<BoundedQueue<T>>, k: usize, capacity: usize) -> Vec<Arc<BoundedQueue<T>>>
where
    T: Send + 'static,
{
    let k = k.max(1);
    let cancel = source.cancel_token().clone();
    let partitions: Vec<_> = (0..k)
        .map(|index| BoundedQueue::new(format!("{}-part-{index}", source.name()), capacity, cancel.clone()))
        .collect();

    let targets = partitions.clone();
    tokio::spawn(async move {
        let mut index = 0_usize;
        loop {
            match source.dequeue().await {
                Ok(Some(item)) => {
                    let target = &targets[index % k];
                    index += 1;
                    if let Err(err) = target.enqueue(item).await {
                        debug!(queue = %source.name(), error = %err, "Fan-out stopped");
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(queue = %source.name(), error = %err, "Fan-out stopped");
                    break;
                }
            }
        }

        for target in &targets {
            target.complete();
        }
        debug!(queue = %source.name(), routed = index, partitions = k, "Fan-out finished");
    });

    partitions
}

/// Merges `sources` into a new queue of `capacity`.
///
/// The merged queue is completed once every source has ended.
pub fn fan_in<T>(sources: Vec<Arc<BoundedQueue<T>>>, capacity: usize) -> Arc<BoundedQueue<T>>
where
    T: Send + 'static,
{
    let cancel = sources
        .first()
        .map_or_else(CancellationToken::shared, |source| source.cancel_token().clone());
    let name = sources
        .first()
        .map_or_else(|| "merged".to_string(), |source| format!("{}-merged", source.name()));
    let merged = BoundedQueue::new(name, capacity, cancel);
    drop(merge_into(sources, merged.clone()));
    merged
}

/// Forwards every item of `sources` into `destination` with one reader task
/// per source, then completes `destination`.
///
/// The returned handle resolves after `destination` was completed.
pub fn merge_into<T>(sources: Vec<Arc<BoundedQueue<T>>>, destination: Arc<BoundedQueue<T>>) -> JoinHandle<()>
where
    T: Send + 'static,
{
    let group = TaskGroup::new(format!("{}-readers", destination.name()), destination.cancel_token().clone());

    for source in sources {
        let destination = destination.clone();
        group.spawn(format!("{}-reader", source.name()), move |_cancel| async move {
            loop {
                match source.dequeue().await {
                    Ok(Some(item)) => {
                        if let Err(err) = destination.enqueue(item).await {
                            debug!(queue = %source.name(), error = %err, "Fan-in reader stopped");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(queue = %source.name(), error = %err, "Fan-in reader stopped");
                        break;
                    }
                }
            }
        });
    }

    tokio::spawn(async move {
        let failures = group.join().await;
        if !failures.is_empty() {
            error!(queue = %destination.name(), failed = failures.len(), "Fan-in readers failed");
        }
        destination.complete();
    })
}

/// Runs `worker` once per partition of `source` and merges the results.
///
/// `source` is split with [`fan_out`] into `k` partitions. Each partition
/// gets its own output queue, which is completed when its worker returns,
/// and the outputs are merged into `output` with [`merge_into`]. The
/// returned handle resolves once `output` was completed.
pub fn pipe_partitioned<I, O, F, Fut>(
    source: Arc<BoundedQueue<I>>,
    k: usize,
    capacity: usize,
    output: Arc<BoundedQueue<O>>,
    worker: F,
) -> JoinHandle<()>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(usize, Arc<BoundedQueue<I>>, Arc<BoundedQueue<O>>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = output.cancel_token().clone();
    let partitions = fan_out(source, k, capacity);
    let workers = TaskGroup::new(format!("{}-partitions", output.name()), cancel.clone());
    let mut worker_outputs = Vec::with_capacity(partitions.len());

    for (index, partition) in partitions.into_iter().enumerate() {
        let partition_output = BoundedQueue::new(format!("{}-part-{index}", output.name()), capacity, cancel.clone());
        worker_outputs.push(partition_output.clone());
        let task = worker(index, partition, partition_output.clone());
        workers.spawn(format!("partition-{index}"), move |_cancel| async move {
            task.await;
            partition_output.complete();
        });
    }

    let merge = merge_into(worker_outputs, output);
    tokio::spawn(async move {
        workers.join().await;
        if let Err(err) = merge.await {
            error!(error = %err, "Partition merge failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn fill(queue: &BoundedQueue<u32>, items: impl IntoIterator<Item = u32>) {
        for item in items {
            queue.enqueue(item).await.unwrap();
        }
        queue.complete();
    }

    async fn collect(queue: &BoundedQueue<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(item) = queue.dequeue().await.unwrap() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_fan_out_round_robin() {
        let source = BoundedQueue::new("src", 8, CancellationToken::shared());
        fill(&source, 0..6).await;

        let partitions = fan_out(source, 3, 2);

        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].name(), "src-part-0");
        assert_eq!(collect(&partitions[0]).await, vec![0, 3]);
        assert_eq!(collect(&partitions[1]).await, vec![1, 4]);
        assert_eq!(collect(&partitions[2]).await, vec![2, 5]);
    }

    #[tokio::test]
    async fn test_fan_out_zero_partitions_clamped() {
        let source = BoundedQueue::new("src", 2, CancellationToken::shared());
        fill(&source, [7, 8]).await;

        let partitions = fan_out(source, 0, 2);

        assert_eq!(partitions.len(), 1);
        assert_eq!(collect(&partitions[0]).await, vec![7, 8]);
    }

    #[tokio::test]
    async fn test_fan_in_merges_everything() {
        let cancel = CancellationToken::shared();
        let a = BoundedQueue::new("a", 4, cancel.clone());
        let b = BoundedQueue::new("b", 4, cancel.clone());
        fill(&a, [1, 2, 3]).await;
        fill(&b, [10, 20]).await;

        let merged = fan_in(vec![a, b], 2);
        let mut out = collect(&merged).await;
        out.sort_unstable();

        assert_eq!(out, vec![1, 2, 3, 10, 20]);
        assert!(merged.is_completed());
    }

    #[tokio::test]
    async fn test_fan_in_without_sources_completes() {
        let merged = fan_in::<u32>(Vec::new(), 1);
        assert_eq!(merged.dequeue().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipe_partitioned() {
        let cancel = CancellationToken::shared();
        let source = BoundedQueue::<u32>::new("src", 4, cancel.clone());
        let output = BoundedQueue::<u32>::new("out", 4, cancel);

        let done = pipe_partitioned(source.clone(), 3, 2, output.clone(), |_, input, output| async move {
            while let Ok(Some(x)) = input.dequeue().await {
                if output.enqueue(x * 2).await.is_err() {
                    break;
                }
            }
        });
        let producer = tokio::spawn(async move { fill(&source, 0..20).await });

        let mut out = collect(&output).await;
        out.sort_unstable();
        assert_eq!(out, (0..20).map(|x| x * 2).collect::<Vec<_>>());
        producer.await.unwrap();
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unblocks_fan_out() {
        let cancel = CancellationToken::shared();
        let source = BoundedQueue::<u32>::new("src", 4, cancel.clone());
        let partitions = fan_out(source, 2, 1);

        cancel.cancel("stop");

        assert!(partitions[0].dequeue().await.unwrap_err().is_cancelled());
    }
}
