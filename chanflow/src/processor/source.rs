//! Sources that feed a bounded queue from an iterator.

use crate::cancellation::CancellationToken;
use crate::errors::Result;
use crate::pipeline::Submitter;
use crate::queue::BoundedQueue;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::debug;

/// Feeds `items` into a new queue of `capacity` on a background task.
///
/// The task yields after each item and completes the queue once the items
/// run out. It stops early if the queue is cancelled.
pub fn generate<T, I>(items: I, capacity: usize, cancel: Arc<CancellationToken>) -> Arc<BoundedQueue<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let queue = BoundedQueue::new("source", capacity, cancel);
    let target = queue.clone();
    let items = items.into_iter();

    tokio::spawn(async move {
        let mut produced = 0_usize;
        for item in items {
            if let Err(err) = target.enqueue(item).await {
                debug!(produced, error = %err, "Source stopped");
                break;
            }
            produced += 1;
            tokio::task::yield_now().await;
        }
        target.complete();
        debug!(produced, "Source finished");
    });

    queue
}

/// Feeds every integer of `range` into a new queue.
pub fn generate_range(
    range: RangeInclusive<i64>,
    capacity: usize,
    cancel: Arc<CancellationToken>,
) -> Arc<BoundedQueue<i64>> {
    generate(range, capacity, cancel)
}

/// Submits everything `source` yields, then completes the pipeline entry.
///
/// Returns how many items were submitted.
pub async fn forward<T: Send + 'static>(source: &BoundedQueue<T>, submitter: &Submitter<T>) -> Result<usize> {
    let mut forwarded = 0;
    while let Some(item) = source.dequeue().await? {
        submitter.submit(item).await?;
        forwarded += 1;
    }
    submitter.complete();
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResourceScope;
    use crate::pipeline::Pipeline;
    use crate::stages::{FnTransform, StageDescriptor};
    use pretty_assertions::assert_eq;

    async fn drain<T: Send + 'static>(queue: &BoundedQueue<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = queue.dequeue().await.unwrap() {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_generate() {
        let queue = generate(["a", "b", "c"], 1, CancellationToken::shared());
        assert_eq!(drain(&queue).await, vec!["a", "b", "c"]);
        assert!(queue.is_completed());
    }

    #[tokio::test]
    async fn test_generate_range_inclusive() {
        let queue = generate_range(1..=5, 2, CancellationToken::shared());
        assert_eq!(drain(&queue).await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_generate_stops_on_cancel() {
        let cancel = CancellationToken::shared();
        let queue = generate(0.., 1, cancel.clone());

        assert_eq!(queue.dequeue().await.unwrap(), Some(0));
        cancel.cancel("enough");

        assert!(queue.dequeue().await.unwrap_err().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_forward_into_pipeline() {
        let pipeline = Pipeline::builder("forwarded")
            .stage(
                StageDescriptor::new(
                    "double",
                    2,
                    1,
                    FnTransform::new(|x: i64, _: &ResourceScope| Ok(x * 2)),
                )
                .unwrap(),
            )
            .build()
            .unwrap();
        let results = pipeline.results().unwrap();
        let source = generate_range(1..=10, 2, CancellationToken::shared());
        let submitter = pipeline.submitter();

        let producer = tokio::spawn(async move { forward(&source, &submitter).await });

        assert_eq!(results.collect().await.unwrap(), (1..=10).map(|x| x * 2).collect::<Vec<_>>());
        assert_eq!(producer.await.unwrap().unwrap(), 10);
    }
}
