//! Background consumer that drains pipeline results.

use crate::cancellation::CancellationToken;
use crate::events::{EventKind, EventSink, PipelineEvent};
use crate::pipeline::Results;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

/// Drains a [`Results`] sequence, logging each result and reporting it to
/// an event sink as `item.delivered`.
///
/// Stops when the results end, when the pipeline is cancelled, or when its
/// own token fires, and returns how many results it delivered.
#[derive(Clone)]
pub struct DeliveryWorker {
    sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl DeliveryWorker {
    /// Creates a worker reporting to `sink` and stopping on `cancel`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, cancel: Arc<CancellationToken>) -> Self {
        Self { sink, cancel }
    }

    /// Runs the worker to completion.
    pub async fn run<T>(&self, mut results: Results<T>) -> u64
    where
        T: Debug + Send + 'static,
    {
        let span = info_span!("delivery_worker", pipeline = %results.pipeline());
        async move {
            let mut delivered = 0_u64;
            loop {
                let next = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        debug!("Delivery worker cancelled");
                        break;
                    }
                    next = results.next_with_id() => next,
                };

                match next {
                    Ok(Some((item_id, result))) => {
                        delivered += 1;
                        debug!(%item_id, ?result, "Processed by delivery worker");
                        self.sink
                            .emit(PipelineEvent::new(EventKind::ItemDelivered, item_id, results.pipeline()))
                            .await;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(error = %err, "Delivery worker stopped");
                        break;
                    }
                }
            }
            info!(delivered, "Delivery worker finished");
            delivered
        }
        .instrument(span)
        .await
    }

    /// Runs the worker on a background task.
    pub fn spawn<T>(self, results: Results<T>) -> JoinHandle<u64>
    where
        T: Debug + Send + 'static,
    {
        tokio::spawn(async move { self.run(results).await })
    }
}

impl Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
