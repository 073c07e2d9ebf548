//! Per-item stage execution shared by every pool variant.

use super::Transform;
use crate::context::{Admit, ItemContext, ItemRuntime};
use crate::errors::TransformError;
use crate::events::EventKind;
use crate::observability::{stage_span, SpanTimer};
use crate::queue::BoundedQueue;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, Instrument};

/// Runs one stage's transform on admitted items.
pub(crate) struct StageRunner<T, U> {
    stage: Arc<str>,
    transform: Arc<dyn Transform<T, U>>,
    runtime: Arc<ItemRuntime>,
    in_flight: Arc<AtomicUsize>,
}

impl<T, U> Clone for StageRunner<T, U> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            transform: self.transform.clone(),
            runtime: self.runtime.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<T, U> StageRunner<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub(crate) fn new(
        stage: &str,
        transform: Arc<dyn Transform<T, U>>,
        runtime: Arc<ItemRuntime>,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            stage: Arc::from(stage),
            transform,
            runtime,
            in_flight,
        }
    }

    pub(crate) fn stage(&self) -> &str {
        &self.stage
    }

    pub(crate) const fn runtime(&self) -> &Arc<ItemRuntime> {
        &self.runtime
    }

    /// Applies the transform to one item.
    ///
    /// Returns `None` when the transform failed or panicked; the item has
    /// then been reported and released.
    pub(crate) async fn process(&self, item: ItemContext<T>) -> Option<ItemContext<U>> {
        let (payload, mut guard) = item.into_parts();
        guard.mark_in_flight();
        let id = guard.id();
        let span = stage_span(guard.span(), &self.stage);
        let observability = self.runtime.observability();

        observability.metrics().record_stage_started(&self.stage);
        observability.emit(
            self.runtime
                .event(EventKind::StageStarted, id)
                .with_stage(&*self.stage),
        );
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let timer = SpanTimer::start();
        let outcome = AssertUnwindSafe(
            self.transform
                .apply(payload, guard.scope())
                .instrument(span.clone()),
        )
        .catch_unwind()
        .await;
        let duration_ms = timer.finish(&span);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if err.stage.is_empty() => Err(err.with_stage(&*self.stage)),
            Ok(Err(err)) => Err(err),
            Err(panic) => Err(TransformError::panicked(
                &*self.stage,
                panic_message(panic.as_ref()),
            )),
        };
        observability
            .metrics()
            .record_stage_finished(&self.stage, result.is_ok());

        match result {
            Ok(output) => {
                observability.emit(
                    self.runtime
                        .event(EventKind::StageCompleted, id)
                        .with_stage(&*self.stage)
                        .with_duration_ms(duration_ms),
                );
                Some(ItemContext::from_parts(output, guard))
            }
            Err(err) => {
                guard.fail(&err);
                None
            }
        }
    }

    /// Worker loop: dequeue, admit, transform, enqueue until the input
    /// ends or the pipeline is cancelled.
    pub(crate) async fn run_worker<I>(
        self,
        worker: usize,
        input: Arc<BoundedQueue<I>>,
        output: Arc<BoundedQueue<ItemContext<U>>>,
    ) where
        I: Admit<T>,
    {
        loop {
            let next = match input.dequeue().await {
                Ok(Some(next)) => next,
                Ok(None) => {
                    debug!(stage = %self.stage, worker, "Input ended, worker exiting");
                    break;
                }
                Err(err) => {
                    debug!(stage = %self.stage, worker, error = %err, "Worker stopped");
                    break;
                }
            };

            let item = next.admit(&self.runtime);
            let Some(transformed) = self.process(item).await else {
                continue;
            };

            // A rejected item is dropped here and its guard releases it.
            if let Err(err) = output.enqueue(transformed).await {
                debug!(stage = %self.stage, worker, error = %err, "Output rejected item, worker exiting");
                break;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "transform panicked".to_string()
    }
}
