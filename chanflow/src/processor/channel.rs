//! The processor pipeline and its producer seam.

use super::payload::{Payload, PayloadResult, StampedPayload};
use super::settings::ProcessorSettings;
use super::steps::{FinishStep, RandomDelay, StampStep};
use crate::context::Dependencies;
use crate::errors::Result;
use crate::observability::{MetricsSnapshot, Observability};
use crate::pipeline::{Accepted, Pipeline, Results};
use crate::stages::Transform;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Name of the processor pipeline.
pub const PROCESSOR_PIPELINE: &str = "processor";

/// Accepts work items for background processing.
///
/// Implemented by [`ProcessorChannel`]; request handlers depend on this
/// trait only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackgroundProcessor: Send + Sync {
    /// Queues one payload, waiting while the entry queue is full.
    async fn queue_work_item(&self, payload: Payload) -> Result<Accepted>;
}

/// A two-step pipeline from [`Payload`] to [`PayloadResult`].
///
/// Step 1 waits a random delay and stamps a message, step 2 waits again
/// and stamps the finish time. Both read the time from the item's scope.
pub struct ProcessorChannel {
    pipeline: Pipeline<Payload, PayloadResult>,
}

impl ProcessorChannel {
    /// Builds the processor with default dependencies and observability.
    pub fn new(settings: &ProcessorSettings) -> Result<Self> {
        Self::with_parts(settings, Dependencies::default(), &Observability::default())
    }

    /// Builds the processor with explicit dependencies and observability.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_parts(
        settings: &ProcessorSettings,
        dependencies: Dependencies,
        observability: &Observability,
    ) -> Result<Self> {
        settings.validate()?;
        let delay = RandomDelay::new(settings.delay_range());
        let [step1, step2] = settings.stages();
        let stamp: Arc<dyn Transform<Payload, StampedPayload>> = Arc::new(StampStep::new(delay.clone()));
        let finish: Arc<dyn Transform<StampedPayload, PayloadResult>> = Arc::new(FinishStep::new(delay));

        let pipeline = Pipeline::builder(PROCESSOR_PIPELINE)
            .entry_capacity(settings.capacity)
            .unified_span(settings.use_unified_span_for_all_pipelines)
            .dependencies(dependencies)
            .event_sink(observability.sink().clone())
            .metrics(observability.metrics().clone())
            .stage(step1.to_descriptor(stamp)?)
            .stage(step2.to_descriptor(finish)?)
            .build()?;

        info!(
            capacity = settings.capacity,
            step1_concurrency = settings.step1_max_concurrency,
            step2_concurrency = settings.step2_max_concurrency,
            "Processor started"
        );
        Ok(Self { pipeline })
    }

    /// The underlying pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline<Payload, PayloadResult> {
        &self.pipeline
    }

    /// Hands out the results. Only the first call succeeds.
    pub fn results(&self) -> Result<Results<PayloadResult>> {
        self.pipeline.results()
    }

    /// Stops accepting work; queued items still finish.
    pub fn complete(&self) {
        self.pipeline.complete();
    }

    /// Cancels all processing.
    pub fn cancel(&self, reason: &str) {
        self.pipeline.cancel(reason);
    }

    /// Waits until both steps have exited.
    pub async fn wait(&self) {
        self.pipeline.wait().await;
    }

    /// The processor counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.pipeline.snapshot()
    }
}

#[async_trait]
impl BackgroundProcessor for ProcessorChannel {
    async fn queue_work_item(&self, mut payload: Payload) -> Result<Accepted> {
        let span = info_span!("queue_item", payload = %payload.name);
        if let Some(id) = span.id() {
            payload.set_parent_span(&id);
        }

        let accepted = self.pipeline.submit(payload).instrument(span).await?;
        debug!(sequence = accepted.sequence, "Item added to the queue");
        Ok(accepted)
    }
}

impl std::fmt::Debug for ProcessorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChannel")
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
