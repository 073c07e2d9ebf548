//! Observability utilities.
//!
//! Observability is an explicit object handed to the pipeline builder and
//! threaded through every item; nothing here is process-global except the
//! optional log subscriber installed by [`init_logging`].

mod logging;
mod metrics;
mod tracing;

pub use self::logging::{init_logging, LogFormat};
pub use self::metrics::{MetricsSnapshot, PipelineMetrics, StageCounters, StageSnapshot};
pub use self::tracing::{item_span, stage_span, SpanParent, SpanTimer};

use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use std::sync::Arc;

/// The event sink and counters of one pipeline.
#[derive(Clone)]
pub struct Observability {
    sink: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
}

impl Observability {
    /// Creates an observability context.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { sink, metrics }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the event sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Emits an event without blocking.
    pub fn emit(&self, event: PipelineEvent) {
        self.sink.try_emit(event);
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink), Arc::new(PipelineMetrics::new()))
    }
}

impl std::fmt::Debug for Observability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observability")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
