//! Span construction for items and stages.
//!
//! Item spans follow the producer: by default each item's span is parented
//! to whatever span was current when it was submitted. In unified mode every
//! item span hangs off one long-lived pipeline span instead.

use crate::context::ItemId;
use std::time::Instant;
use tracing::{field, info_span, Span};

/// Which span new item spans are parented to.
#[derive(Debug, Clone)]
pub enum SpanParent {
    /// The span current at submission time.
    Producer,
    /// One shared span for every item of the pipeline.
    Unified(Span),
}

impl SpanParent {
    /// Creates the shared parent used in unified mode.
    #[must_use]
    pub fn unified(pipeline: &str) -> Self {
        Self::Unified(info_span!(parent: None, "pipeline_worker", pipeline = %pipeline))
    }

    /// Resolves the parent for an item submitted under `producer`.
    #[must_use]
    pub fn resolve<'a>(&'a self, producer: &'a Span) -> &'a Span {
        match self {
            Self::Producer => producer,
            Self::Unified(span) => span,
        }
    }
}

/// Opens the span that lives for an item's whole trip through the pipeline.
#[must_use]
pub fn item_span(parent: &Span, pipeline: &str, item_id: ItemId) -> Span {
    info_span!(
        parent: parent,
        "process_pipeline",
        pipeline = %pipeline,
        item.id = %item_id,
        outcome = field::Empty,
        otel.status_code = field::Empty
    )
}

/// Opens a child span for one stage transform of one item.
#[must_use]
pub fn stage_span(item: &Span, stage: &str) -> Span {
    info_span!(
        parent: item,
        "stage",
        stage.name = %stage,
        stage.duration_ms = field::Empty
    )
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Records the elapsed time on `span` and returns it.
    pub fn finish(self, span: &Span) -> f64 {
        let elapsed = self.elapsed_ms();
        span.record("stage.duration_ms", elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let duration = timer.finish(&Span::none());
        assert!(duration >= 10.0);
    }

    #[test]
    fn test_resolve_parent() {
        let producer = Span::none();
        assert!(SpanParent::Producer.resolve(&producer).is_none());

        let unified = SpanParent::unified("orders");
        if let SpanParent::Unified(shared) = &unified {
            assert!(std::ptr::eq(unified.resolve(&producer), shared));
        }
    }

    #[test]
    fn test_item_span_builds_without_subscriber() {
        let span = item_span(&Span::none(), "orders", ItemId::new());
        let child = stage_span(&span, "step1");
        child.record("stage.duration_ms", 1.5);
    }
}
