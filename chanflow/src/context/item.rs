//! The item envelope and its release guard.

use super::{Dependencies, ItemId, ItemOutcome, ItemState, ResourceScope};
use crate::cancellation::CancellationToken;
use crate::errors::TransformError;
use crate::events::{EventKind, PipelineEvent};
use crate::observability::{item_span, Observability, SpanParent};
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

/// Everything a pipeline shares with the items it admits.
#[derive(Debug)]
pub struct ItemRuntime {
    pipeline: String,
    dependencies: Dependencies,
    observability: Observability,
    cancel: Arc<CancellationToken>,
    span_parent: SpanParent,
}

impl ItemRuntime {
    /// Creates the runtime for one pipeline.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        dependencies: Dependencies,
        observability: Observability,
        cancel: Arc<CancellationToken>,
        span_parent: SpanParent,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            dependencies,
            observability,
            cancel,
            span_parent,
        }
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The observability context.
    #[must_use]
    pub const fn observability(&self) -> &Observability {
        &self.observability
    }

    /// The pipeline cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Builds an event for `item_id` in this pipeline.
    #[must_use]
    pub fn event(&self, kind: EventKind, item_id: ItemId) -> PipelineEvent {
        PipelineEvent::new(kind, item_id, &self.pipeline)
    }
}

/// A payload accepted at the entry queue, not yet admitted.
///
/// Carries the producer's span so the item span can be parented to it.
#[derive(Debug)]
pub struct Submission<T> {
    payload: T,
    parent: Span,
}

impl<T> Submission<T> {
    /// Wraps a payload, capturing the current span as parent.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self::with_parent(payload, Span::current())
    }

    /// Wraps a payload with an explicit parent span.
    #[must_use]
    pub const fn with_parent(payload: T, parent: Span) -> Self {
        Self { payload, parent }
    }

    /// The wrapped payload.
    #[must_use]
    pub const fn payload(&self) -> &T {
        &self.payload
    }
}

/// Turns a queue element into an admitted [`ItemContext`].
///
/// The first stage reads [`Submission`]s and allocates scope and span;
/// later stages read contexts that are already admitted.
pub trait Admit<T>: Send + 'static {
    /// Produces the item context, admitting it if necessary.
    fn admit(self, runtime: &Arc<ItemRuntime>) -> ItemContext<T>;
}

impl<T: Send + 'static> Admit<T> for Submission<T> {
    fn admit(self, runtime: &Arc<ItemRuntime>) -> ItemContext<T> {
        let id = ItemId::new();
        let scope = runtime.dependencies.create_scope(id);
        let span = item_span(runtime.span_parent.resolve(&self.parent), &runtime.pipeline, id);

        runtime.observability.metrics().record_started();
        span.in_scope(|| {
            info!(item_id = %id, pipeline = %runtime.pipeline, "Initiated pipeline for item");
        });
        runtime
            .observability
            .emit(runtime.event(EventKind::ItemCreated, id));

        ItemContext {
            payload: self.payload,
            guard: ItemGuard {
                id,
                scope,
                span,
                state: ItemState::Created,
                runtime: runtime.clone(),
            },
        }
    }
}

impl<T: Send + 'static> Admit<T> for ItemContext<T> {
    fn admit(self, _runtime: &Arc<ItemRuntime>) -> Self {
        self
    }
}

/// Owns an item's scope and span and releases both exactly once.
///
/// Release happens through [`finish`](ItemContext::finish),
/// [`fail`](Self::fail) or, on every other path, `Drop`. The outcome of a
/// drop is `Cancelled` when the pipeline token is cancelled and `Dropped`
/// otherwise.
pub struct ItemGuard {
    id: ItemId,
    scope: ResourceScope,
    span: Span,
    state: ItemState,
    runtime: Arc<ItemRuntime>,
}

impl ItemGuard {
    /// The item identity.
    #[must_use]
    pub const fn id(&self) -> ItemId {
        self.id
    }

    /// The item's resource scope.
    #[must_use]
    pub const fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    /// The item span.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// The lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ItemState {
        self.state
    }

    /// The runtime of the pipeline that admitted the item.
    #[must_use]
    pub const fn runtime(&self) -> &Arc<ItemRuntime> {
        &self.runtime
    }

    pub(crate) fn mark_in_flight(&mut self) {
        if self.state == ItemState::Created {
            self.state = ItemState::InFlight;
        }
    }

    /// Reports a transform failure and releases the item.
    pub fn fail(mut self, error: &TransformError) {
        warn!(
            item_id = %self.id,
            pipeline = %self.runtime.pipeline,
            stage = %error.stage,
            error = %error.message,
            panicked = error.panicked,
            "Item dropped after transform failure"
        );
        self.runtime.observability.emit(
            self.runtime
                .event(EventKind::ItemFailed, self.id)
                .with_stage(&error.stage)
                .with_error(&error.message),
        );
        self.release(ItemOutcome::Failed);
    }

    fn release(&mut self, outcome: ItemOutcome) {
        if matches!(self.state, ItemState::Finalizing | ItemState::Released) {
            return;
        }
        self.state = ItemState::Finalizing;

        for (name, message) in self.scope.dispose() {
            warn!(item_id = %self.id, cleanup = %name, "Scope release callback failed: {}", message);
        }

        self.span.record("outcome", outcome.as_str());
        self.span
            .record("otel.status_code", if outcome.is_success() { "OK" } else { "ERROR" });
        self.span.in_scope(|| {
            debug!(item_id = %self.id, outcome = %outcome, "Item released");
        });
        drop(std::mem::replace(&mut self.span, Span::none()));
        self.state = ItemState::Released;

        let observability = &self.runtime.observability;
        observability.metrics().record_released(outcome);
        observability.emit(
            self.runtime
                .event(EventKind::ItemReleased, self.id)
                .with_outcome(outcome),
        );
    }
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        let outcome = if self.runtime.cancel.is_cancelled() {
            ItemOutcome::Cancelled
        } else {
            ItemOutcome::Dropped
        };
        self.release(outcome);
    }
}

impl std::fmt::Debug for ItemGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemGuard")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// The unit flowing through a pipeline: a payload plus its release guard.
#[derive(Debug)]
pub struct ItemContext<T> {
    payload: T,
    guard: ItemGuard,
}

impl<T> ItemContext<T> {
    /// Reassembles a context from a payload and a guard.
    #[must_use]
    pub const fn from_parts(payload: T, guard: ItemGuard) -> Self {
        Self { payload, guard }
    }

    /// Splits the context so a transform can consume the payload while the
    /// guard keeps the scope alive.
    #[must_use]
    pub fn into_parts(self) -> (T, ItemGuard) {
        (self.payload, self.guard)
    }

    /// The item identity.
    #[must_use]
    pub const fn id(&self) -> ItemId {
        self.guard.id
    }

    /// The payload.
    #[must_use]
    pub const fn payload(&self) -> &T {
        &self.payload
    }

    /// The item's resource scope.
    #[must_use]
    pub const fn scope(&self) -> &ResourceScope {
        &self.guard.scope
    }

    /// The item span.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.guard.span
    }

    /// The lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ItemState {
        self.guard.state
    }

    /// Maps the payload, keeping scope and span.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ItemContext<U> {
        ItemContext {
            payload: f(self.payload),
            guard: self.guard,
        }
    }

    /// Releases the item as delivered and returns the bare payload.
    pub fn finish(self) -> T {
        let Self { payload, mut guard } = self;
        guard.span.in_scope(|| {
            info!(item_id = %guard.id, pipeline = %guard.runtime.pipeline, "Finished pipeline for item");
        });
        guard.release(ItemOutcome::Finished);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::observability::PipelineMetrics;
    use pretty_assertions::assert_eq;

    fn runtime() -> (Arc<ItemRuntime>, Arc<CollectingEventSink>, Arc<PipelineMetrics>) {
        let sink = Arc::new(CollectingEventSink::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let runtime = ItemRuntime::new(
            "test",
            Dependencies::new(),
            Observability::new(sink.clone(), metrics.clone()),
            CancellationToken::shared(),
            SpanParent::Producer,
        );
        (Arc::new(runtime), sink, metrics)
    }

    #[test]
    fn test_admit_allocates_scope_and_emits_created() {
        let (runtime, sink, metrics) = runtime();

        let item = Submission::new(5).admit(&runtime);

        assert_eq!(item.state(), ItemState::Created);
        assert_eq!(item.scope().item_id(), item.id());
        assert_eq!(metrics.started(), 1);
        assert_eq!(metrics.in_progress(), 1);
        assert_eq!(sink.count(EventKind::ItemCreated), 1);
    }

    #[test]
    fn test_finish_releases_once() {
        let (runtime, sink, metrics) = runtime();
        let item = Submission::new(5).admit(&runtime).map(|x| x * 2);

        let payload = item.finish();

        assert_eq!(payload, 10);
        let released = sink.events_of_kind(EventKind::ItemReleased);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].outcome, Some(ItemOutcome::Finished));
        assert!(metrics.snapshot().is_leak_free());
        assert_eq!(metrics.finished(), 1);
    }

    #[test]
    fn test_fail_reports_and_releases() {
        let (runtime, sink, metrics) = runtime();
        let (_, guard) = Submission::new("x").admit(&runtime).into_parts();

        guard.fail(&TransformError::new("bad input").with_stage("parse"));

        let failed = sink.events_of_kind(EventKind::ItemFailed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].stage.as_deref(), Some("parse"));
        assert_eq!(sink.count(EventKind::ItemReleased), 1);
        assert_eq!(metrics.failed(), 1);
        assert!(metrics.snapshot().is_leak_free());
    }

    #[test]
    fn test_drop_releases_as_dropped_or_cancelled() {
        let (runtime, sink, metrics) = runtime();

        drop(Submission::new(1).admit(&runtime));
        runtime.cancel_token().cancel("stop");
        drop(Submission::new(2).admit(&runtime));

        let outcomes: Vec<_> = sink
            .events_of_kind(EventKind::ItemReleased)
            .into_iter()
            .filter_map(|e| e.outcome)
            .collect();
        assert_eq!(outcomes, vec![ItemOutcome::Dropped, ItemOutcome::Cancelled]);
        assert!(metrics.snapshot().is_leak_free());
    }

    #[test]
    fn test_release_runs_scope_callbacks() {
        let (runtime, _sink, _metrics) = runtime();
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let item = Submission::new(()).admit(&runtime);
        let flag = released.clone();
        item.scope()
            .on_release("handle", move || flag.store(true, std::sync::atomic::Ordering::SeqCst));

        item.finish();

        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_existing_context_admits_to_itself() {
        let (runtime, _sink, metrics) = runtime();
        let item = Submission::new(1).admit(&runtime);
        let id = item.id();

        let again = item.admit(&runtime);

        assert_eq!(again.id(), id);
        assert_eq!(metrics.started(), 1);
    }
}
