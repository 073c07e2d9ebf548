//! The running pipeline and its producer and consumer handles.

use super::{PipelineBuilder, PipelineSettings};
use crate::cancellation::CancellationToken;
use crate::context::{ItemContext, ItemId, ItemRuntime, Submission};
use crate::errors::{PipelineError, Result};
use crate::observability::{MetricsSnapshot, Observability, PipelineMetrics};
use crate::queue::BoundedQueue;
use crate::stages::{StageHandle, Transform};
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Receipt for a payload accepted into the entry queue.
///
/// Acceptance says nothing about the item's fate; transform failures are
/// reported through events and counters, never to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    /// Number of payloads accepted through the same pipeline before this one.
    pub sequence: u64,
    /// When the payload entered the entry queue.
    pub accepted_at: DateTime<Utc>,
}

/// A cloneable producer handle.
pub struct Submitter<In> {
    entry: Arc<BoundedQueue<Submission<In>>>,
    accepted: Arc<AtomicU64>,
}

impl<In> Clone for Submitter<In> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            accepted: self.accepted.clone(),
        }
    }
}

impl<In: Send + 'static> Submitter<In> {
    /// Submits a payload, waiting while the entry queue is full.
    ///
    /// The caller's current span becomes the parent of the item span.
    /// Fails only with `QueueClosed` after [`complete`](Self::complete) or
    /// `Cancelled` after cancellation.
    pub async fn submit(&self, payload: In) -> Result<Accepted> {
        self.entry.enqueue(Submission::new(payload)).await?;
        let sequence = self.accepted.fetch_add(1, Ordering::SeqCst);
        trace!(sequence, "Item added to the queue");
        Ok(Accepted {
            sequence,
            accepted_at: Utc::now(),
        })
    }

    /// Submits every payload in order. Returns how many were accepted.
    pub async fn submit_all(&self, payloads: impl IntoIterator<Item = In>) -> Result<usize> {
        let mut count = 0;
        for payload in payloads {
            self.submit(payload).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Closes the entry queue. Items already accepted still flow through.
    pub fn complete(&self) {
        self.entry.complete();
    }

    /// Payloads accepted so far.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl<In> std::fmt::Debug for Submitter<In> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("entry", &self.entry)
            .field("accepted", &self.accepted.load(Ordering::SeqCst))
            .finish()
    }
}

/// The consumer side of a pipeline.
///
/// Each item is released (scope disposed, span closed, counted as
/// finished) before its bare payload is returned. The sequence ends once
/// the entry was completed and every item has left the pipeline.
pub struct Results<Out> {
    pipeline: String,
    exit: Arc<BoundedQueue<ItemContext<Out>>>,
    delivered: u64,
}

impl<Out: Send + 'static> Results<Out> {
    /// Waits for the next result.
    ///
    /// Returns `Ok(None)` at the end and `Cancelled` once the pipeline is
    /// cancelled.
    pub async fn next(&mut self) -> Result<Option<Out>> {
        Ok(self.next_with_id().await?.map(|(_, result)| result))
    }

    /// Like [`next`](Self::next), also returning the id the item carried.
    pub async fn next_with_id(&mut self) -> Result<Option<(ItemId, Out)>> {
        match self.exit.dequeue().await? {
            Some(item) => {
                self.delivered += 1;
                let id = item.id();
                Ok(Some((id, item.finish())))
            }
            None => {
                debug!(pipeline = %self.pipeline, delivered = self.delivered, "Results ended");
                Ok(None)
            }
        }
    }

    /// Drains every remaining result.
    pub async fn collect(mut self) -> Result<Vec<Out>> {
        let mut out = Vec::new();
        while let Some(result) = self.next().await? {
            out.push(result);
        }
        Ok(out)
    }

    /// Turns the results into a lazy stream.
    ///
    /// The stream ends at end of results and also on cancellation; use
    /// [`next`](Self::next) to tell the two apart.
    pub fn into_stream(self) -> impl Stream<Item = Out> + Send + 'static {
        futures::stream::unfold(self, |mut results| async move {
            match results.next().await {
                Ok(Some(result)) => Some((result, results)),
                Ok(None) => None,
                Err(err) => {
                    debug!(pipeline = %results.pipeline, error = %err, "Results stream stopped");
                    None
                }
            }
        })
    }

    /// The pipeline these results come from.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Results delivered so far.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl<Out> std::fmt::Debug for Results<Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results")
            .field("pipeline", &self.pipeline)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

/// A running staged pipeline from `In` to `Out`.
///
/// Built with [`Pipeline::builder`]. Stages connected by N+1 bounded queues
/// run until the entry is completed and drained, or until the pipeline is
/// cancelled. Every admitted item is released exactly once, whatever path
/// it leaves by.
pub struct Pipeline<In, Out> {
    name: String,
    submitter: Submitter<In>,
    exit: Arc<BoundedQueue<ItemContext<Out>>>,
    results_taken: AtomicBool,
    runtime: Arc<ItemRuntime>,
    stages: Mutex<Vec<StageHandle>>,
    stage_names: Vec<String>,
}

impl Pipeline<(), ()> {
    /// Starts building a pipeline named `name`.
    #[must_use]
    pub fn builder<In: Send + 'static>(name: impl Into<String>) -> PipelineBuilder<In> {
        PipelineBuilder::new(name)
    }
}

impl<T: Send + 'static> Pipeline<T, T> {
    /// Builds a pipeline whose stages all map `T` to `T`.
    ///
    /// Stage transforms are matched to `settings.stages` by name.
    pub fn from_settings<I>(settings: &PipelineSettings, transforms: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn Transform<T, T>>)>,
    {
        PipelineBuilder::new(settings.name.clone())
            .apply_settings(settings, transforms)?
            .build()
    }
}

impl<In, Out> Pipeline<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub(crate) fn new(
        name: String,
        entry: Arc<BoundedQueue<Submission<In>>>,
        exit: Arc<BoundedQueue<ItemContext<Out>>>,
        runtime: Arc<ItemRuntime>,
        stages: Vec<StageHandle>,
        stage_names: Vec<String>,
    ) -> Self {
        Self {
            name,
            submitter: Submitter {
                entry,
                accepted: Arc::new(AtomicU64::new(0)),
            },
            exit,
            results_taken: AtomicBool::new(false),
            runtime,
            stages: Mutex::new(stages),
            stage_names,
        }
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in pipeline order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    /// Submits a payload. See [`Submitter::submit`].
    pub async fn submit(&self, payload: In) -> Result<Accepted> {
        self.submitter.submit(payload).await
    }

    /// Returns a cloneable producer handle.
    #[must_use]
    pub fn submitter(&self) -> Submitter<In> {
        self.submitter.clone()
    }

    /// Hands out the consumer side. Only the first call succeeds.
    pub fn results(&self) -> Result<Results<Out>> {
        if self.results_taken.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::ResultsTaken);
        }
        Ok(Results {
            pipeline: self.name.clone(),
            exit: self.exit.clone(),
            delivered: 0,
        })
    }

    /// Closes the entry. Items already accepted still flow to the results.
    pub fn complete(&self) {
        info!(pipeline = %self.name, "Pipeline entry completed");
        self.submitter.complete();
    }

    /// Cancels the whole pipeline.
    ///
    /// Suspended producers and consumers fail with `Cancelled`, buffered
    /// items are released, and workers exit after their current item.
    pub fn cancel(&self, reason: &str) {
        info!(pipeline = %self.name, reason, "Pipeline cancelled");
        self.runtime.cancel_token().cancel(reason);
    }

    /// Returns true once the pipeline was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.runtime.cancel_token().is_cancelled()
    }

    /// The pipeline's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        self.runtime.cancel_token()
    }

    /// Waits until every stage worker and supervisor has exited.
    ///
    /// Resolves after the entry was completed and the results drained, or
    /// after cancellation.
    pub async fn wait(&self) {
        let stages = std::mem::take(&mut *self.stages.lock());
        for stage in stages {
            stage.join().await;
        }
        debug!(pipeline = %self.name, "All stages exited");
    }

    /// Items currently inside the named stage's transform, if the stage
    /// is still running.
    #[must_use]
    pub fn stage_in_flight(&self, stage: &str) -> Option<usize> {
        self.stages
            .lock()
            .iter()
            .find(|handle| handle.name() == stage)
            .map(StageHandle::in_flight)
    }

    /// The observability context.
    #[must_use]
    pub fn observability(&self) -> &Observability {
        self.runtime.observability()
    }

    /// The pipeline counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        self.runtime.observability().metrics()
    }

    /// Shorthand for `metrics().snapshot()`.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics().snapshot()
    }
}

impl<In, Out> std::fmt::Debug for Pipeline<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names)
            .field("cancelled", &self.runtime.cancel_token().is_cancelled())
            .finish_non_exhaustive()
    }
}
