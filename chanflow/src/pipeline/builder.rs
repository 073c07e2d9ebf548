//! Typed pipeline builder.

use super::{Pipeline, PipelineSettings};
use crate::cancellation::CancellationToken;
use crate::context::{Admit, Dependencies, ItemContext, ItemRuntime, Submission};
use crate::errors::{PipelineError, Result, SettingsError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::{Observability, PipelineMetrics, SpanParent};
use crate::queue::BoundedQueue;
use crate::stages::{Dispatch, OrderedStagePool, StageDescriptor, StageHandle, StageWorkerPool, Transform};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Everything a stage launcher needs while the pipeline is being wired.
struct LaunchEnv {
    runtime: Arc<ItemRuntime>,
    order_preservation: bool,
    handles: Vec<StageHandle>,
}

/// Launches every stage so far and returns the last stage's output queue.
type Chain<In, Out> = Box<
    dyn FnOnce(&mut LaunchEnv, Arc<BoundedQueue<Submission<In>>>) -> Arc<BoundedQueue<ItemContext<Out>>>
        + Send,
>;

struct PipelineOptions {
    name: String,
    entry_capacity: usize,
    order_preservation: bool,
    unified_span: bool,
    dependencies: Dependencies,
    sink: Option<Arc<dyn EventSink>>,
    metrics: Option<Arc<PipelineMetrics>>,
    cancel: Option<Arc<CancellationToken>>,
    stage_names: Vec<String>,
}

/// Builder for a pipeline that has no stages yet.
///
/// Created with [`Pipeline::builder`]. Adding the first stage with
/// [`stage`](Self::stage) fixes the input type and returns a
/// [`StagedPipelineBuilder`].
pub struct PipelineBuilder<In> {
    options: PipelineOptions,
    _input: PhantomData<fn() -> In>,
}

impl<In: Send + 'static> PipelineBuilder<In> {
    /// Creates a builder with default options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            options: PipelineOptions {
                name: name.into(),
                entry_capacity: 10,
                order_preservation: false,
                unified_span: false,
                dependencies: Dependencies::new(),
                sink: None,
                metrics: None,
                cancel: None,
                stage_names: Vec::new(),
            },
            _input: PhantomData,
        }
    }

    /// Sets the entry queue capacity.
    #[must_use]
    pub fn entry_capacity(mut self, capacity: usize) -> Self {
        self.options.entry_capacity = capacity;
        self
    }

    /// Emit items in input order from stages with more than one worker.
    ///
    /// When enabled, every stage with concurrency above 1 runs as an
    /// [`OrderedStagePool`] regardless of its dispatch mode. When disabled,
    /// such stages emit items in completion order.
    #[must_use]
    pub fn order_preservation(mut self, enabled: bool) -> Self {
        self.options.order_preservation = enabled;
        self
    }

    /// Parent every item span to one shared pipeline span instead of the
    /// producer's span.
    #[must_use]
    pub fn unified_span(mut self, enabled: bool) -> Self {
        self.options.unified_span = enabled;
        self
    }

    /// Sets the dependency set handed to every item scope.
    #[must_use]
    pub fn dependencies(mut self, dependencies: Dependencies) -> Self {
        self.options.dependencies = dependencies;
        self
    }

    /// Sets the event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.options.sink = Some(sink);
        self
    }

    /// Sets the metrics the pipeline updates. Defaults to fresh metrics.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.options.metrics = Some(metrics);
        self
    }

    /// Uses an external cancellation token.
    #[must_use]
    pub fn cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.options.cancel = Some(cancel);
        self
    }

    /// Adds the first stage. It reads submissions from the entry queue and
    /// admits them.
    #[must_use]
    pub fn stage<U: Send + 'static>(mut self, descriptor: StageDescriptor<In, U>) -> StagedPipelineBuilder<In, U> {
        self.options.stage_names.push(descriptor.name().to_string());
        StagedPipelineBuilder {
            options: self.options,
            chain: Box::new(move |env: &mut LaunchEnv, entry: Arc<BoundedQueue<Submission<In>>>| {
                launch_stage(env, &descriptor, entry)
            }),
        }
    }

    /// Applies `settings` and adds one stage per configured stage, taking
    /// each stage's transform from `transforms` by name.
    ///
    /// Every stage maps `In` to `In`; heterogeneous pipelines use
    /// [`StageSettings::to_descriptor`](super::StageSettings::to_descriptor)
    /// with [`stage`](Self::stage) instead.
    pub fn apply_settings<I>(mut self, settings: &PipelineSettings, transforms: I) -> Result<StagedPipelineBuilder<In, In>>
    where
        I: IntoIterator<Item = (String, Arc<dyn Transform<In, In>>)>,
    {
        settings.validate()?;
        let mut transforms: HashMap<String, Arc<dyn Transform<In, In>>> = transforms.into_iter().collect();
        let mut take = |name: &str| {
            transforms
                .remove(name)
                .ok_or_else(|| PipelineError::invalid_stage(name, "no transform registered"))
        };

        self.options.name.clone_from(&settings.name);
        self.options.entry_capacity = settings.entry_capacity;
        self.options.order_preservation = settings.order_preservation;
        self.options.unified_span = settings.use_unified_span;

        let mut stages = settings.stages.iter();
        let first = stages
            .next()
            .ok_or_else(|| SettingsError::NoStages(settings.name.clone()))?;
        let mut builder = self.stage(first.to_descriptor(take(&first.name)?)?);
        for stage in stages {
            builder = builder.stage(stage.to_descriptor(take(&stage.name)?)?);
        }
        Ok(builder)
    }
}

/// Builder for a pipeline whose last stage produces `Out`.
pub struct StagedPipelineBuilder<In, Out> {
    options: PipelineOptions,
    chain: Chain<In, Out>,
}

impl<In, Out> StagedPipelineBuilder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Appends a stage reading this builder's output type.
    #[must_use]
    pub fn stage<Next: Send + 'static>(
        mut self,
        descriptor: StageDescriptor<Out, Next>,
    ) -> StagedPipelineBuilder<In, Next> {
        self.options.stage_names.push(descriptor.name().to_string());
        let previous = self.chain;
        StagedPipelineBuilder {
            options: self.options,
            chain: Box::new(move |env: &mut LaunchEnv, entry: Arc<BoundedQueue<Submission<In>>>| {
                let input = previous(env, entry);
                launch_stage(env, &descriptor, input)
            }),
        }
    }

    /// Names of the stages added so far, in order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.options.stage_names
    }

    /// Allocates the queues and starts every worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Pipeline<In, Out>> {
        let Self { options, chain } = self;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PipelineError::NoRuntime(options.name));
        }
        if options.entry_capacity == 0 {
            return Err(PipelineError::invalid_stage("entry", "capacity must be at least 1"));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = options.stage_names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(PipelineError::invalid_stage(duplicate, "duplicate stage name"));
        }

        let cancel = options.cancel.unwrap_or_else(CancellationToken::shared);
        let observability = Observability::new(
            options.sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            options.metrics.unwrap_or_default(),
        );
        let span_parent = if options.unified_span {
            SpanParent::unified(&options.name)
        } else {
            SpanParent::Producer
        };
        let runtime = Arc::new(ItemRuntime::new(
            options.name.clone(),
            options.dependencies,
            observability,
            cancel.clone(),
            span_parent,
        ));

        let entry = BoundedQueue::new("entry", options.entry_capacity, cancel);
        let mut env = LaunchEnv {
            runtime: runtime.clone(),
            order_preservation: options.order_preservation,
            handles: Vec::with_capacity(options.stage_names.len()),
        };
        let exit = chain(&mut env, entry.clone());

        info!(
            pipeline = %options.name,
            stages = options.stage_names.len(),
            entry_capacity = options.entry_capacity,
            order_preservation = options.order_preservation,
            unified_span = options.unified_span,
            "Pipeline started"
        );

        Ok(Pipeline::new(
            options.name,
            entry,
            exit,
            runtime,
            env.handles,
            options.stage_names,
        ))
    }
}

fn launch_stage<I, T, U>(
    env: &mut LaunchEnv,
    descriptor: &StageDescriptor<T, U>,
    input: Arc<BoundedQueue<I>>,
) -> Arc<BoundedQueue<ItemContext<U>>>
where
    I: Admit<T>,
    T: Send + 'static,
    U: Send + 'static,
{
    let output = BoundedQueue::new(
        descriptor.name(),
        descriptor.capacity(),
        env.runtime.cancel_token().clone(),
    );
    let runtime = env.runtime.clone();

    let handle = if descriptor.concurrency() > 1 && env.order_preservation {
        OrderedStagePool::launch(descriptor, input, output.clone(), runtime)
    } else if descriptor.concurrency() > 1 && descriptor.dispatch() == Dispatch::Partitioned {
        StageWorkerPool::launch_partitioned(descriptor, input, output.clone(), runtime)
    } else {
        StageWorkerPool::launch(descriptor, input, output.clone(), runtime)
    };

    env.handles.push(handle);
    output
}
