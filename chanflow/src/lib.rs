//! # Chanflow
//!
//! A bounded, staged async pipeline engine.
//!
//! Work items flow from an entry queue through an ordered chain of stages.
//! Each stage has its own output capacity and worker count, and every item
//! carries a resource scope and a tracing span from admission to release:
//!
//! - **Bounded queues**: producers suspend while a queue is full, consumers
//!   while it is empty, and completion or cancellation wakes everyone
//! - **Worker pools**: shared-queue, partitioned and order-preserving
//!   dispatch within a stage
//! - **Item contexts**: exactly one acquisition and one release per item,
//!   whether it finishes, fails or is cancelled
//! - **Observability**: lifecycle events, progress counters and per-item
//!   spans, all passed in explicitly
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chanflow::prelude::*;
//!
//! let pipeline = Pipeline::builder("squares")
//!     .entry_capacity(10)
//!     .stage(StageDescriptor::new("square", 10, 4, FnTransform::new(
//!         |x: u64, _: &ResourceScope| Ok(x * x),
//!     ))?)
//!     .build()?;
//!
//! let results = pipeline.results()?;
//! pipeline.submitter().submit_all(1..=3).await?;
//! pipeline.complete();
//! let squares = results.collect().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod router;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CleanupRegistry, TaskGroup};
    pub use crate::context::{
        Clock, Dependencies, ItemContext, ItemId, ItemOutcome, ItemState, ResourceScope,
        SystemClock,
    };
    pub use crate::errors::{PipelineError, SettingsError, TransformError};
    pub use crate::events::{EventKind, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::observability::{init_logging, LogFormat, MetricsSnapshot, Observability, PipelineMetrics};
    pub use crate::pipeline::{
        Accepted, Pipeline, PipelineBuilder, PipelineSettings, Results, StageSettings, Submitter,
    };
    pub use crate::queue::BoundedQueue;
    pub use crate::router::{fan_in, fan_out};
    pub use crate::stages::{AsyncFnTransform, Dispatch, FnTransform, StageDescriptor, Transform};
}
