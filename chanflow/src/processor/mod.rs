//! A two-step background processor built on the pipeline engine.
//!
//! Producers hand [`Payload`]s to a [`BackgroundProcessor`]. The
//! [`ProcessorChannel`] runs them through two stages with simulated
//! latency, and a [`DeliveryWorker`] drains the [`PayloadResult`]s.
//!
//! ```rust,ignore
//! use chanflow::processor::*;
//!
//! let processor = ProcessorChannel::new(&ProcessorSettings::default())?;
//! let worker = DeliveryWorker::new(sink, CancellationToken::shared())
//!     .spawn(processor.results()?);
//!
//! processor.queue_work_item(Payload::new("task-1")).await?;
//! processor.complete();
//! let delivered = worker.await?;
//! ```

mod channel;
mod delivery;
mod payload;
mod settings;
mod source;
mod steps;

pub use channel::{BackgroundProcessor, ProcessorChannel, PROCESSOR_PIPELINE};
pub use delivery::DeliveryWorker;
pub use payload::{Payload, PayloadResult, StampedPayload, PARENT_SPAN_KEY};
pub use settings::{ProcessorSettings, STEP1, STEP2};
pub use source::{forward, generate, generate_range};
pub use steps::{FinishStep, RandomDelay, StampStep};
