//! Pipeline building and execution.
//!
//! This module provides:
//! - Pipeline settings loaded from JSON
//! - A typed builder that checks stage input and output types
//! - The running pipeline with its producer and consumer handles

mod builder;
mod engine;
mod settings;

pub use builder::{PipelineBuilder, StagedPipelineBuilder};
pub use engine::{Accepted, Pipeline, Results, Submitter};
pub use settings::{PipelineSettings, StageSettings, CAPACITY_RANGE, CONCURRENCY_RANGE};
