//! Structured cancellation and cleanup utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative, pipeline-wide cancellation
//! - CleanupRegistry for LIFO release of per-item resources
//! - TaskGroup for joining the tasks of one stage

mod cleanup;
mod task_group;
mod token;

pub use cleanup::CleanupRegistry;
pub use task_group::TaskGroup;
pub use token::{CancelCallback, CancellationToken};
