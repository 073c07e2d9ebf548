//! Testing utilities for chanflow pipelines.
//!
//! This module provides:
//! - A settable clock for scopes
//! - An event sink that only counts
//! - Transforms that fail on demand or take their time

mod fixtures;
mod mocks;

pub use fixtures::{CountingSink, ManualClock};
pub use mocks::{delayed, delayed_by, fail_when, Delayed};
