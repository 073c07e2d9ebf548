//! Per-item context: identity, resource scope, span and release guard.
//!
//! This module provides:
//! - Item identities and lifecycle states
//! - The fixed dependency set and the per-item resource scope built from it
//! - The item envelope whose guard releases scope and span exactly once

mod clock;
mod identity;
mod item;
mod scope;

pub use clock::{Clock, SystemClock};
pub use identity::{ItemId, ItemOutcome, ItemState};
pub use item::{Admit, ItemContext, ItemGuard, ItemRuntime, Submission};
pub use scope::{Dependencies, ResourceScope};
