//! Bounded queues connecting pipeline stages.

mod bounded;

pub use bounded::{BoundedQueue, QueueState};
