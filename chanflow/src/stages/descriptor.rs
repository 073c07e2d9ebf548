//! Stage descriptors.

use super::Transform;
use crate::errors::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a stage with several workers distributes its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// All workers compete for items on one shared queue.
    #[default]
    Shared,
    /// A router deals items round-robin to one sub-queue per worker and
    /// merges the outputs. The merge does not preserve arrival order.
    Partitioned,
}

/// Name, buffering, parallelism and transform of one stage.
pub struct StageDescriptor<T, U> {
    name: String,
    capacity: usize,
    concurrency: usize,
    dispatch: Dispatch,
    transform: Arc<dyn Transform<T, U>>,
}

impl<T, U> StageDescriptor<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Creates a descriptor.
    ///
    /// `capacity` bounds the stage's output queue and `concurrency` is the
    /// number of workers. Both must be at least 1.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        concurrency: usize,
        transform: impl Transform<T, U> + 'static,
    ) -> Result<Self> {
        Self::from_shared(name, capacity, concurrency, Arc::new(transform))
    }

    /// Creates a descriptor around an already shared transform.
    pub fn from_shared(
        name: impl Into<String>,
        capacity: usize,
        concurrency: usize,
        transform: Arc<dyn Transform<T, U>>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::invalid_stage(name, "name must not be empty"));
        }
        if capacity == 0 {
            return Err(PipelineError::invalid_stage(name, "capacity must be at least 1"));
        }
        if concurrency == 0 {
            return Err(PipelineError::invalid_stage(name, "concurrency must be at least 1"));
        }

        Ok(Self {
            name,
            capacity,
            concurrency,
            dispatch: Dispatch::default(),
            transform,
        })
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub const fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }
}

impl<T, U> StageDescriptor<T, U> {
    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity of the stage's output queue.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of workers.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The dispatch mode.
    #[must_use]
    pub const fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// The transform.
    #[must_use]
    pub fn transform(&self) -> &Arc<dyn Transform<T, U>> {
        &self.transform
    }
}

impl<T, U> Clone for StageDescriptor<T, U> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            concurrency: self.concurrency,
            dispatch: self.dispatch,
            transform: self.transform.clone(),
        }
    }
}

impl<T, U> std::fmt::Debug for StageDescriptor<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("concurrency", &self.concurrency)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Identity;

    #[test]
    fn test_valid_descriptor() {
        let stage = StageDescriptor::<u32, u32>::new("square", 4, 2, Identity).unwrap();
        assert_eq!(stage.name(), "square");
        assert_eq!(stage.capacity(), 4);
        assert_eq!(stage.concurrency(), 2);
        assert_eq!(stage.dispatch(), Dispatch::Shared);

        let stage = stage.with_dispatch(Dispatch::Partitioned);
        assert_eq!(stage.dispatch(), Dispatch::Partitioned);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = StageDescriptor::<u32, u32>::new("bad", 0, 1, Identity).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStage { ref stage, .. } if stage == "bad"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = StageDescriptor::<u32, u32>::new("bad", 1, 0, Identity).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(StageDescriptor::<u32, u32>::new(" ", 1, 1, Identity).is_err());
    }

    #[test]
    fn test_dispatch_serde() {
        let dispatch: Dispatch = serde_json::from_str("\"partitioned\"").unwrap();
        assert_eq!(dispatch, Dispatch::Partitioned);
        assert_eq!(serde_json::to_string(&Dispatch::Shared).unwrap(), "\"shared\"");
    }
}
