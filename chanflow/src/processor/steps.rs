//! The two simulated processing steps.

use super::payload::{Payload, PayloadResult, StampedPayload};
use crate::context::ResourceScope;
use crate::errors::TransformError;
use crate::stages::Transform;
use async_trait::async_trait;
use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{debug, debug_span, Instrument};

/// Picks a random delay from an inclusive millisecond range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomDelay {
    range: RangeInclusive<u64>,
}

impl RandomDelay {
    /// Creates a delay source over `range`.
    #[must_use]
    pub const fn new(range: RangeInclusive<u64>) -> Self {
        Self { range }
    }

    /// Draws a delay in milliseconds.
    #[must_use]
    pub fn sample(&self) -> u64 {
        if self.range.is_empty() {
            return *self.range.start();
        }
        rand::thread_rng().gen_range(self.range.clone())
    }
}

/// Step 1: waits, then stamps the payload with a message and the scope's
/// current time.
#[derive(Debug, Clone)]
pub struct StampStep {
    delay: RandomDelay,
}

impl StampStep {
    /// Creates the step.
    #[must_use]
    pub const fn new(delay: RandomDelay) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Transform<Payload, StampedPayload> for StampStep {
    async fn apply(&self, input: Payload, scope: &ResourceScope) -> Result<StampedPayload, TransformError> {
        let parent_span_id = input.parent_span_id();
        let delay = self.delay.sample();
        tokio::time::sleep(Duration::from_millis(delay))
            .instrument(debug_span!("step1", parent_span_id))
            .await;
        debug!(payload = %input.name, delay_ms = delay, parent_span_id, "Step 1 done");

        Ok(StampedPayload {
            name: input.name,
            created_at: scope.now(),
            message: format!("Waited {delay} ms."),
            parent_span_id,
        })
    }
}

/// Step 2: waits, then stamps the finish time.
#[derive(Debug, Clone)]
pub struct FinishStep {
    delay: RandomDelay,
}

impl FinishStep {
    /// Creates the step.
    #[must_use]
    pub const fn new(delay: RandomDelay) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Transform<StampedPayload, PayloadResult> for FinishStep {
    async fn apply(&self, input: StampedPayload, scope: &ResourceScope) -> Result<PayloadResult, TransformError> {
        let delay = self.delay.sample();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        debug!(payload = %input.name, delay_ms = delay, "Step 2 done");

        Ok(PayloadResult {
            name: input.name,
            created_at: input.created_at,
            message: input.message,
            finished_at: scope.now(),
            parent_span_id: input.parent_span_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Clock, Dependencies, ItemId};
    use crate::testing::ManualClock;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_sample_within_range() {
        let delay = RandomDelay::new(3..=7);
        for _ in 0..100 {
            assert!((3..=7).contains(&delay.sample()));
        }
        assert_eq!(RandomDelay::new(4..=4).sample(), 4);
    }

    #[test]
    #[allow(clippy::reversed_empty_ranges)]
    fn test_sample_empty_range() {
        assert_eq!(RandomDelay::new(9..=2).sample(), 9);
    }

    #[tokio::test]
    async fn test_steps_read_time_from_scope() {
        let clock = Arc::new(ManualClock::epoch());
        let scope = Dependencies::new().with_clock(clock.clone()).create_scope(ItemId::new());
        let delay = RandomDelay::new(1..=2);

        let stamped = StampStep::new(delay.clone())
            .apply(Payload::new("task-1"), &scope)
            .await
            .unwrap();
        assert_eq!(stamped.name, "task-1");
        assert_eq!(stamped.created_at, ManualClock::epoch().now());
        assert!(stamped.message == "Waited 1 ms." || stamped.message == "Waited 2 ms.");

        clock.advance(chrono::Duration::seconds(5));
        let result = FinishStep::new(delay).apply(stamped.clone(), &scope).await.unwrap();
        assert_eq!(result.message, stamped.message);
        assert_eq!(result.created_at, stamped.created_at);
        assert_eq!(result.elapsed().num_seconds(), 5);
        assert_eq!(result.parent_span_id, None);
    }

    #[tokio::test]
    async fn test_parent_span_carried_through_both_steps() {
        let scope = Dependencies::new().create_scope(ItemId::new());
        let delay = RandomDelay::new(0..=0);
        let mut payload = Payload::new("traced");
        payload.set_parent_span(&tracing::span::Id::from_u64(7));

        let stamped = StampStep::new(delay.clone()).apply(payload, &scope).await.unwrap();
        assert_eq!(stamped.parent_span_id, Some(7));

        let result = FinishStep::new(delay).apply(stamped, &scope).await.unwrap();
        assert_eq!(result.parent_span_id, Some(7));
    }
}
