//! Test fixtures for pipeline testing.

use crate::context::Clock;
use crate::events::{EventKind, EventSink, PipelineEvent};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Creates a clock reading the Unix epoch.
    #[must_use]
    pub fn epoch() -> Self {
        Self::new(Utc.timestamp_opt(0, 0).single().unwrap_or_default())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// An event sink that keeps per-kind counts instead of the events.
///
/// Cheap enough to leave attached in benchmarks.
#[derive(Debug, Default)]
pub struct CountingSink {
    counts: Mutex<HashMap<EventKind, usize>>,
}

impl CountingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events of `kind` seen so far.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.counts.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Number of events seen so far.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    fn record(&self, event: &PipelineEvent) {
        *self.counts.lock().entry(event.kind).or_insert(0) += 1;
    }
}

#[async_trait]
impl EventSink for CountingSink {
    async fn emit(&self, event: PipelineEvent) {
        self.record(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.record(&event);
    }
}
