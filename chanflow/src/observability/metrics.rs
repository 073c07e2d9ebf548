//! Progress counters for a pipeline.

use crate::context::ItemOutcome;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default, Clone, Copy)]
struct ItemTotals {
    started: u64,
    in_progress: i64,
    finished: u64,
    failed: u64,
    cancelled: u64,
    dropped: u64,
}

/// Per-stage counters.
#[derive(Debug, Default)]
pub struct StageCounters {
    in_progress: AtomicI64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl StageCounters {
    /// Items currently inside this stage's transform.
    #[must_use]
    pub fn in_progress(&self) -> i64 {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Items this stage transformed successfully.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Items this stage failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Aggregate counters for one pipeline.
///
/// Item totals are updated under one lock so a [`MetricsSnapshot`] always
/// satisfies `started == finished + failed + cancelled + dropped + in_progress`.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    totals: Mutex<ItemTotals>,
    scopes_acquired: AtomicU64,
    scopes_released: AtomicU64,
    stages: DashMap<String, StageCounters>,
}

impl PipelineMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an item entering the pipeline.
    pub fn record_started(&self) {
        self.scopes_acquired.fetch_add(1, Ordering::SeqCst);
        let mut totals = self.totals.lock();
        totals.started += 1;
        totals.in_progress += 1;
    }

    /// Records an item's scope being released with `outcome`.
    pub fn record_released(&self, outcome: ItemOutcome) {
        {
            let mut totals = self.totals.lock();
            totals.in_progress -= 1;
            match outcome {
                ItemOutcome::Finished => totals.finished += 1,
                ItemOutcome::Failed => totals.failed += 1,
                ItemOutcome::Cancelled => totals.cancelled += 1,
                ItemOutcome::Dropped => totals.dropped += 1,
            }
        }
        self.scopes_released.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a stage picking up an item.
    pub fn record_stage_started(&self, stage: &str) {
        self.with_stage(stage, |c| c.in_progress.fetch_add(1, Ordering::SeqCst));
    }

    /// Records a stage finishing an item.
    pub fn record_stage_finished(&self, stage: &str, success: bool) {
        self.with_stage(stage, |counters| {
            counters.in_progress.fetch_sub(1, Ordering::SeqCst);
            if success {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            } else {
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    fn with_stage<R>(&self, stage: &str, f: impl FnOnce(&StageCounters) -> R) -> R {
        if let Some(counters) = self.stages.get(stage) {
            return f(&counters);
        }
        let counters = self.stages.entry(stage.to_string()).or_default();
        f(&counters)
    }

    /// Items admitted so far.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.totals.lock().started
    }

    /// Items admitted but not yet released.
    #[must_use]
    pub fn in_progress(&self) -> i64 {
        self.totals.lock().in_progress
    }

    /// Items delivered to the consumer.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.totals.lock().finished
    }

    /// Items dropped because a transform failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.totals.lock().failed
    }

    /// Items released because the pipeline was cancelled.
    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.totals.lock().cancelled
    }

    /// Scopes acquired so far.
    #[must_use]
    pub fn scopes_acquired(&self) -> u64 {
        self.scopes_acquired.load(Ordering::SeqCst)
    }

    /// Scopes released so far.
    #[must_use]
    pub fn scopes_released(&self) -> u64 {
        self.scopes_released.load(Ordering::SeqCst)
    }

    /// Items currently inside `stage`'s transform.
    #[must_use]
    pub fn stage_in_progress(&self, stage: &str) -> i64 {
        self.stages.get(stage).map_or(0, |c| c.in_progress())
    }

    /// Returns a consistent copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = *self.totals.lock();
        let stages = self
            .stages
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    StageSnapshot {
                        in_progress: entry.in_progress(),
                        completed: entry.completed(),
                        failed: entry.failed(),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            started: totals.started,
            in_progress: totals.in_progress,
            finished: totals.finished,
            failed: totals.failed,
            cancelled: totals.cancelled,
            dropped: totals.dropped,
            scopes_acquired: self.scopes_acquired(),
            scopes_released: self.scopes_released(),
            stages,
        }
    }
}

/// Per-stage part of a [`MetricsSnapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Items inside the stage transform.
    pub in_progress: i64,
    /// Items transformed successfully.
    pub completed: u64,
    /// Items failed by the stage.
    pub failed: u64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Items admitted.
    pub started: u64,
    /// Items admitted and not yet released.
    pub in_progress: i64,
    /// Items delivered.
    pub finished: u64,
    /// Items failed by a transform.
    pub failed: u64,
    /// Items released by cancellation.
    pub cancelled: u64,
    /// Items released because their queue or consumer went away.
    pub dropped: u64,
    /// Scopes acquired.
    pub scopes_acquired: u64,
    /// Scopes released.
    pub scopes_released: u64,
    /// Per-stage counters, keyed by stage name.
    pub stages: BTreeMap<String, StageSnapshot>,
}

impl MetricsSnapshot {
    /// Returns true when every acquired scope has been released.
    #[must_use]
    pub const fn is_leak_free(&self) -> bool {
        self.scopes_acquired == self.scopes_released && self.in_progress == 0
    }

    /// Returns true when the item totals add up.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let settled = self.finished + self.failed + self.cancelled + self.dropped;
        i128::from(self.started) == i128::from(settled) + i128::from(self.in_progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_item_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_started();
        metrics.record_started();
        metrics.record_started();
        metrics.record_released(ItemOutcome::Finished);
        metrics.record_released(ItemOutcome::Failed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.started, 3);
        assert_eq!(snapshot.in_progress, 1);
        assert_eq!(snapshot.finished, 1);
        assert_eq!(snapshot.failed, 1);
        assert!(snapshot.is_consistent());
        assert!(!snapshot.is_leak_free());

        metrics.record_released(ItemOutcome::Cancelled);
        assert!(metrics.snapshot().is_leak_free());
    }

    #[test]
    fn test_stage_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage_started("step1");
        metrics.record_stage_started("step1");
        assert_eq!(metrics.stage_in_progress("step1"), 2);

        metrics.record_stage_finished("step1", true);
        metrics.record_stage_finished("step1", false);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.stages["step1"],
            StageSnapshot {
                in_progress: 0,
                completed: 1,
                failed: 1
            }
        );
        assert_eq!(metrics.stage_in_progress("unknown"), 0);
    }
}
