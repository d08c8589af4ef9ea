use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use super::types::TaskClass;

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    waiting: usize,
    running: usize,
    /// Bumped by `reset`; completions from an older epoch are ignored.
    epoch: u64,
}

/// Waiting/running pair for one task class.
///
/// `waiting` counts every admitted task of the class that has not completed
/// (queued or running), so `waiting >= running` always holds and
/// `waiting - running` is the number not yet dispatched. Both fields live
/// under one lock so a completion updates them atomically, while the two
/// classes never contend with each other.
#[derive(Debug)]
pub(crate) struct ClassCounter {
    class: TaskClass,
    counts: Mutex<Counts>,
}

impl ClassCounter {
    pub(crate) fn new(class: TaskClass) -> Self {
        Self {
            class,
            counts: Mutex::new(Counts::default()),
        }
    }

    // Counter updates cannot panic midway, so poisoning carries no meaning here.
    fn counts(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A task of this class was admitted. Returns the current epoch.
    pub(crate) fn admit(&self) -> u64 {
        let mut c = self.counts();
        c.waiting += 1;
        c.epoch
    }

    /// A task of this class was dispatched. Returns the epoch its completion must present.
    pub(crate) fn start(&self) -> u64 {
        let mut c = self.counts();
        c.running += 1;
        debug_assert!(
            c.running <= c.waiting,
            "{:?}: running {} exceeds waiting {}",
            self.class,
            c.running,
            c.waiting
        );
        c.epoch
    }

    /// A dispatched task finished. Returns `false` when the counters were reset
    /// since it was dispatched and nothing was changed.
    pub(crate) fn finish(&self, epoch: u64) -> bool {
        let mut c = self.counts();
        if c.epoch != epoch {
            return false;
        }
        c.running = self.decrement(c.running, "running");
        c.waiting = self.decrement(c.waiting, "waiting");
        true
    }

    /// Queued tasks were removed without running.
    pub(crate) fn discard(&self, epoch: u64, count: usize) -> usize {
        let mut c = self.counts();
        if c.epoch != epoch {
            return 0;
        }
        for _ in 0..count {
            c.waiting = self.decrement(c.waiting, "waiting");
        }
        count
    }

    /// Zero both counters and start a new epoch.
    pub(crate) fn reset(&self) {
        let mut c = self.counts();
        c.waiting = 0;
        c.running = 0;
        c.epoch += 1;
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.counts().epoch
    }

    pub(crate) fn waiting(&self) -> usize {
        self.counts().waiting
    }

    pub(crate) fn running(&self) -> usize {
        self.counts().running
    }

    /// `(waiting, running)` read under one lock.
    pub(crate) fn pair(&self) -> (usize, usize) {
        let c = self.counts();
        (c.waiting, c.running)
    }

    /// Admitted but not yet dispatched.
    pub(crate) fn undispatched(&self) -> usize {
        let c = self.counts();
        c.waiting.saturating_sub(c.running)
    }

    fn decrement(&self, value: usize, field: &str) -> usize {
        debug_assert!(value > 0, "{:?} {field} counter underflow", self.class);
        if value == 0 {
            error!(class = ?self.class, field, "counter underflow, clamping at zero");
        }
        value.saturating_sub(1)
    }
}

/// The four class counters at one instant.
///
/// Each class pair is consistent with itself; the two pairs are read one
/// after the other and may be skewed by a concurrent update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub waiting_critical: usize,
    pub running_critical: usize,
    pub waiting_noncritical: usize,
    pub running_noncritical: usize,
}

impl CounterSnapshot {
    pub fn is_idle(&self) -> bool {
        self.waiting_critical == 0 && self.waiting_noncritical == 0
    }

    pub fn running_total(&self) -> usize {
        self.running_critical + self.running_noncritical
    }
}

/// Cumulative scheduler activity, exposed for dashboards and the worker binary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub tasks_enqueued: u64,
    pub tasks_rejected: u64,
    pub tasks_started: u64,
    pub tasks_completed: u64,
    /// Completed with a [`TaskFault`](super::task::TaskFault).
    pub tasks_faulted: u64,
    /// Removed from the queue by a barrier clear or `clear()`.
    pub tasks_discarded: u64,
    /// Number of times the dispatch loop was started.
    pub runs: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_run(&mut self) {
        self.runs += 1;
        self.last_started_at = Some(Utc::now());
    }

    pub fn record_completion(&mut self, faulted: bool) {
        self.tasks_completed += 1;
        if faulted {
            self.tasks_faulted += 1;
        }
        self.last_completed_at = Some(Utc::now());
    }

    /// Tasks admitted but neither completed nor discarded.
    pub fn outstanding(&self) -> u64 {
        self.tasks_enqueued
            .saturating_sub(self.tasks_completed + self.tasks_discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_start_finish_cycle() {
        let counter = ClassCounter::new(TaskClass::Critical);
        counter.admit();
        counter.admit();
        assert_eq!(counter.pair(), (2, 0));
        assert_eq!(counter.undispatched(), 2);

        let epoch = counter.start();
        assert_eq!(counter.pair(), (2, 1));
        assert_eq!(counter.undispatched(), 1);

        assert!(counter.finish(epoch));
        assert_eq!(counter.pair(), (1, 0));
    }

    #[test]
    fn reset_invalidates_outstanding_completions() {
        let counter = ClassCounter::new(TaskClass::NonCritical);
        counter.admit();
        let epoch = counter.start();

        counter.reset();
        assert_eq!(counter.pair(), (0, 0));
        assert_eq!(counter.epoch(), epoch + 1);

        assert!(!counter.finish(epoch));
        assert_eq!(counter.pair(), (0, 0));
    }

    #[test]
    fn discard_only_touches_waiting() {
        let counter = ClassCounter::new(TaskClass::NonCritical);
        let epoch = counter.admit();
        counter.admit();
        counter.admit();
        counter.start();

        assert_eq!(counter.discard(epoch, 2), 2);
        assert_eq!(counter.pair(), (1, 1));
        assert_eq!(counter.discard(epoch + 1, 1), 0);
    }

    #[test]
    fn snapshot_helpers() {
        let snap = CounterSnapshot {
            waiting_critical: 1,
            running_critical: 1,
            waiting_noncritical: 3,
            running_noncritical: 0,
        };
        assert_eq!(snap.running_total(), 1);
        assert!(!snap.is_idle());
        assert!(CounterSnapshot::default().is_idle());
    }

    #[test]
    fn metrics_record_completion() {
        let mut m = SchedulerMetrics::default();
        m.tasks_enqueued = 3;
        m.record_completion(false);
        m.record_completion(true);

        assert_eq!(m.tasks_completed, 2);
        assert_eq!(m.tasks_faulted, 1);
        assert!(m.last_completed_at.is_some());
        assert_eq!(m.outstanding(), 1);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.runs, 0);
        assert!(m.last_started_at.is_none());
        assert_eq!(m.outstanding(), 0);
    }
}
