use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Drain class of a task, fixed at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Priority at or above the threshold. Must finish before shutdown completes.
    Critical,
    /// Everything else. Abandoned by a graceful shutdown.
    NonCritical,
}

impl TaskClass {
    /// Classify a priority against the critical threshold.
    pub fn classify(priority: f64, min_critical_priority: f64) -> Self {
        if priority >= min_critical_priority {
            TaskClass::Critical
        } else {
            TaskClass::NonCritical
        }
    }

    pub fn is_critical(self) -> bool {
        self == TaskClass::Critical
    }
}

/// Lifecycle state of a [`Scheduler`](super::Scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SchedulerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl SchedulerState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SchedulerState::Starting,
            2 => SchedulerState::Running,
            3 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Starting => "starting",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Identity of a submitted task as seen by events, queue peeks and callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskHeader {
    /// Submission order; strictly increasing per scheduler.
    pub sequence: u64,
    pub priority: f64,
    pub class: TaskClass,
}

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Priority at or above which a task is critical.
    #[serde(default = "default_min_critical_priority")]
    pub min_critical_priority: f64,
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Max concurrently running tasks. 0 = same as the worker count.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Buffered events per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Upper bound on how long the idle dispatch loop sleeps between wake-ups.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Poll interval while waiting for running critical work during drain.
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
}

fn default_min_critical_priority() -> f64 {
    100.0
}

fn default_worker_threads() -> usize {
    0
}

fn default_max_concurrency() -> usize {
    0
}

fn default_event_capacity() -> usize {
    1024
}

fn default_idle_wait_ms() -> u64 {
    50
}

fn default_drain_poll_ms() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_critical_priority: default_min_critical_priority(),
            worker_threads: default_worker_threads(),
            max_concurrency: default_max_concurrency(),
            event_capacity: default_event_capacity(),
            idle_wait_ms: default_idle_wait_ms(),
            drain_poll_ms: default_drain_poll_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Resolve the concurrency ceiling (0 means one task per worker thread).
    pub fn resolved_max_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            self.resolved_worker_threads()
        } else {
            self.max_concurrency
        }
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_at_threshold_is_critical() {
        assert_eq!(TaskClass::classify(8.0, 8.0), TaskClass::Critical);
        assert_eq!(TaskClass::classify(10.0, 8.0), TaskClass::Critical);
        assert_eq!(TaskClass::classify(7.999, 8.0), TaskClass::NonCritical);
        assert_eq!(TaskClass::classify(-1.0, 0.0), TaskClass::NonCritical);
    }

    #[test]
    fn infinite_priorities_classify() {
        assert!(TaskClass::classify(f64::INFINITY, 100.0).is_critical());
        assert!(!TaskClass::classify(f64::NEG_INFINITY, 100.0).is_critical());
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SchedulerState::Stopped,
            SchedulerState::Starting,
            SchedulerState::Running,
            SchedulerState::Stopping,
        ] {
            assert_eq!(SchedulerState::from_u8(state as u8), state);
        }
        assert_eq!(SchedulerState::from_u8(42), SchedulerState::Stopped);
    }

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.min_critical_priority, 100.0);
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.max_concurrency, 0);
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.idle_wait(), Duration::from_millis(50));
        assert_eq!(config.drain_poll(), Duration::from_millis(10));
    }

    #[test]
    fn resolved_worker_threads() {
        let mut config = SchedulerConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_worker_threads() > 0);

        config.worker_threads = 8;
        assert_eq!(config.resolved_worker_threads(), 8);
    }

    #[test]
    fn max_concurrency_follows_workers_when_unset() {
        let mut config = SchedulerConfig::default();
        config.worker_threads = 3;
        assert_eq!(config.resolved_max_concurrency(), 3);

        config.max_concurrency = 1;
        assert_eq!(config.resolved_max_concurrency(), 1);
    }
}
