use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::scheduler::events::{EventBus, SchedulerEvent};
use crate::scheduler::executor::{Executor, RayonExecutor};
use crate::scheduler::metrics::{ClassCounter, CounterSnapshot, SchedulerMetrics};
use crate::scheduler::queue::{PriorityQueue, TaskQueue};
use crate::scheduler::signal::{Gate, Wakeup};
use crate::scheduler::task::SchedulerError;
use crate::scheduler::types::{SchedulerConfig, SchedulerState, TaskClass, TaskHeader};

/// State shared between the public handle, the dispatch thread and
/// completion signals running on executor threads.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    /// [`SchedulerState`] as `u8`; transitions are compare-and-swap.
    pub(crate) state: AtomicU8,
    /// `f64` bits of the critical threshold.
    pub(crate) min_critical_priority: AtomicU64,
    pub(crate) next_sequence: AtomicU64,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) critical: ClassCounter,
    pub(crate) noncritical: ClassCounter,
    pub(crate) events: EventBus,
    pub(crate) metrics: RwLock<SchedulerMetrics>,
    pub(crate) wakeup: Wakeup,
    pub(crate) gate: Gate,
    /// Set when the owning [`Scheduler`] is dropped while a run is active.
    pub(crate) orphaned: AtomicBool,
}

impl Shared {
    pub(crate) fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Atomically move `from -> to`, or report the state that prevented it.
    pub(crate) fn transition(
        &self,
        from: SchedulerState,
        to: SchedulerState,
        operation: &'static str,
    ) -> Result<(), SchedulerError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| SchedulerError::InvalidStateTransition {
                operation,
                state: SchedulerState::from_u8(actual),
            })
    }

    pub(crate) fn min_critical_priority(&self) -> f64 {
        f64::from_bits(self.min_critical_priority.load(Ordering::Relaxed))
    }

    pub(crate) fn counter(&self, class: TaskClass) -> &ClassCounter {
        match class {
            TaskClass::Critical => &self.critical,
            TaskClass::NonCritical => &self.noncritical,
        }
    }

    pub(crate) fn running_total(&self) -> usize {
        self.critical.running() + self.noncritical.running()
    }

    pub(crate) fn counters(&self) -> CounterSnapshot {
        let (waiting_critical, running_critical) = self.critical.pair();
        let (waiting_noncritical, running_noncritical) = self.noncritical.pair();
        CounterSnapshot {
            waiting_critical,
            running_critical,
            waiting_noncritical,
            running_noncritical,
        }
    }

    pub(crate) fn with_metrics(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        self.events.emit(event);
    }
}

/// Priority-ordered task scheduler.
///
/// Tasks are dispatched highest priority first (FIFO among equal priorities)
/// onto an [`Executor`], never exceeding its concurrency limit. Tasks whose
/// priority is at least `min_critical_priority` are critical: [`stop`](Self::stop)
/// keeps dispatching them until none remain, then the scheduler stops while
/// non-critical work stays queued.
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
    /// Dispatch thread of the current or most recent run.
    pub(super) dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with a rayon pool sized from `config` and the default queue.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let executor = RayonExecutor::new(&config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(PriorityQueue::new()),
            Arc::new(executor),
        ))
    }

    /// Create a scheduler over a custom ordering structure and executor.
    pub fn with_parts(
        config: SchedulerConfig,
        queue: Arc<dyn TaskQueue>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        info!(
            min_critical_priority = config.min_critical_priority,
            concurrency_limit = executor.concurrency_limit(),
            "Scheduler created"
        );
        let shared = Shared {
            state: AtomicU8::new(SchedulerState::Stopped as u8),
            min_critical_priority: AtomicU64::new(config.min_critical_priority.to_bits()),
            next_sequence: AtomicU64::new(0),
            queue,
            executor,
            critical: ClassCounter::new(TaskClass::Critical),
            noncritical: ClassCounter::new(TaskClass::NonCritical),
            events: EventBus::new(config.event_capacity),
            metrics: RwLock::new(SchedulerMetrics::default()),
            wakeup: Wakeup::new(),
            gate: Gate::new(),
            orphaned: AtomicBool::new(false),
            config,
        };
        Self {
            shared: Arc::new(shared),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn min_critical_priority(&self) -> f64 {
        self.shared.min_critical_priority()
    }

    /// Change the critical threshold. Only affects tasks submitted afterwards.
    pub fn set_min_critical_priority(&self, priority: f64) -> Result<(), SchedulerError> {
        if priority.is_nan() {
            return Err(SchedulerError::InvalidPriority(priority));
        }
        self.shared
            .min_critical_priority
            .store(priority.to_bits(), Ordering::Relaxed);
        debug!(min_critical_priority = priority, "critical threshold changed");
        Ok(())
    }

    /// Subscribe to scheduler events. Events emitted before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Get a snapshot of the cumulative metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All four class counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters()
    }

    pub fn waiting_critical(&self) -> usize {
        self.shared.critical.waiting()
    }

    pub fn running_critical(&self) -> usize {
        self.shared.critical.running()
    }

    pub fn waiting_noncritical(&self) -> usize {
        self.shared.noncritical.waiting()
    }

    pub fn running_noncritical(&self) -> usize {
        self.shared.noncritical.running()
    }

    pub fn has_waiting_critical_tasks(&self) -> bool {
        self.waiting_critical() > 0
    }

    pub fn has_running_critical_tasks(&self) -> bool {
        self.running_critical() > 0
    }

    pub fn has_waiting_noncritical_tasks(&self) -> bool {
        self.waiting_noncritical() > 0
    }

    pub fn has_running_noncritical_tasks(&self) -> bool {
        self.running_noncritical() > 0
    }

    /// Number of tasks in the ordering structure.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// The task that would be dispatched next.
    pub fn peek(&self) -> Option<TaskHeader> {
        self.shared.queue.peek()
    }

    /// Whether the synchronization gate is currently open.
    pub fn is_synchronized(&self) -> bool {
        self.shared.gate.is_open()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // The dispatch thread owns its own `Arc<Shared>`; ask it to wind down.
        if self.shared.state() != SchedulerState::Stopped {
            self.shared.orphaned.store(true, Ordering::Release);
            self.shared.wakeup.notify();
        }
    }
}
