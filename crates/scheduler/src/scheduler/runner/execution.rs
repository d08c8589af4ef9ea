use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::scheduler::events::SchedulerEvent;
use crate::scheduler::signal::CompletionSignal;
use crate::scheduler::task::{SchedulerError, TaskFault, WorkItem};
use crate::scheduler::types::{SchedulerState, TaskHeader};

use super::core::Shared;
use super::Scheduler;

/// Non-critical items pulled off the queue while draining, with the epoch
/// they were counted under.
type Deferred = Vec<(WorkItem, u64)>;

impl Scheduler {
    /// Start a run: `Stopped -> Starting`, then spawn the dispatch thread,
    /// which moves the scheduler to `Running`.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared
            .transition(SchedulerState::Stopped, SchedulerState::Starting, "start")?;

        // The previous run already reached `Stopped`; reap its thread.
        if let Some(previous) = dispatcher.take() {
            if previous.join().is_err() {
                error!("previous dispatch thread panicked");
            }
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("priosched-dispatch".into())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => {
                *dispatcher = Some(handle);
                info!(queued = self.shared.queue.len(), "Scheduler start requested");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(SchedulerState::Stopped);
                Err(SchedulerError::DispatchThread(e))
            }
        }
    }

    /// Begin a graceful shutdown: `Running -> Stopping`.
    ///
    /// Returns immediately. Critical tasks keep being dispatched until none
    /// are waiting, then the dispatch loop waits for running critical tasks
    /// and moves to `Stopped`. Non-critical tasks are not started anymore and
    /// new submissions are rejected unless forced.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        {
            // Admission checks the state under the same lock.
            let _admission = self.shared.gate.lock();
            self.shared
                .transition(SchedulerState::Running, SchedulerState::Stopping, "stop")?;
        }
        info!(
            waiting_critical = self.shared.critical.waiting(),
            running_critical = self.shared.critical.running(),
            "Scheduler stop requested"
        );
        self.shared.wakeup.notify();
        Ok(())
    }

    /// Block until the current dispatch thread has exited. Returns at once if
    /// no run was started. Only returns after `Stopped` was emitted, so it is
    /// normally paired with [`stop`](Self::stop).
    pub fn join(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }

    /// `stop` followed by `join`.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        self.stop()?;
        self.join();
        Ok(())
    }
}

impl Shared {
    /// The dispatch loop. Runs on its own thread for the whole run.
    pub(crate) fn run(self: Arc<Self>) {
        self.set_state(SchedulerState::Running);
        self.with_metrics(|m| m.record_run());
        info!(
            concurrency_limit = self.executor.concurrency_limit(),
            queued = self.queue.len(),
            "Scheduler running"
        );
        self.emit(SchedulerEvent::Started);

        let mut deferred = Deferred::new();
        loop {
            let token = self.wakeup.token();
            if self.orphaned.load(Ordering::Acquire) {
                let _ = self.transition(SchedulerState::Running, SchedulerState::Stopping, "stop");
            }
            self.sync_gate();

            let state = self.state();
            if state == SchedulerState::Stopping && self.critical.undispatched() == 0 {
                break;
            }
            if !self.dispatch_next(&mut deferred) {
                self.wakeup.wait_since(token, self.config.idle_wait());
            }
        }

        debug!(
            running_critical = self.critical.running(),
            "all critical tasks dispatched, waiting for them to finish"
        );
        loop {
            let token = self.wakeup.token();
            self.sync_gate();
            if self.critical.running() == 0 {
                break;
            }
            self.wakeup.wait_since(token, self.config.drain_poll());
        }

        self.restore_deferred(deferred);
        self.sync_gate();
        self.set_state(SchedulerState::Stopped);
        info!(
            queued = self.queue.len(),
            running_noncritical = self.noncritical.running(),
            "Scheduler stopped"
        );
        self.emit(SchedulerEvent::Stopped);
    }

    /// Dispatch one item if capacity allows. Returns `false` when there was
    /// nothing to do, so the caller should wait for a wake-up.
    fn dispatch_next(self: &Arc<Self>, deferred: &mut Deferred) -> bool {
        if self.running_total() >= self.executor.concurrency_limit() {
            return false;
        }
        let Some(item) = self.queue.dequeue() else {
            return false;
        };

        let header = item.header();
        let epoch = {
            // `stop` transitions under this lock, so the state read here stays
            // valid until the item is counted as running.
            let mut gate = self.gate.lock();
            if !header.class.is_critical() {
                if self.state() == SchedulerState::Stopping {
                    drop(gate);
                    // A non-critical item dequeued while draining: forced in,
                    // or dequeued just as `stop` landed. Keep it for the next run.
                    debug!(seq = header.sequence, "deferring non-critical task during drain");
                    deferred.push((item, self.noncritical.epoch()));
                    return true;
                }
                if gate.clear_requested && self.critical.waiting() == 0 {
                    drop(gate);
                    // Last critical task finished after this iteration's gate check.
                    self.queue.enqueue(item);
                    self.sync_gate();
                    return true;
                }
            }
            // Count as running before handing off so a fast completion cannot underflow.
            let epoch = self.counter(header.class).start();
            if header.class.is_critical() {
                gate.open = false;
            }
            epoch
        };

        self.launch(item, epoch);
        true
    }

    fn launch(self: &Arc<Self>, item: WorkItem, epoch: u64) {
        let (header, job) = item.into_parts();
        self.with_metrics(|m| m.tasks_started += 1);

        debug!(
            seq = header.sequence,
            priority = header.priority,
            class = ?header.class,
            "task started"
        );
        self.emit(SchedulerEvent::TaskStarted(header));
        if self.queue.is_empty() {
            self.emit(SchedulerEvent::QueueEmpty);
        }

        let signal = CompletionSignal::new(Arc::clone(self), header, epoch);
        match job {
            None => signal.complete(Some(TaskFault::EmptyCallback)),
            Some(job) => self.executor.execute(Box::new(move || {
                let fault = panic::catch_unwind(AssertUnwindSafe(job))
                    .err()
                    .map(|payload| TaskFault::Panicked(panic_message(payload.as_ref())));
                signal.complete(fault);
            })),
        }
    }

    /// Completion accounting. Runs exactly once per dispatched task, on the
    /// thread that executed it.
    pub(crate) fn complete(&self, header: TaskHeader, epoch: u64, fault: Option<TaskFault>) {
        if !self.counter(header.class).finish(epoch) {
            debug!(seq = header.sequence, "completion from before clear(), counters untouched");
        }
        self.with_metrics(|m| m.record_completion(fault.is_some()));

        match &fault {
            Some(fault) => warn!(seq = header.sequence, error = %fault, "task faulted"),
            None => debug!(seq = header.sequence, "task completed"),
        }
        self.emit(SchedulerEvent::TaskCompleted { task: header, fault });

        if self.critical.waiting() == 0 {
            self.emit(SchedulerEvent::CriticalTasksCompleted);
            if self.noncritical.waiting() == 0 {
                self.emit(SchedulerEvent::AllTasksCompleted);
            }
        }
        self.wakeup.notify();
    }

    /// Put items deferred during drain back in the queue, unless the counters
    /// were reset since they were taken.
    fn restore_deferred(&self, deferred: Deferred) {
        if deferred.is_empty() {
            return;
        }
        let epoch = self.noncritical.epoch();
        let mut restored = 0usize;
        for (item, item_epoch) in deferred {
            if item_epoch == epoch {
                self.queue.enqueue(item);
                restored += 1;
            }
        }
        debug!(restored, "re-queued non-critical tasks deferred during drain");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
