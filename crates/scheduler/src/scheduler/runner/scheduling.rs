use std::sync::atomic::Ordering;

use tracing::debug;

use crate::scheduler::events::SchedulerEvent;
use crate::scheduler::task::{SchedulerError, Task};
use crate::scheduler::types::{SchedulerState, TaskClass, TaskHeader};

use super::core::Shared;
use super::Scheduler;

impl Scheduler {
    /// Submit `callback(context)` at `priority`.
    ///
    /// Fails with [`SchedulerError::RejectedWhileStopping`] during a graceful
    /// shutdown. Submitting while `Stopped` is allowed; the task waits for the
    /// next [`start`](Self::start).
    pub fn submit<C, F>(
        &self,
        priority: f64,
        context: C,
        callback: F,
    ) -> Result<TaskHeader, SchedulerError>
    where
        C: Send + 'static,
        F: FnOnce(C) + Send + 'static,
    {
        self.shared.admit(Task::new(priority, context, callback), false)
    }

    /// Like [`submit`](Self::submit) but accepted even while `Stopping`.
    ///
    /// A task forced in during shutdown is always non-critical: it does not
    /// hold up the drain and runs on the next start.
    pub fn submit_forced<C, F>(
        &self,
        priority: f64,
        context: C,
        callback: F,
    ) -> Result<TaskHeader, SchedulerError>
    where
        C: Send + 'static,
        F: FnOnce(C) + Send + 'static,
    {
        self.shared.admit(Task::new(priority, context, callback), true)
    }

    /// Submit a pre-built [`Task`].
    pub fn submit_task(&self, task: Task) -> Result<TaskHeader, SchedulerError> {
        self.shared.admit(task, false)
    }

    /// Submit a pre-built [`Task`] with the force-admit override.
    pub fn submit_task_forced(&self, task: Task) -> Result<TaskHeader, SchedulerError> {
        self.shared.admit(task, true)
    }
}

impl Shared {
    pub(crate) fn admit(&self, task: Task, force: bool) -> Result<TaskHeader, SchedulerError> {
        // -0.0 becomes 0.0 so headers and events carry one spelling of zero.
        let priority = task.priority() + 0.0;
        if priority.is_nan() {
            self.with_metrics(|m| m.tasks_rejected += 1);
            return Err(SchedulerError::InvalidPriority(priority));
        }

        let header = {
            // Held across classify/count/enqueue: a barrier clear or `stop`
            // never observes a half-admitted task.
            let _admission = self.gate.lock();
            let stopping = self.state() == SchedulerState::Stopping;
            if stopping && !force {
                drop(_admission);
                self.with_metrics(|m| m.tasks_rejected += 1);
                debug!(priority, "submission rejected while stopping");
                return Err(SchedulerError::RejectedWhileStopping);
            }

            let class = if stopping {
                TaskClass::NonCritical
            } else {
                TaskClass::classify(priority, self.min_critical_priority())
            };
            let header = TaskHeader {
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                priority,
                class,
            };
            // Count first: the dispatch loop may dequeue the item the moment it lands.
            self.counter(class).admit();
            self.queue.enqueue(task.into_work_item(header));
            header
        };

        self.with_metrics(|m| m.tasks_enqueued += 1);
        debug!(
            seq = header.sequence,
            priority = header.priority,
            class = ?header.class,
            forced = force,
            "task enqueued"
        );
        self.emit(SchedulerEvent::TaskEnqueued(header));
        self.wakeup.notify();
        Ok(header)
    }
}
