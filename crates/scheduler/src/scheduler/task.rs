use std::fmt;

use serde::Serialize;

use super::types::{SchedulerState, TaskHeader};

/// A ready-to-run unit handed to an [`Executor`](super::executor::Executor).
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors surfaced synchronously by lifecycle and admission calls.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid state transition: cannot {operation} while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: SchedulerState,
    },
    #[error("scheduler is stopping, submission rejected")]
    RejectedWhileStopping,
    #[error("invalid priority: {0}")]
    InvalidPriority(f64),
    #[error("failed to build executor: {0}")]
    ExecutorBuild(String),
    #[error("failed to spawn dispatch thread: {0}")]
    DispatchThread(#[from] std::io::Error),
}

/// Per-task faults. These never cross the dispatch loop; they are logged and
/// reported on the `TaskCompleted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "fault", content = "detail", rename_all = "snake_case")]
pub enum TaskFault {
    #[error("task has no callback")]
    EmptyCallback,
    #[error("task callback panicked: {0}")]
    Panicked(String),
    #[error("task was dropped by the executor without running")]
    Dropped,
}

/// A unit of work as submitted by a caller.
///
/// The context travels inside the callback closure, so the scheduler never
/// needs to know its type.
pub struct Task {
    priority: f64,
    callback: Option<Job>,
}

impl Task {
    /// A task that calls `callback(context)` when dispatched.
    pub fn new<C, F>(priority: f64, context: C, callback: F) -> Self
    where
        C: Send + 'static,
        F: FnOnce(C) + Send + 'static,
    {
        Self {
            priority,
            callback: Some(Box::new(move || callback(context))),
        }
    }

    /// A task from an already boxed job.
    pub fn from_job(priority: f64, job: Job) -> Self {
        Self {
            priority,
            callback: Some(job),
        }
    }

    /// A task without a callback. Dispatching it is logged as
    /// [`TaskFault::EmptyCallback`] and only settles the counters.
    pub fn empty(priority: f64) -> Self {
        Self {
            priority,
            callback: None,
        }
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn into_work_item(self, header: TaskHeader) -> WorkItem {
        WorkItem {
            header,
            job: self.callback,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("priority", &self.priority)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// A classified, sequenced task owned by the ordering structure until dispatch.
pub struct WorkItem {
    header: TaskHeader,
    job: Option<Job>,
}

impl WorkItem {
    pub fn header(&self) -> TaskHeader {
        self.header
    }

    pub fn priority(&self) -> f64 {
        self.header.priority
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    /// Split into header and job, handing the job over to execution.
    pub(crate) fn into_parts(self) -> (TaskHeader, Option<Job>) {
        (self.header, self.job)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("header", &self.header)
            .field("has_job", &self.job.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn work_item(sequence: u64, priority: f64, threshold: f64) -> WorkItem {
    use super::types::TaskClass;

    Task::empty(priority).into_work_item(TaskHeader {
        sequence,
        priority,
        class: TaskClass::classify(priority, threshold),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::scheduler::types::TaskClass;

    #[test]
    fn task_passes_context_to_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let task = Task::new(1.0, (Arc::clone(&seen), 7usize), |(seen, n)| {
            seen.store(n, Ordering::SeqCst);
        });
        assert!(task.has_callback());

        let header = TaskHeader { sequence: 0, priority: 1.0, class: TaskClass::NonCritical };
        let (_, job) = task.into_work_item(header).into_parts();
        (job.unwrap())();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn empty_task_has_no_job() {
        let item = work_item(3, 2.0, 1.0);
        assert_eq!(item.sequence(), 3);
        assert_eq!(item.header().class, TaskClass::Critical);
        let (_, job) = item.into_parts();
        assert!(job.is_none());
    }

    #[test]
    fn error_messages_name_the_state() {
        let err = SchedulerError::InvalidStateTransition {
            operation: "start",
            state: SchedulerState::Running,
        };
        assert_eq!(err.to_string(), "invalid state transition: cannot start while running");
    }
}
