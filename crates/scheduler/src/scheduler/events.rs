use serde::Serialize;
use tokio::sync::broadcast;

use super::task::TaskFault;
use super::types::TaskHeader;

/// Notifications emitted by the scheduler. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// The dispatch loop entered `Running`.
    Started,
    /// The dispatch loop finished draining and entered `Stopped`.
    Stopped,
    TaskEnqueued(TaskHeader),
    TaskStarted(TaskHeader),
    /// A dispatched task finished. `fault` is set when its callback did not run to completion.
    TaskCompleted {
        task: TaskHeader,
        fault: Option<TaskFault>,
    },
    /// No critical task is waiting or running after a completion.
    CriticalTasksCompleted,
    /// No task of either class is waiting or running after a completion.
    AllTasksCompleted,
    /// A dispatch took the last queued item.
    QueueEmpty,
}

/// Broadcast fan-out of [`SchedulerEvent`]s to any number of subscribers.
///
/// Emitting with no subscribers is a no-op. A subscriber that falls more than
/// `capacity` events behind observes `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
