//! Priority-ordered task scheduler with critical-work draining.
//!
//! Callers submit tasks with an `f64` priority. A single dispatch thread moves
//! them from the [`TaskQueue`] onto an [`Executor`], highest priority first and
//! FIFO among equal priorities, never exceeding the executor's concurrency
//! limit. Tasks at or above `min_critical_priority` are critical: a graceful
//! [`Scheduler::stop`] finishes every critical task before reaching `Stopped`,
//! and [`Scheduler::wait_for_synchronization`] lets other threads block until
//! no critical work is outstanding.

pub mod config;
pub mod events;
pub mod executor;
pub mod metrics;
pub mod queue;
pub mod runner;
pub(crate) mod signal;
pub mod task;
pub mod types;

pub use events::{EventBus, SchedulerEvent};
pub use executor::{Executor, RayonExecutor, ThreadExecutor};
pub use metrics::{CounterSnapshot, SchedulerMetrics};
pub use queue::{PriorityQueue, TaskQueue};
pub use runner::Scheduler;
pub use task::{Job, SchedulerError, Task, TaskFault, WorkItem};
pub use types::{SchedulerConfig, SchedulerState, TaskClass, TaskHeader};
