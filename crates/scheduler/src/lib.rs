pub mod scheduler;

pub use scheduler::{
    CounterSnapshot, Executor, Job, PriorityQueue, RayonExecutor, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerEvent, SchedulerMetrics, SchedulerState, Task, TaskClass, TaskFault,
    TaskHeader, TaskQueue, ThreadExecutor, WorkItem,
};
