//! Execution substrates: where dispatched jobs actually run.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use super::task::{Job, SchedulerError};
use super::types::SchedulerConfig;

/// Runs dispatched jobs concurrently.
///
/// The scheduler never hands over more jobs than `concurrency_limit()` at a
/// time, so implementations do not need their own admission control.
pub trait Executor: Send + Sync {
    /// Run `job` asynchronously. Must not block on the job's completion.
    fn execute(&self, job: Job);

    /// Current maximum number of concurrently running jobs.
    fn concurrency_limit(&self) -> usize;
}

/// Bounded pool backed by `rayon`.
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
    limit: usize,
}

impl RayonExecutor {
    /// Build a pool sized from `worker_threads`, capped at `max_concurrency`.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let threads = config.resolved_worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("priosched-worker-{i}"))
            .build()
            .map_err(|e| SchedulerError::ExecutorBuild(e.to_string()))?;
        Ok(Self {
            pool,
            limit: config.resolved_max_concurrency(),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for RayonExecutor {
    fn execute(&self, job: Job) {
        self.pool.spawn(job);
    }

    fn concurrency_limit(&self) -> usize {
        self.limit
    }
}

/// One OS thread per job. Unbounded unless a limit is given.
pub struct ThreadExecutor {
    limit: usize,
    spawned: AtomicU64,
}

impl ThreadExecutor {
    pub fn unbounded() -> Self {
        Self::with_limit(usize::MAX)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            spawned: AtomicU64::new(0),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        let spawned = std::thread::Builder::new()
            .name(format!("priosched-task-{id}"))
            .spawn(job);
        // The job is dropped on failure, which completes its signal as dropped.
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn task thread");
        }
    }

    fn concurrency_limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn rayon_executor_runs_jobs() {
        let config = SchedulerConfig {
            worker_threads: 2,
            ..SchedulerConfig::default()
        };
        let executor = RayonExecutor::new(&config).unwrap();
        assert_eq!(executor.threads(), 2);
        assert_eq!(executor.concurrency_limit(), 2);

        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            executor.execute(Box::new(move || tx.send(i).unwrap()));
        }
        drop(tx);

        let mut got: Vec<i32> = rx.iter().collect();
        got.sort();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rayon_limit_can_be_lower_than_pool() {
        let config = SchedulerConfig {
            worker_threads: 4,
            max_concurrency: 1,
            ..SchedulerConfig::default()
        };
        let executor = RayonExecutor::new(&config).unwrap();
        assert_eq!(executor.concurrency_limit(), 1);
    }

    #[test]
    fn thread_executor_runs_jobs_on_named_threads() {
        let executor = ThreadExecutor::with_limit(3);
        assert_eq!(executor.concurrency_limit(), 3);

        let (tx, rx) = mpsc::channel();
        executor.execute(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("priosched-task-"));
    }

    #[test]
    fn unbounded_thread_executor() {
        assert_eq!(ThreadExecutor::unbounded().concurrency_limit(), usize::MAX);
        assert_eq!(ThreadExecutor::with_limit(0).concurrency_limit(), 1);
    }
}
