//! Cross-thread signalling primitives used by the dispatch loop.
//!
//! - [`Wakeup`]: generation-counted notification the dispatch loop sleeps on.
//! - [`Gate`]: the synchronization barrier's manual-reset event. It also
//!   serializes admission so a barrier clear cannot race a new submission.
//! - [`CompletionSignal`]: travels with a dispatched job and reports back
//!   exactly once, even if the job is dropped without running.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::warn;

use super::runner::Shared;
use super::task::TaskFault;
use super::types::TaskHeader;

/// Generation counter plus condvar. Taking a token before checking for work
/// and waiting "since" that token means a notification between the check and
/// the wait is never lost.
#[derive(Debug, Default)]
pub(crate) struct Wakeup {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Wakeup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn token(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until a notification newer than `token` arrives or `timeout` elapses.
    /// Returns `true` if woken by a notification.
    pub(crate) fn wait_since(&self, token: u64, timeout: Duration) -> bool {
        let generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let (_generation, result) = self
            .cond
            .wait_timeout_while(generation, timeout, |g| *g == token)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

/// State behind the gate's mutex.
#[derive(Debug)]
pub(crate) struct GateState {
    /// `false` while critical work is in flight.
    pub(crate) open: bool,
    /// Threads blocked in `wait_for_synchronization`.
    pub(crate) waiters: usize,
    /// At least one waiter asked for queued work to be discarded on release.
    pub(crate) clear_requested: bool,
    /// Incremented on every release; waiters block until it moves.
    pub(crate) releases: u64,
}

#[derive(Debug)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                open: true,
                waiters: 0,
                clear_requested: false,
                releases: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Open the gate and wake every waiter. The caller holds the lock, so any
    /// clearing it did before this call is visible to the released waiters.
    /// Released waiters are no longer counted.
    pub(crate) fn release(&self, state: &mut GateState) {
        state.open = true;
        state.waiters = 0;
        state.clear_requested = false;
        state.releases = state.releases.wrapping_add(1);
        self.released.notify_all();
    }

    /// Wait for a release newer than `token`. Returns the guard and whether a
    /// release happened (`false` only on timeout).
    pub(crate) fn wait_released<'a>(
        &self,
        guard: MutexGuard<'a, GateState>,
        token: u64,
        timeout: Option<Duration>,
    ) -> (MutexGuard<'a, GateState>, bool) {
        match timeout {
            None => {
                let guard = self
                    .released
                    .wait_while(guard, |s| s.releases == token)
                    .unwrap_or_else(PoisonError::into_inner);
                (guard, true)
            }
            Some(timeout) => {
                let (guard, result) = self
                    .released
                    .wait_timeout_while(guard, timeout, |s| s.releases == token)
                    .unwrap_or_else(PoisonError::into_inner);
                (guard, !result.timed_out())
            }
        }
    }
}

/// Reports a dispatched task's completion back to the scheduler.
pub(crate) struct CompletionSignal {
    shared: Option<Arc<Shared>>,
    header: TaskHeader,
    epoch: u64,
}

impl CompletionSignal {
    pub(crate) fn new(shared: Arc<Shared>, header: TaskHeader, epoch: u64) -> Self {
        Self {
            shared: Some(shared),
            header,
            epoch,
        }
    }

    pub(crate) fn complete(mut self, fault: Option<TaskFault>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(self.header, self.epoch, fault);
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            warn!(seq = self.header.sequence, "completion signal dropped before the task ran");
            shared.complete(self.header, self.epoch, Some(TaskFault::Dropped));
        }
    }
}
