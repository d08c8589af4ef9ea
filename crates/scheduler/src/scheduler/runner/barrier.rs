use std::time::Duration;

use tracing::{debug, info};

use crate::scheduler::signal::GateState;
use crate::scheduler::types::TaskClass;

use super::core::Shared;
use super::Scheduler;

impl Scheduler {
    /// Block until no critical task is waiting or running.
    ///
    /// Non-critical tasks may still be queued or running when this returns.
    /// With `clear_incomplete`, every queued task is discarded at the moment
    /// the gate opens, before any waiter is released. Critical tasks that are
    /// only queued while the scheduler is `Stopped` keep this blocked until the
    /// next run drains them.
    pub fn wait_for_synchronization(&self, clear_incomplete: bool) {
        self.shared.wait_for_synchronization(clear_incomplete, None);
    }

    /// [`wait_for_synchronization`](Self::wait_for_synchronization) with an
    /// upper bound. Returns `false` if `timeout` elapsed first; nothing is
    /// cleared in that case.
    pub fn wait_for_synchronization_timeout(
        &self,
        clear_incomplete: bool,
        timeout: Duration,
    ) -> bool {
        self.shared
            .wait_for_synchronization(clear_incomplete, Some(timeout))
    }

    /// Empty the ordering structure and zero all four counters.
    ///
    /// Tasks already running keep running; their completions are ignored by
    /// the reset counters, so the concurrency limit can be briefly exceeded
    /// if this is called mid-run.
    pub fn clear(&self) {
        let removed = {
            let mut gate = self.shared.gate.lock();
            let removed = self.shared.queue.clear().len();
            self.shared.critical.reset();
            self.shared.noncritical.reset();
            if gate.waiters > 0 || !gate.open {
                self.shared.gate.release(&mut gate);
            }
            removed
        };
        self.shared
            .with_metrics(|m| m.tasks_discarded += removed as u64);
        info!(removed, "Scheduler cleared");
        self.shared.wakeup.notify();
    }
}

impl Shared {
    pub(crate) fn wait_for_synchronization(
        &self,
        clear_incomplete: bool,
        timeout: Option<Duration>,
    ) -> bool {
        let mut gate = self.gate.lock();
        if self.critical.waiting() == 0 {
            if clear_incomplete {
                self.discard_queued(&gate);
            }
            return true;
        }

        gate.waiters += 1;
        gate.clear_requested |= clear_incomplete;
        let token = gate.releases;
        self.wakeup.notify();
        debug!(
            waiting_critical = self.critical.waiting(),
            clear_incomplete,
            "waiting for synchronization"
        );

        let (mut gate, released) = self.gate.wait_released(gate, token, timeout);
        if !released {
            gate.waiters = gate.waiters.saturating_sub(1);
            if gate.waiters == 0 {
                gate.clear_requested = false;
            }
        }
        released
    }

    /// Gate maintenance, called by the dispatch loop on every iteration.
    ///
    /// Opens the gate (discarding queued work first if a waiter asked for it)
    /// once no critical task is waiting or running, and there is either a
    /// closed gate or a blocked waiter to act on.
    pub(crate) fn sync_gate(&self) {
        let mut gate = self.gate.lock();
        if self.critical.waiting() > 0 {
            return;
        }
        if gate.open && gate.waiters == 0 {
            return;
        }
        if gate.clear_requested {
            self.discard_queued(&gate);
        }
        self.gate.release(&mut gate);
        debug!("synchronization gate opened");
    }

    /// Remove every queued task and settle the waiting counters. The caller
    /// holds the gate lock, which also blocks admission.
    fn discard_queued(&self, _gate: &GateState) -> usize {
        let critical_epoch = self.critical.epoch();
        let noncritical_epoch = self.noncritical.epoch();

        let items = self.queue.clear();
        let critical = items
            .iter()
            .filter(|item| item.header().class == TaskClass::Critical)
            .count();
        let noncritical = items.len() - critical;

        self.critical.discard(critical_epoch, critical);
        self.noncritical.discard(noncritical_epoch, noncritical);
        self.with_metrics(|m| m.tasks_discarded += items.len() as u64);

        if !items.is_empty() {
            info!(discarded = items.len(), "discarded queued tasks at synchronization");
        }
        items.len()
    }
}
