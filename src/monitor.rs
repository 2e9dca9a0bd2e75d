//! Re-entrant monitor emulation.
//!
//! A monitor combines a re-entrant lock with a wait/notify queue, keyed by
//! [`MonitorId`]. Monitors are materialized on first use and disposed when
//! nothing references them: no lock depth, no waiters, no pending
//! notifications, and no in-flight operation pinning them.
//!
//! Notifications are epoch tokens. Each waiter registers with the monitor's
//! notify epoch at wait time; a notification bumps the epoch and publishes
//! one token per woken waiter, and a token only wakes waiters that
//! registered *before* it was published. A notification with no waiters
//! publishes nothing, which is exactly the lost-wakeup behavior the engine
//! must be able to exhibit.

use crate::types::{MonitorId, ThreadId};
use crate::util::DetHashMap;
use smallvec::SmallVec;

#[derive(Debug, Default)]
struct Monitor {
    owner: Option<ThreadId>,
    /// Re-entrant lock depth; zero iff `owner` is `None`.
    lock_count: u32,
    /// In-flight operations referencing this monitor.
    ref_count: u32,
    notify_epoch: u64,
    /// Waiting threads with the epoch they registered at.
    waiters: SmallVec<[(ThreadId, u64); 4]>,
    /// Published notification tokens (epoch values), not yet consumed.
    tokens: SmallVec<[u64; 4]>,
}

/// The monitor table of one trial.
#[derive(Debug, Default)]
pub(crate) struct MonitorPool {
    monitors: DetHashMap<MonitorId, Monitor>,
}

impl MonitorPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks an in-flight operation referencing `id`, materializing the
    /// monitor if needed. Every pin must be matched by one [`unpin`].
    ///
    /// [`unpin`]: MonitorPool::unpin
    pub(crate) fn pin(&mut self, id: MonitorId) {
        self.monitors.entry(id).or_default().ref_count += 1;
    }

    /// Releases one in-flight reference and disposes the monitor if it is
    /// now unreferenced and idle.
    pub(crate) fn unpin(&mut self, id: MonitorId) {
        if let Some(monitor) = self.monitors.get_mut(&id) {
            monitor.ref_count = monitor.ref_count.saturating_sub(1);
            self.maybe_dispose(id);
        }
    }

    /// True when `me` could acquire the monitor without blocking.
    pub(crate) fn can_enter(&self, id: MonitorId, me: ThreadId) -> bool {
        self.monitors
            .get(&id)
            .is_none_or(|m| m.owner.is_none() || m.owner == Some(me))
    }

    /// Acquires the monitor for `me`. Returns true when this is a fresh
    /// acquisition rather than a re-entrant one.
    ///
    /// # Panics
    ///
    /// Panics if another thread owns the monitor; the scheduler only resumes
    /// an acquisition it has observed to be ready.
    pub(crate) fn enter(&mut self, id: MonitorId, me: ThreadId) -> bool {
        let monitor = self.monitors.entry(id).or_default();
        match monitor.owner {
            None => {
                monitor.owner = Some(me);
                monitor.lock_count = 1;
                true
            }
            Some(owner) if owner == me => {
                monitor.lock_count += 1;
                false
            }
            Some(owner) => panic!("{me} resumed into {id} while {owner} owns it"),
        }
    }

    /// Releases one level of the monitor. Returns true when the lock is now
    /// fully released.
    ///
    /// # Panics
    ///
    /// Panics if `me` does not own the monitor: unlocking a monitor that was
    /// never locked is a bug in the program under test.
    pub(crate) fn exit(&mut self, id: MonitorId, me: ThreadId) -> bool {
        let monitor = self
            .monitors
            .get_mut(&id)
            .unwrap_or_else(|| panic!("{me} unlocked unknown monitor {id}"));
        assert!(
            monitor.owner == Some(me),
            "{me} unlocked {id} without owning it"
        );
        monitor.lock_count -= 1;
        let released = monitor.lock_count == 0;
        if released {
            monitor.owner = None;
            self.maybe_dispose(id);
        }
        released
    }

    /// Fully releases the monitor for a wait and registers `me` as a
    /// waiter. Returns the captured lock depth and the registration epoch.
    ///
    /// # Panics
    ///
    /// Panics if `me` does not own the monitor (waiting without the lock).
    pub(crate) fn wait_release(&mut self, id: MonitorId, me: ThreadId) -> (u32, u64) {
        let monitor = self
            .monitors
            .get_mut(&id)
            .unwrap_or_else(|| panic!("{me} waited on unknown monitor {id}"));
        assert!(
            monitor.owner == Some(me),
            "{me} waited on {id} without owning it"
        );
        let count = monitor.lock_count;
        monitor.owner = None;
        monitor.lock_count = 0;
        let epoch = monitor.notify_epoch;
        monitor.waiters.push((me, epoch));
        (count, epoch)
    }

    /// Publishes notification tokens. A notification with no registered
    /// waiters publishes nothing.
    pub(crate) fn notify(&mut self, id: MonitorId, all: bool) {
        let Some(monitor) = self.monitors.get_mut(&id) else {
            return;
        };
        if monitor.waiters.is_empty() {
            return;
        }
        monitor.notify_epoch += 1;
        let woken = if all { monitor.waiters.len() } else { 1 };
        for _ in 0..woken {
            monitor.tokens.push(monitor.notify_epoch);
        }
    }

    /// True when a token newer than `epoch` is available for a waiter.
    pub(crate) fn consumable(&self, id: MonitorId, epoch: u64) -> bool {
        self.monitors
            .get(&id)
            .is_some_and(|m| m.tokens.iter().any(|&t| t > epoch))
    }

    /// Consumes one token newer than `epoch` and deregisters `me`.
    pub(crate) fn consume(&mut self, id: MonitorId, me: ThreadId, epoch: u64) {
        if let Some(monitor) = self.monitors.get_mut(&id) {
            if let Some(pos) = monitor.tokens.iter().position(|&t| t > epoch) {
                monitor.tokens.remove(pos);
            }
        }
        self.deregister(id, me);
    }

    /// Removes `me` from the waiter queue (timeout, interrupt, spurious
    /// wakeup, or forced termination). Remaining tokens are pruned once the
    /// queue empties; they can never be consumed.
    pub(crate) fn deregister(&mut self, id: MonitorId, me: ThreadId) {
        if let Some(monitor) = self.monitors.get_mut(&id) {
            monitor.waiters.retain(|&mut (t, _)| t != me);
            if monitor.waiters.is_empty() {
                monitor.tokens.clear();
            }
        }
    }

    /// Reacquires the monitor after a wait, restoring the captured depth.
    pub(crate) fn reacquire(&mut self, id: MonitorId, me: ThreadId, count: u32) {
        let monitor = self.monitors.entry(id).or_default();
        debug_assert!(monitor.owner.is_none() || monitor.owner == Some(me));
        monitor.owner = Some(me);
        monitor.lock_count = count;
    }

    /// Takes the monitor for `me` regardless of ownership. Only used while
    /// tearing down a deadlocked trial, where the previous owner is doomed.
    pub(crate) fn force_acquire(&mut self, id: MonitorId, me: ThreadId, count: u32) {
        let monitor = self.monitors.entry(id).or_default();
        monitor.owner = Some(me);
        monitor.lock_count = count;
    }

    /// Drops ownership entirely when a holding thread is retired.
    pub(crate) fn force_release(&mut self, id: MonitorId) {
        if let Some(monitor) = self.monitors.get_mut(&id) {
            monitor.owner = None;
            monitor.lock_count = 0;
            self.maybe_dispose(id);
        }
    }

    /// Current owner, if any.
    pub(crate) fn owner(&self, id: MonitorId) -> Option<ThreadId> {
        self.monitors.get(&id).and_then(|m| m.owner)
    }

    fn maybe_dispose(&mut self, id: MonitorId) {
        let idle = self.monitors.get(&id).is_some_and(|m| {
            m.ref_count == 0 && m.lock_count == 0 && m.waiters.is_empty() && m.tokens.is_empty()
        });
        if idle {
            self.monitors.remove(&id);
        }
    }

    #[cfg(test)]
    fn exists(&self, id: MonitorId) -> bool {
        self.monitors.contains_key(&id)
    }
}
