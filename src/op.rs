//! Yield-point operations.
//!
//! A logical thread never blocks on its own: every potentially blocking or
//! observable action is expressed as an [`Operation`] value and handed to
//! the engine at a yield point. The engine polls the operation for
//! readiness as often as it likes; the side effect runs exactly once, on
//! the yielding thread, after the scheduler resumes it. Forced termination
//! reuses the same channel: the engine swaps the parked operation for
//! [`Operation::Die`], and the thread executes its own teardown when
//! resumed.

use crate::engine::SharedState;
use crate::error::{DoomReason, TrialFailure};
use crate::race::AccessKey;
use crate::state::ChoiceKey;
use crate::thread::RunState;
use crate::types::{MonitorId, ThreadId};
use crate::util::det_hash64;
use serde::{Deserialize, Serialize};

/// Why a wait or sleep returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeReason {
    /// A notification token was consumed.
    Notified,
    /// The tick deadline passed.
    Timeout,
    /// Another thread interrupted this one.
    Interrupted,
    /// A simulated spurious wakeup fired.
    Spurious,
}

/// Whether a parked operation could run right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    Blocked,
}

/// Result of executing an operation, consumed by the instrumentation layer.
#[derive(Debug)]
pub(crate) enum OpOutcome {
    Unit,
    /// A wait registration: captured lock depth and registration epoch.
    Registered { count: u32, epoch: u64 },
    Wake(WakeReason),
    /// An access region ended; `fatal` means the thread must terminate.
    RaceObserved { fatal: bool },
}

/// One parked action of a logical thread.
#[derive(Debug, Clone)]
pub(crate) enum Operation {
    /// Mandatory first yield of every thread; admits it into scheduling.
    ThreadBegin,
    YieldNow,
    MonitorEnter {
        monitor: MonitorId,
    },
    MonitorExit {
        monitor: MonitorId,
    },
    /// Wait stage 0: release the monitor and register as a waiter.
    WaitRelease {
        monitor: MonitorId,
    },
    /// Wait stage 1: park until a token, deadline, or interrupt.
    WaitBlock {
        monitor: MonitorId,
        epoch: u64,
        timeout_ticks: Option<u64>,
        deadline: Option<u64>,
        resume_count: u32,
    },
    /// Wait stage 2: reacquire the monitor at the captured depth.
    WaitReacquire {
        monitor: MonitorId,
        count: u32,
    },
    Notify {
        monitor: MonitorId,
        all: bool,
    },
    Sleep {
        ticks: u64,
        deadline: Option<u64>,
    },
    Join {
        target: ThreadId,
    },
    Interrupt {
        target: ThreadId,
    },
    BeginRead {
        key: AccessKey,
    },
    EndRead {
        key: AccessKey,
    },
    BeginWrite {
        key: AccessKey,
    },
    EndWrite {
        key: AccessKey,
    },
    Hotspot {
        name: String,
    },
    /// Forced termination, with an optional cleanup step restoring monitor
    /// bookkeeping before the thread unwinds.
    Die {
        cleanup: Option<Box<Operation>>,
        reason: DoomReason,
    },
}

impl Operation {
    /// Operation kind label, shared with [`crate::types::Location`].
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::ThreadBegin => "thread-begin",
            Self::YieldNow => "yield",
            Self::MonitorEnter { .. } => "monitor-enter",
            Self::MonitorExit { .. } => "monitor-exit",
            Self::WaitRelease { .. } | Self::WaitBlock { .. } | Self::WaitReacquire { .. } => {
                "wait"
            }
            Self::Notify { .. } => "notify",
            Self::Sleep { .. } => "sleep",
            Self::Join { .. } => "join",
            Self::Interrupt { .. } => "interrupt",
            Self::BeginRead { .. } | Self::EndRead { .. } => "read",
            Self::BeginWrite { .. } | Self::EndWrite { .. } => "write",
            Self::Hotspot { .. } => "hotspot",
            Self::Die { .. } => "die",
        }
    }

    /// Identity of this operation as a scheduling choice: kind, stage, and
    /// argument tuple. Deadlines and epochs are excluded; they vary between
    /// otherwise identical choices.
    pub(crate) fn choice_key(&self) -> ChoiceKey {
        let (stage, a, b) = match self {
            Self::ThreadBegin | Self::YieldNow => (0, 0, 0),
            Self::MonitorEnter { monitor } | Self::MonitorExit { monitor } => {
                (0, monitor.raw(), 0)
            }
            Self::WaitRelease { monitor } => (0, monitor.raw(), 0),
            Self::WaitBlock { monitor, .. } => (1, monitor.raw(), 0),
            Self::WaitReacquire { monitor, .. } => (2, monitor.raw(), 0),
            Self::Notify { monitor, all } => (0, monitor.raw(), u64::from(*all)),
            Self::Sleep { ticks, .. } => (0, *ticks, 0),
            Self::Join { target } | Self::Interrupt { target } => {
                (0, u64::from(target.index()), 0)
            }
            Self::BeginRead { key } | Self::BeginWrite { key } => {
                (0, key.object.raw(), det_hash64(key.field))
            }
            Self::EndRead { key } | Self::EndWrite { key } => {
                (1, key.object.raw(), det_hash64(key.field))
            }
            Self::Hotspot { name } => (0, det_hash64(name.as_str()), 0),
            Self::Die { .. } => (0, 0, 0),
        };
        ChoiceKey {
            kind: self.kind(),
            stage,
            a,
            b,
        }
    }

    /// The observable state of a thread parked on this operation.
    pub(crate) fn blocking_state(&self) -> RunState {
        match self {
            Self::MonitorEnter { .. } | Self::WaitReacquire { .. } => RunState::Blocked,
            Self::WaitBlock { deadline, .. } => {
                if deadline.is_some() {
                    RunState::TimedWaiting
                } else {
                    RunState::Waiting
                }
            }
            Self::Sleep { .. } => RunState::TimedWaiting,
            Self::Join { .. } => RunState::Waiting,
            _ => RunState::Runnable,
        }
    }

    /// Tick deadline after which a blocked poll becomes ready.
    pub(crate) fn deadline(&self) -> Option<u64> {
        match self {
            Self::WaitBlock { deadline, .. } | Self::Sleep { deadline, .. } => *deadline,
            _ => None,
        }
    }

    /// One-time registration at yield time: pins referenced monitors and
    /// arms tick deadlines.
    pub(crate) fn register(&mut self, s: &mut SharedState) {
        match self {
            Self::MonitorEnter { monitor }
            | Self::MonitorExit { monitor }
            | Self::WaitRelease { monitor }
            | Self::Notify { monitor, .. } => s.sync.monitors.pin(*monitor),
            Self::WaitBlock {
                timeout_ticks,
                deadline,
                ..
            } => *deadline = timeout_ticks.map(|t| s.tick + t),
            Self::Sleep { ticks, deadline } => *deadline = Some(s.tick + *ticks),
            _ => {}
        }
    }

    /// Readiness of this operation, without side effects.
    ///
    /// `allow_spurious` lets the caller exclude simulated spurious wakeups:
    /// a spurious wakeup must never rescue an otherwise fully blocked
    /// program from being reported as a wait deadlock.
    pub(crate) fn poll(&self, s: &SharedState, me: ThreadId, allow_spurious: bool) -> Readiness {
        let ready = match self {
            Self::MonitorEnter { monitor } => s.sync.monitors.can_enter(*monitor, me),
            Self::WaitBlock {
                monitor,
                epoch,
                deadline,
                ..
            } => {
                s.sync.monitors.consumable(*monitor, *epoch)
                    || s.threads.get(&me).is_some_and(|r| r.interrupt_pending)
                    || deadline.is_some_and(|d| s.tick >= d)
                    || (allow_spurious && spurious_fires(s, me))
            }
            Self::WaitReacquire { monitor, .. } => reacquire_ready(s, *monitor, me),
            Self::Sleep { deadline, .. } => {
                deadline.is_some_and(|d| s.tick >= d)
                    || s.threads.get(&me).is_some_and(|r| r.interrupt_pending)
            }
            Self::Join { target } => s.threads.get(target).is_none_or(|r| !r.is_live()),
            Self::Die { cleanup, .. } => match cleanup.as_deref() {
                Some(Self::WaitReacquire { monitor, .. }) => reacquire_ready(s, *monitor, me),
                _ => true,
            },
            _ => true,
        };
        if ready { Readiness::Ready } else { Readiness::Blocked }
    }

    /// Runs the operation's side effect on the resumed thread.
    pub(crate) fn execute(self, s: &mut SharedState, me: ThreadId) -> OpOutcome {
        match self {
            Self::ThreadBegin | Self::YieldNow | Self::Join { .. } => OpOutcome::Unit,
            Self::MonitorEnter { monitor } => {
                let edge = s.threads.get_mut(&me).and_then(|r| r.blocked_edge.take());
                if let Some((from, to)) = edge {
                    s.sync.graph.remove_edge(from, to);
                }
                if s.sync.monitors.enter(monitor, me) {
                    if let Some(rec) = s.threads.get_mut(&me) {
                        rec.held.push(monitor);
                    }
                }
                s.sync.monitors.unpin(monitor);
                OpOutcome::Unit
            }
            Self::MonitorExit { monitor } => {
                if s.sync.monitors.exit(monitor, me) {
                    drop_held(s, me, monitor);
                }
                s.sync.monitors.unpin(monitor);
                OpOutcome::Unit
            }
            Self::WaitRelease { monitor } => {
                let (count, epoch) = s.sync.monitors.wait_release(monitor, me);
                drop_held(s, me, monitor);
                OpOutcome::Registered { count, epoch }
            }
            Self::WaitBlock {
                monitor,
                epoch,
                deadline,
                ..
            } => {
                let interrupted = s.threads.get(&me).is_some_and(|r| r.interrupt_pending);
                let reason = if s.sync.monitors.consumable(monitor, epoch) {
                    s.sync.monitors.consume(monitor, me, epoch);
                    WakeReason::Notified
                } else if interrupted {
                    clear_interrupt(s, me);
                    s.sync.monitors.deregister(monitor, me);
                    WakeReason::Interrupted
                } else if deadline.is_some_and(|d| s.tick >= d) {
                    s.sync.monitors.deregister(monitor, me);
                    WakeReason::Timeout
                } else {
                    s.sync.monitors.deregister(monitor, me);
                    WakeReason::Spurious
                };
                OpOutcome::Wake(reason)
            }
            Self::WaitReacquire { monitor, count } => {
                take_monitor(s, me, monitor, count);
                OpOutcome::Unit
            }
            Self::Notify { monitor, all } => {
                s.sync.monitors.notify(monitor, all);
                s.sync.monitors.unpin(monitor);
                OpOutcome::Unit
            }
            Self::Sleep { .. } => {
                if s.threads.get(&me).is_some_and(|r| r.interrupt_pending) {
                    clear_interrupt(s, me);
                    OpOutcome::Wake(WakeReason::Interrupted)
                } else {
                    OpOutcome::Wake(WakeReason::Timeout)
                }
            }
            Self::Interrupt { target } => {
                if let Some(rec) = s.threads.get_mut(&target) {
                    rec.interrupt_pending = true;
                }
                OpOutcome::Unit
            }
            Self::BeginRead { key } => {
                s.sync.races.begin_read(key);
                OpOutcome::Unit
            }
            Self::BeginWrite { key } => {
                s.sync.races.begin_write(key);
                OpOutcome::Unit
            }
            Self::EndRead { key } => {
                let hit = s.sync.races.end_read(key);
                finish_access(s, me, hit)
            }
            Self::EndWrite { key } => {
                let hit = s.sync.races.end_write(key);
                finish_access(s, me, hit)
            }
            Self::Hotspot { name } => {
                s.hotspots.record(&name);
                OpOutcome::Unit
            }
            Self::Die { cleanup, .. } => {
                if let Some(op) = cleanup {
                    if let Self::WaitReacquire { monitor, count } = *op {
                        take_monitor(s, me, monitor, count);
                    }
                }
                OpOutcome::Unit
            }
        }
    }

    /// Cleanup when the engine condemns a thread parked on this operation.
    /// Returns the operation [`Operation::Die`] must run before the thread
    /// unwinds.
    pub(crate) fn on_doom(self, s: &mut SharedState, me: ThreadId) -> Option<Operation> {
        match self {
            Self::WaitBlock {
                monitor,
                resume_count,
                ..
            } => {
                s.sync.monitors.deregister(monitor, me);
                // The pin from the wait registration is released when the
                // reacquire cleanup executes.
                Some(Self::WaitReacquire {
                    monitor,
                    count: resume_count,
                })
            }
            Self::WaitReacquire { .. } => Some(self),
            Self::MonitorEnter { monitor }
            | Self::MonitorExit { monitor }
            | Self::WaitRelease { monitor }
            | Self::Notify { monitor, .. } => {
                s.sync.monitors.unpin(monitor);
                None
            }
            _ => None,
        }
    }
}

/// Simulated spurious wakeup draw for the current scheduling round.
///
/// A pure function of the trial seed, the thread, and the tick, so replaying
/// a seed replays the wakeups.
fn spurious_fires(s: &SharedState, me: ThreadId) -> bool {
    s.spurious
        .is_some_and(|denom| det_hash64(&(s.trial_seed, me.index(), s.tick)) % u64::from(denom) == 0)
}

fn reacquire_ready(s: &SharedState, monitor: MonitorId, me: ThreadId) -> bool {
    match s.sync.monitors.owner(monitor) {
        None => true,
        Some(owner) if owner == me => true,
        // During teardown a doomed or already retired owner can be stolen
        // from; it will never release the monitor itself.
        Some(owner) => {
            s.teardown && s.threads.get(&owner).is_none_or(|r| r.doomed.is_some() || !r.is_live())
        }
    }
}

/// Wait-reacquire or teardown steal: takes the monitor at the captured
/// depth and restores held-chain bookkeeping.
fn take_monitor(s: &mut SharedState, me: ThreadId, monitor: MonitorId, count: u32) {
    if s.sync.monitors.owner(monitor).is_none() {
        s.sync.monitors.reacquire(monitor, me, count);
    } else {
        s.sync.monitors.force_acquire(monitor, me, count);
    }
    if let Some(rec) = s.threads.get_mut(&me) {
        rec.held.push(monitor);
    }
    s.sync.monitors.unpin(monitor);
}

fn drop_held(s: &mut SharedState, me: ThreadId, monitor: MonitorId) {
    if let Some(rec) = s.threads.get_mut(&me) {
        if let Some(pos) = rec.held.iter().rposition(|&m| m == monitor) {
            rec.held.remove(pos);
        }
    }
}

fn clear_interrupt(s: &mut SharedState, me: ThreadId) {
    if let Some(rec) = s.threads.get_mut(&me) {
        rec.interrupt_pending = false;
    }
}

fn finish_access(s: &mut SharedState, me: ThreadId, hit: Option<crate::race::RaceHit>) -> OpOutcome {
    let Some(hit) = hit else {
        return OpOutcome::Unit;
    };
    if s.throw_on_race {
        s.failures.push(TrialFailure::Race { hit, thread: me });
        return OpOutcome::RaceObserved { fatal: true };
    }
    tracing::warn!(thread = %me, %hit, "data race observed");
    OpOutcome::RaceObserved { fatal: false }
}
