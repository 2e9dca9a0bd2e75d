//! Logical thread bookkeeping.
//!
//! Every logical thread is backed by a real OS thread, but only one of them
//! executes between yield points: each thread parks on its own [`Gate`] and
//! runs only while it holds the scheduling token. The engine's view of a
//! thread is its [`ThreadRecord`]: the pending operation it yielded with,
//! the yield point it is parked at, and the monitors it holds.

use crate::error::DoomReason;
use crate::op::Operation;
use crate::types::{Location, MonitorId};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::Arc;

/// Observable lifecycle state of a logical thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    /// Record exists but the backing OS thread has not yielded yet.
    Initializing,
    /// Parked at a yield point whose operation is (or may be) ready.
    Runnable,
    /// Holds the scheduling token and is executing.
    Running,
    /// Parked on a monitor acquisition that is not currently ready.
    Blocked,
    /// Parked in a wait with no deadline.
    Waiting,
    /// Parked in a wait or sleep with a tick deadline.
    TimedWaiting,
    /// The backing OS thread has exited.
    Terminated,
}

/// Panic payload used to unwind a forcibly terminated thread.
///
/// The guest wrapper absorbs this payload silently; any other panic is
/// recorded as a failure of the program under test.
pub(crate) struct ThreadKill;

/// One thread's side of the scheduling-token handoff.
///
/// The engine grants the token with [`Gate::grant`]; the thread parks in
/// [`Gate::await_grant`] until then. A grant is consumed by exactly one
/// wakeup, so a grant issued before the thread parks is not lost.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hands the scheduling token to the parked thread.
    pub(crate) fn grant(&self) {
        let mut granted = self.granted.lock();
        debug_assert!(!*granted, "token granted twice without a yield");
        *granted = true;
        drop(granted);
        self.cv.notify_one();
    }

    /// Parks until the engine grants the token, then consumes the grant.
    pub(crate) fn await_grant(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cv.wait(&mut granted);
        }
        *granted = false;
    }
}

/// Engine-side record of one logical thread.
#[derive(Debug)]
pub(crate) struct ThreadRecord {
    pub(crate) run_state: RunState,
    /// Yield point the thread is currently parked at.
    pub(crate) location: Option<Location>,
    /// Operation the thread yielded with, consumed when it is resumed.
    pub(crate) pending: Option<Operation>,
    pub(crate) gate: Arc<Gate>,
    /// Monitors held, in acquisition order. Re-entrant acquisitions do not
    /// add entries; depth lives on the monitor itself.
    pub(crate) held: SmallVec<[MonitorId; 4]>,
    /// Set once when the thread is condemned; never cleared.
    pub(crate) doomed: Option<DoomReason>,
    /// A pending interrupt, consumed by the next interruptible operation.
    pub(crate) interrupt_pending: bool,
    /// The waits-for edge currently registered for this thread, if it is
    /// blocked on a monitor while holding another.
    pub(crate) blocked_edge: Option<(MonitorId, MonitorId)>,
}

impl ThreadRecord {
    pub(crate) fn new() -> Self {
        Self {
            run_state: RunState::Initializing,
            location: None,
            pending: None,
            gate: Arc::new(Gate::new()),
            held: SmallVec::new(),
            doomed: None,
            interrupt_pending: false,
            blocked_edge: None,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.run_state != RunState::Terminated
    }
}
