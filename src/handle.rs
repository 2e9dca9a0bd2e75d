//! Instrumentation handle for the program under test.
//!
//! A [`Handle`] is a logical thread's capability to interact with the
//! engine. Every method is a yield point: the calling thread parks, the
//! engine decides who runs next, and the operation's side effect executes
//! once the scheduler resumes the caller. All entry points are
//! `#[track_caller]`, so the yield point's identity is the application call
//! site, which is what exploration histories and traces are keyed on.
//!
//! ```no_run
//! use interweave::{Config, MonitorId, explore};
//!
//! let m = MonitorId::named("counter");
//! let result = explore(Config::new().with_seed(1), move |h| {
//!     let worker = h.spawn(move |h| {
//!         h.lock(m);
//!         h.unlock(m);
//!     });
//!     h.lock(m);
//!     h.unlock(m);
//!     h.join(worker);
//! })
//! .expect("session");
//! assert!(result.is_pass());
//! ```

use crate::engine::Shared;
use crate::error::{DoomReason, TrialFailure};
use crate::op::{OpOutcome, Operation, WakeReason};
use crate::race::AccessKey;
use crate::thread::{RunState, ThreadKill};
use crate::types::{Location, MonitorId, ThreadId};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

/// Synthetic yield point of a thread's mandatory first yield.
pub(crate) const START_LOCATION: Location = Location::new("<spawn>", 0, "thread-begin", 0);

/// A logical thread's capability to reach the engine.
pub struct Handle {
    id: ThreadId,
    shared: Arc<Shared>,
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id)
    }
}

impl Handle {
    pub(crate) fn new(id: ThreadId, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    /// The logical thread this handle belongs to.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    /// Spawns a new logical thread. The thread is admitted at the next
    /// scheduling round; spawning itself does not yield.
    pub fn spawn<F>(&self, body: F) -> ThreadId
    where
        F: FnOnce(Handle) + Send + 'static,
    {
        let mut s = self.shared.state.lock();
        s.enqueue_spawn(Box::new(body))
    }

    /// Acquires the monitor, blocking while another thread owns it.
    /// Re-entrant: the owner may lock again and must unlock as many times.
    #[track_caller]
    pub fn lock(&self, monitor: MonitorId) {
        let location = Location::caller("monitor-enter", 0);
        self.yield_at(Operation::MonitorEnter { monitor }, location);
    }

    /// Releases one level of the monitor.
    #[track_caller]
    pub fn unlock(&self, monitor: MonitorId) {
        let location = Location::caller("monitor-exit", 0);
        self.yield_at(Operation::MonitorExit { monitor }, location);
    }

    /// Waits on the monitor until notified, interrupted, or (spurious
    /// wakeups enabled) spuriously woken. The caller must own the monitor;
    /// its full lock depth is released during the wait and restored before
    /// this returns.
    #[track_caller]
    pub fn wait(&self, monitor: MonitorId) -> WakeReason {
        self.wait_inner(monitor, None, Location::caller("wait", 0))
    }

    /// Like [`wait`](Handle::wait), but also returns after `ticks` logical
    /// ticks with [`WakeReason::Timeout`].
    #[track_caller]
    pub fn wait_timeout(&self, monitor: MonitorId, ticks: u64) -> WakeReason {
        self.wait_inner(monitor, Some(ticks), Location::caller("wait", 0))
    }

    /// Wakes one waiter of the monitor. A notification with no waiters is
    /// lost, exactly as with a real condition variable.
    #[track_caller]
    pub fn notify_one(&self, monitor: MonitorId) {
        let location = Location::caller("notify", 0);
        self.yield_at(Operation::Notify { monitor, all: false }, location);
    }

    /// Wakes every current waiter of the monitor.
    #[track_caller]
    pub fn notify_all(&self, monitor: MonitorId) {
        let location = Location::caller("notify", 0);
        self.yield_at(Operation::Notify { monitor, all: true }, location);
    }

    /// Parks for `ticks` logical ticks. Interruptible.
    #[track_caller]
    pub fn sleep(&self, ticks: u64) -> WakeReason {
        let location = Location::caller("sleep", 0);
        let outcome = self.yield_at(
            Operation::Sleep {
                ticks,
                deadline: None,
            },
            location,
        );
        let OpOutcome::Wake(reason) = outcome else {
            panic!("sleep produced no wake reason");
        };
        reason
    }

    /// A plain yield point with no side effect: offers the scheduler a
    /// preemption opportunity.
    #[track_caller]
    pub fn yield_now(&self) {
        let location = Location::caller("yield", 0);
        self.yield_at(Operation::YieldNow, location);
    }

    /// Blocks until the target thread has terminated.
    #[track_caller]
    pub fn join(&self, target: ThreadId) {
        let location = Location::caller("join", 0);
        self.yield_at(Operation::Join { target }, location);
    }

    /// Interrupts the target thread: its current or next interruptible
    /// wait or sleep returns [`WakeReason::Interrupted`].
    #[track_caller]
    pub fn interrupt(&self, target: ThreadId) {
        let location = Location::caller("interrupt", 0);
        self.yield_at(Operation::Interrupt { target }, location);
    }

    /// Enters a read access region on the slot. Overlap with a writer is a
    /// data race.
    #[track_caller]
    pub fn begin_read(&self, key: AccessKey) {
        let location = Location::caller("read", 0);
        self.yield_at(Operation::BeginRead { key }, location);
    }

    /// Leaves a read access region; a race flagged on the slot is reported
    /// here.
    #[track_caller]
    pub fn end_read(&self, key: AccessKey) {
        let location = Location::caller("read", 1);
        self.yield_at(Operation::EndRead { key }, location);
    }

    /// Enters a write access region on the slot. Any overlap is a data
    /// race.
    #[track_caller]
    pub fn begin_write(&self, key: AccessKey) {
        let location = Location::caller("write", 0);
        self.yield_at(Operation::BeginWrite { key }, location);
    }

    /// Leaves a write access region; a race flagged on the slot is
    /// reported here.
    #[track_caller]
    pub fn end_write(&self, key: AccessKey) {
        let location = Location::caller("write", 1);
        self.yield_at(Operation::EndWrite { key }, location);
    }

    /// Marks the named hotspot as reached in this trial.
    #[track_caller]
    pub fn hotspot(&self, name: impl Into<String>) {
        let location = Location::caller("hotspot", 0);
        self.yield_at(Operation::Hotspot { name: name.into() }, location);
    }

    fn wait_inner(
        &self,
        monitor: MonitorId,
        timeout_ticks: Option<u64>,
        location: Location,
    ) -> WakeReason {
        let outcome = self.yield_at(Operation::WaitRelease { monitor }, location);
        let OpOutcome::Registered { count, epoch } = outcome else {
            panic!("wait registration produced no capture");
        };
        let outcome = self.yield_at(
            Operation::WaitBlock {
                monitor,
                epoch,
                timeout_ticks,
                deadline: None,
                resume_count: count,
            },
            location.with_stage(1),
        );
        let OpOutcome::Wake(reason) = outcome else {
            panic!("wait block produced no wake reason");
        };
        self.yield_at(
            Operation::WaitReacquire { monitor, count },
            location.with_stage(2),
        );
        reason
    }

    /// The yield protocol: park with the operation, wait for the token,
    /// execute. Never returns when the engine has condemned this thread.
    pub(crate) fn yield_at(&self, mut op: Operation, location: Location) -> OpOutcome {
        let gate = {
            let mut s = self.shared.state.lock();
            op.register(&mut s);
            let rec = s
                .threads
                .get_mut(&self.id)
                .expect("yield from a retired thread");
            rec.location = Some(location);
            rec.run_state = op.blocking_state();
            rec.pending = Some(op);
            Arc::clone(&rec.gate)
        };
        self.shared.engine_cv.notify_one();
        gate.await_grant();

        let mut s = self.shared.state.lock();
        let op = s
            .threads
            .get_mut(&self.id)
            .and_then(|r| r.pending.take())
            .expect("resumed without a parked operation");
        let dying = matches!(op, Operation::Die { .. });
        let outcome = op.execute(&mut s, self.id);
        if dying {
            drop(s);
            // resume_unwind skips the panic hook; a forced death is not an
            // error of the program under test.
            resume_unwind(Box::new(ThreadKill));
        }
        if let OpOutcome::RaceObserved { fatal: true } = outcome {
            if let Some(rec) = s.threads.get_mut(&self.id) {
                rec.doomed = Some(DoomReason::Race);
            }
            drop(s);
            resume_unwind(Box::new(ThreadKill));
        }
        outcome
    }
}

/// Body of every backing OS thread: mandatory admission yield, the guest
/// closure under a panic guard, then termination bookkeeping.
pub(crate) fn guest_main(handle: Handle, body: Box<dyn FnOnce(Handle) + Send>) {
    let guest = handle.clone();
    let result = catch_unwind(AssertUnwindSafe(move || {
        guest.yield_at(Operation::ThreadBegin, START_LOCATION);
        body(guest.clone());
    }));

    let shared = Arc::clone(&handle.shared);
    let mut s = shared.state.lock();
    if let Err(payload) = result {
        if payload.downcast_ref::<ThreadKill>().is_none() {
            let message = panic_message(payload.as_ref());
            tracing::debug!(thread = %handle.id, message, "guest thread panicked");
            s.failures.push(TrialFailure::ThreadPanic {
                thread: handle.id,
                message,
            });
        }
    }
    if let Some(rec) = s.threads.get_mut(&handle.id) {
        rec.run_state = RunState::Terminated;
        rec.pending = None;
    }
    drop(s);
    shared.engine_cv.notify_one();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|m| (*m).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
