//! The scheduling engine of one trial.
//!
//! The engine owns the scheduling token. Each round it waits for the
//! resumed thread to yield back, retires finished threads, admits pending
//! spawns, classifies every parked operation as ready or blocked, and asks
//! the policy to choose the next thread. Detections happen between rounds,
//! when no guest thread is running and the shared state is quiescent:
//! a cycle in the waits-for graph condemns the owners of the cycle's
//! monitors, and a round with nothing ready and no armed deadline condemns
//! everyone.
//!
//! Time is a logical tick counter. It advances by one per scheduling round
//! and jumps forward when every thread is parked on a deadline, so timed
//! waits cost no wall-clock time.

use crate::config::{Config, StateMode};
use crate::deadlock::WaitGraph;
use crate::error::{DoomReason, EngineError, TrialFailure};
use crate::handle::{Handle, START_LOCATION, guest_main};
use crate::hotspot::HotspotTracker;
use crate::monitor::MonitorPool;
use crate::op::{Operation, Readiness};
use crate::policy::SchedulePolicy;
use crate::race::RaceTable;
use crate::state::{ProgramState, ReadyThread};
use crate::thread::{RunState, ThreadRecord};
use crate::trace::{EventMarker, TraceRecorder, TraceStep};
use crate::types::{Location, MonitorId, ThreadId};
use crate::util::{DetHashMap, DetRng};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// A spawn requested by a guest thread, admitted at the next round.
pub(crate) struct PendingSpawn {
    pub(crate) id: ThreadId,
    pub(crate) body: Box<dyn FnOnce(Handle) + Send + 'static>,
}

/// Synchronization bookkeeping of one trial.
pub(crate) struct SyncState {
    pub(crate) monitors: MonitorPool,
    pub(crate) graph: WaitGraph,
    pub(crate) races: RaceTable,
}

/// Everything the engine and the guest threads share, behind one lock.
pub(crate) struct SharedState {
    pub(crate) threads: DetHashMap<ThreadId, ThreadRecord>,
    /// Live threads in admission order; classification iterates this.
    pub(crate) live_order: Vec<ThreadId>,
    pub(crate) pending_spawns: Vec<PendingSpawn>,
    pub(crate) sync: SyncState,
    pub(crate) hotspots: HotspotTracker,
    pub(crate) trace: TraceRecorder,
    pub(crate) failures: Vec<TrialFailure>,
    /// Thread currently holding the scheduling token.
    pub(crate) running: Option<ThreadId>,
    /// Last granted thread and the yield point it was resumed from.
    last_grant: Option<(ThreadId, Location)>,
    pub(crate) tick: u64,
    pub(crate) step: u64,
    /// Set once a wait deadlock starts tearing the trial down; relaxes the
    /// reacquire rules so doomed threads can unwind.
    pub(crate) teardown: bool,
    next_thread: u32,
    pub(crate) trial: u64,
    pub(crate) trial_seed: u64,
    pub(crate) throw_on_race: bool,
    /// Spurious wakeup denominator, when enabled.
    pub(crate) spurious: Option<u32>,
    last_signature: u64,
}

impl SharedState {
    pub(crate) fn new(trial: u64, trial_seed: u64, config: &Config) -> Self {
        Self {
            threads: DetHashMap::default(),
            live_order: Vec::new(),
            pending_spawns: Vec::new(),
            sync: SyncState {
                monitors: MonitorPool::new(),
                graph: WaitGraph::new(),
                races: RaceTable::new(config.detect_races),
            },
            hotspots: HotspotTracker::new(),
            trace: TraceRecorder::new(config.trace_limit),
            failures: Vec::new(),
            running: None,
            last_grant: None,
            tick: 0,
            step: 0,
            teardown: false,
            next_thread: 0,
            trial,
            trial_seed,
            throw_on_race: config.throw_on_race,
            spurious: config
                .spurious_wakeups
                .then_some(config.spurious_wakeup_denominator),
            last_signature: 0,
        }
    }

    /// Allocates a thread id and queues the body for admission.
    pub(crate) fn enqueue_spawn(
        &mut self,
        body: Box<dyn FnOnce(Handle) + Send + 'static>,
    ) -> ThreadId {
        let id = ThreadId::from_index(self.next_thread);
        self.next_thread += 1;
        self.threads.insert(id, ThreadRecord::new());
        self.pending_spawns.push(PendingSpawn { id, body });
        id
    }
}

/// The shared trial state plus the engine's wakeup channel.
pub(crate) struct Shared {
    pub(crate) state: Mutex<SharedState>,
    pub(crate) engine_cv: Condvar,
}

impl Shared {
    pub(crate) fn new(trial: u64, trial_seed: u64, config: &Config) -> Self {
        Self {
            state: Mutex::new(SharedState::new(trial, trial_seed, config)),
            engine_cv: Condvar::new(),
        }
    }
}

/// True when no guest thread holds the scheduling token.
fn control_returned(s: &SharedState) -> bool {
    match s.running {
        None => true,
        Some(tid) => s
            .threads
            .get(&tid)
            .is_none_or(|r| r.run_state != RunState::Running),
    }
}

pub(crate) struct Engine<'p> {
    shared: Arc<Shared>,
    policy: &'p mut dyn SchedulePolicy,
    rng: DetRng,
    state_mode: StateMode,
    detect_resource_deadlocks: bool,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl<'p> Engine<'p> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        policy: &'p mut dyn SchedulePolicy,
        rng: DetRng,
        config: &Config,
    ) -> Self {
        Self {
            shared,
            policy,
            rng,
            state_mode: config.state_mode,
            detect_resource_deadlocks: config.detect_resource_deadlocks,
            handles: Vec::new(),
        }
    }

    /// Drives the trial to completion: all guest threads terminated.
    pub(crate) fn run(mut self) -> Result<(), EngineError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let mut s = shared.state.lock();
            while !control_returned(&s) {
                shared.engine_cv.wait(&mut s);
            }
            self.record_previous(&mut s);
            self.retire_terminated(&mut s);
            self.admit(&mut s)?;
            while s
                .threads
                .values()
                .any(|r| r.run_state == RunState::Initializing)
            {
                shared.engine_cv.wait(&mut s);
            }
            if s.live_order.is_empty() {
                break;
            }
            s.tick += 1;
            let gate = self.schedule_round(&mut s)?;
            drop(s);
            gate.grant();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }

    /// One scheduling round: classify, detect, decide, hand off.
    ///
    /// Returns the gate of the chosen thread; the caller grants it after
    /// releasing the state lock.
    fn schedule_round(
        &mut self,
        s: &mut SharedState,
    ) -> Result<Arc<crate::thread::Gate>, EngineError> {
        // Each pass either produces a decision or condemns at least one
        // thread / jumps the clock, so this bound is never reached.
        let max_passes = s.live_order.len() + 3;
        for _ in 0..max_passes {
            let (mut ready, mut blocked, earliest) = classify(s)?;

            if self.detect_resource_deadlocks && self.register_wait_edges(s, &blocked) {
                continue;
            }

            if ready.is_empty() {
                if let Some(deadline) = earliest {
                    tracing::trace!(from = s.tick, to = deadline, "clock jump to deadline");
                    s.tick = deadline;
                    continue;
                }
                if s.teardown {
                    return Err(EngineError::Internal(
                        "teardown round made no progress".into(),
                    ));
                }
                tracing::debug!(blocked = blocked.len(), "wait deadlock detected");
                s.failures.push(TrialFailure::WaitDeadlock {
                    blocked: blocked.clone(),
                });
                s.teardown = true;
                for tid in s.live_order.clone() {
                    doom(s, tid, DoomReason::WaitDeadlock);
                }
                continue;
            }

            promote_spurious(s, &mut ready, &mut blocked);

            let program = ProgramState::build(self.state_mode, ready, &blocked);
            let decision = self.policy.decide(&program, &mut self.rng);
            let Some(rec) = s.threads.get_mut(&decision.thread) else {
                return Err(EngineError::Internal(format!(
                    "policy chose unknown thread {}",
                    decision.thread
                )));
            };
            if rec.run_state == RunState::Running {
                return Err(EngineError::Internal(format!(
                    "policy chose {} which already runs",
                    decision.thread
                )));
            }
            rec.run_state = RunState::Running;
            let gate = Arc::clone(&rec.gate);
            let location = rec.location.unwrap_or(START_LOCATION);
            s.step += 1;
            s.last_signature = program.signature();
            s.running = Some(decision.thread);
            s.last_grant = Some((decision.thread, location));
            tracing::trace!(
                thread = %decision.thread,
                step = s.step,
                %location,
                "token handed off"
            );
            return Ok(gate);
        }
        Err(EngineError::Internal(
            "classification failed to converge".into(),
        ))
    }

    /// Records the trace step of the thread that just returned the token.
    fn record_previous(&self, s: &mut SharedState) {
        if let Some((tid, location)) = s.last_grant.take() {
            let marker = match s.threads.get(&tid).and_then(|r| r.doomed.as_ref()) {
                Some(DoomReason::Race) => EventMarker::Race,
                Some(_) => EventMarker::Deadlock,
                None => EventMarker::Normal,
            };
            let step = TraceStep {
                trial: s.trial,
                step: s.step,
                thread: tid,
                marker,
                location,
                signature: s.last_signature,
            };
            s.trace.record(step);
        }
        s.running = None;
    }

    /// Removes terminated threads, releasing anything they still held.
    fn retire_terminated(&self, s: &mut SharedState) {
        let done: Vec<ThreadId> = s
            .live_order
            .iter()
            .copied()
            .filter(|tid| s.threads.get(tid).is_none_or(|r| !r.is_live()))
            .collect();
        for tid in done {
            if let Some(rec) = s.threads.get_mut(&tid) {
                let held = std::mem::take(&mut rec.held);
                let edge = rec.blocked_edge.take();
                if let Some((from, to)) = edge {
                    s.sync.graph.remove_edge(from, to);
                }
                for monitor in held {
                    s.sync.monitors.force_release(monitor);
                }
            }
            s.threads.remove(&tid);
            s.live_order.retain(|&t| t != tid);
            tracing::debug!(thread = %tid, "thread retired");
        }
    }

    /// Spawns the backing OS thread for every queued spawn.
    fn admit(&mut self, s: &mut SharedState) -> Result<(), EngineError> {
        let spawns: Vec<PendingSpawn> = s.pending_spawns.drain(..).collect();
        for spawn in spawns {
            s.live_order.push(spawn.id);
            let handle = Handle::new(spawn.id, Arc::clone(&self.shared));
            let body = spawn.body;
            let join = std::thread::Builder::new()
                .name(format!("interweave-{}", spawn.id))
                .spawn(move || guest_main(handle, body))
                .map_err(|err| EngineError::Internal(format!("thread spawn failed: {err}")))?;
            tracing::debug!(thread = %spawn.id, "thread admitted");
            self.handles.push(join);
        }
        Ok(())
    }

    /// Registers waits-for edges for blocked monitor acquisitions and runs
    /// cycle detection on each new edge. Returns true when a cycle was
    /// found and its victims condemned; the round must reclassify.
    fn register_wait_edges(
        &self,
        s: &mut SharedState,
        blocked: &[(ThreadId, Location)],
    ) -> bool {
        let mut requests: Vec<(ThreadId, MonitorId, MonitorId)> = Vec::new();
        for &(tid, _) in blocked {
            let Some(rec) = s.threads.get(&tid) else {
                continue;
            };
            if rec.doomed.is_some() || rec.blocked_edge.is_some() {
                continue;
            }
            if let Some(Operation::MonitorEnter { monitor }) = &rec.pending {
                if let Some(&from) = rec.held.last() {
                    requests.push((tid, from, *monitor));
                }
            }
        }
        for (tid, from, to) in requests {
            s.sync.graph.add_edge(from, to);
            if let Some(rec) = s.threads.get_mut(&tid) {
                rec.blocked_edge = Some((from, to));
            }
            if let Some(cycle) = s.sync.graph.cycle_through(from, to) {
                let mut victims: Vec<ThreadId> = Vec::new();
                for &monitor in &cycle {
                    if let Some(owner) = s.sync.monitors.owner(monitor) {
                        if !victims.contains(&owner) {
                            victims.push(owner);
                        }
                    }
                }
                tracing::debug!(
                    monitors = cycle.len(),
                    victims = victims.len(),
                    "resource deadlock detected"
                );
                s.failures.push(TrialFailure::ResourceDeadlock {
                    cycle: cycle.clone(),
                    victims: victims.clone(),
                });
                for victim in victims {
                    doom(
                        s,
                        victim,
                        DoomReason::ResourceDeadlock {
                            cycle: cycle.clone(),
                        },
                    );
                }
                return true;
            }
        }
        false
    }
}

/// Polls every live thread's parked operation.
///
/// Spurious wakeups are excluded here so that a program whose only hope is
/// a spurious wakeup is still reported as deadlocked; they are promoted
/// into the ready set afterwards when the round has real progress.
#[allow(clippy::type_complexity)]
fn classify(
    s: &SharedState,
) -> Result<(Vec<ReadyThread>, Vec<(ThreadId, Location)>, Option<u64>), EngineError> {
    let mut ready = Vec::with_capacity(s.live_order.len());
    let mut blocked = Vec::new();
    let mut earliest: Option<u64> = None;
    for &tid in &s.live_order {
        let Some(rec) = s.threads.get(&tid) else {
            continue;
        };
        let Some(op) = rec.pending.as_ref() else {
            return Err(EngineError::Internal(format!(
                "{tid} is live without a parked operation"
            )));
        };
        let location = rec.location.unwrap_or(START_LOCATION);
        match op.poll(s, tid, false) {
            Readiness::Ready => ready.push(ReadyThread {
                thread: tid,
                location,
                key: op.choice_key(),
            }),
            Readiness::Blocked => {
                blocked.push((tid, location));
                if let Some(deadline) = op.deadline() {
                    earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
                }
            }
        }
    }
    Ok((ready, blocked, earliest))
}

/// Moves waiters whose spurious wakeup fired this round into the ready set.
fn promote_spurious(
    s: &SharedState,
    ready: &mut Vec<ReadyThread>,
    blocked: &mut Vec<(ThreadId, Location)>,
) {
    if s.spurious.is_none() {
        return;
    }
    let mut index = 0;
    while index < blocked.len() {
        let (tid, location) = blocked[index];
        let promoted = s.threads.get(&tid).and_then(|rec| {
            let op = rec.pending.as_ref()?;
            (matches!(op, Operation::WaitBlock { .. })
                && op.poll(s, tid, true) == Readiness::Ready)
                .then(|| op.choice_key())
        });
        if let Some(key) = promoted {
            blocked.remove(index);
            ready.push(ReadyThread {
                thread: tid,
                location,
                key,
            });
        } else {
            index += 1;
        }
    }
}

/// Condemns a thread: its parked operation is replaced by
/// [`Operation::Die`] and it unwinds the next time it is scheduled.
fn doom(s: &mut SharedState, tid: ThreadId, reason: DoomReason) {
    let (pending, edge) = match s.threads.get_mut(&tid) {
        Some(rec) if rec.doomed.is_none() && rec.is_live() => {
            tracing::debug!(thread = %tid, %reason, "thread condemned");
            rec.doomed = Some(reason.clone());
            (rec.pending.take(), rec.blocked_edge.take())
        }
        _ => return,
    };
    if let Some((from, to)) = edge {
        s.sync.graph.remove_edge(from, to);
    }
    let cleanup = pending.and_then(|op| op.on_doom(s, tid));
    if let Some(rec) = s.threads.get_mut(&tid) {
        rec.pending = Some(Operation::Die {
            cleanup: cleanup.map(Box::new),
            reason,
        });
    }
}
