//! Scheduling policies.
//!
//! A policy turns a [`ProgramState`] into a [`Decision`]. The memoryless
//! policy draws uniformly and never converges; exploration stops only at
//! the trial or time budget. The history-dependent policy remembers every
//! `(choice, state)` pair it has scheduled across the whole session and
//! steers toward pairs it has not seen, declaring convergence after a trial
//! that contributed nothing new.

use crate::config::PolicyKind;
use crate::state::{ChoiceKey, Decision, ProgramState};
use crate::util::{DetHashSet, DetRng};

/// What a finished trial told the policy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PolicyReport {
    /// The trial scheduled no previously unseen `(choice, state)` pair.
    pub(crate) converged: bool,
    /// Number of new pairs the trial contributed.
    pub(crate) new_coverage: usize,
}

pub(crate) trait SchedulePolicy: Send {
    /// Chooses which ready thread runs next.
    fn decide(&mut self, state: &ProgramState, rng: &mut DetRng) -> Decision;

    /// Called at the end of every trial.
    fn trial_finished(&mut self) -> PolicyReport;
}

pub(crate) fn build_policy(kind: PolicyKind, prefer_previous: bool) -> Box<dyn SchedulePolicy> {
    match kind {
        PolicyKind::Memoryless => Box::new(Memoryless),
        PolicyKind::HistoryDependent => Box::new(HistoryDependent::new(prefer_previous)),
    }
}

/// Uniform random scheduling with no cross-trial memory.
struct Memoryless;

impl SchedulePolicy for Memoryless {
    fn decide(&mut self, state: &ProgramState, rng: &mut DetRng) -> Decision {
        state.pick(rng.index(state.choice_count()), rng)
    }

    fn trial_finished(&mut self) -> PolicyReport {
        PolicyReport {
            converged: false,
            new_coverage: 0,
        }
    }
}

/// Session-global novelty-seeking scheduling.
struct HistoryDependent {
    seen: DetHashSet<(ChoiceKey, u64)>,
    /// Pairs first seen during the current trial.
    trial_new: usize,
    prefer_previous: bool,
    previous: Option<ChoiceKey>,
}

impl HistoryDependent {
    fn new(prefer_previous: bool) -> Self {
        Self {
            seen: DetHashSet::default(),
            trial_new: 0,
            prefer_previous,
            previous: None,
        }
    }
}

impl SchedulePolicy for HistoryDependent {
    fn decide(&mut self, state: &ProgramState, rng: &mut DetRng) -> Decision {
        let n = state.choice_count();
        let signature = state.signature();
        let unseen = |key: ChoiceKey, seen: &DetHashSet<(ChoiceKey, u64)>| {
            !seen.contains(&(key, signature))
        };

        // Preemption-avoidance heuristic: staying with the previous choice
        // key keeps the schedule on one thread's operation sequence, which
        // tends to need fewer context switches to expose a bug.
        let preferred = self.previous.filter(|_| self.prefer_previous).and_then(|prev| {
            (0..n).find(|&i| state.choice_key(i) == prev && unseen(prev, &self.seen))
        });

        let index = preferred.unwrap_or_else(|| {
            // Probe from a random offset for the first unseen pair; when
            // everything here has been seen, repeating the offset choice is
            // as good as any.
            let offset = rng.index(n);
            (0..n)
                .map(|i| (offset + i) % n)
                .find(|&i| unseen(state.choice_key(i), &self.seen))
                .unwrap_or(offset)
        });

        let decision = state.pick(index, rng);
        if self.seen.insert((decision.key, signature)) {
            self.trial_new += 1;
        }
        self.previous = Some(decision.key);
        decision
    }

    fn trial_finished(&mut self) -> PolicyReport {
        let report = PolicyReport {
            converged: self.trial_new == 0,
            new_coverage: self.trial_new,
        };
        self.trial_new = 0;
        self.previous = None;
        report
    }
}
