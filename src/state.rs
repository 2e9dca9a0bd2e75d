//! Program-state abstraction for scheduling decisions.
//!
//! At every scheduling round the engine distills the live threads into a
//! [`ProgramState`]: the ready threads (with the yield point and choice key
//! each is parked at) and the blocked ones. Two views exist over the ready
//! set. The raw view offers one choice per thread; the grouped view
//! collapses threads parked at the same yield point into a single choice, so
//! a crowd of identical workers does not drown out a lone thread at a rarely
//! visited location.
//!
//! The state signature is always the grouped, canonical form, independent of
//! the selection view: sorted `(location, count)` pairs over ready and
//! blocked threads. History-dependent policies key their memory on it.

use crate::config::StateMode;
use crate::types::{Location, ThreadId};
use crate::util::{DetRng, det_hash64};
use smallvec::SmallVec;

/// Identity of a scheduling choice: the operation kind plus its arguments.
///
/// Two threads parked at the same source location performing the same
/// operation on the same objects produce the same key; the scheduler treats
/// resuming either as the same choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ChoiceKey {
    pub(crate) kind: &'static str,
    pub(crate) stage: u8,
    pub(crate) a: u64,
    pub(crate) b: u64,
}

/// One ready thread as seen by the scheduler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadyThread {
    pub(crate) thread: ThreadId,
    pub(crate) location: Location,
    pub(crate) key: ChoiceKey,
}

/// The scheduler's resolution of one round.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Decision {
    pub(crate) thread: ThreadId,
    pub(crate) key: ChoiceKey,
}

#[derive(Debug)]
struct Group {
    location: Location,
    key: ChoiceKey,
    /// Indices into the ready vector.
    members: SmallVec<[usize; 4]>,
}

/// Snapshot of the schedulable program at one round.
#[derive(Debug)]
pub(crate) struct ProgramState {
    mode: StateMode,
    ready: Vec<ReadyThread>,
    groups: Vec<Group>,
    signature: u64,
}

impl ProgramState {
    /// Builds a state from the classified threads of one round.
    ///
    /// `ready` must be non-empty; an all-blocked round is a deadlock and
    /// never reaches the scheduler.
    pub(crate) fn build(
        mode: StateMode,
        mut ready: Vec<ReadyThread>,
        blocked: &[(ThreadId, Location)],
    ) -> Self {
        debug_assert!(!ready.is_empty());
        // Canonical order: by yield point, ties by thread id. This makes
        // grouping, the signature, and index-based selection all independent
        // of the order threads happened to yield in.
        ready.sort_by_key(|r| (r.location, r.thread));

        let mut groups: Vec<Group> = Vec::new();
        for (index, r) in ready.iter().enumerate() {
            match groups.last_mut() {
                Some(group) if group.location == r.location => group.members.push(index),
                _ => groups.push(Group {
                    location: r.location,
                    key: r.key,
                    members: SmallVec::from_slice(&[index]),
                }),
            }
        }

        let signature = signature_of(&ready, blocked);
        Self {
            mode,
            ready,
            groups,
            signature,
        }
    }

    /// Canonical signature of this state.
    pub(crate) fn signature(&self) -> u64 {
        self.signature
    }

    /// Number of distinct choices the scheduler can make.
    pub(crate) fn choice_count(&self) -> usize {
        match self.mode {
            StateMode::Raw => self.ready.len(),
            StateMode::Grouped => self.groups.len(),
        }
    }

    /// Key identifying choice `index`.
    pub(crate) fn choice_key(&self, index: usize) -> ChoiceKey {
        match self.mode {
            StateMode::Raw => self.ready[index].key,
            StateMode::Grouped => self.groups[index].key,
        }
    }

    /// Resolves choice `index` to a thread. In grouped mode the member is
    /// drawn uniformly from the group.
    pub(crate) fn pick(&self, index: usize, rng: &mut DetRng) -> Decision {
        let r = match self.mode {
            StateMode::Raw => &self.ready[index],
            StateMode::Grouped => {
                let group = &self.groups[index];
                let member = group.members[rng.index(group.members.len())];
                &self.ready[member]
            }
        };
        Decision {
            thread: r.thread,
            key: r.key,
        }
    }

    #[cfg(test)]
    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }
}

/// Hashes the canonical multiset form: sorted `(location, readiness, count)`
/// triples over every parked thread.
fn signature_of(ready: &[ReadyThread], blocked: &[(ThreadId, Location)]) -> u64 {
    let mut entries: Vec<(Location, bool)> = ready
        .iter()
        .map(|r| (r.location, true))
        .chain(blocked.iter().map(|&(_, loc)| (loc, false)))
        .collect();
    entries.sort_unstable();
    let mut counted: Vec<(Location, bool, u32)> = Vec::with_capacity(entries.len());
    for (loc, is_ready) in entries {
        match counted.last_mut() {
            Some((l, r, n)) if *l == loc && *r == is_ready => *n += 1,
            _ => counted.push((loc, is_ready, 1)),
        }
    }
    det_hash64(&counted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: &'static str, a: u64) -> ChoiceKey {
        ChoiceKey {
            kind,
            stage: 0,
            a,
            b: 0,
        }
    }

    fn ready(index: u32, file: &'static str, line: u32) -> ReadyThread {
        ReadyThread {
            thread: ThreadId::from_index(index),
            location: Location::new(file, line, "yield", 0),
            key: key("yield", 0),
        }
    }

    #[test]
    fn grouping_collapses_identical_locations() {
        let state = ProgramState::build(
            StateMode::Grouped,
            vec![ready(0, "a.rs", 1), ready(1, "a.rs", 1), ready(2, "b.rs", 9)],
            &[],
        );
        assert_eq!(state.choice_count(), 2);
        assert_eq!(state.ready_len(), 3);

        let raw = ProgramState::build(
            StateMode::Raw,
            vec![ready(0, "a.rs", 1), ready(1, "a.rs", 1), ready(2, "b.rs", 9)],
            &[],
        );
        assert_eq!(raw.choice_count(), 3);
    }

    #[test]
    fn signature_is_independent_of_yield_order() {
        let forward = ProgramState::build(
            StateMode::Raw,
            vec![ready(0, "a.rs", 1), ready(1, "b.rs", 2)],
            &[],
        );
        let backward = ProgramState::build(
            StateMode::Raw,
            vec![ready(1, "b.rs", 2), ready(0, "a.rs", 1)],
            &[],
        );
        assert_eq!(forward.signature(), backward.signature());
    }

    #[test]
    fn signature_is_independent_of_thread_identity() {
        let a = ProgramState::build(StateMode::Raw, vec![ready(0, "a.rs", 1)], &[]);
        let b = ProgramState::build(StateMode::Raw, vec![ready(7, "a.rs", 1)], &[]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_distinguishes_ready_from_blocked() {
        let loc = Location::new("a.rs", 1, "monitor-enter", 0);
        let both_ready = ProgramState::build(
            StateMode::Raw,
            vec![ready(0, "a.rs", 1), ready(1, "b.rs", 2)],
            &[],
        );
        let one_blocked = ProgramState::build(
            StateMode::Raw,
            vec![ready(1, "b.rs", 2)],
            &[(ThreadId::from_index(0), loc)],
        );
        assert_ne!(both_ready.signature(), one_blocked.signature());
    }

    #[test]
    fn signature_and_mode_are_orthogonal() {
        let threads = || vec![ready(0, "a.rs", 1), ready(1, "a.rs", 1)];
        let grouped = ProgramState::build(StateMode::Grouped, threads(), &[]);
        let raw = ProgramState::build(StateMode::Raw, threads(), &[]);
        assert_eq!(grouped.signature(), raw.signature());
    }

    proptest::proptest! {
        /// Any permutation of the same parked threads hashes to the same
        /// signature.
        #[test]
        fn signature_is_permutation_invariant(
            lines in proptest::collection::vec(1u32..16, 1..8),
            rotation in 0usize..8,
        ) {
            let threads = |order: &[u32]| {
                order
                    .iter()
                    .enumerate()
                    .map(|(i, &line)| ready(i as u32, "a.rs", line))
                    .collect::<Vec<_>>()
            };
            let mut shuffled = lines.clone();
            shuffled.rotate_left(rotation % lines.len());
            shuffled.reverse();
            let a = ProgramState::build(StateMode::Raw, threads(&lines), &[]);
            let b = ProgramState::build(StateMode::Raw, threads(&shuffled), &[]);
            proptest::prop_assert_eq!(a.signature(), b.signature());
        }
    }

    #[test]
    fn grouped_pick_reaches_every_member() {
        let state = ProgramState::build(
            StateMode::Grouped,
            vec![ready(0, "a.rs", 1), ready(1, "a.rs", 1), ready(2, "a.rs", 1)],
            &[],
        );
        let mut rng = DetRng::new(11);
        let mut seen = [false; 3];
        for _ in 0..64 {
            let decision = state.pick(0, &mut rng);
            seen[decision.thread.index() as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
