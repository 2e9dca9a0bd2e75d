//! Failure taxonomy.
//!
//! Failures from the program under test are captured per thread and only
//! surfaced at trial boundaries; the orchestrator never drops one. Engine
//! defects ([`EngineError`]) are kept apart from verdicts about the tested
//! program ([`TrialFailure`]): the former mean the engine itself is broken
//! and are fatal, the latter are the findings the engine exists to produce.

use crate::config::ConfigError;
use crate::hotspot::HotspotKind;
use crate::race::RaceHit;
use crate::types::{Location, MonitorId, ThreadId};
use std::fmt;

/// A failed trial verdict.
#[derive(Debug, Clone)]
pub enum TrialFailure {
    /// Every live thread was simultaneously blocked or waiting.
    WaitDeadlock {
        /// The blocked threads and the yield points they were parked at.
        blocked: Vec<(ThreadId, Location)>,
    },
    /// A cycle was found in the monitor waits-for graph.
    ResourceDeadlock {
        /// The monitors forming the cycle.
        cycle: Vec<MonitorId>,
        /// The threads force-terminated because they owned cycle monitors.
        victims: Vec<ThreadId>,
    },
    /// Overlapping unsynchronized access, with `throw_on_race` enabled.
    Race {
        /// The detected overlap.
        hit: RaceHit,
        /// The thread at which the race was raised.
        thread: ThreadId,
    },
    /// A hotspot reachability contract was violated.
    Hotspot {
        /// Name of the hotspot.
        name: String,
        /// The contract that was violated.
        kind: HotspotKind,
    },
    /// A thread of the program under test panicked.
    ThreadPanic {
        /// The panicking thread.
        thread: ThreadId,
        /// The panic message, when it was a string payload.
        message: String,
    },
    /// More than one thread failed in the same trial.
    Aggregate {
        /// The individual failures, in detection order.
        failures: Vec<TrialFailure>,
    },
}

impl TrialFailure {
    /// True when the failure is a deadlock of either kind.
    ///
    /// Aggregates count as deadlocks when any member does.
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        match self {
            Self::WaitDeadlock { .. } | Self::ResourceDeadlock { .. } => true,
            Self::Aggregate { failures } => failures.iter().any(TrialFailure::is_deadlock),
            _ => false,
        }
    }

    /// True when the failure is (or contains) a data race.
    #[must_use]
    pub fn is_race(&self) -> bool {
        match self {
            Self::Race { .. } => true,
            Self::Aggregate { failures } => failures.iter().any(TrialFailure::is_race),
            _ => false,
        }
    }

    /// Folds a list of per-thread failures into a single verdict.
    ///
    /// Zero failures is a success (`None`); a single failure is surfaced
    /// as-is; several are wrapped in an aggregate.
    #[must_use]
    pub fn aggregate(mut failures: Vec<TrialFailure>) -> Option<TrialFailure> {
        match failures.len() {
            0 => None,
            1 => failures.pop(),
            _ => Some(Self::Aggregate { failures }),
        }
    }
}

impl fmt::Display for TrialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitDeadlock { blocked } => {
                write!(f, "wait deadlock: {} thread(s) blocked [", blocked.len())?;
                for (i, (thread, loc)) in blocked.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{thread} at {loc}")?;
                }
                write!(f, "]")
            }
            Self::ResourceDeadlock { cycle, victims } => {
                write!(f, "resource deadlock: cycle {{")?;
                for (i, m) in cycle.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{m}")?;
                }
                write!(f, "}}, {} thread(s) terminated", victims.len())
            }
            Self::Race { hit, thread } => write!(f, "data race at {thread}: {hit}"),
            Self::Hotspot { name, kind } => {
                write!(f, "hotspot contract violated: {name} ({kind})")
            }
            Self::ThreadPanic { thread, message } => {
                write!(f, "{thread} panicked: {message}")
            }
            Self::Aggregate { failures } => {
                write!(f, "{} failures in one trial: [", failures.len())?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{failure}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::error::Error for TrialFailure {}

/// A fatal defect in the engine itself.
///
/// These are never retried: a violated engine invariant means the verdicts
/// of the session cannot be trusted.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// An internal invariant was violated (e.g. the scheduling policy
    /// returned a thread that was not ready).
    Internal(String),
    /// Persisting an execution trace failed.
    TracePersistence(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "engine invariant violated: {msg}"),
            Self::TracePersistence(msg) => write!(f, "trace persistence failed: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Why a logical thread is being forcibly terminated.
#[derive(Debug, Clone)]
pub enum DoomReason {
    /// All live threads were blocked; the trial is being torn down.
    WaitDeadlock,
    /// The thread owned a monitor participating in a waits-for cycle.
    ResourceDeadlock {
        /// The monitors forming the cycle.
        cycle: Vec<MonitorId>,
    },
    /// The thread observed a data race with `throw_on_race` enabled.
    Race,
}

impl fmt::Display for DoomReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitDeadlock => write!(f, "wait deadlock teardown"),
            Self::ResourceDeadlock { cycle } => {
                write!(f, "resource deadlock ({} monitors in cycle)", cycle.len())
            }
            Self::Race => write!(f, "data race"),
        }
    }
}

/// Top-level error for the convenience [`explore`](crate::explore) entry
/// point: either the configuration was rejected or the engine failed.
#[derive(Debug)]
pub enum SessionError {
    /// Invalid configuration; no trial was run.
    Config(ConfigError),
    /// Fatal engine defect.
    Engine(EngineError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration rejected: {err}"),
            Self::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Engine(err) => Some(err),
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::AccessKey;
    use crate::types::ObjectId;

    fn loc() -> Location {
        Location::new("src/app.rs", 12, "monitor-enter", 0)
    }

    #[test]
    fn wait_deadlock_display_lists_threads() {
        let failure = TrialFailure::WaitDeadlock {
            blocked: vec![
                (ThreadId::from_index(0), loc()),
                (ThreadId::from_index(1), loc()),
            ],
        };
        let text = failure.to_string();
        assert!(text.contains("2 thread(s)"), "{text}");
        assert!(text.contains("T0"), "{text}");
        assert!(failure.is_deadlock());
        assert!(!failure.is_race());
    }

    #[test]
    fn resource_deadlock_display_names_cycle() {
        let failure = TrialFailure::ResourceDeadlock {
            cycle: vec![MonitorId::from_raw(1), MonitorId::from_raw(2)],
            victims: vec![ThreadId::from_index(0)],
        };
        let text = failure.to_string();
        assert!(text.contains("M1"), "{text}");
        assert!(text.contains("M2"), "{text}");
        assert!(failure.is_deadlock());
    }

    #[test]
    fn aggregate_folding() {
        assert!(TrialFailure::aggregate(vec![]).is_none());

        let single = TrialFailure::aggregate(vec![TrialFailure::ThreadPanic {
            thread: ThreadId::from_index(1),
            message: "boom".into(),
        }])
        .expect("one failure");
        assert!(matches!(single, TrialFailure::ThreadPanic { .. }));

        let many = TrialFailure::aggregate(vec![
            TrialFailure::ThreadPanic {
                thread: ThreadId::from_index(1),
                message: "boom".into(),
            },
            TrialFailure::WaitDeadlock { blocked: vec![] },
        ])
        .expect("aggregate");
        assert!(matches!(many, TrialFailure::Aggregate { .. }));
        assert!(many.is_deadlock());
    }

    #[test]
    fn race_failure_display() {
        let failure = TrialFailure::Race {
            hit: RaceHit {
                key: AccessKey::new(ObjectId::from_raw(1), "count"),
                readers: 1,
                writers: 1,
            },
            thread: ThreadId::from_index(2),
        };
        assert!(failure.is_race());
        assert!(failure.to_string().contains("count"));
    }

    #[test]
    fn engine_error_display() {
        let err = EngineError::Internal("policy chose a blocked thread".into());
        assert!(err.to_string().contains("invariant"));
    }
}
