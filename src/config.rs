//! Session configuration.
//!
//! A [`Config`] describes one exploration session: how many trials to run,
//! which scheduling policy and state abstraction to use, which detectors
//! are armed, and how execution traces are persisted. Construction is
//! builder-style with sensible defaults:
//!
//! ```
//! use interweave::{Config, PolicyKind, StateMode};
//!
//! let config = Config::new()
//!     .with_seed(42)
//!     .with_max_trials(500)
//!     .with_policy(PolicyKind::HistoryDependent)
//!     .with_state_mode(StateMode::Grouped);
//! assert!(config.validate().is_ok());
//! ```

use crate::hotspot::HotspotContract;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How thread locations are abstracted into a program state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMode {
    /// One state element per thread.
    Raw,
    /// Threads at an identical location collapse into one element with a
    /// count. Selection picks a group first, then a member, biasing
    /// exploration toward distinct locations.
    Grouped,
}

/// Which scheduling policy drives exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Uniform random choice with no cross-trial memory.
    Memoryless,
    /// Avoids repeating (choice, state) pairs already seen this session.
    HistoryDependent,
}

/// When execution traces are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TracePersistence {
    /// Traces are kept in memory only.
    Never,
    /// Only a failing trial's trace is persisted.
    OnFailure,
    /// Every trial's trace is persisted.
    Always,
}

/// An invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_trials` was zero.
    #[error("max_trials must be positive")]
    ZeroTrials,
    /// `trace_limit` was zero.
    #[error("trace_limit must be positive")]
    ZeroTraceLimit,
    /// `spurious_wakeup_denominator` was zero.
    #[error("spurious_wakeup_denominator must be positive")]
    ZeroSpuriousDenominator,
    /// Two hotspot contracts share a name.
    #[error("duplicate hotspot contract: {0}")]
    DuplicateHotspot(String),
    /// Trace persistence was requested without a target directory.
    #[error("trace persistence enabled but trace_dir is unset")]
    MissingTraceDir,
}

/// Configuration for one exploration session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seed for all deterministic choices. `None` draws one from the OS and
    /// records it on the session for reproduction.
    pub seed: Option<u64>,
    /// Upper bound on trials per session.
    pub max_trials: u64,
    /// Wall-clock budget for the whole session.
    pub time_limit: Option<Duration>,
    /// Arm the read/write race detector.
    pub detect_races: bool,
    /// Raise a detected race as a trial failure instead of only logging it.
    pub throw_on_race: bool,
    /// Arm the monitor waits-for cycle detector.
    pub detect_resource_deadlocks: bool,
    /// Program-state abstraction used for scheduling decisions.
    pub state_mode: StateMode,
    /// Scheduling policy.
    pub policy: PolicyKind,
    /// Preemption-bound heuristic: retry the immediately preceding choice
    /// before random probing (history-dependent policy only).
    pub prefer_previous_choice: bool,
    /// Inject simulated spurious wakeups into waits.
    pub spurious_wakeups: bool,
    /// A spurious wakeup fires with probability `1/denominator` per poll.
    pub spurious_wakeup_denominator: u32,
    /// Hotspot reachability contracts checked during the session.
    pub hotspots: Vec<HotspotContract>,
    /// Maximum number of steps retained per trial trace.
    pub trace_limit: usize,
    /// When traces are written to disk.
    pub persist_traces: TracePersistence,
    /// Directory for persisted traces.
    pub trace_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: None,
            max_trials: 256,
            time_limit: None,
            detect_races: true,
            throw_on_race: false,
            detect_resource_deadlocks: true,
            state_mode: StateMode::Grouped,
            policy: PolicyKind::HistoryDependent,
            prefer_previous_choice: false,
            spurious_wakeups: false,
            spurious_wakeup_denominator: 16,
            hotspots: Vec::new(),
            trace_limit: 10_000,
            persist_traces: TracePersistence::Never,
            trace_dir: None,
        }
    }
}

impl Config {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the session seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the trial budget.
    #[must_use]
    pub fn with_max_trials(mut self, max_trials: u64) -> Self {
        self.max_trials = max_trials;
        self
    }

    /// Sets the wall-clock budget.
    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Enables or disables the race detector.
    #[must_use]
    pub fn with_race_detection(mut self, detect: bool, throw_on_race: bool) -> Self {
        self.detect_races = detect;
        self.throw_on_race = throw_on_race;
        self
    }

    /// Enables or disables resource-deadlock detection.
    #[must_use]
    pub fn with_resource_deadlock_detection(mut self, detect: bool) -> Self {
        self.detect_resource_deadlocks = detect;
        self
    }

    /// Selects the state abstraction.
    #[must_use]
    pub fn with_state_mode(mut self, mode: StateMode) -> Self {
        self.state_mode = mode;
        self
    }

    /// Selects the scheduling policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Enables the preemption-bound heuristic.
    #[must_use]
    pub fn with_prefer_previous_choice(mut self, prefer: bool) -> Self {
        self.prefer_previous_choice = prefer;
        self
    }

    /// Enables simulated spurious wakeups.
    #[must_use]
    pub fn with_spurious_wakeups(mut self, denominator: u32) -> Self {
        self.spurious_wakeups = true;
        self.spurious_wakeup_denominator = denominator;
        self
    }

    /// Adds a hotspot contract.
    #[must_use]
    pub fn with_hotspot(mut self, contract: HotspotContract) -> Self {
        self.hotspots.push(contract);
        self
    }

    /// Sets the per-trial trace step limit.
    #[must_use]
    pub fn with_trace_limit(mut self, limit: usize) -> Self {
        self.trace_limit = limit;
        self
    }

    /// Configures trace persistence.
    #[must_use]
    pub fn with_trace_persistence(mut self, mode: TracePersistence, dir: PathBuf) -> Self {
        self.persist_traces = mode;
        self.trace_dir = Some(dir);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; the session must not start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trials == 0 {
            return Err(ConfigError::ZeroTrials);
        }
        if self.trace_limit == 0 {
            return Err(ConfigError::ZeroTraceLimit);
        }
        if self.spurious_wakeups && self.spurious_wakeup_denominator == 0 {
            return Err(ConfigError::ZeroSpuriousDenominator);
        }
        for (i, contract) in self.hotspots.iter().enumerate() {
            if self.hotspots[..i].iter().any(|c| c.name == contract.name) {
                return Err(ConfigError::DuplicateHotspot(contract.name.clone()));
            }
        }
        if self.persist_traces != TracePersistence::Never && self.trace_dir.is_none() {
            return Err(ConfigError::MissingTraceDir);
        }
        Ok(())
    }
}
