//! Multi-trial orchestration.
//!
//! A [`Session`] runs one program under test through many trials, each with
//! a fresh engine and a trial-specific seed derived from the session seed.
//! The session stops at the first failing trial, at policy convergence, or
//! when the trial or time budget runs out. Hotspot `Sometimes` contracts
//! are only decidable across trials, so they are checked at the session
//! boundary.

use crate::config::{Config, ConfigError, PolicyKind, TracePersistence};
use crate::engine::{Engine, Shared};
use crate::error::{EngineError, SessionError, TrialFailure};
use crate::handle::Handle;
use crate::hotspot;
use crate::policy::{SchedulePolicy, build_policy};
use crate::trace;
use crate::util::{self, DetHashSet, DetRng, det_hash64};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one exploration session.
#[derive(Debug)]
pub struct SessionResult {
    /// The seed the session ran with; pin it to reproduce the session.
    pub seed: u64,
    /// Number of trials that were run.
    pub trials: u64,
    /// Wall-clock duration of the session.
    pub elapsed: Duration,
    /// The failure that stopped the session, if any.
    pub failure: Option<TrialFailure>,
    /// Index of the failing trial, when the failure came from one.
    pub failing_trial: Option<u64>,
    /// Total `(choice, state)` pairs discovered (history-dependent policy).
    pub coverage: usize,
    /// The policy declared exploration exhausted before the trial budget.
    pub converged: bool,
}

impl SessionResult {
    /// True when no trial failed and every contract held.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
    }

    /// One-line JSON summary for log pipelines.
    #[must_use]
    pub fn summary_json(&self) -> String {
        serde_json::json!({
            "seed": self.seed,
            "trials": self.trials,
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "coverage": self.coverage,
            "converged": self.converged,
            "failing_trial": self.failing_trial,
            "failure": self.failure.as_ref().map(ToString::to_string),
        })
        .to_string()
    }
}

/// An exploration session over one program under test.
pub struct Session {
    config: Config,
    seed: u64,
    policy: Box<dyn SchedulePolicy>,
    session_hits: DetHashSet<String>,
    coverage: usize,
}

impl Session {
    /// Validates the configuration and prepares a session.
    ///
    /// When no seed is pinned, one is drawn from the operating system; it
    /// is available via [`seed`](Session::seed) and on the result, so any
    /// session can be reproduced.
    ///
    /// # Errors
    ///
    /// Returns the configuration error that makes the session unrunnable.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(util::random_seed);
        if config.seed.is_none() {
            tracing::info!(seed, "session seed drawn from operating system entropy");
        }
        let policy = build_policy(config.policy, config.prefer_previous_choice);
        Ok(Self {
            config,
            seed,
            policy,
            session_hits: DetHashSet::default(),
            coverage: 0,
        })
    }

    /// The seed this session runs with.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs trials of `entry` until a failure, convergence, or a budget.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the engine itself is defective or a
    /// trace cannot be persisted; verdicts about the program under test are
    /// in the result, not the error.
    pub fn run<F>(&mut self, entry: F) -> Result<SessionResult, EngineError>
    where
        F: Fn(Handle) + Send + Sync + 'static,
    {
        let entry = Arc::new(entry);
        let started = Instant::now();
        let mut trials = 0_u64;
        let mut converged = false;
        let mut failure: Option<TrialFailure> = None;
        let mut failing_trial = None;

        for trial in 0..self.config.max_trials {
            if let Some(limit) = self.config.time_limit {
                if started.elapsed() >= limit {
                    tracing::info!(trials, "time limit reached");
                    break;
                }
            }
            let verdict = self.run_trial(trial, Arc::clone(&entry))?;
            trials += 1;
            let report = self.policy.trial_finished();
            self.coverage += report.new_coverage;
            tracing::debug!(
                trial,
                new_coverage = report.new_coverage,
                failed = verdict.is_some(),
                "trial finished"
            );
            if let Some(found) = verdict {
                tracing::info!(trial, failure = %found, "failing schedule found");
                failure = Some(found);
                failing_trial = Some(trial);
                break;
            }
            if report.converged && self.config.policy == PolicyKind::HistoryDependent {
                tracing::info!(trial, coverage = self.coverage, "exploration converged");
                converged = true;
                break;
            }
        }

        if failure.is_none() {
            failure = TrialFailure::aggregate(hotspot::session_failures(
                &self.config.hotspots,
                &self.session_hits,
            ));
        }
        Ok(SessionResult {
            seed: self.seed,
            trials,
            elapsed: started.elapsed(),
            failure,
            failing_trial,
            coverage: self.coverage,
            converged,
        })
    }

    fn run_trial<F>(&mut self, trial: u64, entry: Arc<F>) -> Result<Option<TrialFailure>, EngineError>
    where
        F: Fn(Handle) + Send + Sync + 'static,
    {
        let trial_seed = det_hash64(&(self.seed, trial));
        let shared = Arc::new(Shared::new(trial, trial_seed, &self.config));
        {
            let mut s = shared.state.lock();
            let root = Arc::clone(&entry);
            s.enqueue_spawn(Box::new(move |handle| (*root)(handle)));
        }
        let rng = DetRng::new(trial_seed);
        Engine::new(Arc::clone(&shared), self.policy.as_mut(), rng, &self.config).run()?;

        let mut s = shared.state.lock();
        let mut failures = std::mem::take(&mut s.failures);
        failures.extend(s.hotspots.trial_failures(&self.config.hotspots));
        self.session_hits
            .extend(s.hotspots.hits().iter().cloned());
        let verdict = TrialFailure::aggregate(failures);

        let persist = match self.config.persist_traces {
            TracePersistence::Never => false,
            TracePersistence::OnFailure => verdict.is_some(),
            TracePersistence::Always => true,
        };
        if persist {
            if let Some(dir) = self.config.trace_dir.as_deref() {
                let path = trace::persist(&s.trace, dir, trial)?;
                tracing::debug!(trial, path = %path.display(), "trace persisted");
            }
        }
        if s.trace.truncated() {
            tracing::warn!(trial, "trace truncated at the configured limit");
        }
        Ok(verdict)
    }
}

/// Runs a full session with defaults taken from `config`.
///
/// Convenience wrapper over [`Session::new`] + [`Session::run`].
///
/// # Errors
///
/// Returns a [`SessionError`] for an invalid configuration or a defective
/// engine.
pub fn explore<F>(config: Config, entry: F) -> Result<SessionResult, SessionError>
where
    F: Fn(Handle) + Send + Sync + 'static,
{
    let mut session = Session::new(config)?;
    session.run(entry).map_err(SessionError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_program_passes_and_converges() {
        let result = explore(Config::new().with_seed(7).with_max_trials(16), |_h| {})
            .expect("session");
        assert!(result.is_pass());
        assert!(result.trials < 16, "one thread has nothing to explore");
        assert!(result.converged);
        assert_eq!(result.seed, 7);
    }

    #[test]
    fn invalid_config_is_rejected_before_any_trial() {
        let err = explore(Config::new().with_max_trials(0), |_h| {}).unwrap_err();
        assert!(matches!(err, SessionError::Config(ConfigError::ZeroTrials)));
    }

    #[test]
    fn unpinned_seed_is_reported() {
        let session = Session::new(Config::new()).expect("session");
        // The drawn seed must be available for reproduction.
        let _ = session.seed();
    }

    #[test]
    fn guest_panic_becomes_a_trial_failure() {
        let result = explore(Config::new().with_seed(3).with_max_trials(4), |_h| {
            panic!("guest bug");
        })
        .expect("session");
        let failure = result.failure.expect("failure");
        assert!(failure.to_string().contains("guest bug"), "{failure}");
        assert_eq!(result.failing_trial, Some(0));
    }

    #[test]
    fn summary_json_is_valid_json() {
        let result = explore(Config::new().with_seed(1).with_max_trials(2), |_h| {})
            .expect("session");
        let value: serde_json::Value =
            serde_json::from_str(&result.summary_json()).expect("parse");
        assert_eq!(value["seed"], 1);
        assert_eq!(value["failure"], serde_json::Value::Null);
    }
}
