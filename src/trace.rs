//! Execution traces.
//!
//! Every scheduling decision of a trial is recorded as a [`TraceStep`]:
//! which thread was resumed, at which yield point, and the signature of the
//! program state the decision was made in. Steps carrying a detection are
//! marked. The recorder is bounded; a trial that outruns the limit keeps
//! its prefix and is flagged as truncated.
//!
//! Persisted traces are tab-separated with a header row, one file per
//! trial, so a failing schedule can be diffed against a passing one with
//! ordinary text tools.

use crate::error::EngineError;
use crate::types::{Location, ThreadId};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Marks a step that carried a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventMarker {
    /// An ordinary scheduling step.
    Normal,
    /// The resumed thread observed a data race.
    Race,
    /// The resumed thread was condemned by a deadlock detection.
    Deadlock,
}

impl fmt::Display for EventMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Race => write!(f, "race"),
            Self::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// One scheduling decision of one trial.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    /// Trial index within the session.
    pub trial: u64,
    /// Step index within the trial.
    pub step: u64,
    /// The thread that was resumed.
    pub thread: ThreadId,
    /// Detection marker for this step.
    pub marker: EventMarker,
    /// The yield point the thread was resumed from.
    pub location: Location,
    /// Signature of the program state the decision was made in.
    pub signature: u64,
}

/// Bounded in-memory trace of one trial.
#[derive(Debug)]
pub(crate) struct TraceRecorder {
    steps: Vec<TraceStep>,
    limit: usize,
    truncated: bool,
}

impl TraceRecorder {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            steps: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub(crate) fn record(&mut self, step: TraceStep) {
        if self.steps.len() < self.limit {
            self.steps.push(step);
        } else {
            self.truncated = true;
        }
    }

    #[cfg(test)]
    pub(crate) fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub(crate) fn truncated(&self) -> bool {
        self.truncated
    }

    /// Writes the trace in tab-separated form.
    pub(crate) fn write_tsv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "trial\tstep\tthread\tmarker\tlocation\tsignature")?;
        for s in &self.steps {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{:016x}",
                s.trial,
                s.step,
                s.thread,
                s.marker,
                s.location.signature(),
                s.signature
            )?;
        }
        if self.truncated {
            writeln!(out, "# truncated at {} steps", self.limit)?;
        }
        Ok(())
    }
}

/// Persists a trial's trace as `trial-NNNN.tsv` under `dir`.
pub(crate) fn persist(
    recorder: &TraceRecorder,
    dir: &Path,
    trial: u64,
) -> Result<PathBuf, EngineError> {
    let to_engine_err =
        |err: std::io::Error| EngineError::TracePersistence(format!("{}: {err}", dir.display()));
    fs::create_dir_all(dir).map_err(to_engine_err)?;
    let path = dir.join(format!("trial-{trial:04}.tsv"));
    let mut file = fs::File::create(&path).map_err(to_engine_err)?;
    recorder.write_tsv(&mut file).map_err(to_engine_err)?;
    Ok(path)
}
