//! Hotspot reachability contracts.
//!
//! A hotspot is a named program location with a contract over whether trials
//! reach it: `Always` (every trial must reach it), `Never` (no trial may
//! reach it), or `Sometimes` (at least one trial in the session must reach
//! it). Always/never contracts are checked at trial boundaries; sometimes
//! contracts only make sense at the session boundary.

use crate::error::TrialFailure;
use crate::util::DetHashSet;
use core::fmt;
use serde::{Deserialize, Serialize};

/// The kind of reachability contract attached to a hotspot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotspotKind {
    /// The hotspot must be reached in every trial.
    Always,
    /// The hotspot must never be reached.
    Never,
    /// The hotspot must be reached in at least one trial of the session.
    Sometimes,
}

impl fmt::Display for HotspotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
            Self::Sometimes => write!(f, "sometimes"),
        }
    }
}

/// A named hotspot with its reachability contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotspotContract {
    /// Hotspot name, matched against [`Handle::hotspot`](crate::Handle::hotspot) calls.
    pub name: String,
    /// The contract kind.
    pub kind: HotspotKind,
}

impl HotspotContract {
    /// A hotspot that must be reached in every trial.
    #[must_use]
    pub fn always(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HotspotKind::Always,
        }
    }

    /// A hotspot that must never be reached.
    #[must_use]
    pub fn never(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HotspotKind::Never,
        }
    }

    /// A hotspot that must be reached at least once per session.
    #[must_use]
    pub fn sometimes(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HotspotKind::Sometimes,
        }
    }
}

/// Per-trial hotspot hit tracking.
///
/// A fresh tracker is built for every trial; the session aggregates the
/// per-trial hit sets for `Sometimes` contracts.
#[derive(Debug, Default)]
pub(crate) struct HotspotTracker {
    hits: DetHashSet<String>,
}

impl HotspotTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records that the named hotspot was reached in this trial.
    pub(crate) fn record(&mut self, name: &str) {
        self.hits.insert(name.to_owned());
    }

    /// Returns the hit set of this trial.
    pub(crate) fn hits(&self) -> &DetHashSet<String> {
        &self.hits
    }

    /// Checks always/never contracts at the end of a trial.
    pub(crate) fn trial_failures(&self, contracts: &[HotspotContract]) -> Vec<TrialFailure> {
        let mut failures = Vec::new();
        for contract in contracts {
            let hit = self.hits.contains(&contract.name);
            let violated = match contract.kind {
                HotspotKind::Always => !hit,
                HotspotKind::Never => hit,
                HotspotKind::Sometimes => false,
            };
            if violated {
                failures.push(TrialFailure::Hotspot {
                    name: contract.name.clone(),
                    kind: contract.kind,
                });
            }
        }
        failures
    }
}

/// Checks `Sometimes` contracts against the union of all trials' hit sets.
pub(crate) fn session_failures(
    contracts: &[HotspotContract],
    session_hits: &DetHashSet<String>,
) -> Vec<TrialFailure> {
    contracts
        .iter()
        .filter(|c| c.kind == HotspotKind::Sometimes && !session_hits.contains(&c.name))
        .map(|c| TrialFailure::Hotspot {
            name: c.name.clone(),
            kind: c.kind,
        })
        .collect()
}
