//! Yield-point identity.
//!
//! A [`Location`] names the program point where a logical thread yielded to
//! the scheduler: the source position of the instrumentation call, the kind
//! of blocking operation performed there, and (for compound operations such
//! as `wait`) which stage of the operation the thread is at. Locations are
//! immutable values used as hash keys by the program-state abstraction and
//! the history-dependent scheduling policy.

use core::fmt;
use serde::Serialize;

/// The identity of one yield point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Location {
    /// Source file of the instrumentation call.
    pub file: &'static str,
    /// Source line of the instrumentation call.
    pub line: u32,
    /// Operation kind label, e.g. `"monitor-enter"` or `"wait"`.
    pub kind: &'static str,
    /// Stage index within a compound operation (0 for simple operations).
    pub stage: u8,
}

impl Location {
    /// Builds a location from explicit parts.
    #[must_use]
    pub const fn new(file: &'static str, line: u32, kind: &'static str, stage: u8) -> Self {
        Self {
            file,
            line,
            kind,
            stage,
        }
    }

    /// Builds a location from the caller's source position.
    ///
    /// Instrumentation entry points are `#[track_caller]`, so this resolves
    /// to the application call site rather than the engine internals.
    #[track_caller]
    #[must_use]
    pub fn caller(kind: &'static str, stage: u8) -> Self {
        let caller: &'static std::panic::Location<'static> = std::panic::Location::caller();
        Self {
            file: caller.file(),
            line: caller.line(),
            kind,
            stage,
        }
    }

    /// Returns the canonical signature string, e.g. `src/foo.rs:42 wait#1`.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}:{} {}#{}", self.file, self.line, self.kind, self.stage)
    }

    /// Returns a copy of this location with a different stage index.
    #[must_use]
    pub const fn with_stage(mut self, stage: u8) -> Self {
        self.stage = stage;
        self
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location({}:{} {}#{})",
            self.file, self.line, self.kind, self.stage
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}
