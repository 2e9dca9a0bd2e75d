//! Interweave: deterministic interleaving exploration for concurrent code.
//!
//! # Overview
//!
//! Interweave runs a multithreaded program under test on real OS threads
//! but with exactly one of them executing at a time. Every potentially
//! blocking or observable action is a yield point; between yield points the
//! engine owns the schedule and explores different interleavings across
//! repeated trials, all derived from a single seed. What the engine looks
//! for:
//!
//! - **Wait deadlocks**: every live thread simultaneously blocked or waiting
//! - **Resource deadlocks**: cycles in the monitor waits-for graph, with the
//!   owning threads identified and the trial torn down cleanly
//! - **Data races**: overlapping unsynchronized access regions on shared
//!   slots
//! - **Hotspot contracts**: named program points that must always, never, or
//!   at least sometimes be reached
//!
//! Verdicts are a pure function of the seed and the program under test:
//! replaying a seed replays the schedule, the logical clock, and even the
//! simulated spurious wakeups.
//!
//! # Module Structure
//!
//! - [`types`]: Identifier types and yield-point locations
//! - [`config`]: Session configuration and validation
//! - [`session`]: Multi-trial orchestration and the [`explore`] entry point
//! - [`race`]: Read/write race detection
//! - [`hotspot`]: Reachability contracts
//! - [`trace`](mod@trace): Execution traces and persistence
//! - [`error`](mod@error): Failure taxonomy
//!
//! # Example
//!
//! ```no_run
//! use interweave::{Config, HotspotContract, MonitorId, explore};
//!
//! let m = MonitorId::named("queue");
//! let result = explore(
//!     Config::new()
//!         .with_seed(0xfeed)
//!         .with_max_trials(500)
//!         .with_hotspot(HotspotContract::always("drained")),
//!     move |h| {
//!         let producer = h.spawn(move |h| {
//!             h.lock(m);
//!             h.notify_one(m);
//!             h.unlock(m);
//!         });
//!         h.lock(m);
//!         h.unlock(m);
//!         h.join(producer);
//!         h.hotspot("drained");
//!     },
//! )
//! .expect("session");
//! assert!(result.is_pass(), "{:?}", result.failure);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
mod deadlock;
mod engine;
pub mod error;
mod handle;
pub mod hotspot;
mod monitor;
mod op;
mod policy;
pub mod race;
pub mod session;
mod state;
mod thread;
pub mod trace;
pub mod types;
mod util;

pub use config::{Config, ConfigError, PolicyKind, StateMode, TracePersistence};
pub use error::{DoomReason, EngineError, SessionError, TrialFailure};
pub use handle::Handle;
pub use hotspot::{HotspotContract, HotspotKind};
pub use op::WakeReason;
pub use race::{AccessKey, RaceHit};
pub use session::{Session, SessionResult, explore};
pub use trace::{EventMarker, TraceStep};
pub use types::{Location, MonitorId, ObjectId, ThreadId};
