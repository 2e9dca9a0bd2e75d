//! Internal utilities.
//!
//! Everything here exists to keep the engine deterministic: a fixed-seed
//! RNG, fixed-seed hashed collections, and a single, well-marked escape
//! hatch to operating-system entropy for sessions that do not pin a seed.

pub mod det_hash;
pub mod det_rng;

pub use det_hash::{DetBuildHasher, DetHashMap, DetHashSet, DetHasher, det_hash64};
pub use det_rng::DetRng;

/// Draws a fresh session seed from the operating system.
///
/// This is the only nondeterministic input the engine ever consumes, and it
/// is only used when the configuration leaves the seed unset. The drawn
/// seed is stored on the session so the run can be reproduced.
#[must_use]
pub fn random_seed() -> u64 {
    let mut buf = [0u8; 8];
    getrandom::fill(&mut buf).expect("operating system entropy unavailable");
    u64::from_le_bytes(buf)
}
