//! Deterministic hashing for reproducible bookkeeping.
//!
//! The engine iterates its thread, monitor, and history tables while making
//! scheduling decisions, so iteration order must not vary run to run. These
//! aliases replace the standard randomly-seeded hasher with a fixed-seed
//! FNV-style hasher.

use std::hash::{BuildHasher, Hash, Hasher};

/// Fixed-seed, non-cryptographic hasher.
#[derive(Debug, Clone)]
pub struct DetHasher {
    state: u64,
}

impl DetHasher {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
}

impl Default for DetHasher {
    fn default() -> Self {
        Self {
            state: Self::OFFSET,
        }
    }
}

impl Hasher for DetHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.state ^= u64::from(i);
        self.state = self.state.wrapping_mul(Self::PRIME);
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn finish(&self) -> u64 {
        // Avalanche pass so short keys still spread across buckets.
        let mut h = self.state;
        h ^= h >> 32;
        h = h.wrapping_mul(0xd6e8_feb8_6659_fd93);
        h ^= h >> 32;
        h = h.wrapping_mul(0xd6e8_feb8_6659_fd93);
        h ^= h >> 32;
        h
    }
}

/// Builder for [`DetHasher`].
#[derive(Debug, Clone, Default)]
pub struct DetBuildHasher;

impl BuildHasher for DetBuildHasher {
    type Hasher = DetHasher;

    fn build_hasher(&self) -> Self::Hasher {
        DetHasher::default()
    }
}

/// `HashMap` with reproducible iteration order across runs.
pub type DetHashMap<K, V> = std::collections::HashMap<K, V, DetBuildHasher>;

/// `HashSet` with reproducible iteration order across runs.
pub type DetHashSet<K> = std::collections::HashSet<K, DetBuildHasher>;

/// Hashes a value with the deterministic hasher.
#[must_use]
pub fn det_hash64<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DetHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(det_hash64("alpha"), det_hash64("alpha"));
        assert_ne!(det_hash64("alpha"), det_hash64("beta"));
    }

    #[test]
    fn map_iteration_order_is_reproducible() {
        let build = |keys: &[u32]| {
            let mut map = DetHashMap::default();
            for &k in keys {
                map.insert(k, k * 2);
            }
            map.keys().copied().collect::<Vec<_>>()
        };
        let a = build(&[5, 3, 9, 1, 7]);
        let b = build(&[5, 3, 9, 1, 7]);
        assert_eq!(a, b);
    }

    #[test]
    fn integer_writes_match_byte_writes() {
        let mut a = DetHasher::default();
        a.write_u64(0x0102_0304_0506_0708);
        let mut b = DetHasher::default();
        b.write(&0x0102_0304_0506_0708_u64.to_le_bytes());
        assert_eq!(a.finish(), b.finish());
    }
}
