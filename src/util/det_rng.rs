//! Deterministic pseudo-random number generator.
//!
//! The engine's exploration must be a pure function of the session seed, so
//! all random choices flow through [`DetRng`]: a splitmix64-seeded
//! xorshift64* stream. The generator is intentionally simple; statistical
//! quality beyond "uncorrelated enough to diversify schedules" is not a
//! requirement here.

/// Deterministic PRNG used for scheduling decisions.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a generator from a seed.
    ///
    /// The seed is passed through a splitmix64 finalizer so that nearby
    /// seeds (0, 1, 2, ...) produce unrelated streams.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        let mut s = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
        s = (s ^ (s >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        s = (s ^ (s >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        s ^= s >> 31;
        // xorshift has a fixed point at zero.
        if s == 0 {
            s = 0x4d59_5df4_d0f3_3173;
        }
        Self { state: s }
    }

    /// Returns the next value in the stream.
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Returns a value uniformly distributed in `0..bound`.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    #[must_use]
    pub fn next_below(&mut self, bound: u64) -> u64 {
        assert!(bound > 0, "next_below bound must be positive");
        // Widening-multiply range reduction; the bias for the bounds used
        // here (thread counts, offsets) is far below observable.
        let wide = u128::from(self.next_u64()) * u128::from(bound);
        (wide >> 64) as u64
    }

    /// Returns a uniformly chosen index into a collection of `len` items.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    #[must_use]
    pub fn index(&mut self, len: usize) -> usize {
        self.next_below(len as u64) as usize
    }

}
