//! Deterministic PRNG for lane incident rolls.
//!
//! SplitMix64: 8 bytes of state, platform independent. Risk rolls seed a
//! fresh generator per `(seed, tick, lane)` so no RNG state needs to be
//! persisted in the world.

use crate::fixed::Ticks;
use crate::signature::StateHash;

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generator keyed by FNV-1a of `"{seed}|{tick}|{key}"`.
    pub fn keyed(seed: u64, tick: Ticks, key: &str) -> Self {
        let mut h = StateHash::new();
        h.write_str(&format!("{seed}|{tick}|{key}"));
        Self::new(h.finish())
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform-ish value in `[0, bound)`. Zero bound yields zero.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }

    pub fn state(&self) -> u64 {
        self.state
    }
}
