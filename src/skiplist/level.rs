//! Level generator
//!
//! Draws node heights from a geometric distribution (p = 1/2) using a
//! xorshift64* generator, so lists can be made deterministic with a seed.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

/// Hard ceiling on node height
pub const MAX_LEVEL: usize = 32;

/// Height cap for a list expected to hold `expected_size` nodes:
/// `1 + floor(log2(expected_size))`, at most `MAX_LEVEL`
pub fn level_cap(expected_size: usize) -> usize {
    let levels = 1 + expected_size.max(1).ilog2() as usize;
    levels.min(MAX_LEVEL)
}

#[derive(Debug, Clone)]
pub struct LevelGenerator {
    state: u64,
    max_level: usize,
}

impl LevelGenerator {
    /// Generator seeded from the process's hash randomness
    pub fn new(expected_size: usize) -> Self {
        let seed = RandomState::new().build_hasher().finish();
        Self::with_seed(expected_size, seed)
    }

    pub fn with_seed(expected_size: usize, seed: u64) -> Self {
        Self {
            // xorshift never leaves the all-zero state
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
            max_level: level_cap(expected_size),
        }
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Height for a new node, in `1..=max_level`
    pub fn next_level(&mut self) -> usize {
        let heads = self.next_u64().trailing_ones() as usize;
        (heads + 1).min(self.max_level)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}
