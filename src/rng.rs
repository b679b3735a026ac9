//! # Draw randomness
//!
//! Deterministic generator behind random allocation and the drawing engine.
//!
//! A seed string is hashed with FNV-1a (64-bit), finalized with splitmix64 so
//! nearby seeds diverge, and then stepped with the 64-bit MMIX linear
//! congruential generator (multiplier 6364136223846793005, increment
//! 1442695040888963407, modulus 2^64). `next_f64` takes the top 53 bits of
//! each state, so every value lies in the half-open interval [0, 1).
//!
//! Re-running a draw with the same seed against the same eligible-ticket
//! snapshot always yields the same winners, which is what makes a recorded
//! seed a usable audit artifact.
use uuid::Uuid;

const MULTIPLIER: u64 = 6364136223846793005;
const INCREMENT: u64 = 1442695040888963407;

pub struct DrawRng {
    state: u64,
}

impl DrawRng {
    pub fn from_seed(seed: &str) -> Self {
        Self {
            state: splitmix64(fnv1a64(seed.as_bytes())),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT);

        self.state
    }

    /// Uniform value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform index in [0, bound). `bound` must be nonzero.
    pub fn next_index(&mut self, bound: usize) -> usize {
        let index = (self.next_f64() * bound as f64) as usize;

        index.min(bound - 1)
    }

    /// Unbiased Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_index(i + 1);
            items.swap(i, j);
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;

    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }

    hash
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);

    x ^ (x >> 31)
}

/// Fresh seed for draws where the caller did not supply one. Persisted with
/// the draw so the result stays reproducible.
pub fn generate_seed() -> String {
    Uuid::new_v4().simple().to_string()
}
