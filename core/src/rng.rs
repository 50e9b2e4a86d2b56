//! Deterministic random number generation.
//!
//! RULE: Nothing in training or inference may call a platform RNG.
//! All randomness flows through StageRng instances derived from a
//! single master seed (the `seed` field of the data/model params).
//!
//! Each pipeline stage gets its own stream, seeded from
//! (master_seed XOR stage_index * golden-ratio constant). This means:
//!   - Adding a new stage never changes existing stages' streams.
//!   - Retraining with the same seed and data rebuilds identical models.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single pipeline stage.
pub struct StageRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StageRng {
    /// Create a stage RNG from the master seed and a stable stage
    /// index. The index must never change once assigned.
    pub fn new(master_seed: u64, stage_index: u64) -> Self {
        let derived_seed = master_seed ^ (stage_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn for_stage(master_seed: u64, stage: Stage) -> Self {
        Self::new(master_seed, stage as u64).with_name(stage.name())
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Draw a raw u64 (full range). Used to seed per-tree streams.
    pub fn next_u64(&mut self) -> u64 {
        use rand::RngCore;
        self.inner.next_u64()
    }

    /// Roll an index in [0, n).
    pub fn next_below(&mut self, n: usize) -> usize {
        use rand::Rng;
        assert!(n > 0, "n must be > 0");
        self.inner.gen_range(0..n)
    }

    /// Uniform float in [low, high).
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }

    /// `amount` distinct indices from [0, n), in random order.
    pub fn sample_indices(&mut self, n: usize, amount: usize) -> Vec<usize> {
        rand::seq::index::sample(&mut self.inner, n, amount.min(n)).into_vec()
    }

    /// A child stream for one estimator in an ensemble.
    pub fn fork(&mut self, name: &'static str) -> StageRng {
        StageRng {
            name,
            inner: Pcg64Mcg::seed_from_u64(self.next_u64()),
        }
    }
}

/// Stable stage slot assignments.
/// NEVER reorder or remove entries; only append.
/// Reordering changes every stage's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum Stage {
    Split = 0,
    Oversample = 1,
    Undersample = 2,
    Forest = 3,
    Boosting = 4,
    Isolation = 5,
    Explainer = 6,
    Forecast = 7,
    // Append new stages here.
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Oversample => "oversample",
            Self::Undersample => "undersample",
            Self::Forest => "forest",
            Self::Boosting => "boosting",
            Self::Isolation => "isolation",
            Self::Explainer => "explainer",
            Self::Forecast => "forecast",
        }
    }
}
