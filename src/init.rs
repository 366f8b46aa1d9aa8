//! Weight and bias initialization (spec.md §4.4).
//!
//! Grounded on the teacher's `InitType` enum in `src/nn/mod.rs`
//! (`XavierUniform`/`Normal`, `KaimingUniform`/`Normal`, `Zero`, `Constant`,
//! `Uniform`, `Normal`), renamed to the spec's LeCun/Glorot/He naming and
//! narrowed to exactly the five distributions spec.md calls for.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightInit {
    LeCunUniform,
    GlorotNormal,
    GlorotUniform,
    HeNormal,
    HeUniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasInit {
    Zero,
    Gaussian,
}

impl WeightInit {
    /// Fills `weights` (length `k_in * k_out`) with fan-in/fan-out-scaled
    /// samples, per the formulas in spec.md §4.4. For convolutional kernels,
    /// `k_in = C_in * K_h * K_w` and `k_out` is the kernel count.
    pub fn fill(&self, weights: &mut [f32], k_in: usize, k_out: usize, rng: &mut impl Rng) {
        let k_in = k_in.max(1) as f32;
        let k_out = k_out.max(1) as f32;
        match self {
            WeightInit::LeCunUniform => {
                let bound = (3.0 / k_in).sqrt();
                let dist = Uniform::new_inclusive(-bound, bound);
                for w in weights.iter_mut() {
                    *w = dist.sample(rng);
                }
            }
            WeightInit::GlorotNormal => {
                let std = (2.0 / (k_in + k_out)).sqrt();
                let dist = Normal::new(0.0, std as f64).expect("positive std");
                for w in weights.iter_mut() {
                    *w = dist.sample(rng) as f32;
                }
            }
            WeightInit::GlorotUniform => {
                let bound = (6.0 / (k_in + k_out)).sqrt();
                let dist = Uniform::new_inclusive(-bound, bound);
                for w in weights.iter_mut() {
                    *w = dist.sample(rng);
                }
            }
            WeightInit::HeNormal => {
                let std = (2.0 / k_in).sqrt();
                let dist = Normal::new(0.0, std as f64).expect("positive std");
                for w in weights.iter_mut() {
                    *w = dist.sample(rng) as f32;
                }
            }
            WeightInit::HeUniform => {
                let bound = (6.0 / k_in).sqrt();
                let dist = Uniform::new_inclusive(-bound, bound);
                for w in weights.iter_mut() {
                    *w = dist.sample(rng);
                }
            }
        }
    }
}

impl BiasInit {
    pub fn fill(&self, biases: &mut [f32], rng: &mut impl Rng) {
        match self {
            BiasInit::Zero => biases.fill(0.0),
            BiasInit::Gaussian => {
                let dist = Normal::new(0.0, 1.0).expect("positive std");
                for b in biases.iter_mut() {
                    *b = dist.sample(rng) as f32;
                }
            }
        }
    }
}

/// Batch-norm gamma/beta initialization: gamma to 1, beta to 0 in both
/// spatial and per-activation modes (spec.md §4.4).
pub fn init_batch_norm_affine(gamma: &mut [f32], beta: &mut [f32]) {
    gamma.fill(1.0);
    beta.fill(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn lecun_uniform_stays_within_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        let k_in = 16;
        let mut w = vec![0.0f32; 100];
        WeightInit::LeCunUniform.fill(&mut w, k_in, 8, &mut rng);
        let bound = (3.0f32 / k_in as f32).sqrt();
        assert!(w.iter().all(|&v| v.abs() <= bound + 1e-6));
    }

    #[test]
    fn bias_zero_init_is_all_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut b = vec![1.0f32; 5];
        BiasInit::Zero.fill(&mut b, &mut rng);
        assert!(b.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn batch_norm_affine_defaults() {
        let mut gamma = vec![0.0f32; 4];
        let mut beta = vec![1.0f32; 4];
        init_batch_norm_affine(&mut gamma, &mut beta);
        assert!(gamma.iter().all(|&v| v == 1.0));
        assert!(beta.iter().all(|&v| v == 0.0));
    }
}
