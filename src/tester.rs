//! Pluggable accuracy testers (spec.md §6's "progress surface"): argmax
//! equality for mutually exclusive classes (the default), per-class
//! thresholding for overlapping classes, and bounded distance for
//! regression targets.

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TesterKind {
    /// Correct iff arg-max of the prediction equals arg-max of the target.
    Argmax,
    /// Correct iff every output crosses `threshold` on the same side as
    /// the corresponding target.
    Threshold { threshold: f32 },
    /// Correct iff the Euclidean distance between prediction and target
    /// is at most `tolerance`.
    BoundedDistance { tolerance: f32 },
}

impl TesterKind {
    /// Fraction of samples (in `[0, 1]`) the prediction batch scores
    /// correct against the target batch, under this tester's rule.
    pub fn accuracy(&self, predictions: &Tensor, targets: &Tensor) -> f32 {
        let n = predictions.n();
        if n == 0 {
            return 0.0;
        }
        let mut correct = 0usize;
        for i in 0..n {
            let p = predictions.sample(i);
            let t = targets.sample(i);
            if self.sample_is_correct(p, t) {
                correct += 1;
            }
        }
        correct as f32 / n as f32
    }

    fn sample_is_correct(&self, prediction: &[f32], target: &[f32]) -> bool {
        match self {
            TesterKind::Argmax => argmax(prediction) == argmax(target),
            TesterKind::Threshold { threshold } => prediction
                .iter()
                .zip(target)
                .all(|(&p, &t)| (p >= *threshold) == (t >= *threshold)),
            TesterKind::BoundedDistance { tolerance } => {
                let sum_sq: f32 = prediction.iter().zip(target).map(|(&p, &t)| (p - t).powi(2)).sum();
                sum_sq.sqrt() <= *tolerance
            }
        }
    }
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_tester_scores_class_match() {
        let predictions = Tensor::from_vec(vec![0.1, 0.9, 0.2, 0.8], 2, 2, 1, 1).unwrap();
        let targets = Tensor::from_vec(vec![0.0, 1.0, 1.0, 0.0], 2, 2, 1, 1).unwrap();
        let tester = TesterKind::Argmax;
        assert_eq!(tester.accuracy(&predictions, &targets), 0.5);
    }

    #[test]
    fn threshold_tester_requires_every_output_to_agree() {
        let predictions = Tensor::from_vec(vec![0.6, 0.4], 1, 2, 1, 1).unwrap();
        let targets = Tensor::from_vec(vec![1.0, 0.0], 1, 2, 1, 1).unwrap();
        let tester = TesterKind::Threshold { threshold: 0.5 };
        assert_eq!(tester.accuracy(&predictions, &targets), 1.0);
    }

    #[test]
    fn bounded_distance_tester_accepts_small_errors() {
        let predictions = Tensor::from_vec(vec![1.0, 2.05], 1, 2, 1, 1).unwrap();
        let targets = Tensor::from_vec(vec![1.0, 2.0], 1, 2, 1, 1).unwrap();
        let tester = TesterKind::BoundedDistance { tolerance: 0.1 };
        assert_eq!(tester.accuracy(&predictions, &targets), 1.0);
    }
}
