//! Cost catalog: each variant pairs a scalar cost value with its gradient
//! with respect to the output layer's pre-activation (spec.md §4.3).
//!
//! Legal activation/cost pairings (spec.md §9 Open Questions, resolved):
//! softmax only with [`Cost::LogLikelihood`]; sigmoid required for
//! [`Cost::CrossEntropy`]; [`Cost::Quadratic`] accepts any activation.
//! [`Cost::legal_with`] enforces this at output-layer construction time.

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::error::NetworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cost {
    Quadratic,
    CrossEntropy,
    LogLikelihood,
}

impl Cost {
    /// Validates the activation this cost is being paired with at an
    /// output layer. Softmax is represented separately from
    /// [`Activation`] (it is a normalization step, spec.md §4.2), so
    /// callers building a softmax output layer should use
    /// [`Cost::LogLikelihood`] directly and never call this with
    /// `Activation::Identity` standing in for softmax.
    pub fn legal_with(&self, activation: Activation) -> Result<(), NetworkError> {
        match self {
            Cost::CrossEntropy if activation != Activation::Sigmoid => {
                Err(NetworkError::InvalidConfig(
                    "cross-entropy cost requires a sigmoid output activation".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Mean cost over a batch of `n` samples, given predictions `y_hat` and
    /// targets `y`, both of length `n * features`.
    pub fn value(&self, y_hat: &[f32], y: &[f32], n: usize) -> f32 {
        debug_assert_eq!(y_hat.len(), y.len());
        let features = y_hat.len() / n.max(1);
        match self {
            Cost::Quadratic => {
                let sum: f32 = y_hat
                    .iter()
                    .zip(y)
                    .map(|(&p, &t)| 0.5 * (p - t).powi(2))
                    .sum();
                sum / n as f32
            }
            Cost::CrossEntropy => {
                let sum: f32 = y_hat
                    .iter()
                    .zip(y)
                    .map(|(&p, &t)| {
                        let p = p.clamp(1e-7, 1.0 - 1e-7);
                        -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
                    })
                    .sum();
                sum / n as f32
            }
            Cost::LogLikelihood => {
                let mut sum = 0.0f32;
                for row in 0..n {
                    let base = row * features;
                    for col in 0..features {
                        let t = y[base + col];
                        if t != 0.0 {
                            let p = y_hat[base + col].max(1e-7);
                            sum -= t * p.ln();
                        }
                    }
                }
                sum / n as f32
            }
        }
    }

    /// Gradient of the cost with respect to the output layer's
    /// pre-activation, for every variant reducing to `ŷ - y` once paired
    /// with its required activation (spec.md §4.3).
    pub fn gradient_wrt_preactivation(
        &self,
        y_hat: &[f32],
        y: &[f32],
        activation_derivative: impl Fn(usize, f32) -> f32,
        out: &mut [f32],
    ) {
        match self {
            Cost::Quadratic => {
                for (i, o) in out.iter_mut().enumerate() {
                    let diff = y_hat[i] - y[i];
                    *o = diff * activation_derivative(i, y_hat[i]);
                }
            }
            Cost::CrossEntropy | Cost::LogLikelihood => {
                for (i, o) in out.iter_mut().enumerate() {
                    *o = y_hat[i] - y[i];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_entropy_rejects_non_sigmoid() {
        assert!(Cost::CrossEntropy.legal_with(Activation::Relu).is_err());
        assert!(Cost::CrossEntropy.legal_with(Activation::Sigmoid).is_ok());
    }

    #[test]
    fn quadratic_accepts_any_activation() {
        assert!(Cost::Quadratic.legal_with(Activation::Relu).is_ok());
        assert!(Cost::Quadratic.legal_with(Activation::Tanh).is_ok());
    }

    #[test]
    fn log_likelihood_gradient_is_yhat_minus_y() {
        let y_hat = vec![0.09, 0.2447, 0.6652];
        let y = vec![0.0, 0.0, 1.0];
        let mut out = vec![0.0; 3];
        Cost::LogLikelihood.gradient_wrt_preactivation(&y_hat, &y, |_, _| 1.0, &mut out);
        assert!((out[0] - 0.09).abs() < 1e-4);
        assert!((out[1] - 0.2447).abs() < 1e-4);
        assert!((out[2] - (-0.3348)).abs() < 1e-3);
    }
}
