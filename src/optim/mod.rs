//! Pluggable per-parameter update rules: plain SGD, AdaDelta, Adam, AdaMax
//! (spec.md §4.7). Each rule is a pure function of `(θ, g, state)`; the
//! trainer owns one [`OptimizerState`] per weighted layer and feeds it the
//! gradient the layer itself accumulated during backward.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateRule {
    /// θ ← θ − (η/m)·g − (η·λ/m)·θ; biases are excluded from the L2 term.
    Sgd { lr: f32, l2: f32 },
    /// E[g²] ← ρ·E[g²] + (1−ρ)·g²; Δθ = −√(E[Δθ²]+ε)/√(E[g²]+ε)·g;
    /// E[Δθ²] ← ρ·E[Δθ²] + (1−ρ)·Δθ²; θ ← θ + Δθ − λ·θ.
    AdaDelta { rho: f32, eps: f32, l2: f32 },
    /// m ← β₁m + (1−β₁)g; v ← β₂v + (1−β₂)g²;
    /// η_t = η·√(1−β₂ᵗ)/(1−β₁ᵗ); θ ← θ − η_t·m/(√v + ε).
    Adam { lr: f32, beta1: f32, beta2: f32, eps: f32 },
    /// m ← β₁m + (1−β₁)g; u ← max(β₂u, |g|); θ ← θ − η/(1−β₁ᵗ)·m/u.
    AdaMax { lr: f32, beta1: f32, beta2: f32 },
}

/// Per-parameter-vector accumulators a stateful rule needs across steps.
/// `Sgd` carries none.
#[derive(Debug, Clone)]
enum Accumulator {
    None,
    AdaDelta { acc_grad: Vec<f32>, acc_delta: Vec<f32> },
    Adam { m: Vec<f32>, v: Vec<f32>, t: u64 },
    AdaMax { m: Vec<f32>, u: Vec<f32>, t: u64 },
}

impl Accumulator {
    fn zeroed(rule: &UpdateRule, len: usize) -> Self {
        match rule {
            UpdateRule::Sgd { .. } => Accumulator::None,
            UpdateRule::AdaDelta { .. } => Accumulator::AdaDelta {
                acc_grad: vec![0.0; len],
                acc_delta: vec![0.0; len],
            },
            UpdateRule::Adam { .. } => Accumulator::Adam {
                m: vec![0.0; len],
                v: vec![0.0; len],
                t: 0,
            },
            UpdateRule::AdaMax { .. } => Accumulator::AdaMax {
                m: vec![0.0; len],
                u: vec![0.0; len],
                t: 0,
            },
        }
    }
}

/// Accumulator state for one weighted layer's weight vector and bias
/// vector, lazily sized on first use.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    weights: Option<Accumulator>,
    biases: Option<Accumulator>,
}

impl OptimizerState {
    pub fn new() -> Self {
        OptimizerState {
            weights: None,
            biases: None,
        }
    }
}

impl Default for OptimizerState {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateRule {
    /// Applies the rule in place to `weights`/`biases` given their
    /// gradients (the raw per-batch sum, as accumulated by the layer over
    /// all `m` rows — not pre-averaged by the caller) and the batch size
    /// `m`. Only plain SGD divides by `m` itself, per its own update
    /// formula; AdaDelta/Adam/AdaMax consume `grad` as the accumulated sum.
    pub fn apply(
        &self,
        state: &mut OptimizerState,
        weights: &mut [f32],
        grad_weights: &[f32],
        biases: &mut [f32],
        grad_biases: &[f32],
        batch_size: usize,
    ) {
        let w_acc = state
            .weights
            .get_or_insert_with(|| Accumulator::zeroed(self, weights.len()));
        self.apply_vector(w_acc, weights, grad_weights, batch_size, true);

        let b_acc = state
            .biases
            .get_or_insert_with(|| Accumulator::zeroed(self, biases.len()));
        self.apply_vector(b_acc, biases, grad_biases, batch_size, false);
    }

    fn apply_vector(&self, acc: &mut Accumulator, theta: &mut [f32], grad: &[f32], m: usize, apply_l2: bool) {
        let m = m.max(1) as f32;
        match (self, acc) {
            (UpdateRule::Sgd { lr, l2 }, Accumulator::None) => {
                for (t, &g) in theta.iter_mut().zip(grad) {
                    let l2_term = if apply_l2 { (lr * l2 / m) * *t } else { 0.0 };
                    *t -= (lr / m) * g + l2_term;
                }
            }
            (UpdateRule::AdaDelta { rho, eps, l2 }, Accumulator::AdaDelta { acc_grad, acc_delta }) => {
                for i in 0..theta.len() {
                    let g = grad[i];
                    acc_grad[i] = rho * acc_grad[i] + (1.0 - rho) * g * g;
                    let delta = -((acc_delta[i] + eps).sqrt() / (acc_grad[i] + eps).sqrt()) * g;
                    acc_delta[i] = rho * acc_delta[i] + (1.0 - rho) * delta * delta;
                    let l2_term = if apply_l2 { l2 * theta[i] } else { 0.0 };
                    theta[i] += delta - l2_term;
                }
            }
            (UpdateRule::Adam { lr, beta1, beta2, eps }, Accumulator::Adam { m: mom, v, t }) => {
                *t += 1;
                let step = *t as i32;
                let bias_correction1 = 1.0 - beta1.powi(step);
                let bias_correction2 = 1.0 - beta2.powi(step);
                let lr_t = lr * bias_correction2.sqrt() / bias_correction1;
                for i in 0..theta.len() {
                    let g = grad[i];
                    mom[i] = beta1 * mom[i] + (1.0 - beta1) * g;
                    v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
                    theta[i] -= lr_t * mom[i] / (v[i].sqrt() + eps);
                }
            }
            (UpdateRule::AdaMax { lr, beta1, beta2 }, Accumulator::AdaMax { m: mom, u, t }) => {
                *t += 1;
                let bias_correction1 = 1.0 - beta1.powi(*t as i32);
                for i in 0..theta.len() {
                    let g = grad[i];
                    mom[i] = beta1 * mom[i] + (1.0 - beta1) * g;
                    u[i] = (beta2 * u[i]).max(g.abs());
                    if u[i] > 0.0 {
                        theta[i] -= (lr / bias_correction1) * mom[i] / u[i];
                    }
                }
            }
            _ => unreachable!("Accumulator::zeroed always matches its UpdateRule variant"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgd_moves_theta_opposite_the_gradient() {
        let rule = UpdateRule::Sgd { lr: 1.0, l2: 0.0 };
        let mut state = OptimizerState::new();
        let mut weights = vec![1.0, 1.0];
        let grad = vec![0.5, -0.5];
        let mut biases = vec![0.0];
        let grad_b = vec![0.0];
        rule.apply(&mut state, &mut weights, &grad, &mut biases, &grad_b, 1);
        assert_eq!(weights, vec![0.5, 1.5]);
    }

    #[test]
    fn adam_first_step_matches_closed_form() {
        let rule = UpdateRule::Adam { lr: 0.1, beta1: 0.9, beta2: 0.999, eps: 1e-8 };
        let mut state = OptimizerState::new();
        let mut weights = vec![0.0];
        let grad = vec![1.0];
        let mut biases = vec![0.0];
        let grad_b = vec![0.0];
        rule.apply(&mut state, &mut weights, &grad, &mut biases, &grad_b, 1);
        assert!((weights[0] - (-0.1)).abs() < 1e-4);
    }

    #[test]
    fn adadelta_and_adamax_run_without_panicking() {
        let mut weights = vec![0.3, -0.2];
        let grad = vec![0.1, 0.2];
        let mut biases = vec![0.0];
        let grad_b = vec![0.05];

        let mut state = OptimizerState::new();
        UpdateRule::AdaDelta { rho: 0.95, eps: 1e-6, l2: 0.0 }
            .apply(&mut state, &mut weights, &grad, &mut biases, &grad_b, 4);

        let mut state = OptimizerState::new();
        UpdateRule::AdaMax { lr: 0.002, beta1: 0.9, beta2: 0.999 }
            .apply(&mut state, &mut weights, &grad, &mut biases, &grad_b, 4);
    }
}
