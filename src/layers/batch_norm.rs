//! Batch normalization, spatial (per-channel) or per-activation (per-element)
//! (spec.md §4.5). Running statistics update via cumulative moving average
//! with factor α = 1/(1+iteration); γ and β are the learnable weights/biases.

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::activation::Activation;
use crate::error::{NetworkError, Result};
use crate::layers::{ParameterGradient, ParameterMut};
use crate::tensor::{AllocMode, Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BatchNormMode {
    Spatial,
    PerActivation,
}

#[derive(Clone)]
pub struct BatchNorm {
    pub input_shape: Shape,
    pub mode: BatchNormMode,
    pub activation: Activation,
    stat_len: usize,
    gamma: Vec<f32>,
    beta: Vec<f32>,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
    iteration: u64,
    grad_gamma: Vec<f32>,
    grad_beta: Vec<f32>,
    input_cache: Option<Tensor>,
    output_cache: Option<Tensor>,
    x_hat_cache: Option<Vec<f32>>,
    batch_var_cache: Option<Vec<f32>>,
}

const EPS: f32 = f32::EPSILON;

impl BatchNorm {
    pub fn new(c: usize, h: usize, w: usize, mode: BatchNormMode, activation: Activation) -> Self {
        let stat_len = match mode {
            BatchNormMode::Spatial => c,
            BatchNormMode::PerActivation => c * h * w,
        };
        BatchNorm {
            input_shape: Shape::unbatched(c, h, w),
            mode,
            activation,
            stat_len,
            gamma: vec![1.0; stat_len],
            beta: vec![0.0; stat_len],
            running_mean: vec![0.0; stat_len],
            running_var: vec![1.0; stat_len],
            iteration: 0,
            grad_gamma: vec![0.0; stat_len],
            grad_beta: vec![0.0; stat_len],
            input_cache: None,
            output_cache: None,
            x_hat_cache: None,
            batch_var_cache: None,
        }
    }

    #[inline]
    fn group_of(&self, p: usize) -> usize {
        match self.mode {
            BatchNormMode::Spatial => p / (self.input_shape.h * self.input_shape.w),
            BatchNormMode::PerActivation => p,
        }
    }

    /// How many elements feed each statistic group: `N·H·W` for spatial
    /// (shared across channel), `N` for per-activation.
    fn group_population(&self, n: usize) -> usize {
        match self.mode {
            BatchNormMode::Spatial => n * self.input_shape.h * self.input_shape.w,
            BatchNormMode::PerActivation => n,
        }
    }

    pub fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        if input.shape().c != self.input_shape.c
            || input.shape().h != self.input_shape.h
            || input.shape().w != self.input_shape.w
        {
            return Err(NetworkError::ShapeMismatch {
                expected: self.input_shape.to_string(),
                found: input.shape().to_string(),
            });
        }
        let n = input.n();
        let chw = self.input_shape.chw();

        let (mean, var) = if training {
            let (sum, sumsq) = (0..n)
                .into_par_iter()
                .fold(
                    || (vec![0.0f32; self.stat_len], vec![0.0f32; self.stat_len]),
                    |(mut sum, mut sumsq), ni| {
                        for (p, &v) in input.sample(ni).iter().enumerate() {
                            let g = self.group_of(p);
                            sum[g] += v;
                            sumsq[g] += v * v;
                        }
                        (sum, sumsq)
                    },
                )
                .reduce(
                    || (vec![0.0f32; self.stat_len], vec![0.0f32; self.stat_len]),
                    |(mut a, mut asq), (b, bsq)| {
                        for (x, y) in a.iter_mut().zip(b) {
                            *x += y;
                        }
                        for (x, y) in asq.iter_mut().zip(bsq) {
                            *x += y;
                        }
                        (a, asq)
                    },
                );
            let pop = self.group_population(n) as f32;
            let mean: Vec<f32> = sum.iter().map(|&s| s / pop).collect();
            let var: Vec<f32> = sumsq
                .iter()
                .zip(&mean)
                .map(|(&sq, &m)| (sq / pop - m * m).max(0.0))
                .collect();

            let alpha = 1.0 / (1.0 + self.iteration as f32);
            for i in 0..self.stat_len {
                self.running_mean[i] = (1.0 - alpha) * self.running_mean[i] + alpha * mean[i];
                self.running_var[i] = (1.0 - alpha) * self.running_var[i] + alpha * var[i];
            }
            self.iteration += 1;
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let mut x_hat = vec![0.0f32; n * chw];
        let mut pre = Tensor::new(n, self.input_shape.c, self.input_shape.h, self.input_shape.w, AllocMode::Default);
        for ni in 0..n {
            let x = input.sample(ni);
            let out = pre.sample_mut(ni);
            let xh = &mut x_hat[ni * chw..(ni + 1) * chw];
            for (p, (&v, (o, h))) in x.iter().zip(out.iter_mut().zip(xh.iter_mut())).enumerate() {
                let g = self.group_of(p);
                let normalized = (v - mean[g]) / (var[g] + EPS).sqrt();
                *h = normalized;
                *o = normalized * self.gamma[g] + self.beta[g];
            }
        }

        let mut output = Tensor::like(&pre, AllocMode::Default);
        self.activation.forward(pre.as_slice(), output.as_mut_slice());

        self.input_cache = Some(input.duplicate());
        self.output_cache = Some(output.duplicate());
        self.x_hat_cache = Some(x_hat);
        self.batch_var_cache = Some(var);
        Ok(output)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let x_hat = self.x_hat_cache.as_ref().expect("backward before forward").clone();
        let var = self.batch_var_cache.as_ref().expect("backward before forward").clone();
        let output = self.output_cache.as_ref().expect("backward before forward");
        let n = grad_output.n();
        let chw = self.input_shape.chw();
        let pop = self.group_population(n) as f32;

        let mut dz = grad_output.as_slice().to_vec();
        self.activation.backward_inplace(output.as_slice(), &mut dz);

        self.grad_gamma.fill(0.0);
        self.grad_beta.fill(0.0);
        for ni in 0..n {
            let dz_n = &dz[ni * chw..(ni + 1) * chw];
            let xh_n = &x_hat[ni * chw..(ni + 1) * chw];
            for (p, (&g, &xh)) in dz_n.iter().zip(xh_n).enumerate() {
                let group = self.group_of(p);
                self.grad_gamma[group] += g * xh;
                self.grad_beta[group] += g;
            }
        }

        // Closed-form batch-norm input gradient expressed via the already
        // computed dgamma = Σ(dy·x̂) and dbeta = Σ(dy):
        //   dx_i = (γ / (m·√(σ²+ε))) · (m·dy_i − dbeta − x̂_i·dgamma)
        let mut dx = Tensor::new(n, self.input_shape.c, self.input_shape.h, self.input_shape.w, AllocMode::Default);
        for ni in 0..n {
            let dz_n = &dz[ni * chw..(ni + 1) * chw];
            let xh_n = &x_hat[ni * chw..(ni + 1) * chw];
            let dxn = dx.sample_mut(ni);
            for (p, ((d, &g), &xh)) in dxn.iter_mut().zip(dz_n).zip(xh_n).enumerate() {
                let group = self.group_of(p);
                let inv_std = 1.0 / (var[group] + EPS).sqrt();
                let scale = self.gamma[group] * inv_std / pop;
                *d = scale * (pop * g - self.grad_beta[group] - xh * self.grad_gamma[group]);
            }
        }
        Ok(dx)
    }

    pub fn gradients(&self) -> ParameterGradient<'_> {
        ParameterGradient {
            weights: &self.grad_gamma,
            biases: &self.grad_beta,
        }
    }

    pub fn parameters_mut(&mut self) -> ParameterMut<'_> {
        ParameterMut {
            weights: &mut self.gamma,
            biases: &mut self.beta,
        }
    }

    /// Running statistics, for serialization (spec.md §6: "for batch-norm
    /// additionally mode byte and running μ, σ², iteration").
    pub fn running_stats(&self) -> (&[f32], &[f32], u64) {
        (&self.running_mean, &self.running_var, self.iteration)
    }

    pub fn set_running_stats(&mut self, mean: Vec<f32>, var: Vec<f32>, iteration: u64) -> Result<()> {
        if mean.len() != self.stat_len || var.len() != self.stat_len {
            return Err(NetworkError::ShapeMismatch {
                expected: format!("{} elements", self.stat_len),
                found: format!("{}/{} elements", mean.len(), var.len()),
            });
        }
        self.running_mean = mean;
        self.running_var = var;
        self.iteration = iteration;
        Ok(())
    }

    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for &g in &self.gamma {
            hasher.update(g.to_le_bytes());
        }
        for &b in &self.beta {
            hasher.update(b.to_le_bytes());
        }
        for &m in &self.running_mean {
            hasher.update(m.to_le_bytes());
        }
        for &v in &self.running_var {
            hasher.update(v.to_le_bytes());
        }
        hasher.finalize().into()
    }
}
