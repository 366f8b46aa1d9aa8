//! Convolutional layer: cross-correlation (default) or true convolution,
//! valid mode, unit stride (spec.md §4.5).
//!
//! Forward/backward parallelize over the batch axis with `rayon`, matching
//! the "parallel threads within a batch" model of spec.md §5: every `n`
//! writes a disjoint slice of the output/dX tensor, so no synchronization is
//! needed inside the parallel region. The weight-gradient reduction over N
//! uses `rayon`'s `fold` + `reduce` into per-thread partial sums followed by
//! a single serial combine, per spec.md §5's reduction note.

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::activation::Activation;
use crate::config::ConvolutionMode;
use crate::error::{NetworkError, Result};
use crate::init::{BiasInit, WeightInit};
use crate::layers::{KernelShape, ParameterGradient, ParameterMut};
use crate::tensor::{AllocMode, Shape, Tensor};

#[derive(Clone)]
pub struct Convolutional {
    pub input_shape: Shape,
    pub output_shape: Shape,
    pub activation: Activation,
    pub mode: ConvolutionMode,
    c_in: usize,
    num_kernels: usize,
    kernel: KernelShape,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_biases: Vec<f32>,
    input_cache: Option<Tensor>,
    output_cache: Option<Tensor>,
}

impl Convolutional {
    pub fn new(
        c_in: usize,
        h: usize,
        w: usize,
        num_kernels: usize,
        kernel: KernelShape,
        mode: ConvolutionMode,
        activation: Activation,
        weight_init: WeightInit,
        bias_init: BiasInit,
        rng: &mut impl rand::Rng,
    ) -> Result<Self> {
        if h < kernel.h || w < kernel.w {
            return Err(NetworkError::InvalidConfig(format!(
                "kernel {}x{} does not fit input {}x{}",
                kernel.h, kernel.w, h, w
            )));
        }
        let h_out = h - kernel.h + 1;
        let w_out = w - kernel.w + 1;
        let k_in = c_in * kernel.h * kernel.w;
        let mut weights = vec![0.0f32; num_kernels * k_in];
        weight_init.fill(&mut weights, k_in, num_kernels, rng);
        let mut biases = vec![0.0f32; num_kernels];
        bias_init.fill(&mut biases, rng);

        Ok(Convolutional {
            input_shape: Shape::unbatched(c_in, h, w),
            output_shape: Shape::unbatched(num_kernels, h_out, w_out),
            activation,
            mode,
            c_in,
            num_kernels,
            kernel,
            weights,
            biases,
            grad_weights: vec![0.0; num_kernels * k_in],
            grad_biases: vec![0.0; num_kernels],
            input_cache: None,
            output_cache: None,
        })
    }

    /// Index of `weights[k][c][u][v]`.
    #[inline]
    fn widx(&self, k: usize, c: usize, u: usize, v: usize) -> usize {
        ((k * self.c_in + c) * self.kernel.h + u) * self.kernel.w + v
    }

    /// Cross-correlation omits the kernel flip (spec.md §4.5); true
    /// convolution flips both spatial axes before the inner product.
    #[inline]
    fn kernel_at(&self, k: usize, c: usize, u: usize, v: usize) -> f32 {
        match self.mode {
            ConvolutionMode::CrossCorrelation => self.weights[self.widx(k, c, u, v)],
            ConvolutionMode::Convolution => {
                self.weights[self.widx(k, c, self.kernel.h - 1 - u, self.kernel.w - 1 - v)]
            }
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
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
        let (h_out, w_out) = (self.output_shape.h, self.output_shape.w);
        let mut pre = Tensor::new(n, self.num_kernels, h_out, w_out, AllocMode::Clean);

        pre.chunks_mut()
            .enumerate()
            .par_bridge()
            .for_each(|(ni, out_sample)| {
                let x = input.sample(ni);
                for k in 0..self.num_kernels {
                    for i in 0..h_out {
                        for j in 0..w_out {
                            let mut acc = self.biases[k];
                            for c in 0..self.c_in {
                                for u in 0..self.kernel.h {
                                    for v in 0..self.kernel.w {
                                        let xi = ((c * self.input_shape.h + i + u) * self.input_shape.w) + j + v;
                                        acc += x[xi] * self.kernel_at(k, c, u, v);
                                    }
                                }
                            }
                            let oi = (k * h_out + i) * w_out + j;
                            out_sample[oi] = acc;
                        }
                    }
                }
            });

        let mut output = Tensor::like(&pre, AllocMode::Default);
        self.activation.forward(pre.as_slice(), output.as_mut_slice());

        self.input_cache = Some(input.duplicate());
        self.output_cache = Some(output.duplicate());
        Ok(output)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input_cache.as_ref().expect("backward before forward").duplicate();
        let output = self.output_cache.as_ref().expect("backward before forward");
        let n = grad_output.n();
        let (h_out, w_out) = (self.output_shape.h, self.output_shape.w);
        let (h, w) = (self.input_shape.h, self.input_shape.w);

        let mut dz = grad_output.as_slice().to_vec();
        self.activation.backward_inplace(output.as_slice(), &mut dz);

        // Per-n partial (dW, dB) accumulated with fold, combined with reduce.
        let k_in = self.c_in * self.kernel.h * self.kernel.w;
        let (dw_sum, db_sum) = (0..n)
            .into_par_iter()
            .fold(
                || (vec![0.0f32; self.num_kernels * k_in], vec![0.0f32; self.num_kernels]),
                |(mut dw, mut db), ni| {
                    let x = input.sample(ni);
                    let dz_n = &dz[ni * self.num_kernels * h_out * w_out..(ni + 1) * self.num_kernels * h_out * w_out];
                    for k in 0..self.num_kernels {
                        for i in 0..h_out {
                            for j in 0..w_out {
                                let g = dz_n[(k * h_out + i) * w_out + j];
                                db[k] += g;
                                for c in 0..self.c_in {
                                    for u in 0..self.kernel.h {
                                        for v in 0..self.kernel.w {
                                            let xi = ((c * h + i + u) * w) + j + v;
                                            dw[self.widx(k, c, u, v)] += x[xi] * g;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    (dw, db)
                },
            )
            .reduce(
                || (vec![0.0f32; self.num_kernels * k_in], vec![0.0f32; self.num_kernels]),
                |(mut a_dw, mut a_db), (b_dw, b_db)| {
                    for (a, b) in a_dw.iter_mut().zip(b_dw) {
                        *a += b;
                    }
                    for (a, b) in a_db.iter_mut().zip(b_db) {
                        *a += b;
                    }
                    (a_dw, a_db)
                },
            );
        self.grad_weights.copy_from_slice(&dw_sum);
        self.grad_biases.copy_from_slice(&db_sum);

        let mut dx = Tensor::new(n, self.c_in, h, w, AllocMode::Clean);
        dx.chunks_mut()
            .enumerate()
            .par_bridge()
            .for_each(|(ni, dx_sample)| {
                let dz_n = &dz[ni * self.num_kernels * h_out * w_out..(ni + 1) * self.num_kernels * h_out * w_out];
                for k in 0..self.num_kernels {
                    for i in 0..h_out {
                        for j in 0..w_out {
                            let g = dz_n[(k * h_out + i) * w_out + j];
                            if g == 0.0 {
                                continue;
                            }
                            for c in 0..self.c_in {
                                for u in 0..self.kernel.h {
                                    for v in 0..self.kernel.w {
                                        let xi = ((c * h + i + u) * w) + j + v;
                                        dx_sample[xi] += g * self.kernel_at(k, c, u, v);
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Ok(dx)
    }

    pub fn gradients(&self) -> ParameterGradient<'_> {
        ParameterGradient {
            weights: &self.grad_weights,
            biases: &self.grad_biases,
        }
    }

    pub fn parameters_mut(&mut self) -> ParameterMut<'_> {
        ParameterMut {
            weights: &mut self.weights,
            biases: &mut self.biases,
        }
    }

    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for &w in &self.weights {
            hasher.update(w.to_le_bytes());
        }
        for &b in &self.biases {
            hasher.update(b.to_le_bytes());
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn two_sample_cross_correlation_matches_known_values() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = Convolutional::new(
            1,
            4,
            4,
            1,
            KernelShape { h: 3, w: 3 },
            ConvolutionMode::CrossCorrelation,
            Activation::Identity,
            WeightInit::HeUniform,
            BiasInit::Zero,
            &mut rng,
        )
        .unwrap();
        layer.weights.fill(1.0);
        layer.biases[0] = 0.0;

        let mut data = Vec::with_capacity(32);
        data.extend((0..16).map(|v| v as f32));
        data.extend((16..32).map(|v| v as f32));
        let input = Tensor::from_vec(data, 2, 1, 4, 4).unwrap();

        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape().h, 2);
        assert_eq!(output.shape().w, 2);
        assert_eq!(output.as_slice(), &[45.0, 54.0, 81.0, 90.0, 189.0, 198.0, 225.0, 234.0]);
    }

    #[test]
    fn backward_produces_matching_input_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Convolutional::new(
            1,
            4,
            4,
            2,
            KernelShape { h: 3, w: 3 },
            ConvolutionMode::CrossCorrelation,
            Activation::Relu,
            WeightInit::HeUniform,
            BiasInit::Zero,
            &mut rng,
        )
        .unwrap();
        let input = Tensor::new(1, 1, 4, 4, crate::tensor::AllocMode::Clean);
        let _ = layer.forward(&input).unwrap();
        let grad_output = Tensor::new(1, 2, 2, 2, crate::tensor::AllocMode::Clean);
        let dx = layer.backward(&grad_output).unwrap();
        assert_eq!(dx.shape(), input.shape());
    }
}
