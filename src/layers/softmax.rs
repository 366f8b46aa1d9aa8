//! Softmax layer: a dense linear transform followed by a row-wise
//! normalization (spec.md §4.5), paired exclusively with
//! [`crate::cost::Cost::LogLikelihood`]. The combined backward produces
//! `ŷ − y` directly without invoking a separate softmax derivative — the
//! fused-backward resolution to spec.md §9's Open Question about
//! double-applying the activation derivative.

use ndarray::{Array2, ArrayView2};
use sha2::{Digest, Sha256};

use crate::error::{NetworkError, Result};
use crate::init::{BiasInit, WeightInit};
use crate::layers::{ParameterGradient, ParameterMut};
use crate::tensor::{AllocMode, Shape, Tensor};

#[derive(Clone)]
pub struct Softmax {
    pub input_shape: Shape,
    pub output_shape: Shape,
    k_in: usize,
    k_out: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_biases: Vec<f32>,
    input_cache: Option<Tensor>,
    output_cache: Option<Tensor>,
}

impl Softmax {
    pub fn new(
        k_in: usize,
        k_out: usize,
        weight_init: WeightInit,
        bias_init: BiasInit,
        rng: &mut impl rand::Rng,
    ) -> Self {
        let mut weights = vec![0.0f32; k_in * k_out];
        weight_init.fill(&mut weights, k_in, k_out, rng);
        let mut biases = vec![0.0f32; k_out];
        bias_init.fill(&mut biases, rng);
        Softmax {
            input_shape: Shape::unbatched(k_in, 1, 1),
            output_shape: Shape::unbatched(k_out, 1, 1),
            k_in,
            k_out,
            weights,
            biases,
            grad_weights: vec![0.0; k_in * k_out],
            grad_biases: vec![0.0; k_out],
            input_cache: None,
            output_cache: None,
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.shape().chw() != self.k_in {
            return Err(NetworkError::ShapeMismatch {
                expected: format!("chw={}", self.k_in),
                found: format!("chw={}", input.shape().chw()),
            });
        }
        let n = input.n();
        let x = ArrayView2::from_shape((n, self.k_in), input.as_slice())
            .expect("input slice matches (n, k_in)");
        let w = ArrayView2::from_shape((self.k_in, self.k_out), &self.weights)
            .expect("weights buffer matches (k_in, k_out)");
        let mut z = x.dot(&w);
        for mut row in z.rows_mut() {
            for (v, b) in row.iter_mut().zip(&self.biases) {
                *v += b;
            }
        }

        let mut output = Tensor::new(n, self.k_out, 1, 1, AllocMode::Default);
        for (row_in, row_out) in z.rows().into_iter().zip(output.chunks_mut()) {
            let max = row_in.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for (o, &v) in row_out.iter_mut().zip(row_in) {
                *o = (v - max).exp();
                sum += *o;
            }
            for o in row_out.iter_mut() {
                *o /= sum;
            }
        }

        self.input_cache = Some(input.duplicate());
        self.output_cache = Some(output.duplicate());
        Ok(output)
    }

    /// `grad_output` here is the cost gradient already fused as `ŷ − y`
    /// (see [`crate::cost::Cost::gradient_wrt_preactivation`]); it is used
    /// directly as `dz`, with no further softmax-derivative multiplication.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input_cache.as_ref().expect("backward before forward");
        let n = grad_output.n();
        let dz = grad_output.as_slice();

        let x = ArrayView2::from_shape((n, self.k_in), input.as_slice())
            .expect("cached input matches (n, k_in)");
        let dz_view =
            ArrayView2::from_shape((n, self.k_out), dz).expect("dz matches (n, k_out)");
        let w = ArrayView2::from_shape((self.k_in, self.k_out), &self.weights)
            .expect("weights buffer matches (k_in, k_out)");

        let dw: Array2<f32> = x.t().dot(&dz_view);
        self.grad_weights.copy_from_slice(dw.as_slice().unwrap());
        for (gb, col) in self.grad_biases.iter_mut().zip(dz_view.columns()) {
            *gb = col.sum();
        }

        let dx: Array2<f32> = dz_view.dot(&w.t());
        let mut out = Tensor::new(n, self.input_shape.c, self.input_shape.h, self.input_shape.w, AllocMode::Default);
        out.as_mut_slice().copy_from_slice(dx.as_slice().unwrap());
        Ok(out)
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
