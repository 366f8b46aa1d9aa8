//! Fully connected layer: `Y = X·W + B`, then activation (spec.md §4.5).
//!
//! Weight layout is row-major `(k_in × k_out)`, flattened for storage, as
//! spec.md §4.5 requires. The matrix algebra borrows the tensor's raw slice
//! as a zero-copy `ndarray` view rather than converting `Tensor` itself into
//! an `ndarray` container (see SPEC_FULL.md §4.1).

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::activation::Activation;
use crate::error::{NetworkError, Result};
use crate::init::{BiasInit, WeightInit};
use crate::layers::{ParameterGradient, ParameterMut};
use crate::tensor::{AllocMode, Shape, Tensor};

#[derive(Clone)]
pub struct FullyConnected {
    pub input_shape: Shape,
    pub output_shape: Shape,
    pub activation: Activation,
    k_in: usize,
    k_out: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_biases: Vec<f32>,
    input_cache: Option<Tensor>,
    output_cache: Option<Tensor>,
}

impl FullyConnected {
    pub fn new(
        k_in: usize,
        k_out: usize,
        activation: Activation,
        weight_init: WeightInit,
        bias_init: BiasInit,
        rng: &mut impl Rng,
    ) -> Self {
        let mut weights = vec![0.0f32; k_in * k_out];
        weight_init.fill(&mut weights, k_in, k_out, rng);
        let mut biases = vec![0.0f32; k_out];
        bias_init.fill(&mut biases, rng);
        FullyConnected {
            input_shape: Shape::unbatched(k_in, 1, 1),
            output_shape: Shape::unbatched(k_out, 1, 1),
            activation,
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

    fn check_input(&self, input: &Tensor) -> Result<()> {
        if input.shape().chw() != self.k_in {
            return Err(NetworkError::ShapeMismatch {
                expected: format!("chw={}", self.k_in),
                found: format!("chw={}", input.shape().chw()),
            });
        }
        Ok(())
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let n = input.n();
        let x = ArrayView2::from_shape((n, self.k_in), input.as_slice())
            .expect("input slice matches (n, k_in)");
        let w = ArrayView2::from_shape((self.k_in, self.k_out), &self.weights)
            .expect("weights buffer matches (k_in, k_out)");

        let mut pre = x.dot(&w);
        for mut row in pre.rows_mut() {
            for (v, b) in row.iter_mut().zip(&self.biases) {
                *v += b;
            }
        }

        let mut output = Tensor::new(n, self.k_out, 1, 1, AllocMode::Default);
        self.activation.forward(pre.as_slice().unwrap(), output.as_mut_slice());

        self.input_cache = Some(input.duplicate());
        self.output_cache = Some(output.duplicate());
        Ok(output)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let output = self
            .output_cache
            .as_ref()
            .expect("backward called before forward");
        let mut dz = grad_output.as_slice().to_vec();
        self.activation.backward_inplace(output.as_slice(), &mut dz);
        self.backward_from_dz(&dz)
    }

    /// Like [`Self::backward`], but takes `dz` (the gradient with respect to
    /// this layer's pre-activation) directly instead of deriving it from an
    /// upstream post-activation gradient. An output layer paired with a cost
    /// whose gradient is already fused through the activation (cross-entropy
    /// with sigmoid) calls this to avoid multiplying by `f'` a second time.
    pub(crate) fn backward_from_dz(&mut self, dz: &[f32]) -> Result<Tensor> {
        let input = self
            .input_cache
            .as_ref()
            .expect("backward called before forward");
        let n = input.n();

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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn build(k_in: usize, k_out: usize) -> FullyConnected {
        let mut rng = StdRng::seed_from_u64(42);
        FullyConnected::new(
            k_in,
            k_out,
            Activation::Identity,
            WeightInit::HeUniform,
            BiasInit::Zero,
            &mut rng,
        )
    }

    #[test]
    fn forward_matches_manual_matmul() {
        let mut layer = build(2, 1);
        layer.weights = vec![2.0, -1.0];
        layer.biases = vec![0.5];
        let input = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], 2, 2, 1, 1).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.as_slice(), &[0.5f32, -0.5]);
    }

    #[test]
    fn backward_reconstructs_input_shape() {
        let mut layer = build(3, 2);
        let input = Tensor::new(4, 3, 1, 1, crate::tensor::AllocMode::Clean);
        let _ = layer.forward(&input).unwrap();
        let grad_out = Tensor::new(4, 2, 1, 1, crate::tensor::AllocMode::Clean);
        let dx = layer.backward(&grad_out).unwrap();
        assert_eq!(dx.shape(), input.shape());
    }

    #[test]
    fn content_hash_reflects_parameters() {
        let layer_a = build(2, 2);
        let mut layer_b = build(2, 2);
        assert_eq!(layer_a.content_hash(), layer_b.content_hash());
        layer_b.weights[0] += 1.0;
        assert_ne!(layer_a.content_hash(), layer_b.content_hash());
    }
}
