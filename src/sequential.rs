//! Sequential model: a linear stack of layers, the degenerate case of the
//! graph model (spec.md §3/§4.6's Sequential description).
//!
//! Dropout (spec.md §4.7) is modeled here rather than as its own node/layer
//! kind, since it is not among the graph's node kinds (spec.md §3): a single
//! global probability is applied to every [`LayerKind::FullyConnected`]
//! layer's output during training, with a mask resampled per batch and
//! scaled by `1/(1-p)`; it is a no-op during inference/evaluation.

use rand::Rng;
use rand_distr::{Bernoulli, Distribution};

use crate::error::{NetworkError, Result};
use crate::layers::LayerKind;
use crate::tensor::Tensor;

pub struct Sequential {
    pub layers: Vec<LayerKind>,
    dropout_masks: Vec<Option<Vec<f32>>>,
}

impl Sequential {
    pub fn new(layers: Vec<LayerKind>) -> Result<Self> {
        if layers.is_empty() {
            return Err(NetworkError::InvalidConfig("sequential model has no layers".into()));
        }
        let n = layers.len();
        Ok(Sequential {
            layers,
            dropout_masks: (0..n).map(|_| None).collect(),
        })
    }

    fn is_fully_connected(layer: &LayerKind) -> bool {
        matches!(layer, LayerKind::FullyConnected(_))
    }

    pub fn forward(
        &mut self,
        input: &Tensor,
        training: bool,
        dropout_p: f32,
        rng: &mut impl Rng,
    ) -> Result<Tensor> {
        if !(0.0..1.0).contains(&dropout_p) {
            return Err(NetworkError::InvalidConfig(format!(
                "dropout probability must be in [0, 1), got {dropout_p}"
            )));
        }
        let mut current = input.duplicate();
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            current = layer.forward(&current, training)?;
            if training && dropout_p > 0.0 && Self::is_fully_connected(layer) {
                let bernoulli = Bernoulli::new(1.0 - dropout_p as f64).expect("p in [0,1)");
                let scale = 1.0 / (1.0 - dropout_p);
                let mask: Vec<f32> = (0..current.len())
                    .map(|_| if bernoulli.sample(rng) { scale } else { 0.0 })
                    .collect();
                for (v, &m) in current.as_mut_slice().iter_mut().zip(&mask) {
                    *v *= m;
                }
                self.dropout_masks[idx] = Some(mask);
            } else {
                self.dropout_masks[idx] = None;
            }
        }
        Ok(current)
    }

    /// `grad_output` is the target tensor for a plain dense final layer or
    /// (by the output layer's own contract) the upstream gradient otherwise;
    /// see [`crate::layers::output::Output::backward`].
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mut grad = grad_output.duplicate();
        for idx in (0..self.layers.len()).rev() {
            if let Some(mask) = &self.dropout_masks[idx] {
                for (g, &m) in grad.as_mut_slice().iter_mut().zip(mask) {
                    *g *= m;
                }
            }
            grad = self.layers[idx].backward(&grad)?;
        }
        Ok(grad)
    }

    pub fn cost_value(&self, target: &Tensor) -> f32 {
        let output = self.layers.last().expect("non-empty by construction");
        output.as_output().expect("final layer must be Output").cost_value(target)
    }

    pub fn weighted_layers_mut(&mut self) -> impl Iterator<Item = &mut LayerKind> {
        self.layers.iter_mut().filter(|l| l.gradients().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::cost::Cost;
    use crate::init::{BiasInit, WeightInit};
    use crate::layers::{FullyConnected, Output};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn xor_network(rng: &mut impl Rng) -> Sequential {
        let hidden = FullyConnected::new(2, 2, Activation::Sigmoid, WeightInit::GlorotUniform, BiasInit::Zero, rng);
        let output = Output::dense(2, 1, Activation::Sigmoid, Cost::CrossEntropy, WeightInit::GlorotUniform, BiasInit::Zero, rng).unwrap();
        Sequential::new(vec![LayerKind::FullyConnected(hidden), LayerKind::Output(output)]).unwrap()
    }

    #[test]
    fn forward_runs_without_dropout_at_inference() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = xor_network(&mut rng);
        let input = Tensor::from_vec(vec![0.0, 1.0], 1, 2, 1, 1).unwrap();
        let output = net.forward(&input, false, 0.5, &mut rng).unwrap();
        assert_eq!(output.shape().chw(), 1);
    }

    #[test]
    fn backward_produces_input_shaped_gradient() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = xor_network(&mut rng);
        let input = Tensor::from_vec(vec![0.0, 1.0], 1, 2, 1, 1).unwrap();
        let _ = net.forward(&input, true, 0.0, &mut rng).unwrap();
        let target = Tensor::from_vec(vec![1.0], 1, 1, 1, 1).unwrap();
        let dx = net.backward(&target).unwrap();
        assert_eq!(dx.shape(), input.shape());
    }
}
