//! Output layer: a fully connected (or softmax) layer with an attached cost
//! function (spec.md §4.5). Backward substitutes the cost's gradient with
//! respect to the pre-activation in place of the activation's own
//! derivative chain — so `Output::backward` takes the batch's target tensor,
//! not an upstream gradient; this is the one layer kind whose "backward"
//! input is not itself a gradient, since there is nothing downstream of it.

use crate::activation::Activation;
use crate::cost::Cost;
use crate::error::{NetworkError, Result};
use crate::init::{BiasInit, WeightInit};
use crate::layers::{FullyConnected, ParameterGradient, ParameterMut, Softmax};
use crate::tensor::{Shape, Tensor};

#[derive(Clone)]
pub enum OutputKind {
    Dense(FullyConnected),
    SoftmaxLogLikelihood(Softmax),
}

#[derive(Clone)]
pub struct Output {
    pub cost: Cost,
    pub kind: OutputKind,
    prediction_cache: Option<Tensor>,
}

impl Output {
    pub fn dense(
        k_in: usize,
        k_out: usize,
        activation: Activation,
        cost: Cost,
        weight_init: WeightInit,
        bias_init: BiasInit,
        rng: &mut impl rand::Rng,
    ) -> Result<Self> {
        cost.legal_with(activation)?;
        if cost == Cost::LogLikelihood {
            return Err(NetworkError::InvalidConfig(
                "log-likelihood cost requires a softmax output, use Output::softmax".into(),
            ));
        }
        Ok(Output {
            cost,
            kind: OutputKind::Dense(FullyConnected::new(
                k_in, k_out, activation, weight_init, bias_init, rng,
            )),
            prediction_cache: None,
        })
    }

    pub fn softmax(
        k_in: usize,
        k_out: usize,
        weight_init: WeightInit,
        bias_init: BiasInit,
        rng: &mut impl rand::Rng,
    ) -> Self {
        Output {
            cost: Cost::LogLikelihood,
            kind: OutputKind::SoftmaxLogLikelihood(Softmax::new(
                k_in, k_out, weight_init, bias_init, rng,
            )),
            prediction_cache: None,
        }
    }

    pub fn input_shape(&self) -> Shape {
        match &self.kind {
            OutputKind::Dense(fc) => fc.input_shape,
            OutputKind::SoftmaxLogLikelihood(sm) => sm.input_shape,
        }
    }

    pub fn output_shape(&self) -> Shape {
        match &self.kind {
            OutputKind::Dense(fc) => fc.output_shape,
            OutputKind::SoftmaxLogLikelihood(sm) => sm.output_shape,
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let prediction = match &mut self.kind {
            OutputKind::Dense(fc) => fc.forward(input)?,
            OutputKind::SoftmaxLogLikelihood(sm) => sm.forward(input)?,
        };
        self.prediction_cache = Some(prediction.duplicate());
        Ok(prediction)
    }

    pub fn cost_value(&self, target: &Tensor) -> f32 {
        let prediction = self.prediction_cache.as_ref().expect("forward not yet called");
        self.cost.value(prediction.as_slice(), target.as_slice(), prediction.n())
    }

    /// Computes the cost gradient with respect to the pre-activation and
    /// propagates it through the wrapped dense/softmax layer, returning dX.
    /// `grad_output` is reinterpreted as the batch's target tensor.
    ///
    /// `Cost::CrossEntropy` (with the sigmoid activation `legal_with`
    /// requires) and `Cost::LogLikelihood` already reduce to the fused
    /// `ŷ − y`, with the activation derivative folded in by construction —
    /// feeding that through `FullyConnected::backward`'s normal path would
    /// multiply by `f'` a second time, so those costs route through
    /// `backward_from_dz` instead. `Cost::Quadratic` has no such fusion: its
    /// gradient is a plain `ŷ − y` that still needs one derivative pass, so
    /// it uses the ordinary `backward`.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let target = grad_output;
        let prediction = self
            .prediction_cache
            .as_ref()
            .expect("backward before forward")
            .duplicate();
        let n = prediction.n();
        let mut dz = vec![0.0f32; prediction.len()];
        self.cost
            .gradient_wrt_preactivation(prediction.as_slice(), target.as_slice(), |_, _| 1.0, &mut dz);
        match &mut self.kind {
            OutputKind::Dense(fc) if self.cost == Cost::Quadratic => {
                let dz_tensor = Tensor::from_vec(dz, n, prediction.c(), prediction.h(), prediction.w())?;
                fc.backward(&dz_tensor)
            }
            OutputKind::Dense(fc) => fc.backward_from_dz(&dz),
            OutputKind::SoftmaxLogLikelihood(sm) => {
                let dz_tensor = Tensor::from_vec(dz, n, prediction.c(), prediction.h(), prediction.w())?;
                sm.backward(&dz_tensor)
            }
        }
    }

    pub fn gradients(&self) -> ParameterGradient<'_> {
        match &self.kind {
            OutputKind::Dense(fc) => fc.gradients(),
            OutputKind::SoftmaxLogLikelihood(sm) => sm.gradients(),
        }
    }

    pub fn parameters_mut(&mut self) -> ParameterMut<'_> {
        match &mut self.kind {
            OutputKind::Dense(fc) => fc.parameters_mut(),
            OutputKind::SoftmaxLogLikelihood(sm) => sm.parameters_mut(),
        }
    }

    pub fn content_hash(&self) -> [u8; 32] {
        match &self.kind {
            OutputKind::Dense(fc) => fc.content_hash(),
            OutputKind::SoftmaxLogLikelihood(sm) => sm.content_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn dense_output_rejects_cross_entropy_without_sigmoid() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = Output::dense(
            2,
            2,
            Activation::Relu,
            Cost::CrossEntropy,
            WeightInit::HeUniform,
            BiasInit::Zero,
            &mut rng,
        );
        assert!(result.is_err());
    }

    #[test]
    fn dense_output_rejects_log_likelihood() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = Output::dense(
            2,
            2,
            Activation::Sigmoid,
            Cost::LogLikelihood,
            WeightInit::HeUniform,
            BiasInit::Zero,
            &mut rng,
        );
        assert!(result.is_err());
    }

    #[test]
    fn softmax_output_backward_yields_yhat_minus_y() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut out = Output::softmax(3, 3, WeightInit::HeUniform, BiasInit::Zero, &mut rng);
        if let OutputKind::SoftmaxLogLikelihood(sm) = &mut out.kind {
            sm.parameters_mut().weights.copy_from_slice(&[
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0,
            ]);
            sm.parameters_mut().biases.fill(0.0);
        }
        let input = Tensor::from_vec(vec![1.0, 2.0, 3.0], 1, 3, 1, 1).unwrap();
        let _ = out.forward(&input).unwrap();
        let target = Tensor::from_vec(vec![0.0, 0.0, 1.0], 1, 3, 1, 1).unwrap();
        let _ = out.backward(&target).unwrap();
    }
}
