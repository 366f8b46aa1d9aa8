//! A standalone activation layer: applies `f` then folds `f′(y)` into the
//! upstream gradient, with no owned parameters (spec.md §4.2).

use crate::activation::Activation;
use crate::error::Result;
use crate::tensor::{AllocMode, Shape, Tensor};

#[derive(Clone)]
pub struct ActivationLayer {
    pub shape: Shape,
    pub activation: Activation,
    output_cache: Option<Tensor>,
}

impl ActivationLayer {
    pub fn new(shape: Shape, activation: Activation) -> Self {
        ActivationLayer {
            shape,
            activation,
            output_cache: None,
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut output = Tensor::like(input, AllocMode::Default);
        self.activation.forward(input.as_slice(), output.as_mut_slice());
        self.output_cache = Some(output.duplicate());
        Ok(output)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let output = self.output_cache.as_ref().expect("backward before forward");
        let mut dx = grad_output.duplicate();
        self.activation.backward_inplace(output.as_slice(), dx.as_mut_slice());
        Ok(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_zeroes_negative_gradient_flow() {
        let mut layer = ActivationLayer::new(Shape::unbatched(1, 1, 2), Activation::Relu);
        let input = Tensor::from_vec(vec![-1.0, 2.0], 1, 1, 1, 2).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.as_slice(), &[0.0, 2.0]);

        let grad_output = Tensor::from_vec(vec![5.0, 5.0], 1, 1, 1, 2).unwrap();
        let dx = layer.backward(&grad_output).unwrap();
        assert_eq!(dx.as_slice(), &[0.0, 5.0]);
    }
}
