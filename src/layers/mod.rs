//! Layer algebra: the per-kind forward/backward/gradient contracts of
//! spec.md §4.5, dispatched through a tagged enum (spec.md §9's redesign
//! guidance — enum dispatch over a per-kind operation table, not the
//! `dyn Operation` + `typetag::serde` trait-object style used in
//! `examples/felipe-santos-gran-prix/src/graph/node.rs`).
//!
//! Every variant implements the same three-call contract the teacher's
//! `Layer` trait in `examples/felipe-santos-gran-prix/src/activations/mod.rs`
//! already shows: `forward(&mut self, input) -> Tensor`,
//! `backward(&mut self, grad_output) -> Tensor` (returns dX, caching dW/dB
//! internally for the optimizer to collect), and `name()`.

pub mod activation_layer;
pub mod batch_norm;
pub mod convolutional;
pub mod fully_connected;
pub mod output;
pub mod pooling;
pub mod softmax;

use crate::error::Result;
use crate::tensor::{Shape, Tensor};

pub use activation_layer::ActivationLayer;
pub use batch_norm::{BatchNorm, BatchNormMode};
pub use convolutional::Convolutional;
pub use fully_connected::FullyConnected;
pub use output::Output;
pub use pooling::Pooling;
pub use softmax::Softmax;

/// Weight/bias gradients collected from the most recent `backward` call on
/// a weighted layer, handed to an update rule by the trainer (spec.md §4.7).
pub struct ParameterGradient<'a> {
    pub weights: &'a [f32],
    pub biases: &'a [f32],
}

/// Mutable access to a weighted layer's parameters, for in-place update
/// rule application.
pub struct ParameterMut<'a> {
    pub weights: &'a mut [f32],
    pub biases: &'a mut [f32],
}

pub enum LayerKind {
    FullyConnected(FullyConnected),
    Convolutional(Convolutional),
    Pooling(Pooling),
    Softmax(Softmax),
    BatchNorm(BatchNorm),
    Activation(ActivationLayer),
    Output(Output),
}

impl LayerKind {
    pub fn input_shape(&self) -> Shape {
        match self {
            LayerKind::FullyConnected(l) => l.input_shape,
            LayerKind::Convolutional(l) => l.input_shape,
            LayerKind::Pooling(l) => l.input_shape,
            LayerKind::Softmax(l) => l.input_shape,
            LayerKind::BatchNorm(l) => l.input_shape,
            LayerKind::Activation(l) => l.shape,
            LayerKind::Output(l) => l.input_shape(),
        }
    }

    pub fn output_shape(&self) -> Shape {
        match self {
            LayerKind::FullyConnected(l) => l.output_shape,
            LayerKind::Convolutional(l) => l.output_shape,
            LayerKind::Pooling(l) => l.output_shape,
            LayerKind::Softmax(l) => l.output_shape,
            LayerKind::BatchNorm(l) => l.input_shape,
            LayerKind::Activation(l) => l.shape,
            LayerKind::Output(l) => l.output_shape(),
        }
    }

    /// Runs the forward kernel. `training` gates batch-norm's
    /// batch-statistics-vs-running-statistics branch (spec.md §4.5).
    pub fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        match self {
            LayerKind::FullyConnected(l) => l.forward(input),
            LayerKind::Convolutional(l) => l.forward(input),
            LayerKind::Pooling(l) => l.forward(input),
            LayerKind::Softmax(l) => l.forward(input),
            LayerKind::BatchNorm(l) => l.forward(input, training),
            LayerKind::Activation(l) => l.forward(input),
            LayerKind::Output(l) => l.forward(input),
        }
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        match self {
            LayerKind::FullyConnected(l) => l.backward(grad_output),
            LayerKind::Convolutional(l) => l.backward(grad_output),
            LayerKind::Pooling(l) => l.backward(grad_output),
            LayerKind::Softmax(l) => l.backward(grad_output),
            LayerKind::BatchNorm(l) => l.backward(grad_output),
            LayerKind::Activation(l) => l.backward(grad_output),
            LayerKind::Output(l) => l.backward(grad_output),
        }
    }

    pub fn gradients(&self) -> Option<ParameterGradient<'_>> {
        match self {
            LayerKind::FullyConnected(l) => Some(l.gradients()),
            LayerKind::Convolutional(l) => Some(l.gradients()),
            LayerKind::BatchNorm(l) => Some(l.gradients()),
            LayerKind::Output(l) => Some(l.gradients()),
            LayerKind::Pooling(_) | LayerKind::Softmax(_) | LayerKind::Activation(_) => None,
        }
    }

    pub fn parameters_mut(&mut self) -> Option<ParameterMut<'_>> {
        match self {
            LayerKind::FullyConnected(l) => Some(l.parameters_mut()),
            LayerKind::Convolutional(l) => Some(l.parameters_mut()),
            LayerKind::BatchNorm(l) => Some(l.parameters_mut()),
            LayerKind::Output(l) => Some(l.parameters_mut()),
            LayerKind::Pooling(_) | LayerKind::Softmax(_) | LayerKind::Activation(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::FullyConnected(_) => "FullyConnected",
            LayerKind::Convolutional(_) => "Convolutional",
            LayerKind::Pooling(_) => "Pooling",
            LayerKind::Softmax(_) => "Softmax",
            LayerKind::BatchNorm(_) => "BatchNorm",
            LayerKind::Activation(_) => "Activation",
            LayerKind::Output(_) => "Output",
        }
    }

    pub fn as_output(&self) -> Option<&Output> {
        match self {
            LayerKind::Output(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_output_mut(&mut self) -> Option<&mut Output> {
        match self {
            LayerKind::Output(o) => Some(o),
            _ => None,
        }
    }

    /// Bitwise content equality of shape, kind, and parameters, per
    /// spec.md §3's hash-equality contract.
    pub fn content_hash(&self) -> Option<[u8; 32]> {
        match self {
            LayerKind::FullyConnected(l) => Some(l.content_hash()),
            LayerKind::Convolutional(l) => Some(l.content_hash()),
            LayerKind::BatchNorm(l) => Some(l.content_hash()),
            LayerKind::Output(l) => Some(l.content_hash()),
            LayerKind::Pooling(_) | LayerKind::Softmax(_) | LayerKind::Activation(_) => None,
        }
    }
}

impl Clone for LayerKind {
    fn clone(&self) -> Self {
        match self {
            LayerKind::FullyConnected(l) => LayerKind::FullyConnected(l.clone()),
            LayerKind::Convolutional(l) => LayerKind::Convolutional(l.clone()),
            LayerKind::Pooling(l) => LayerKind::Pooling(l.clone()),
            LayerKind::Softmax(l) => LayerKind::Softmax(l.clone()),
            LayerKind::BatchNorm(l) => LayerKind::BatchNorm(l.clone()),
            LayerKind::Activation(l) => LayerKind::Activation(l.clone()),
            LayerKind::Output(l) => LayerKind::Output(l.clone()),
        }
    }
}

/// Shared "two spatial-shrinking kernel parameters" used by both
/// convolution and pooling for the kernel footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KernelShape {
    pub h: usize,
    pub w: usize,
}
