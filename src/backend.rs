//! Compute backend selection and the GPU kernel interface (spec.md §9's
//! redesign note: "specify only the interface... the implementation may
//! dispatch to a vendor DNN library or a hand-written kernel, unobservable
//! from the core").
//!
//! [`Backend::Cpu`] is the only backend this crate executes — every layer
//! kernel in `src/layers/` already runs on the host via `rayon` + `ndarray`.
//! [`KernelBackend`] documents the contract a GPU implementation would need
//! to satisfy to slot in behind [`crate::config::Backend::Gpu`]: the same
//! per-layer-kind operations, taking and producing tensors of identical
//! shape/layout to the CPU path, so the rest of the crate (layers, graph,
//! trainer) would not need to change to consume one.

use crate::config::ConvolutionMode;
use crate::error::Result;
use crate::layers::KernelShape;
use crate::tensor::Tensor;

/// The operation set a compute backend must implement to back every
/// weighted/unweighted layer kind in `src/layers/`. Forward kernels return
/// the layer's output; backward kernels return `dX` (and, for weighted
/// kinds, are expected to also make `dW`/`dB` available the way the CPU
/// layers cache them internally — left to the implementation, since no GPU
/// backend exists in this crate to pin the exact return shape down).
///
/// No type in this crate implements this trait today; `cpu` feature gates
/// the only compute path actually wired into [`crate::layers::LayerKind`].
/// It exists so a future GPU backend has a contract to implement against
/// rather than reverse-engineering one from the CPU layer internals.
pub trait KernelBackend {
    fn forward_fc(&self, input: &Tensor, weights: &[f32], biases: &[f32], k_in: usize, k_out: usize) -> Result<Tensor>;

    fn backward_fc(
        &self,
        input: &Tensor,
        weights: &[f32],
        grad_output: &Tensor,
        k_in: usize,
        k_out: usize,
    ) -> Result<(Tensor, Vec<f32>, Vec<f32>)>;

    fn forward_conv(
        &self,
        input: &Tensor,
        weights: &[f32],
        biases: &[f32],
        kernel: KernelShape,
        num_kernels: usize,
        mode: ConvolutionMode,
    ) -> Result<Tensor>;

    fn backward_conv(
        &self,
        input: &Tensor,
        weights: &[f32],
        grad_output: &Tensor,
        kernel: KernelShape,
        num_kernels: usize,
        mode: ConvolutionMode,
    ) -> Result<(Tensor, Vec<f32>, Vec<f32>)>;

    fn forward_pool(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>)>;

    fn backward_pool(&self, grad_output: &Tensor, argmax: &[usize], input_shape_len: usize) -> Result<Tensor>;

    fn forward_batch_norm(
        &self,
        input: &Tensor,
        gamma: &[f32],
        beta: &[f32],
        running_mean: &mut [f32],
        running_var: &mut [f32],
        training: bool,
    ) -> Result<Tensor>;

    fn backward_batch_norm(&self, grad_output: &Tensor) -> Result<(Tensor, Vec<f32>, Vec<f32>)>;

    fn forward_activation(&self, input: &Tensor) -> Result<Tensor>;

    fn backward_activation(&self, output: &Tensor, grad_output: &Tensor) -> Result<Tensor>;

    fn forward_softmax(&self, input: &Tensor, weights: &[f32], biases: &[f32], k_in: usize, k_out: usize) -> Result<Tensor>;

    fn backward_softmax(
        &self,
        input: &Tensor,
        weights: &[f32],
        grad_output: &Tensor,
        k_in: usize,
        k_out: usize,
    ) -> Result<(Tensor, Vec<f32>, Vec<f32>)>;
}

/// Logs which compute backend a [`crate::config::RuntimeConfig`] selected.
/// The `gpu` Cargo feature has no implementation behind it in this crate
/// (spec.md's Non-goal: "GPU kernel implementation details"); selecting
/// [`crate::config::Backend::Gpu`] without one wired in is a configuration
/// error the caller should catch before training, not something this
/// function silently falls back from.
pub fn describe_backend(backend: crate::config::Backend) -> &'static str {
    match backend {
        crate::config::Backend::Cpu => "cpu (rayon + ndarray host kernels)",
        crate::config::Backend::Gpu => "gpu (KernelBackend interface only, no implementation in this crate)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_the_cpu_backend() {
        assert!(describe_backend(crate::config::Backend::Cpu).contains("cpu"));
    }
}
