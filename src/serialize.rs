//! Binary model persistence (spec.md §6): a tagged sequence of layer
//! records terminated by an end marker. Readers dispatch on the kind byte
//! and reject anything unrecognized; a truncated stream surfaces as an I/O
//! error rather than a partially reconstructed network.
//!
//! Layers are reconstructed by calling each kind's existing `new`
//! constructor with the decoded shape/mode/activation (filling weights
//! with a throwaway RNG draw) and then overwriting the parameters in place
//! via `parameters_mut`/`set_running_stats` — avoiding a second,
//! from-raw-parts constructor per layer kind.
//!
//! A parallel `serde_json` metadata sidecar (spec.md §6: informational,
//! never read back) is written by [`write_metadata_json`] for operators.

use std::io::{Read, Write};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::activation::Activation;
use crate::config::ConvolutionMode;
use crate::cost::Cost;
use crate::error::{NetworkError, Result};
use crate::init::{BiasInit, WeightInit};
use crate::layers::output::OutputKind;
use crate::layers::{
    ActivationLayer, BatchNorm, BatchNormMode, Convolutional, FullyConnected, KernelShape, LayerKind, Output,
    Pooling, Softmax,
};
use crate::tensor::Shape;

const MAGIC: &[u8; 4] = b"CNNR";
const FORMAT_VERSION: u8 = 1;

const KIND_FULLY_CONNECTED: u8 = 0;
const KIND_CONVOLUTIONAL: u8 = 1;
const KIND_POOLING: u8 = 2;
const KIND_SOFTMAX: u8 = 3;
const KIND_BATCH_NORM: u8 = 4;
const KIND_ACTIVATION: u8 = 5;
const KIND_OUTPUT: u8 = 6;
const KIND_END_MARKER: u8 = 0xFF;

const CONV_MODE_CROSS_CORRELATION: u8 = 0;
const CONV_MODE_CONVOLUTION: u8 = 1;

const BN_MODE_SPATIAL: u8 = 0;
const BN_MODE_PER_ACTIVATION: u8 = 1;

const OUTPUT_KIND_DENSE: u8 = 0;
const OUTPUT_KIND_SOFTMAX: u8 = 1;

fn activation_byte(a: Activation) -> u8 {
    match a {
        Activation::Sigmoid => 0,
        Activation::Tanh => 1,
        Activation::LeCunTanh => 2,
        Activation::Relu => 3,
        Activation::LeakyRelu => 4,
        Activation::AbsRelu => 5,
        Activation::Softplus => 6,
        Activation::Elu => 7,
        Activation::Identity => 8,
    }
}

fn activation_from_byte(b: u8) -> Result<Activation> {
    Ok(match b {
        0 => Activation::Sigmoid,
        1 => Activation::Tanh,
        2 => Activation::LeCunTanh,
        3 => Activation::Relu,
        4 => Activation::LeakyRelu,
        5 => Activation::AbsRelu,
        6 => Activation::Softplus,
        7 => Activation::Elu,
        8 => Activation::Identity,
        other => return Err(NetworkError::Corruption(format!("unknown activation byte {other}"))),
    })
}

fn cost_byte(c: Cost) -> u8 {
    match c {
        Cost::Quadratic => 0,
        Cost::CrossEntropy => 1,
        Cost::LogLikelihood => 2,
    }
}

fn cost_from_byte(b: u8) -> Result<Cost> {
    Ok(match b {
        0 => Cost::Quadratic,
        1 => Cost::CrossEntropy,
        2 => Cost::LogLikelihood,
        other => return Err(NetworkError::Corruption(format!("unknown cost byte {other}"))),
    })
}

fn write_u8(w: &mut impl Write, v: u8) -> Result<()> {
    w.write_all(&[v])?;
    Ok(())
}

fn write_u32(w: &mut impl Write, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64(w: &mut impl Write, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_floats(w: &mut impl Write, values: &[f32]) -> Result<()> {
    write_u32(w, values.len() as u32)?;
    for &v in values {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn write_shape(w: &mut impl Write, shape: Shape) -> Result<()> {
    write_u32(w, shape.c as u32)?;
    write_u32(w, shape.h as u32)?;
    write_u32(w, shape.w as u32)?;
    Ok(())
}

fn read_u8(r: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_floats(r: &mut impl Read) -> Result<Vec<f32>> {
    let len = read_u32(r)? as usize;
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 4];
    for _ in 0..len {
        r.read_exact(&mut buf)?;
        out.push(f32::from_le_bytes(buf));
    }
    Ok(out)
}

fn read_shape(r: &mut impl Read) -> Result<Shape> {
    let c = read_u32(r)? as usize;
    let h = read_u32(r)? as usize;
    let w = read_u32(r)? as usize;
    Ok(Shape::unbatched(c, h, w))
}

/// A throwaway RNG used only to seed the initial random fill of a freshly
/// reconstructed layer's parameters before they are overwritten from the
/// stream — never observed in the final weights.
fn scratch_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

/// Writes a full model (a linear stack of layers) to `w`, per spec.md §6's
/// binary model file contract. Takes layers mutably only because reading
/// weights/biases reuses the existing `parameters_mut` accessor; nothing is
/// actually mutated.
pub fn write_model(layers: &mut [LayerKind], w: &mut impl Write) -> Result<()> {
    w.write_all(MAGIC)?;
    write_u8(w, FORMAT_VERSION)?;
    for layer in layers.iter_mut() {
        write_layer(layer, w)?;
    }
    write_u8(w, KIND_END_MARKER)?;
    Ok(())
}

/// Reads a full model back, rejecting unrecognized kind bytes and mismatched
/// magic/version headers.
pub fn read_model(r: &mut impl Read) -> Result<Vec<LayerKind>> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NetworkError::Corruption("bad magic, not a model file".into()));
    }
    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(NetworkError::Corruption(format!("unsupported format version {version}")));
    }

    let mut layers = Vec::new();
    loop {
        let kind = read_u8(r)?;
        if kind == KIND_END_MARKER {
            break;
        }
        layers.push(read_layer(kind, r)?);
    }
    Ok(layers)
}

fn write_layer(layer: &mut LayerKind, w: &mut impl Write) -> Result<()> {
    match layer {
        LayerKind::FullyConnected(fc) => {
            write_u8(w, KIND_FULLY_CONNECTED)?;
            write_shape(w, fc.input_shape)?;
            write_shape(w, fc.output_shape)?;
            write_u8(w, activation_byte(fc.activation))?;
            let params = fc.parameters_mut();
            write_floats(w, params.weights)?;
            write_floats(w, params.biases)?;
        }
        LayerKind::Convolutional(conv) => {
            write_u8(w, KIND_CONVOLUTIONAL)?;
            write_shape(w, conv.input_shape)?;
            write_shape(w, conv.output_shape)?;
            write_u8(w, activation_byte(conv.activation))?;
            write_u8(
                w,
                match conv.mode {
                    ConvolutionMode::CrossCorrelation => CONV_MODE_CROSS_CORRELATION,
                    ConvolutionMode::Convolution => CONV_MODE_CONVOLUTION,
                },
            )?;
            let kernel_h = conv.input_shape.h - conv.output_shape.h + 1;
            let kernel_w = conv.input_shape.w - conv.output_shape.w + 1;
            write_u32(w, kernel_h as u32)?;
            write_u32(w, kernel_w as u32)?;
            write_u32(w, conv.output_shape.c as u32)?;
            let params = conv.parameters_mut();
            write_floats(w, params.weights)?;
            write_floats(w, params.biases)?;
        }
        LayerKind::Pooling(pool) => {
            write_u8(w, KIND_POOLING)?;
            write_shape(w, pool.input_shape)?;
            write_shape(w, pool.output_shape)?;
            write_u8(w, activation_byte(pool.activation))?;
        }
        LayerKind::Softmax(sm) => {
            write_u8(w, KIND_SOFTMAX)?;
            write_shape(w, sm.input_shape)?;
            write_shape(w, sm.output_shape)?;
            write_u8(w, activation_byte(Activation::Identity))?;
            let params = sm.parameters_mut();
            write_floats(w, params.weights)?;
            write_floats(w, params.biases)?;
        }
        LayerKind::BatchNorm(bn) => {
            write_u8(w, KIND_BATCH_NORM)?;
            write_shape(w, bn.input_shape)?;
            write_shape(w, bn.input_shape)?;
            write_u8(w, activation_byte(bn.activation))?;
            write_u8(
                w,
                match bn.mode {
                    BatchNormMode::Spatial => BN_MODE_SPATIAL,
                    BatchNormMode::PerActivation => BN_MODE_PER_ACTIVATION,
                },
            )?;
            let (mean, var, iteration) = {
                let stats = bn.running_stats();
                (stats.0.to_vec(), stats.1.to_vec(), stats.2)
            };
            let params = bn.parameters_mut();
            write_floats(w, params.weights)?;
            write_floats(w, params.biases)?;
            write_floats(w, &mean)?;
            write_floats(w, &var)?;
            write_u64(w, iteration)?;
        }
        LayerKind::Activation(act) => {
            write_u8(w, KIND_ACTIVATION)?;
            write_shape(w, act.shape)?;
            write_shape(w, act.shape)?;
            write_u8(w, activation_byte(act.activation))?;
        }
        LayerKind::Output(out) => {
            write_u8(w, KIND_OUTPUT)?;
            write_shape(w, out.input_shape())?;
            write_shape(w, out.output_shape())?;
            let (activation, output_kind) = match &out.kind {
                OutputKind::Dense(fc) => (fc.activation, OUTPUT_KIND_DENSE),
                OutputKind::SoftmaxLogLikelihood(_) => (Activation::Identity, OUTPUT_KIND_SOFTMAX),
            };
            write_u8(w, activation_byte(activation))?;
            write_u8(w, output_kind)?;
            write_u8(w, cost_byte(out.cost))?;
            let params = out.parameters_mut();
            write_floats(w, params.weights)?;
            write_floats(w, params.biases)?;
        }
    }
    Ok(())
}

fn read_layer(kind: u8, r: &mut impl Read) -> Result<LayerKind> {
    match kind {
        KIND_FULLY_CONNECTED => {
            let input_shape = read_shape(r)?;
            let output_shape = read_shape(r)?;
            let activation = activation_from_byte(read_u8(r)?)?;
            let weights = read_floats(r)?;
            let biases = read_floats(r)?;
            let mut rng = scratch_rng();
            let mut fc = FullyConnected::new(
                input_shape.chw(),
                output_shape.chw(),
                activation,
                WeightInit::HeUniform,
                BiasInit::Zero,
                &mut rng,
            );
            let params = fc.parameters_mut();
            copy_into(params.weights, &weights)?;
            copy_into(params.biases, &biases)?;
            Ok(LayerKind::FullyConnected(fc))
        }
        KIND_CONVOLUTIONAL => {
            let input_shape = read_shape(r)?;
            let output_shape = read_shape(r)?;
            let activation = activation_from_byte(read_u8(r)?)?;
            let mode = match read_u8(r)? {
                CONV_MODE_CROSS_CORRELATION => ConvolutionMode::CrossCorrelation,
                CONV_MODE_CONVOLUTION => ConvolutionMode::Convolution,
                other => return Err(NetworkError::Corruption(format!("unknown convolution mode byte {other}"))),
            };
            let kernel_h = read_u32(r)? as usize;
            let kernel_w = read_u32(r)? as usize;
            let num_kernels = read_u32(r)? as usize;
            let weights = read_floats(r)?;
            let biases = read_floats(r)?;
            let mut rng = scratch_rng();
            let mut conv = Convolutional::new(
                input_shape.c,
                input_shape.h,
                input_shape.w,
                num_kernels,
                KernelShape { h: kernel_h, w: kernel_w },
                mode,
                activation,
                WeightInit::HeUniform,
                BiasInit::Zero,
                &mut rng,
            )?;
            if conv.output_shape != output_shape {
                return Err(NetworkError::ShapeMismatch {
                    expected: output_shape.to_string(),
                    found: conv.output_shape.to_string(),
                });
            }
            let params = conv.parameters_mut();
            copy_into(params.weights, &weights)?;
            copy_into(params.biases, &biases)?;
            Ok(LayerKind::Convolutional(conv))
        }
        KIND_POOLING => {
            let input_shape = read_shape(r)?;
            let _output_shape = read_shape(r)?;
            let activation = activation_from_byte(read_u8(r)?)?;
            Ok(LayerKind::Pooling(Pooling::new(
                input_shape.c,
                input_shape.h,
                input_shape.w,
                activation,
            )))
        }
        KIND_SOFTMAX => {
            let input_shape = read_shape(r)?;
            let output_shape = read_shape(r)?;
            let _activation = activation_from_byte(read_u8(r)?)?;
            let weights = read_floats(r)?;
            let biases = read_floats(r)?;
            let mut rng = scratch_rng();
            let mut sm = Softmax::new(input_shape.chw(), output_shape.chw(), WeightInit::HeUniform, BiasInit::Zero, &mut rng);
            let params = sm.parameters_mut();
            copy_into(params.weights, &weights)?;
            copy_into(params.biases, &biases)?;
            Ok(LayerKind::Softmax(sm))
        }
        KIND_BATCH_NORM => {
            let input_shape = read_shape(r)?;
            let _output_shape = read_shape(r)?;
            let activation = activation_from_byte(read_u8(r)?)?;
            let mode = match read_u8(r)? {
                BN_MODE_SPATIAL => BatchNormMode::Spatial,
                BN_MODE_PER_ACTIVATION => BatchNormMode::PerActivation,
                other => return Err(NetworkError::Corruption(format!("unknown batch-norm mode byte {other}"))),
            };
            let gamma = read_floats(r)?;
            let beta = read_floats(r)?;
            let running_mean = read_floats(r)?;
            let running_var = read_floats(r)?;
            let iteration = read_u64(r)?;
            let mut bn = BatchNorm::new(input_shape.c, input_shape.h, input_shape.w, mode, activation);
            let params = bn.parameters_mut();
            copy_into(params.weights, &gamma)?;
            copy_into(params.biases, &beta)?;
            bn.set_running_stats(running_mean, running_var, iteration)?;
            Ok(LayerKind::BatchNorm(bn))
        }
        KIND_ACTIVATION => {
            let shape = read_shape(r)?;
            let _output_shape = read_shape(r)?;
            let activation = activation_from_byte(read_u8(r)?)?;
            Ok(LayerKind::Activation(ActivationLayer::new(shape, activation)))
        }
        KIND_OUTPUT => {
            let input_shape = read_shape(r)?;
            let output_shape = read_shape(r)?;
            let activation = activation_from_byte(read_u8(r)?)?;
            let output_kind = read_u8(r)?;
            let cost = cost_from_byte(read_u8(r)?)?;
            let weights = read_floats(r)?;
            let biases = read_floats(r)?;
            let mut rng = scratch_rng();
            let mut out = match output_kind {
                OUTPUT_KIND_DENSE => Output::dense(
                    input_shape.chw(),
                    output_shape.chw(),
                    activation,
                    cost,
                    WeightInit::HeUniform,
                    BiasInit::Zero,
                    &mut rng,
                )?,
                OUTPUT_KIND_SOFTMAX => {
                    Output::softmax(input_shape.chw(), output_shape.chw(), WeightInit::HeUniform, BiasInit::Zero, &mut rng)
                }
                other => return Err(NetworkError::Corruption(format!("unknown output kind byte {other}"))),
            };
            let params = out.parameters_mut();
            copy_into(params.weights, &weights)?;
            copy_into(params.biases, &biases)?;
            Ok(LayerKind::Output(out))
        }
        other => Err(NetworkError::Corruption(format!("unknown layer kind byte {other}"))),
    }
}

fn copy_into(dest: &mut [f32], src: &[f32]) -> Result<()> {
    if dest.len() != src.len() {
        return Err(NetworkError::ShapeMismatch {
            expected: format!("{} elements", dest.len()),
            found: format!("{} elements", src.len()),
        });
    }
    dest.copy_from_slice(src);
    Ok(())
}

/// Non-authoritative human-readable summary, written alongside the binary
/// file for operators; never parsed back by [`read_model`].
#[derive(Serialize)]
pub struct ModelMetadata {
    pub layer_count: usize,
    pub layer_names: Vec<&'static str>,
    pub parameter_count: usize,
}

impl ModelMetadata {
    pub fn from_layers(layers: &[LayerKind]) -> Self {
        let mut parameter_count = 0;
        for layer in layers {
            if let Some(grad) = layer.gradients() {
                parameter_count += grad.weights.len() + grad.biases.len();
            }
        }
        ModelMetadata {
            layer_count: layers.len(),
            layer_names: layers.iter().map(LayerKind::name).collect(),
            parameter_count,
        }
    }
}

pub fn write_metadata_json(layers: &[LayerKind], w: &mut impl Write) -> Result<()> {
    let metadata = ModelMetadata::from_layers(layers);
    serde_json::to_writer_pretty(w, &metadata).map_err(|e| NetworkError::Corruption(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::Cost;

    fn sample_model() -> Vec<LayerKind> {
        let mut rng = StdRng::seed_from_u64(11);
        vec![
            LayerKind::FullyConnected(FullyConnected::new(
                3,
                4,
                Activation::Relu,
                WeightInit::HeUniform,
                BiasInit::Zero,
                &mut rng,
            )),
            LayerKind::BatchNorm(BatchNorm::new(4, 1, 1, BatchNormMode::PerActivation, Activation::Identity)),
            LayerKind::Output(
                Output::dense(4, 2, Activation::Sigmoid, Cost::CrossEntropy, WeightInit::HeUniform, BiasInit::Zero, &mut rng)
                    .unwrap(),
            ),
        ]
    }

    #[test]
    fn round_trips_weights_and_shapes_through_bytes() {
        let mut layers = sample_model();
        let mut bytes = Vec::new();
        write_model(&mut layers, &mut bytes).unwrap();

        let restored = read_model(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.len(), layers.len());
        for (original, again) in layers.iter_mut().zip(restored) {
            assert_eq!(original.input_shape(), again.input_shape());
            assert_eq!(original.output_shape(), again.output_shape());
            match (original.gradients().is_some(), again.gradients().is_some()) {
                (true, true) | (false, false) => {}
                _ => panic!("weighted-ness changed across a round trip"),
            }
        }
    }

    #[test]
    fn rejects_truncated_streams() {
        let mut layers = sample_model();
        let mut bytes = Vec::new();
        write_model(&mut layers, &mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(read_model(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn rejects_unknown_layer_kind_byte() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(FORMAT_VERSION);
        bytes.push(0xAB);
        let err = read_model(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, NetworkError::Corruption(_)));
    }

    #[test]
    fn batch_norm_round_trip_preserves_running_statistics() {
        let mut bn = BatchNorm::new(2, 1, 1, BatchNormMode::Spatial, Activation::Identity);
        let input = crate::tensor::Tensor::from_vec(vec![1.0, 3.0, 2.0, 4.0], 2, 2, 1, 1).unwrap();
        let _ = bn.forward(&input, true).unwrap();
        let (mean_before, var_before, iter_before) = {
            let s = bn.running_stats();
            (s.0.to_vec(), s.1.to_vec(), s.2)
        };

        let mut layers = vec![LayerKind::BatchNorm(bn)];
        let mut bytes = Vec::new();
        write_model(&mut layers, &mut bytes).unwrap();
        let restored = read_model(&mut bytes.as_slice()).unwrap();
        let LayerKind::BatchNorm(restored_bn) = &restored[0] else {
            panic!("expected a batch-norm layer");
        };
        let (mean_after, var_after, iter_after) = restored_bn.running_stats();
        assert_eq!(mean_after, mean_before.as_slice());
        assert_eq!(var_after, var_before.as_slice());
        assert_eq!(iter_after, iter_before);
    }
}
