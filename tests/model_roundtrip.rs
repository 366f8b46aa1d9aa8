//! End-to-end serialization round-trip across every weighted layer kind
//! (Convolutional, Pooling, FullyConnected, a softmax Output), matching
//! spec.md §8 scenario 5: build a heterogeneous network with known seeded
//! weights, serialize to bytes, deserialize, and assert per-layer hash
//! equality plus identical forward output on a batch of random inputs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use conv_net_runtime::layers::{Convolutional, FullyConnected, KernelShape, Output, Pooling};
use conv_net_runtime::serialize::{read_model, write_model};
use conv_net_runtime::tensor::AllocMode;
use conv_net_runtime::{Activation, BiasInit, LayerKind, Sequential, Shape, Tensor, WeightInit};

fn build_network(rng: &mut StdRng) -> Vec<LayerKind> {
    let conv = Convolutional::new(
        1,
        4,
        4,
        4,
        KernelShape { h: 3, w: 3 },
        conv_net_runtime::ConvolutionMode::CrossCorrelation,
        Activation::Relu,
        WeightInit::HeUniform,
        BiasInit::Zero,
        rng,
    )
    .unwrap();
    let pool = Pooling::new(4, 2, 2, Activation::Identity);
    let dense = FullyConnected::new(4, 10, Activation::Relu, WeightInit::GlorotUniform, BiasInit::Zero, rng);
    let output = Output::softmax(10, 2, WeightInit::GlorotUniform, BiasInit::Zero, rng);

    vec![
        LayerKind::Convolutional(conv),
        LayerKind::Pooling(pool),
        LayerKind::FullyConnected(dense),
        LayerKind::Output(output),
    ]
}

#[test]
fn round_trip_preserves_hashes_and_forward_output_on_random_inputs() {
    let mut build_rng = StdRng::seed_from_u64(2024);
    let original_layers = build_network(&mut build_rng);

    let mut bytes = Vec::new();
    let mut layers_for_write = original_layers;
    write_model(&mut layers_for_write, &mut bytes).unwrap();
    let mut cursor = bytes.as_slice();
    let restored_layers = read_model(&mut cursor).unwrap();

    assert_eq!(layers_for_write.len(), restored_layers.len());
    for (original, restored) in layers_for_write.iter().zip(&restored_layers) {
        assert_eq!(original.content_hash(), restored.content_hash());
        assert_eq!(original.input_shape(), restored.input_shape());
        assert_eq!(original.output_shape(), restored.output_shape());
    }

    let mut original_model = Sequential::new(layers_for_write).unwrap();
    let mut restored_model = Sequential::new(restored_layers).unwrap();

    let mut input_rng = StdRng::seed_from_u64(7);
    let mut eval_rng = StdRng::seed_from_u64(0);
    for _ in 0..100 {
        let mut input = Tensor::new(1, 1, 4, 4, AllocMode::Clean);
        for v in input.as_mut_slice().iter_mut() {
            *v = input_rng.gen_range(-1.0f32..1.0);
        }
        let original_output = original_model.forward(&input, false, 0.0, &mut eval_rng).unwrap();
        let restored_output = restored_model.forward(&input, false, 0.0, &mut eval_rng).unwrap();
        assert_eq!(original_output.shape(), Shape::batched(1, 2, 1, 1));
        assert_eq!(original_output.as_slice(), restored_output.as_slice());
    }
}
