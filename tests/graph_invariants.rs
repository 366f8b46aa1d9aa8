//! Sum-merge sensitivity invariant (spec.md §8): for a merge-sum node with
//! parents P1 and P2, changing P1's output by epsilon while holding P2 fixed
//! changes the merged output by epsilon element-wise.
//!
//! Every weighted layer on the path is wired as an exact identity map (unit
//! weight matrix, zero bias, `Activation::Identity`, no merge activation) so
//! a perturbation at one branch's bias propagates to the graph's output
//! unchanged in magnitude.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use conv_net_runtime::layers::{FullyConnected, Output};
use conv_net_runtime::tensor::AllocMode;
use conv_net_runtime::{Activation, BiasInit, Cost, GraphBuilder, LayerKind, Shape, Tensor, WeightInit};

fn identity_fc(rng: &mut impl rand::Rng) -> FullyConnected {
    let mut fc = FullyConnected::new(2, 2, Activation::Identity, WeightInit::HeUniform, BiasInit::Zero, rng);
    {
        let params = fc.parameters_mut();
        params.weights.copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
        params.biases.copy_from_slice(&[0.0, 0.0]);
    }
    fc
}

#[test]
fn perturbing_one_merge_sum_parent_changes_the_merged_output_by_the_same_amount() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut builder = GraphBuilder::new();
    let input = builder.add_input(Shape::unbatched(2, 1, 1));
    let branch_a = builder.add_processing(input, LayerKind::FullyConnected(identity_fc(&mut rng)));
    let branch_b = builder.add_processing(input, LayerKind::FullyConnected(identity_fc(&mut rng)));
    let merged = builder.add_merge_sum(vec![branch_a, branch_b], None);

    let mut output = Output::dense(2, 2, Activation::Identity, Cost::Quadratic, WeightInit::HeUniform, BiasInit::Zero, &mut rng).unwrap();
    {
        let params = output.parameters_mut();
        params.weights.copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
        params.biases.copy_from_slice(&[0.0, 0.0]);
    }
    builder.add_output(merged, LayerKind::Output(output), true);
    let mut graph = builder.build().unwrap();

    let mut input_tensor = Tensor::new(1, 2, 1, 1, AllocMode::Clean);
    input_tensor.as_mut_slice().copy_from_slice(&[1.0, 2.0]);

    let out_id = graph.inference_output_id();
    let baseline = graph.forward(&input_tensor, false).unwrap();
    let baseline = baseline[&out_id].as_slice().to_vec();

    let epsilon = 0.01f32;
    {
        let mut layers = graph.weighted_layers_mut();
        let _branch_a_layer = layers.next().unwrap();
        let branch_b_layer = layers.next().unwrap();
        let params = branch_b_layer.parameters_mut().unwrap();
        params.biases[0] += epsilon;
    }

    let perturbed = graph.forward(&input_tensor, false).unwrap();
    let perturbed = perturbed[&out_id].as_slice().to_vec();

    assert!((perturbed[0] - baseline[0] - epsilon).abs() < 1e-5, "expected a +epsilon shift, got {} -> {}", baseline[0], perturbed[0]);
    assert!((perturbed[1] - baseline[1]).abs() < 1e-5, "unrelated output channel must not move");
}

/// With a merge-sum activation, a perturbation at one branch must pass
/// through the activation's own derivative before reaching the merged
/// output, not skip it the way an unactivated sum does above.
#[test]
fn activated_merge_sum_applies_its_own_derivative_in_backward() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut builder = GraphBuilder::new();
    let input = builder.add_input(Shape::unbatched(2, 1, 1));
    let branch_a = builder.add_processing(input, LayerKind::FullyConnected(identity_fc(&mut rng)));
    let branch_b = builder.add_processing(input, LayerKind::FullyConnected(identity_fc(&mut rng)));
    let merged = builder.add_merge_sum(vec![branch_a, branch_b], Some(Activation::Sigmoid));

    let mut output = Output::dense(2, 2, Activation::Identity, Cost::Quadratic, WeightInit::HeUniform, BiasInit::Zero, &mut rng).unwrap();
    {
        let params = output.parameters_mut();
        params.weights.copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
        params.biases.copy_from_slice(&[0.0, 0.0]);
    }
    builder.add_output(merged, LayerKind::Output(output), true);
    let mut graph = builder.build().unwrap();

    let mut input_tensor = Tensor::new(1, 2, 1, 1, AllocMode::Clean);
    input_tensor.as_mut_slice().copy_from_slice(&[1.0, 2.0]);

    let out_id = graph.inference_output_id();
    let prediction = graph.forward(&input_tensor, true).unwrap();
    let prediction = prediction[&out_id].as_slice().to_vec();

    // pre-activation sum for channel 0 is 1.0 + 1.0 = 2.0, so the merge's
    // sigmoid output there is sigmoid(2.0); its derivative is y(1-y).
    let y = prediction[0];
    let expected_sigmoid_derivative = y * (1.0 - y);

    let target = Tensor::from_vec(vec![0.0, 0.0], 1, 2, 1, 1).unwrap();
    let mut targets = HashMap::new();
    targets.insert(out_id, target);
    graph.backward(&targets).unwrap();

    // Quadratic cost gradient wrt the (identity) output is (y_hat - y) = y
    // for channel 0; the merge-sum's sigmoid derivative must have scaled
    // what reaches branch_a's bias gradient by y(1-y), not passed it through
    // unchanged.
    let mut layers = graph.weighted_layers_mut();
    let branch_a_layer = layers.next().unwrap();
    let grad_bias = branch_a_layer.gradients().unwrap().biases[0];
    let expected = y * expected_sigmoid_derivative;
    assert!(
        (grad_bias - expected).abs() < 1e-4,
        "expected bias gradient {expected}, got {grad_bias}"
    );
}
