//! Two training-level invariants from spec.md §8: a finite-difference check
//! of the analytic backward pass against the numeric gradient for each of
//! sigmoid/tanh/relu, and monotonic quadratic-cost reduction under plain
//! SGD on a linearly separable two-class dataset.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use conv_net_runtime::dataset::InMemoryDataset;
use conv_net_runtime::layers::{FullyConnected, Output};
use conv_net_runtime::optim::UpdateRule;
use conv_net_runtime::tensor::AllocMode;
use conv_net_runtime::{
    Activation, BiasInit, Cost, LayerKind, Model, Sequential, Tensor, TerminationReason, TesterKind, Trainer, WeightInit,
};

fn loss(fc: &mut FullyConnected, input: &Tensor) -> f32 {
    fc.forward(input).unwrap().as_slice().iter().sum()
}

#[test]
fn analytic_weight_gradient_matches_finite_difference_for_common_activations() {
    const H: f32 = 1e-3;
    for activation in [Activation::Sigmoid, Activation::Tanh, Activation::Relu] {
        let mut rng = StdRng::seed_from_u64(11);
        let mut fc = FullyConnected::new(3, 2, activation, WeightInit::GlorotUniform, BiasInit::Zero, &mut rng);

        let input = Tensor::from_vec(vec![0.3, -0.6, 0.9, -0.2, 0.5, 0.1], 2, 3, 1, 1).unwrap();
        let mut grad_output = Tensor::new(2, 2, 1, 1, AllocMode::Clean);
        grad_output.fill(1.0);

        fc.forward(&input).unwrap();
        fc.backward(&grad_output).unwrap();
        let analytic = fc.gradients().weights.to_vec();

        for i in 0..analytic.len() {
            let original = {
                let params = fc.parameters_mut();
                params.weights[i]
            };
            {
                let params = fc.parameters_mut();
                params.weights[i] = original + H;
            }
            let loss_plus = loss(&mut fc, &input);
            {
                let params = fc.parameters_mut();
                params.weights[i] = original - H;
            }
            let loss_minus = loss(&mut fc, &input);
            {
                let params = fc.parameters_mut();
                params.weights[i] = original;
            }
            let numeric = (loss_plus - loss_minus) / (2.0 * H);
            let scale = analytic[i].abs().max(1.0);
            assert!(
                (analytic[i] - numeric).abs() / scale < 5e-2,
                "{activation:?} weight {i}: analytic={} numeric={}",
                analytic[i],
                numeric
            );
        }
    }
}

#[test]
fn sgd_reduces_cost_on_linearly_separable_data_within_200_epochs() {
    let mut rng = StdRng::seed_from_u64(5);

    let mut inputs = Vec::new();
    let mut targets = Vec::new();
    for _ in 0..40 {
        let x: f32 = rng.gen_range(-1.0..1.0);
        let y: f32 = rng.gen_range(-1.0..1.0);
        inputs.push(x);
        inputs.push(y);
        targets.push(if x + y > 0.0 { 1.0 } else { 0.0 });
    }
    let mut training = InMemoryDataset::new(inputs, targets, 2, 1).unwrap();

    let output = Output::dense(2, 1, Activation::Sigmoid, Cost::Quadratic, WeightInit::GlorotUniform, BiasInit::Zero, &mut rng).unwrap();
    let model = Sequential::new(vec![LayerKind::Output(output)]).unwrap();
    let mut trainer = Trainer::new(
        Model::Sequential(model),
        UpdateRule::Sgd { lr: 0.1, l2: 0.0 },
        0.0,
        TesterKind::Threshold { threshold: 0.5 },
    )
    .unwrap();

    let mut first_cost = None;
    let mut last_cost = 0.0f32;
    let reason = trainer
        .train(&mut training, 40, 200, &mut rng, |_| {}, |report| {
            if first_cost.is_none() {
                first_cost = Some(report.cost);
            }
            last_cost = report.cost;
        })
        .unwrap();

    assert_eq!(reason, TerminationReason::Completed);
    let first_cost = first_cost.expect("at least one epoch ran");
    assert!(
        last_cost < first_cost,
        "expected cost to fall under SGD: first={first_cost} last={last_cost}"
    );
}
