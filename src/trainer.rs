//! The mini-batch SGD training loop (spec.md §3/§6): owns the network, the
//! update rule, optional validation-based early stopping, optional test-set
//! accuracy monitoring, and progress callbacks; drives epochs → batches →
//! forward → cost → backward → per-weighted-layer update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rand::Rng;

use crate::dataset::Dataset;
use crate::error::{NetworkError, Result};
use crate::graph::Graph;
use crate::layers::LayerKind;
use crate::optim::{OptimizerState, UpdateRule};
use crate::sequential::Sequential;
use crate::tensor::Tensor;
use crate::tester::TesterKind;

/// Either flavor of network the trainer can drive — a linear stack or the
/// general DAG — unified behind the same forward/backward/cost contract
/// the trainer needs (spec.md §4.6's Sequential-is-a-degenerate-graph
/// framing).
pub enum Model {
    Sequential(Sequential),
    Graph(Graph),
}

impl Model {
    fn forward(&mut self, input: &Tensor, training: bool, dropout_p: f32, rng: &mut impl Rng) -> Result<Tensor> {
        match self {
            Model::Sequential(seq) => seq.forward(input, training, dropout_p, rng),
            Model::Graph(graph) => {
                if dropout_p > 0.0 {
                    warn!("dropout is not yet modeled for graph networks; ignoring dropout_p={dropout_p}");
                }
                let mut outputs = graph.forward(input, training)?;
                Ok(outputs.remove(&graph.inference_output_id()).expect("inference output always present"))
            }
        }
    }

    fn backward(&mut self, prediction_target: &Tensor) -> Result<()> {
        match self {
            Model::Sequential(seq) => {
                seq.backward(prediction_target)?;
                Ok(())
            }
            Model::Graph(graph) => {
                let mut targets = HashMap::new();
                targets.insert(graph.inference_output_id(), prediction_target.duplicate());
                graph.backward(&targets)
            }
        }
    }

    fn cost_value(&self, target: &Tensor) -> f32 {
        match self {
            Model::Sequential(seq) => seq.cost_value(target),
            Model::Graph(graph) => {
                let mut targets = HashMap::new();
                targets.insert(graph.inference_output_id(), target.duplicate());
                graph.cost_value(&targets)
            }
        }
    }

    fn weighted_layers_mut(&mut self) -> Box<dyn Iterator<Item = &mut LayerKind> + '_> {
        match self {
            Model::Sequential(seq) => Box::new(seq.weighted_layers_mut()),
            Model::Graph(graph) => Box::new(graph.weighted_layers_mut()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyStopping {
    /// Minimum validation-cost improvement, over the last `interval`
    /// evaluations, to be considered still progressing.
    pub tolerance: f32,
    /// How many epochs between validation evaluations.
    pub interval: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Completed,
    Cancelled,
    EarlyStopping,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub cost: f32,
    pub accuracy: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    pub epoch: usize,
    pub processed: usize,
    pub total: usize,
}

/// Cooperative cancellation, checked between batches and between epochs
/// (spec.md §5).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Trainer<'a> {
    model: Model,
    update_rule: UpdateRule,
    states: Vec<OptimizerState>,
    dropout_p: f32,
    validation: Option<(Box<dyn Dataset + 'a>, EarlyStopping)>,
    test: Option<Box<dyn Dataset + 'a>>,
    tester: TesterKind,
    cancellation: CancellationToken,
}

impl<'a> Trainer<'a> {
    pub fn new(model: Model, update_rule: UpdateRule, dropout_p: f32, tester: TesterKind) -> Result<Self> {
        if !(0.0..1.0).contains(&dropout_p) {
            return Err(NetworkError::InvalidConfig(format!(
                "dropout probability must be in [0, 1), got {dropout_p}"
            )));
        }
        Ok(Trainer {
            model,
            update_rule,
            states: Vec::new(),
            dropout_p,
            validation: None,
            test: None,
            tester,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_validation(mut self, dataset: Box<dyn Dataset + 'a>, early_stop: EarlyStopping) -> Self {
        self.validation = Some((dataset, early_stop));
        self
    }

    pub fn with_test(mut self, dataset: Box<dyn Dataset + 'a>) -> Self {
        self.test = Some(dataset);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn ensure_states(&mut self) {
        let n = self.model.weighted_layers_mut().count();
        if self.states.len() != n {
            self.states = (0..n).map(|_| OptimizerState::new()).collect();
        }
    }

    fn apply_updates(&mut self, batch_size: usize) -> Result<()> {
        self.ensure_states();
        for (state, layer) in self.states.iter_mut().zip(self.model.weighted_layers_mut()) {
            let grads = layer.gradients().expect("weighted_layers_mut only yields weighted layers");
            let grad_weights = grads.weights.to_vec();
            let grad_biases = grads.biases.to_vec();
            let params = layer.parameters_mut().expect("weighted_layers_mut only yields weighted layers");
            self.update_rule
                .apply(state, params.weights, &grad_weights, params.biases, &grad_biases, batch_size);
            if params.weights.iter().any(|v| v.is_nan()) || params.biases.iter().any(|v| v.is_nan()) {
                return Err(NetworkError::NumericOverflow(
                    "update rule produced a NaN parameter".into(),
                ));
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, dataset: &mut (dyn Dataset + 'a), batch_size: usize, rng: &mut impl Rng) -> (f32, f32) {
        dataset.reset();
        let mut total_cost = 0.0;
        let mut total_correct = 0.0;
        let mut total_samples = 0usize;
        while let Some((input, target)) = dataset.next_batch(batch_size) {
            let n = input.n();
            let prediction = self
                .model
                .forward(&input, false, 0.0, rng)
                .expect("evaluation forward should not fail on a well-formed dataset");
            total_cost += self.model.cost_value(&target) * n as f32;
            total_correct += self.tester.accuracy(&prediction, &target) * n as f32;
            total_samples += n;
        }
        if total_samples == 0 {
            (0.0, 0.0)
        } else {
            (total_cost / total_samples as f32, total_correct / total_samples as f32)
        }
    }

    /// Runs up to `max_epochs`, calling `on_batch` after every batch and
    /// `on_epoch` after every epoch's optional test evaluation.
    pub fn train(
        &mut self,
        training: &mut (dyn Dataset + 'a),
        batch_size: usize,
        max_epochs: usize,
        rng: &mut impl Rng,
        mut on_batch: impl FnMut(BatchProgress),
        mut on_epoch: impl FnMut(EpochReport),
    ) -> Result<TerminationReason> {
        let mut best_validation_cost = f32::INFINITY;
        let mut epochs_since_improvement = 0usize;

        for epoch in 0..max_epochs {
            if self.cancellation.is_cancelled() {
                return Ok(TerminationReason::Cancelled);
            }
            training.reset();
            training.shuffle_if_supported(rng as &mut dyn rand::RngCore);

            let total = training.len();
            let mut processed = 0usize;
            let mut epoch_cost = 0.0f32;
            let mut batches = 0usize;

            while let Some((input, target)) = training.next_batch(batch_size) {
                if self.cancellation.is_cancelled() {
                    return Ok(TerminationReason::Cancelled);
                }
                let n = input.n();
                let _prediction = self.model.forward(&input, true, self.dropout_p, rng)?;
                epoch_cost += self.model.cost_value(&target);
                self.model.backward(&target)?;
                self.apply_updates(n)?;

                processed += n;
                batches += 1;
                on_batch(BatchProgress {
                    epoch,
                    processed,
                    total,
                });
            }
            let mean_cost = if batches == 0 { 0.0 } else { epoch_cost / batches as f32 };

            let accuracy = if let Some(test) = &mut self.test {
                let (_, acc) = {
                    let test_ref: &mut (dyn Dataset + 'a) = test.as_mut();
                    self.evaluate(test_ref, batch_size, rng)
                };
                Some(acc)
            } else {
                None
            };
            info!("epoch {epoch}: cost={mean_cost:.6} accuracy={accuracy:?}");
            on_epoch(EpochReport {
                epoch,
                cost: mean_cost,
                accuracy,
            });

            if let Some((validation, early_stop)) = &mut self.validation {
                if (epoch + 1) % early_stop.interval == 0 {
                    let validation_ref: &mut (dyn Dataset + 'a) = validation.as_mut();
                    let (validation_cost, _) = self.evaluate(validation_ref, batch_size, rng);
                    if best_validation_cost - validation_cost > early_stop.tolerance {
                        best_validation_cost = validation_cost;
                        epochs_since_improvement = 0;
                    } else {
                        epochs_since_improvement += 1;
                        if epochs_since_improvement >= 1 {
                            return Ok(TerminationReason::EarlyStopping);
                        }
                    }
                }
            }
        }
        Ok(TerminationReason::Completed)
    }
}
