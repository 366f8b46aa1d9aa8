//! Directed acyclic computation graph: node kinds Input, Processing,
//! Merge-Sum, Merge-DepthConcat, TrainingBranch, Output (spec.md §3/§4.6).
//!
//! Nodes are built bottom-up via [`GraphBuilder`], which only lets a node
//! reference already-built parents — creation order is therefore already a
//! valid topological order (spec.md §4.6's "deterministic DFS from Input
//! along node-creation order"), so no separate topological sort is needed.
//! `examples/felipe-santos-gran-prix/src/graph/node.rs` is the structural
//! reference for splitting node identity from owned-layer storage, adapted
//! here to enum dispatch per spec.md §9 rather than `dyn Operation`.

pub mod node;

use std::collections::HashMap;

use crate::activation::Activation;
use crate::error::{NetworkError, Result};
use crate::layers::LayerKind;
use crate::tensor::{AllocMode, Shape, Tensor};

pub use node::{NodeId, NodeKind};

pub struct Graph {
    nodes: Vec<NodeKind>,
    shapes: Vec<Shape>,
    input_id: NodeId,
    output_ids: Vec<NodeId>,
    inference_output: NodeId,
}

/// Builds a graph bottom-up, keeping parent back-edges only for
/// construction (spec.md §9's graph-cycle redesign guidance); the built
/// [`Graph`] precomputes each node's output shape once, in creation order.
pub struct GraphBuilder {
    nodes: Vec<NodeKind>,
    input_shape: Option<Shape>,
    input_id: Option<NodeId>,
    output_ids: Vec<(NodeId, bool)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            nodes: Vec::new(),
            input_shape: None,
            input_id: None,
            output_ids: Vec::new(),
        }
    }

    pub fn add_input(&mut self, shape: Shape) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeKind::Input);
        self.input_id = Some(id);
        self.input_shape = Some(shape);
        id
    }

    pub fn add_processing(&mut self, parent: NodeId, layer: LayerKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeKind::Processing { parent, layer });
        id
    }

    pub fn add_merge_sum(&mut self, parents: Vec<NodeId>, activation: Option<Activation>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeKind::MergeSum { parents, activation, output_cache: None });
        id
    }

    pub fn add_merge_depth_concat(&mut self, parents: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeKind::MergeDepthConcat { parents });
        id
    }

    pub fn add_training_branch(&mut self, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeKind::TrainingBranch { parent });
        id
    }

    pub fn add_output(&mut self, parent: NodeId, layer: LayerKind, inference: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeKind::Output { parent, layer });
        self.output_ids.push((id, inference));
        id
    }

    pub fn build(self) -> Result<Graph> {
        let input_id = self
            .input_id
            .ok_or_else(|| NetworkError::InvalidConfig("graph has no Input node".into()))?;
        let input_shape = self.input_shape.expect("set alongside input_id");
        if self.output_ids.is_empty() {
            return Err(NetworkError::InvalidConfig("graph has no Output node".into()));
        }
        let inference_output = self
            .output_ids
            .iter()
            .find(|(_, inference)| *inference)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                NetworkError::InvalidConfig("graph has no Output node marked inference".into())
            })?;

        let n = self.nodes.len();
        let mut shapes: Vec<Shape> = vec![input_shape; n];
        for (idx, node) in self.nodes.iter().enumerate() {
            for parent in node.parents() {
                if parent.0 >= idx {
                    return Err(NetworkError::InvalidConfig(
                        "graph node references a parent created later (would form a cycle)".into(),
                    ));
                }
            }
            shapes[idx] = match node {
                NodeKind::Input => input_shape,
                NodeKind::Processing { layer, .. } => layer.output_shape(),
                NodeKind::Output { layer, .. } => layer.output_shape(),
                NodeKind::TrainingBranch { parent } => shapes[parent.0],
                NodeKind::MergeSum { parents, .. } => shapes[parents[0].0],
                NodeKind::MergeDepthConcat { parents } => {
                    let first = shapes[parents[0].0];
                    let total_c: usize = parents.iter().map(|p| shapes[p.0].c).sum();
                    Shape::batched(first.n.unwrap_or(0), total_c, first.h, first.w)
                }
            };
        }

        Ok(Graph {
            nodes: self.nodes,
            shapes,
            input_id,
            output_ids: self.output_ids.into_iter().map(|(id, _)| id).collect(),
            inference_output,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn accumulate(slot: &mut Option<Tensor>, contribution: Tensor) {
    match slot {
        Some(existing) => {
            for (e, c) in existing.as_mut_slice().iter_mut().zip(contribution.as_slice()) {
                *e += c;
            }
        }
        None => *slot = Some(contribution),
    }
}

impl Graph {
    pub fn input_shape(&self) -> Shape {
        self.shapes[self.input_id.0]
    }

    pub fn inference_output_shape(&self) -> Shape {
        self.shapes[self.inference_output.0]
    }

    pub fn inference_output_id(&self) -> NodeId {
        self.inference_output
    }

    /// Forward pass in creation order; every node's output is retained
    /// until backward, when it is dropped after the reverse pass consumes
    /// it (spec.md §4.6: "node outputs are retained until every consumer
    /// has read them").
    pub fn forward(&mut self, input: &Tensor, training: bool) -> Result<HashMap<NodeId, Tensor>> {
        let mut outputs: Vec<Option<Tensor>> = (0..self.nodes.len()).map(|_| None).collect();
        outputs[self.input_id.0] = Some(input.duplicate());

        for idx in 0..self.nodes.len() {
            if idx == self.input_id.0 {
                continue;
            }
            let produced = match &mut self.nodes[idx] {
                NodeKind::Input => unreachable!(),
                NodeKind::Processing { parent, layer } => {
                    let parent_out = outputs[parent.0]
                        .as_ref()
                        .expect("parent computed earlier by topological order");
                    layer.forward(parent_out, training)?
                }
                NodeKind::Output { parent, layer } => {
                    let parent_out = outputs[parent.0]
                        .as_ref()
                        .expect("parent computed earlier by topological order");
                    layer.forward(parent_out, training)?
                }
                NodeKind::MergeSum { parents, activation, output_cache } => {
                    let mut sum: Option<Tensor> = None;
                    for p in parents.iter() {
                        let t = outputs[p.0].as_ref().expect("parent computed earlier");
                        match &mut sum {
                            Some(acc) => {
                                for (a, v) in acc.as_mut_slice().iter_mut().zip(t.as_slice()) {
                                    *a += v;
                                }
                            }
                            None => sum = Some(t.duplicate()),
                        }
                    }
                    let mut sum = sum.expect("merge-sum has at least one parent");
                    if let Some(act) = activation {
                        let mut activated = Tensor::like(&sum, AllocMode::Default);
                        act.forward(sum.as_slice(), activated.as_mut_slice());
                        sum = activated;
                        *output_cache = Some(sum.duplicate());
                    } else {
                        *output_cache = None;
                    }
                    sum
                }
                NodeKind::MergeDepthConcat { parents } => {
                    let parent_tensors: Vec<&Tensor> = parents
                        .iter()
                        .map(|p| outputs[p.0].as_ref().expect("parent computed earlier"))
                        .collect();
                    let n = parent_tensors[0].n();
                    let h = parent_tensors[0].h();
                    let w = parent_tensors[0].w();
                    let total_c: usize = parent_tensors.iter().map(|t| t.c()).sum();
                    let mut out = Tensor::new(n, total_c, h, w, AllocMode::Default);
                    let hw = h * w;
                    for ni in 0..n {
                        let mut offset = 0usize;
                        let dst = out.sample_mut(ni);
                        for t in &parent_tensors {
                            let src = t.sample(ni);
                            dst[offset..offset + t.c() * hw].copy_from_slice(src);
                            offset += t.c() * hw;
                        }
                    }
                    out
                }
                NodeKind::TrainingBranch { parent } => {
                    let parent_out = outputs[parent.0]
                        .as_ref()
                        .expect("parent computed earlier by topological order");
                    parent_out.duplicate()
                }
            };
            outputs[idx] = Some(produced);
        }

        let mut result = HashMap::new();
        for id in &self.output_ids {
            result.insert(*id, outputs[id.0].take().expect("output computed"));
        }
        result.insert(self.input_id, outputs[self.input_id.0].take().unwrap());
        Ok(result)
    }

    /// `targets` maps each Output node id to its batch target tensor; an
    /// auxiliary output not present in `targets` is skipped for that batch.
    pub fn backward(&mut self, targets: &HashMap<NodeId, Tensor>) -> Result<()> {
        let mut grad_into: Vec<Option<Tensor>> = (0..self.nodes.len()).map(|_| None).collect();

        for idx in (0..self.nodes.len()).rev() {
            if idx == self.input_id.0 {
                continue;
            }
            match &mut self.nodes[idx] {
                NodeKind::Input => unreachable!(),
                NodeKind::Output { parent, layer } => {
                    if let Some(target) = targets.get(&NodeId(idx)) {
                        let dx = layer.backward(target)?;
                        accumulate(&mut grad_into[parent.0], dx);
                    }
                }
                NodeKind::Processing { parent, layer } => {
                    if let Some(grad) = grad_into[idx].take() {
                        let dx = layer.backward(&grad)?;
                        accumulate(&mut grad_into[parent.0], dx);
                    }
                }
                NodeKind::TrainingBranch { parent } => {
                    if let Some(grad) = grad_into[idx].take() {
                        accumulate(&mut grad_into[parent.0], grad);
                    }
                }
                NodeKind::MergeSum { parents, activation, output_cache } => {
                    if let Some(mut grad) = grad_into[idx].take() {
                        if let Some(act) = activation {
                            let output = output_cache
                                .as_ref()
                                .expect("output cached during forward when activation is set");
                            act.backward_inplace(output.as_slice(), grad.as_mut_slice());
                        }
                        // The merge itself is a plain sum, so once its own
                        // activation derivative (if any) has been applied,
                        // the same gradient goes to every addend unchanged.
                        for parent in parents.iter() {
                            accumulate(&mut grad_into[parent.0], grad.duplicate());
                        }
                    }
                }
                NodeKind::MergeDepthConcat { parents } => {
                    if let Some(grad) = grad_into[idx].take() {
                        let n = grad.n();
                        let (h, w) = (grad.h(), grad.w());
                        let hw = h * w;
                        let mut offset = 0usize;
                        for parent in parents.iter() {
                            let parent_c = self.shapes[parent.0].c;
                            let mut slice = Tensor::new(n, parent_c, h, w, AllocMode::Default);
                            for ni in 0..n {
                                let src = &grad.sample(ni)[offset..offset + parent_c * hw];
                                slice.sample_mut(ni).copy_from_slice(src);
                            }
                            accumulate(&mut grad_into[parent.0], slice);
                            offset += parent_c * hw;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn cost_value(&self, targets: &HashMap<NodeId, Tensor>) -> f32 {
        let mut total = 0.0;
        let mut count = 0;
        for id in &self.output_ids {
            if let (NodeKind::Output { layer, .. }, Some(target)) = (&self.nodes[id.0], targets.get(id)) {
                total += layer.as_output().expect("Output node wraps Output layer").cost_value(target);
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f32
        }
    }

    pub fn weighted_layers_mut(&mut self) -> impl Iterator<Item = &mut LayerKind> {
        self.nodes.iter_mut().filter_map(|n| match n {
            NodeKind::Processing { layer, .. } | NodeKind::Output { layer, .. } => {
                if layer.gradients().is_some() {
                    Some(layer)
                } else {
                    None
                }
            }
            _ => None,
        })
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

    fn two_branch_graph(rng: &mut impl rand::Rng) -> Graph {
        let mut builder = GraphBuilder::new();
        let input = builder.add_input(Shape::unbatched(2, 1, 1));
        let branch_a = builder.add_processing(
            input,
            LayerKind::FullyConnected(FullyConnected::new(2, 2, Activation::Identity, WeightInit::HeUniform, BiasInit::Zero, rng)),
        );
        let branch_b = builder.add_processing(
            input,
            LayerKind::FullyConnected(FullyConnected::new(2, 2, Activation::Identity, WeightInit::HeUniform, BiasInit::Zero, rng)),
        );
        let merged = builder.add_merge_sum(vec![branch_a, branch_b], None);
        let _output = builder.add_output(
            merged,
            LayerKind::Output(Output::dense(2, 2, Activation::Identity, Cost::Quadratic, WeightInit::HeUniform, BiasInit::Zero, rng).unwrap()),
            true,
        );
        builder.build().unwrap()
    }

    #[test]
    fn builds_and_reports_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let graph = two_branch_graph(&mut rng);
        assert_eq!(graph.input_shape().chw(), 2);
        assert_eq!(graph.inference_output_shape().chw(), 2);
    }

    #[test]
    fn forward_and_backward_run_end_to_end_through_a_sum_merge() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut graph = two_branch_graph(&mut rng);
        let input = Tensor::from_vec(vec![1.0, -1.0], 1, 2, 1, 1).unwrap();
        let outputs = graph.forward(&input, true).unwrap();
        let out_id = graph.inference_output_id();
        assert_eq!(outputs[&out_id].shape().chw(), 2);

        let target = Tensor::from_vec(vec![0.0, 1.0], 1, 2, 1, 1).unwrap();
        let mut targets = HashMap::new();
        targets.insert(out_id, target);
        let cost_before = graph.cost_value(&targets);
        assert!(cost_before.is_finite());
        graph.backward(&targets).unwrap();
        assert!(graph.weighted_layers_mut().count() >= 3);
    }

    #[test]
    fn depth_concat_reports_summed_channel_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut builder = GraphBuilder::new();
        let input = builder.add_input(Shape::unbatched(2, 1, 1));
        let branch_a = builder.add_processing(
            input,
            LayerKind::FullyConnected(FullyConnected::new(2, 3, Activation::Identity, WeightInit::HeUniform, BiasInit::Zero, &mut rng)),
        );
        let branch_b = builder.add_processing(
            input,
            LayerKind::FullyConnected(FullyConnected::new(2, 4, Activation::Identity, WeightInit::HeUniform, BiasInit::Zero, &mut rng)),
        );
        let concat = builder.add_merge_depth_concat(vec![branch_a, branch_b]);
        let _output = builder.add_output(
            concat,
            LayerKind::Output(Output::dense(7, 2, Activation::Identity, Cost::Quadratic, WeightInit::HeUniform, BiasInit::Zero, &mut rng).unwrap()),
            true,
        );
        let graph = builder.build().unwrap();
        let input_tensor = Tensor::from_vec(vec![1.0, 2.0], 1, 2, 1, 1).unwrap();
        let mut graph = graph;
        let outputs = graph.forward(&input_tensor, false).unwrap();
        assert_eq!(outputs[&concat].shape().c, 7);
    }
}
