//! Node identity and node-kind storage for the graph model (spec.md §3's
//! six node kinds: Input, Processing, Merge-Sum, Merge-DepthConcat,
//! TrainingBranch, Output).

use crate::activation::Activation;
use crate::layers::LayerKind;
use crate::tensor::{Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

pub enum NodeKind {
    Input,
    Processing {
        parent: NodeId,
        layer: LayerKind,
    },
    MergeSum {
        parents: Vec<NodeId>,
        activation: Option<Activation>,
        /// The node's own activated output from the most recent forward
        /// call, needed to reconstruct `f'` during backward. `None` when
        /// `activation` is `None` (the sum has no derivative to apply).
        output_cache: Option<Tensor>,
    },
    MergeDepthConcat {
        parents: Vec<NodeId>,
    },
    /// Marks a split point feeding an auxiliary branch that only
    /// contributes to the cost during training (spec.md §4.6).
    TrainingBranch {
        parent: NodeId,
    },
    Output {
        parent: NodeId,
        layer: LayerKind,
    },
}

impl NodeKind {
    /// The parent node ids this node reads its input from, in a
    /// deterministic order. Empty for `Input`.
    pub fn parents(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Input => Vec::new(),
            NodeKind::Processing { parent, .. } => vec![*parent],
            NodeKind::Output { parent, .. } => vec![*parent],
            NodeKind::TrainingBranch { parent } => vec![*parent],
            NodeKind::MergeSum { parents, .. } => parents.clone(),
            NodeKind::MergeDepthConcat { parents } => parents.clone(),
        }
    }
}
