//! A convolutional neural network runtime: tensor storage, layer algebra
//! and gradient engine, and a mini-batch SGD trainer.
//!
//! The crate is organized bottom-up: [`tensor`] is the storage primitive
//! every layer reads and writes; [`layers`] implements each layer kind's
//! forward/backward contract; [`sequential`] and [`graph`] compose layers
//! into a linear stack or a DAG respectively; [`optim`] and [`trainer`]
//! drive the mini-batch training loop; [`dataset`] and [`tester`] are the
//! input/evaluation surfaces a caller supplies; [`serialize`] persists a
//! trained model; [`config`] threads process-wide knobs explicitly rather
//! than through global state.

pub mod activation;
pub mod backend;
pub mod config;
pub mod cost;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod init;
pub mod layers;
pub mod optim;
pub mod sequential;
pub mod serialize;
pub mod tensor;
pub mod tester;
pub mod trainer;

pub use activation::Activation;
pub use config::{Backend, ConvolutionMode, RuntimeConfig};
pub use cost::Cost;
pub use dataset::{Dataset, InMemoryDataset};
pub use error::{NetworkError, Result};
pub use graph::{Graph, GraphBuilder, NodeId, NodeKind};
pub use init::{BiasInit, WeightInit};
pub use layers::LayerKind;
pub use sequential::Sequential;
pub use tensor::{Shape, Tensor};
pub use tester::TesterKind;
pub use trainer::{BatchProgress, CancellationToken, EarlyStopping, EpochReport, Model, TerminationReason, Trainer};
