//! Process-wide knobs modeled as an explicit value, per spec.md §9's
//! "implicit global state" redesign flag: instead of reading GPU settings,
//! the accuracy tester choice, or a batch-size cap from statics, every
//! constructor that needs one of these takes a [`RuntimeConfig`].
//!
//! The tensor pool (`src/tensor/pool.rs`) remains the one intentional
//! process-global, as spec.md §5/§9 calls out explicitly.

use serde::{Deserialize, Serialize};

use crate::tester::TesterKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvolutionMode {
    /// Omits the kernel flip; the default throughout (spec.md §4.5).
    CrossCorrelation,
    Convolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub tester: TesterKind,
    pub convolution_mode: ConvolutionMode,
    pub max_batch_size_hint: usize,
    pub backend: Backend,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            tester: TesterKind::Argmax,
            convolution_mode: ConvolutionMode::CrossCorrelation,
            max_batch_size_hint: 256,
            backend: Backend::Cpu,
        }
    }
}
