//! Typed errors for the tensor/layer/graph/trainer runtime.
//!
//! Grounded on `examples/felipe-santos-gran-prix/src/errors.rs`'s `GPError`:
//! a `thiserror` enum distinguishing the failure kinds a caller may need to
//! match on, rather than a single opaque string. Higher-level glue (the demo
//! binary, CLI argument handling) uses `anyhow::Error` instead, matching the
//! teacher's own split between library errors and top-level glue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("numeric overflow: {0}")]
    NumericOverflow(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("corrupt model stream: {0}")]
    Corruption(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
