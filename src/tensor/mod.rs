//! The tensor runtime: a contiguous, row-major, shape-aware `f32` buffer.
//!
//! Every layer kernel reads and writes [`Tensor`]s of logical shape
//! `(n, c, h, w)`, stored N-major then C then H then W (row-major within
//! each 2-D slice), per spec.md §3/§4.1. Reshaping aliases the same storage;
//! duplication copies into a freshly pooled tensor.

mod pool;

use std::fmt;

use crate::error::{NetworkError, Result};

/// The four logical dimensions of a tensor or a layer's input/output shape.
///
/// When a `Shape` describes a layer's input/output (rather than a live
/// tensor), `n` is `None` — the "unspecified batch" sentinel of spec.md §3 —
/// and is filled in at forward time from the live batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    pub n: Option<usize>,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Shape {
    pub const fn unbatched(c: usize, h: usize, w: usize) -> Self {
        Shape { n: None, c, h, w }
    }

    pub const fn batched(n: usize, c: usize, h: usize, w: usize) -> Self {
        Shape {
            n: Some(n),
            c,
            h,
            w,
        }
    }

    /// `C·H·W`, the flattened per-sample feature count used by dense layers.
    pub const fn chw(&self) -> usize {
        self.c * self.h * self.w
    }

    pub fn with_batch(&self, n: usize) -> Self {
        Shape {
            n: Some(n),
            ..*self
        }
    }

    /// Fills in `n` if unset, or checks it matches if already set.
    pub fn resolved(&self, n: usize) -> Self {
        Shape {
            n: Some(self.n.unwrap_or(n)),
            ..*self
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.n {
            Some(n) => write!(f, "({}, {}, {}, {})", n, self.c, self.h, self.w),
            None => write!(f, "(*, {}, {}, {})", self.c, self.h, self.w),
        }
    }
}

/// Allocation strategy for a freshly rented tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// Contents are unspecified (whatever the pool buffer last held).
    Default,
    /// Contents are zero-filled.
    Clean,
}

/// A contiguous, row-major, N×C×H×W buffer of 32-bit floats.
///
/// Created by the layer that produces a forward/backward output, owned by
/// the caller, and released back to the process-global pool when dropped —
/// unless it was built with [`Tensor::from_vec`], which wraps a caller-owned
/// buffer that is never pooled (spec.md §4.1).
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
    pooled: bool,
    null: bool,
}

impl Tensor {
    fn batch(&self) -> usize {
        self.shape.n.expect("live tensor must have a resolved batch size")
    }

    /// Allocates a new tensor of shape `(n, chw)`-worth of storage, reshaped
    /// to `(n, c, h, w)`.
    pub fn new(n: usize, c: usize, h: usize, w: usize, mode: AllocMode) -> Self {
        let len = n * c * h * w;
        let data = pool::rent(len, mode == AllocMode::Clean);
        Tensor {
            data,
            shape: Shape::batched(n, c, h, w),
            pooled: true,
            null: false,
        }
    }

    /// A tensor mirroring another's shape (same allocation mode contract).
    pub fn like(other: &Tensor, mode: AllocMode) -> Self {
        Tensor::new(other.batch(), other.shape.c, other.shape.h, other.shape.w, mode)
    }

    /// Wraps a caller-owned buffer; never returned to the pool.
    pub fn from_vec(data: Vec<f32>, n: usize, c: usize, h: usize, w: usize) -> Result<Self> {
        let expected = n * c * h * w;
        if data.len() != expected {
            return Err(NetworkError::ShapeMismatch {
                expected: format!("{} elements", expected),
                found: format!("{} elements", data.len()),
            });
        }
        Ok(Tensor {
            data,
            shape: Shape::batched(n, c, h, w),
            pooled: false,
            null: false,
        })
    }

    /// The sentinel "absent optional output" tensor, e.g. "do not propagate
    /// dx back to the input layer" (spec.md §3).
    pub fn null() -> Self {
        Tensor {
            data: Vec::new(),
            shape: Shape::batched(0, 0, 0, 0),
            pooled: false,
            null: true,
        }
    }

    pub fn is_null(&self) -> bool {
        self.null
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn n(&self) -> usize {
        self.batch()
    }
    pub fn c(&self) -> usize {
        self.shape.c
    }
    pub fn h(&self) -> usize {
        self.shape.h
    }
    pub fn w(&self) -> usize {
        self.shape.w
    }

    pub fn len(&self) -> usize {
        self.batch() * self.shape.chw()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data[..self.len()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        let len = self.len();
        &mut self.data[..len]
    }

    /// Row-major index of element `(n, c, h, w)`.
    #[inline]
    pub fn index(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        ((n * self.shape.c + c) * self.shape.h + h) * self.shape.w + w
    }

    #[inline]
    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        self.data[self.index(n, c, h, w)]
    }

    #[inline]
    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: f32) {
        let idx = self.index(n, c, h, w);
        self.data[idx] = value;
    }

    /// View of one sample's CHW slice, for per-n parallel kernels.
    pub fn sample(&self, n: usize) -> &[f32] {
        let chw = self.shape.chw();
        &self.data[n * chw..(n + 1) * chw]
    }

    pub fn sample_mut(&mut self, n: usize) -> &mut [f32] {
        let chw = self.shape.chw();
        &mut self.data[n * chw..(n + 1) * chw]
    }

    /// Disjoint per-sample mutable chunks, for `rayon::par_chunks_mut`.
    pub fn chunks_mut(&mut self) -> std::slice::ChunksMut<'_, f32> {
        let chw = self.shape.chw();
        let len = self.len();
        self.data[..len].chunks_mut(chw)
    }

    /// Aliases the same storage under a new `(n', c', h', w')` shape. Fails
    /// unless `n'·c'·h'·w' == n·c·h·w` (spec.md §4.1).
    pub fn reshape(self, n: usize, c: usize, h: usize, w: usize) -> Result<Self> {
        let new_len = n * c * h * w;
        if new_len != self.len() {
            return Err(NetworkError::ShapeMismatch {
                expected: format!("{} elements", self.len()),
                found: format!("{} elements", new_len),
            });
        }
        Ok(Tensor {
            shape: Shape::batched(n, c, h, w),
            ..self
        })
    }

    /// Copies into a freshly pooled tensor of identical shape.
    pub fn duplicate(&self) -> Self {
        let mut out = Tensor::new(self.batch(), self.shape.c, self.shape.h, self.shape.w, AllocMode::Default);
        out.as_mut_slice().copy_from_slice(self.as_slice());
        out
    }

    /// Copies `src`'s contents into `self`. Requires identical shape.
    pub fn overwrite(&mut self, src: &Tensor) -> Result<()> {
        if self.shape != src.shape {
            return Err(NetworkError::ShapeMismatch {
                expected: self.shape.to_string(),
                found: src.shape.to_string(),
            });
        }
        self.as_mut_slice().copy_from_slice(src.as_slice());
        Ok(())
    }

    pub fn fill(&mut self, value: f32) {
        self.as_mut_slice().fill(value);
    }

    /// SHA-256 of the buffer contents, used by [`crate::layers::Layer`]
    /// equality/hash checks (spec.md §4.1).
    pub fn content_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for &v in self.as_slice() {
            hasher.update(v.to_le_bytes());
        }
        hasher.finalize().into()
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if self.pooled {
            let data = std::mem::take(&mut self.data);
            pool::return_buffer(data);
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.null {
            return write!(f, "Tensor(null)");
        }
        write!(f, "Tensor(shape={})", self.shape)
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.as_slice() == other.as_slice()
    }
}
