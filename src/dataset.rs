//! Dataset abstraction: sample stream, batch partitioning, shuffling
//! (spec.md §3/§6). Training datasets are restartable and reshufflable;
//! test/validation datasets are restartable and ordered — both satisfied by
//! the same [`InMemoryDataset`], shuffled only when the trainer asks.

use rand::seq::SliceRandom;

use crate::error::{NetworkError, Result};
use crate::tensor::Tensor;

/// An ordered collection of `(input-vector, expected-output-vector)` pairs,
/// partitioned on demand into fixed-size mini-batches; the last batch may
/// be short. Batches materialize two row-major matrices of shapes
/// `(batch_size, input_features)` and `(batch_size, output_features)`.
pub trait Dataset {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn input_features(&self) -> usize;
    fn output_features(&self) -> usize;

    /// Restarts iteration from the beginning, in the dataset's current
    /// order (shuffled or not).
    fn reset(&mut self);

    /// Returns the next batch of up to `batch_size` samples, or `None`
    /// once every sample has been yielded since the last `reset`.
    fn next_batch(&mut self, batch_size: usize) -> Option<(Tensor, Tensor)>;

    /// Reshuffles iteration order if this dataset supports it, a no-op
    /// otherwise (test/validation datasets stay ordered, spec.md §3).
    fn shuffle_if_supported(&mut self, rng: &mut dyn rand::RngCore) {
        let _ = rng;
    }
}

/// A dataset held entirely in memory as two flat row-major buffers.
pub struct InMemoryDataset {
    inputs: Vec<f32>,
    targets: Vec<f32>,
    input_features: usize,
    output_features: usize,
    order: Vec<usize>,
    cursor: usize,
}

impl InMemoryDataset {
    pub fn new(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_features: usize,
        output_features: usize,
    ) -> Result<Self> {
        if input_features == 0 || output_features == 0 {
            return Err(NetworkError::InvalidConfig(
                "dataset feature width must be nonzero".into(),
            ));
        }
        if inputs.len() % input_features != 0 || targets.len() % output_features != 0 {
            return Err(NetworkError::InvalidConfig(
                "dataset buffer length is not a multiple of its feature width".into(),
            ));
        }
        let n_in = inputs.len() / input_features;
        let n_out = targets.len() / output_features;
        if n_in != n_out {
            return Err(NetworkError::InvalidConfig(format!(
                "dataset has {n_in} input rows but {n_out} target rows"
            )));
        }
        if n_in == 0 {
            return Err(NetworkError::InvalidConfig("dataset has no samples".into()));
        }
        Ok(InMemoryDataset {
            inputs,
            targets,
            input_features,
            output_features,
            order: (0..n_in).collect(),
            cursor: 0,
        })
    }

    pub fn samples(&self) -> usize {
        self.order.len()
    }

    /// Reorders future iteration (until the next `reset`/`shuffle`) and
    /// rewinds the cursor to the start.
    pub fn shuffle(&mut self, rng: &mut dyn rand::RngCore) {
        self.order.shuffle(rng);
        self.cursor = 0;
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn input_features(&self) -> usize {
        self.input_features
    }

    fn output_features(&self) -> usize {
        self.output_features
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn shuffle_if_supported(&mut self, rng: &mut dyn rand::RngCore) {
        self.shuffle(rng);
    }

    fn next_batch(&mut self, batch_size: usize) -> Option<(Tensor, Tensor)> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + batch_size).min(self.order.len());
        let rows = &self.order[self.cursor..end];
        let n = rows.len();

        let mut input_buf = vec![0.0f32; n * self.input_features];
        let mut target_buf = vec![0.0f32; n * self.output_features];
        for (slot, &row) in rows.iter().enumerate() {
            let in_start = row * self.input_features;
            input_buf[slot * self.input_features..(slot + 1) * self.input_features]
                .copy_from_slice(&self.inputs[in_start..in_start + self.input_features]);
            let out_start = row * self.output_features;
            target_buf[slot * self.output_features..(slot + 1) * self.output_features]
                .copy_from_slice(&self.targets[out_start..out_start + self.output_features]);
        }
        self.cursor = end;

        let input = Tensor::from_vec(input_buf, n, self.input_features, 1, 1).ok()?;
        let target = Tensor::from_vec(target_buf, n, self.output_features, 1, 1).ok()?;
        Some((input, target))
    }
}
