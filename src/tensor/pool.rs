//! Process-global pool of reusable `f32` buffers.
//!
//! Allocations are rented on [`Tensor::new`](super::Tensor::new) and returned
//! to the pool when a pooled tensor is dropped, avoiding per-batch heap churn
//! in the training loop. Generalized from
//! `examples/felipe-santos-gran-prix/src/graph/buffer_pool.rs`'s fixed-index
//! `BufferPool` into a capacity-keyed, thread-safe free list: rent/return
//! must be atomic (spec.md §5) since kernels run on a rayon thread pool.

use std::sync::{Mutex, OnceLock};

/// Buffers are bucketed by exact capacity; a request for `n` floats is
/// satisfied only by a buffer whose capacity is exactly `n`. This keeps the
/// pool simple (no over-allocation bookkeeping) at the cost of not sharing
/// buffers across slightly different sizes — acceptable because a training
/// loop re-requests the same handful of shapes every batch.
struct Pool {
    free: Mutex<Vec<Vec<f32>>>,
}

impl Pool {
    const fn new() -> Self {
        Pool {
            free: Mutex::new(Vec::new()),
        }
    }

    fn rent(&self, len: usize, zero: bool) -> Vec<f32> {
        let mut free = self.free.lock().unwrap();
        if let Some(pos) = free.iter().position(|buf| buf.capacity() >= len) {
            let mut buf = free.swap_remove(pos);
            // Safe-only resize: a pooled buffer's old tail is whatever its
            // previous tenant wrote, never truly uninitialized memory, so
            // `resize` just widens/narrows without needing `unsafe`.
            // `Default` callers get those stale values back (cheap); `Clean`
            // callers ask for the zero-fill below.
            buf.resize(len, 0.0);
            if zero {
                buf.iter_mut().for_each(|v| *v = 0.0);
            }
            return buf;
        }
        drop(free);
        vec![0.0; len]
    }

    fn return_buffer(&self, buf: Vec<f32>) {
        const MAX_POOLED: usize = 256;
        let mut free = self.free.lock().unwrap();
        if free.len() < MAX_POOLED {
            free.push(buf);
        }
    }
}

static POOL: OnceLock<Pool> = OnceLock::new();

fn pool() -> &'static Pool {
    POOL.get_or_init(Pool::new)
}

pub(crate) fn rent(len: usize, zero: bool) -> Vec<f32> {
    pool().rent(len, zero)
}

pub(crate) fn return_buffer(buf: Vec<f32>) {
    pool().return_buffer(buf);
}
