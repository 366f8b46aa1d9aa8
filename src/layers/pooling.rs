//! 2×2 stride-2 max pooling (spec.md §4.5). The last row/column is
//! propagated unchanged when a spatial dimension is odd, and backward
//! breaks block ties by first occurrence (top-left priority).

use rayon::prelude::*;

use crate::activation::Activation;
use crate::error::Result;
use crate::tensor::{AllocMode, Shape, Tensor};

#[derive(Clone)]
pub struct Pooling {
    pub input_shape: Shape,
    pub output_shape: Shape,
    pub activation: Activation,
    /// Flat arg-max index (within the input's single-sample CHW layout) of
    /// each output element from the most recent forward call.
    argmax_cache: Option<Vec<usize>>,
    output_cache: Option<Tensor>,
}

impl Pooling {
    pub fn new(c: usize, h: usize, w: usize, activation: Activation) -> Self {
        let h_out = (h + 1) / 2;
        let w_out = (w + 1) / 2;
        Pooling {
            input_shape: Shape::unbatched(c, h, w),
            output_shape: Shape::unbatched(c, h_out, w_out),
            activation,
            argmax_cache: None,
            output_cache: None,
        }
    }

    /// For output position `(i, j)` along one spatial axis of length `len`,
    /// the block of input positions it draws from — one element if `len` is
    /// odd and `i`/`j` lands on the trailing unpaired row/column.
    fn block(len: usize, idx: usize) -> (usize, usize) {
        let start = idx * 2;
        let end = (start + 1).min(len - 1);
        (start, end)
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let n = input.n();
        let c = self.input_shape.c;
        let (h, w) = (self.input_shape.h, self.input_shape.w);
        let (h_out, w_out) = (self.output_shape.h, self.output_shape.w);

        let mut pre = Tensor::new(n, c, h_out, w_out, AllocMode::Clean);
        let mut argmax = vec![0usize; n * c * h_out * w_out];

        pre.chunks_mut()
            .zip(argmax.chunks_mut(c * h_out * w_out))
            .enumerate()
            .par_bridge()
            .for_each(|(ni, (out_sample, am_sample))| {
                let x = input.sample(ni);
                for ch in 0..c {
                    for oi in 0..h_out {
                        let (hs, he) = Self::block(h, oi);
                        for oj in 0..w_out {
                            let (ws, we) = Self::block(w, oj);
                            let mut best_val = f32::NEG_INFINITY;
                            let mut best_idx = 0usize;
                            for ii in hs..=he {
                                for jj in ws..=we {
                                    let idx = (ch * h + ii) * w + jj;
                                    let v = x[idx];
                                    if v > best_val {
                                        best_val = v;
                                        best_idx = idx;
                                    }
                                }
                            }
                            let oidx = (ch * h_out + oi) * w_out + oj;
                            out_sample[oidx] = best_val;
                            am_sample[oidx] = best_idx;
                        }
                    }
                }
            });

        let mut output = Tensor::like(&pre, AllocMode::Default);
        self.activation.forward(pre.as_slice(), output.as_mut_slice());

        self.argmax_cache = Some(argmax);
        self.output_cache = Some(output.duplicate());
        Ok(output)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let output = self.output_cache.as_ref().expect("backward before forward");
        let argmax = self.argmax_cache.as_ref().expect("backward before forward");
        let n = grad_output.n();
        let c = self.input_shape.c;
        let (h, w) = (self.input_shape.h, self.input_shape.w);
        let chw_in = c * h * w;
        let chw_out = self.output_shape.chw();

        let mut dz = grad_output.as_slice().to_vec();
        self.activation.backward_inplace(output.as_slice(), &mut dz);

        let mut dx = Tensor::new(n, c, h, w, AllocMode::Clean);
        dx.chunks_mut()
            .enumerate()
            .par_bridge()
            .for_each(|(ni, dx_sample)| {
                let dz_n = &dz[ni * chw_out..(ni + 1) * chw_out];
                let am_n = &argmax[ni * chw_out..(ni + 1) * chw_out];
                for (g, &idx) in dz_n.iter().zip(am_n) {
                    dx_sample[idx] += g;
                }
            });
        debug_assert_eq!(dx.len(), n * chw_in);
        Ok(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_dimension_pools_correctly() {
        let mut layer = Pooling::new(1, 3, 3, Activation::Identity);
        let input = Tensor::from_vec(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            1,
            1,
            3,
            3,
        )
        .unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape().h, 2);
        assert_eq!(output.shape().w, 2);
        assert_eq!(output.as_slice(), &[5.0, 6.0, 8.0, 9.0]);

        let grad_output = Tensor::from_vec(vec![1.0, 1.0, 1.0, 1.0], 1, 1, 2, 2).unwrap();
        let dx = layer.backward(&grad_output).unwrap();
        let expected_nonzero = [(1, 1), (1, 2), (2, 1), (2, 2)];
        for i in 0..3 {
            for j in 0..3 {
                let v = dx.get(0, 0, i, j);
                if expected_nonzero.contains(&(i, j)) {
                    assert_eq!(v, 1.0);
                } else {
                    assert_eq!(v, 0.0);
                }
            }
        }
    }

    #[test]
    fn gradient_sum_is_conserved_per_slice() {
        let mut layer = Pooling::new(1, 4, 4, Activation::Identity);
        let input = Tensor::from_vec((0..16).map(|v| v as f32).collect(), 1, 1, 4, 4).unwrap();
        let _ = layer.forward(&input).unwrap();
        let grad_output = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], 1, 1, 2, 2).unwrap();
        let dx = layer.backward(&grad_output).unwrap();
        let sum_dy: f32 = grad_output.as_slice().iter().sum();
        let sum_dx: f32 = dx.as_slice().iter().sum();
        assert!((sum_dy - sum_dx).abs() < 1e-6);
    }
}
