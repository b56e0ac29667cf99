//! Host implementation of batch normalization, parallel over channels for the
//! reductions and over batch positions for the element-wise passes.
use rayon::prelude::*;

use crate::cell::Block;
use crate::numeric::Float;

/// Per-channel parameters of one input block, indexed by output channel.
#[derive(Debug)]
pub struct Params<'a, T: 'a> {
    pub scale: &'a [T],
    pub bias: &'a [T],
    pub mean: &'a [T],
    pub variance: &'a [T],
}

fn channel_statistics<T: Float>(block: Block, x: &[T]) -> Vec<(T, T)> {
    let n = T::cast(block.count() as f64);
    (0..block.channels).into_par_iter().map(|c| {
        let mut sum = T::zero();
        for b in 0..block.batch {
            for i in 0..block.spatial {
                sum = sum + x[block.input_index(b, c, i)];
            }
        }
        let mean = sum / n;
        let mut sum_sq = T::zero();
        for b in 0..block.batch {
            for i in 0..block.spatial {
                let d = x[block.input_index(b, c, i)] - mean;
                sum_sq = sum_sq + d * d;
            }
        }
        (mean, sum_sq / n)
    }).collect()
}

/// Normalize `x` into its channel range of `y`, using `params.mean` and `params.variance`.
pub fn normalize<T: Float>(block: Block, x: &[T], y: &mut [T], params: &Params<T>, epsilon: T) {
    let stride = block.spatial * block.out_channels;
    if stride == 0 {
        return;
    }
    y.par_chunks_mut(stride).enumerate().for_each(|(b, y)| {
        for c in 0..block.channels {
            let o = block.offset + c;
            let inv_std = T::one() / (params.variance[o] + epsilon).sqrt();
            for i in 0..block.spatial {
                let xhat = (x[block.input_index(b, c, i)] - params.mean[o]) * inv_std;
                y[o * block.spatial + i] = params.scale[o] * xhat + params.bias[o];
            }
        }
    });
}

/// Compute the batch statistics of `x` into `saved_mean` / `saved_variance`,
/// fold them into the running statistics with weight `factor`, then normalize.
#[allow(clippy::too_many_arguments)]
pub fn forward_training<T: Float>(block: Block,
                                  x: &[T],
                                  y: &mut [T],
                                  scale: &[T],
                                  bias: &[T],
                                  running_mean: &mut [T],
                                  running_variance: &mut [T],
                                  saved_mean: &mut [T],
                                  saved_variance: &mut [T],
                                  factor: T,
                                  epsilon: T) {
    let statistics = channel_statistics(block, x);
    for (c, &(mean, variance)) in statistics.iter().enumerate() {
        let o = block.offset + c;
        saved_mean[o] = mean;
        saved_variance[o] = variance;
        running_mean[o] = mean * factor + running_mean[o] * (T::one() - factor);
        running_variance[o] = variance * factor + running_variance[o] * (T::one() - factor);
    }
    let params = Params { scale: scale, bias: bias, mean: saved_mean, variance: saved_variance };
    normalize(block, x, y, &params, epsilon);
}

/// Gradients of one input block.
///
/// `dy` is the gradient with respect to the cell outputs, `dx` the gradient with
/// respect to the input block, accumulated into when `accumulate_dx` is set.
/// Scale and bias gradients are summed into `diff_scale` / `diff_bias` when
/// `accumulate_params` is set.
#[allow(clippy::too_many_arguments)]
pub fn backward<T: Float>(block: Block,
                          x: &[T],
                          dy: &[T],
                          dx: &mut [T],
                          accumulate_dx: bool,
                          scale: &[T],
                          saved_mean: &[T],
                          saved_variance: &[T],
                          diff_scale: &mut [T],
                          diff_bias: &mut [T],
                          accumulate_params: bool,
                          epsilon: T) {
    let n = T::cast(block.count() as f64);
    let two = T::cast(2.0);

    // per channel: sum(dy), sum(dy * xhat), d(variance), d(mean)
    let sums: Vec<(T, T, T, T)> = (0..block.channels).into_par_iter().map(|c| {
        let o = block.offset + c;
        let mean = saved_mean[o];
        let var_eps = saved_variance[o] + epsilon;
        let inv_std = T::one() / var_eps.sqrt();

        let mut sum_dy = T::zero();
        let mut sum_dy_xhat = T::zero();
        let mut sum_variance = T::zero();
        let mut sum_mean_1 = T::zero();
        let mut sum_mean_2 = T::zero();
        for b in 0..block.batch {
            for i in 0..block.spatial {
                let centered = x[block.input_index(b, c, i)] - mean;
                let grad = dy[block.output_index(b, c, i)];
                sum_dy = sum_dy + grad;
                sum_dy_xhat = sum_dy_xhat + grad * centered * inv_std;
                sum_variance = sum_variance + grad * scale[o] * centered;
                sum_mean_1 = sum_mean_1 + grad * scale[o];
                sum_mean_2 = sum_mean_2 - two * centered;
            }
        }
        let diff_variance = sum_variance * T::cast(-0.5) * var_eps.powf(T::cast(-1.5));
        let diff_mean = sum_mean_1 * (-inv_std) + diff_variance * sum_mean_2 / n;
        (sum_dy, sum_dy_xhat, diff_variance, diff_mean)
    }).collect();

    for (c, &(sum_dy, sum_dy_xhat, _, _)) in sums.iter().enumerate() {
        let o = block.offset + c;
        diff_scale[o] = if accumulate_params { diff_scale[o] + sum_dy_xhat } else { sum_dy_xhat };
        diff_bias[o] = if accumulate_params { diff_bias[o] + sum_dy } else { sum_dy };
    }

    let stride = block.spatial * block.channels;
    if stride == 0 {
        return;
    }
    dx.par_chunks_mut(stride).enumerate().for_each(|(b, dx)| {
        for (c, &(_, _, diff_variance, diff_mean)) in sums.iter().enumerate() {
            let o = block.offset + c;
            let inv_std = T::one() / (saved_variance[o] + epsilon).sqrt();
            for i in 0..block.spatial {
                let centered = x[block.input_index(b, c, i)] - saved_mean[o];
                let grad = dy[block.output_index(b, c, i)] * scale[o] * inv_std
                    + diff_variance * two * centered / n
                    + diff_mean / n;
                let index = c * block.spatial + i;
                dx[index] = if accumulate_dx { dx[index] + grad } else { grad };
            }
        }
    });
}
