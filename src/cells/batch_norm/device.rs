//! Device kernels of batch normalization.
//!
//! Statistics are accumulated with Welford's online algorithm, and the input
//! gradient uses the compact form
//! `dx = scale / sqrt(var + eps) * (dy - mean(dy) - xhat * mean(dy * xhat))`,
//! which is algebraically identical to the host decomposition.
use crate::cell::Block;
use crate::device::{DeviceBuffer, DeviceContext};
use crate::error::Result;
use crate::numeric::Float;

fn kernel<T: Float>(name: &str) -> String {
    format!("{}batchNorm{}", T::KIND.blas_prefix(), name)
}

#[allow(clippy::too_many_arguments)]
fn normalize<T: Float>(block: Block, x: &[T], y: &mut [T], scale: &[T], bias: &[T], mean: &[T], variance: &[T], epsilon: T) {
    for c in 0..block.channels {
        let o = block.offset + c;
        let inv_std = T::one() / (variance[o] + epsilon).sqrt();
        for b in 0..block.batch {
            for i in 0..block.spatial {
                y[block.output_index(b, c, i)] = scale[o] * (x[block.input_index(b, c, i)] - mean[o]) * inv_std + bias[o];
            }
        }
    }
}

/// Training forward pass of one input block.
#[allow(clippy::too_many_arguments)]
pub fn forward_training<T: Float>(ctx: &DeviceContext,
                                  block: Block,
                                  x: &DeviceBuffer<T>,
                                  y: &mut DeviceBuffer<T>,
                                  scale: &DeviceBuffer<T>,
                                  bias: &DeviceBuffer<T>,
                                  running_mean: &mut DeviceBuffer<T>,
                                  running_variance: &mut DeviceBuffer<T>,
                                  saved_mean: &mut DeviceBuffer<T>,
                                  saved_variance: &mut DeviceBuffer<T>,
                                  factor: T,
                                  epsilon: T) -> Result<()> {
    ctx.check(x)?;
    ctx.check(y)?;
    ctx.check(scale)?;
    ctx.check(bias)?;
    ctx.check(running_mean)?;
    ctx.check(running_variance)?;
    ctx.check(saved_mean)?;
    ctx.check(saved_variance)?;

    ctx.launch(&kernel::<T>("ForwardTraining"), || {
        let x = x.as_slice();
        let saved_mean = saved_mean.as_mut_slice();
        let saved_variance = saved_variance.as_mut_slice();
        let running_mean = running_mean.as_mut_slice();
        let running_variance = running_variance.as_mut_slice();

        for c in 0..block.channels {
            let o = block.offset + c;
            let mut count = T::zero();
            let mut mean = T::zero();
            let mut m2 = T::zero();
            for b in 0..block.batch {
                for i in 0..block.spatial {
                    let value = x[block.input_index(b, c, i)];
                    count = count + T::one();
                    let delta = value - mean;
                    mean = mean + delta / count;
                    m2 = m2 + delta * (value - mean);
                }
            }
            let variance = if count > T::zero() { m2 / count } else { T::zero() };
            saved_mean[o] = mean;
            saved_variance[o] = variance;
            running_mean[o] = mean * factor + running_mean[o] * (T::one() - factor);
            running_variance[o] = variance * factor + running_variance[o] * (T::one() - factor);
        }
        normalize(block, x, y.as_mut_slice(), scale.as_slice(), bias.as_slice(), saved_mean, saved_variance, epsilon);
    });
    Ok(())
}

/// Inference forward pass of one input block, with the running statistics.
#[allow(clippy::too_many_arguments)]
pub fn forward_inference<T: Float>(ctx: &DeviceContext,
                                   block: Block,
                                   x: &DeviceBuffer<T>,
                                   y: &mut DeviceBuffer<T>,
                                   scale: &DeviceBuffer<T>,
                                   bias: &DeviceBuffer<T>,
                                   running_mean: &DeviceBuffer<T>,
                                   running_variance: &DeviceBuffer<T>,
                                   epsilon: T) -> Result<()> {
    ctx.check(x)?;
    ctx.check(y)?;
    ctx.check(scale)?;
    ctx.check(bias)?;
    ctx.check(running_mean)?;
    ctx.check(running_variance)?;

    ctx.launch(&kernel::<T>("ForwardInference"), || {
        normalize(block, x.as_slice(), y.as_mut_slice(), scale.as_slice(), bias.as_slice(),
                  running_mean.as_slice(), running_variance.as_slice(), epsilon);
    });
    Ok(())
}

/// Backward pass of one input block.
#[allow(clippy::too_many_arguments)]
pub fn backward<T: Float>(ctx: &DeviceContext,
                          block: Block,
                          x: &DeviceBuffer<T>,
                          dy: &DeviceBuffer<T>,
                          dx: &mut DeviceBuffer<T>,
                          accumulate_dx: bool,
                          scale: &DeviceBuffer<T>,
                          saved_mean: &DeviceBuffer<T>,
                          saved_variance: &DeviceBuffer<T>,
                          diff_scale: &mut DeviceBuffer<T>,
                          diff_bias: &mut DeviceBuffer<T>,
                          accumulate_params: bool,
                          epsilon: T) -> Result<()> {
    ctx.check(x)?;
    ctx.check(dy)?;
    ctx.check(dx)?;
    ctx.check(scale)?;
    ctx.check(saved_mean)?;
    ctx.check(saved_variance)?;
    ctx.check(diff_scale)?;
    ctx.check(diff_bias)?;

    ctx.launch(&kernel::<T>("Backward"), || {
        let (x, dy, dx) = (x.as_slice(), dy.as_slice(), dx.as_mut_slice());
        let (scale, saved_mean, saved_variance) = (scale.as_slice(), saved_mean.as_slice(), saved_variance.as_slice());
        let (diff_scale, diff_bias) = (diff_scale.as_mut_slice(), diff_bias.as_mut_slice());
        let n = T::cast(block.count() as f64);

        for c in 0..block.channels {
            let o = block.offset + c;
            let inv_std = T::one() / (saved_variance[o] + epsilon).sqrt();
            let mut sum_dy = T::zero();
            let mut sum_dy_xhat = T::zero();
            for b in 0..block.batch {
                for i in 0..block.spatial {
                    let grad = dy[block.output_index(b, c, i)];
                    sum_dy = sum_dy + grad;
                    sum_dy_xhat = sum_dy_xhat + grad * (x[block.input_index(b, c, i)] - saved_mean[o]) * inv_std;
                }
            }
            diff_scale[o] = if accumulate_params { diff_scale[o] + sum_dy_xhat } else { sum_dy_xhat };
            diff_bias[o] = if accumulate_params { diff_bias[o] + sum_dy } else { sum_dy };

            let mean_dy = sum_dy / n;
            let mean_dy_xhat = sum_dy_xhat / n;
            for b in 0..block.batch {
                for i in 0..block.spatial {
                    let index = block.input_index(b, c, i);
                    let xhat = (x[index] - saved_mean[o]) * inv_std;
                    let grad = scale[o] * inv_std * (dy[block.output_index(b, c, i)] - mean_dy - xhat * mean_dy_xhat);
                    dx[index] = if accumulate_dx { dx[index] + grad } else { grad };
                }
            }
        }
    });
    Ok(())
}
