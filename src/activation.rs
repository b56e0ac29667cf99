//! Provides the nonlinear activation functions applied by cells.
//!
//! A cell applies its activation in place on its outputs as the last step of a
//! forward pass, and in place on the gradient with respect to its outputs as
//! the first step of a backward pass. The backward pass only needs the outputs,
//! every derivative below is expressed as a function of `y = f(x)`.
//!
//! An activation can carry a per-channel scaling, applied after the
//! nonlinearity: `y = s[c] * f(x)`.
use rayon::prelude::*;

use crate::device::{DeviceBuffer, DeviceContext};
use crate::error::{Error, Result};
use crate::numeric::Float;
use crate::tensor::Tensor;

#[derive(Debug, Copy, Clone, PartialEq)]
/// The nonlinearity of an [Activation][1].
/// [1]: ./struct.Activation.html
pub enum ActivationKind {
    /// y = x
    Linear,
    /// y = (1 + e^(-x))^(-1)
    Logistic,
    /// y = max(x, 0), with an optional leak for negative inputs and an
    /// optional upper clipping (0 disables clipping).
    Rectifier {
        /// Slope for negative inputs.
        leak_slope: f64,
        /// Upper bound of the output, 0 for none.
        clipping: f64,
    },
    /// y = clamp(x, -threshold, threshold)
    Saturation {
        /// Absolute bound of the output.
        threshold: f64,
    },
    /// y = tanh(x)
    Tanh,
}

impl ActivationKind {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match *self {
            ActivationKind::Linear => "Linear",
            ActivationKind::Logistic => "Logistic",
            ActivationKind::Rectifier { .. } => "Rectifier",
            ActivationKind::Saturation { .. } => "Saturation",
            ActivationKind::Tanh => "Tanh",
        }
    }

    fn forward<T: Float>(&self, x: T) -> T {
        match *self {
            ActivationKind::Linear => x,
            ActivationKind::Logistic => T::one() / (T::one() + (-x).exp()),
            ActivationKind::Rectifier { leak_slope, clipping } => {
                let y = if x > T::zero() { x } else { T::cast(leak_slope) * x };
                if clipping > 0.0 { y.min(T::cast(clipping)) } else { y }
            }
            ActivationKind::Saturation { threshold } => {
                let threshold = T::cast(threshold);
                x.max(-threshold).min(threshold)
            }
            ActivationKind::Tanh => x.tanh(),
        }
    }

    fn derivative<T: Float>(&self, y: T) -> T {
        match *self {
            ActivationKind::Linear => T::one(),
            ActivationKind::Logistic => y * (T::one() - y),
            ActivationKind::Rectifier { leak_slope, clipping } => {
                if clipping > 0.0 && y >= T::cast(clipping) {
                    T::zero()
                } else if y > T::zero() {
                    T::one()
                } else {
                    T::cast(leak_slope)
                }
            }
            ActivationKind::Saturation { threshold } => {
                if y.abs() < T::cast(threshold) { T::one() } else { T::zero() }
            }
            ActivationKind::Tanh => T::one() - y * y,
        }
    }
}

#[derive(Debug, Clone)]
/// An activation function with optional per-channel scaling.
pub struct Activation {
    kind: ActivationKind,
    scaling: Option<Vec<f64>>,
}

impl Activation {
    /// Create an activation without scaling.
    pub fn new(kind: ActivationKind) -> Activation {
        Activation { kind: kind, scaling: None }
    }

    /// Scale channel `c` of the outputs by `factors[c]`.
    pub fn with_scaling(mut self, factors: Vec<f64>) -> Activation {
        self.scaling = Some(factors);
        self
    }

    /// The nonlinearity.
    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    /// The per-channel scaling factors, if any.
    pub fn scaling(&self) -> Option<&[f64]> {
        self.scaling.as_ref().map(|factors| factors.as_slice())
    }

    fn check_channels(&self, channels: usize) -> Result<()> {
        match self.scaling {
            Some(ref factors) if factors.len() != channels => {
                Err(Error::Config(format!("{} activation scales {} channels, the cell has {}",
                                          self.kind.name(), factors.len(), channels)))
            }
            _ => Ok(()),
        }
    }

    fn factor<T: Float>(&self, channel: usize) -> T {
        self.scaling.as_ref().map(|factors| T::cast(factors[channel])).unwrap_or_else(T::one)
    }

    fn forward_batch<T: Float>(&self, data: &mut [T], channel_size: usize) {
        for (index, datum) in data.iter_mut().enumerate() {
            let y = self.kind.forward(*datum);
            *datum = if self.scaling.is_some() { self.factor::<T>(index / channel_size) * y } else { y };
        }
    }

    fn backward_batch<T: Float>(&self, outputs: &[T], diff: &mut [T], channel_size: usize) {
        for (index, (&y, diff)) in outputs.iter().zip(diff.iter_mut()).enumerate() {
            let factor = self.factor::<T>(index / channel_size);
            *diff = if factor == T::zero() {
                T::zero()
            } else {
                *diff * factor * self.kind.derivative(y / factor)
            };
        }
    }

    /// Apply the activation in place on host data.
    pub fn propagate<T: Float>(&self, data: &mut Tensor<T>) -> Result<()> {
        self.check_channels(data.dim_z())?;
        if data.is_empty() {
            return Ok(());
        }
        let channel_size = data.dim_x() * data.dim_y();
        let stride = data.batch_stride();
        data.as_mut_slice().par_chunks_mut(stride).for_each(|batch| self.forward_batch(batch, channel_size));
        Ok(())
    }

    /// Multiply `diff` in place by the derivative of the activation at `outputs`.
    pub fn back_propagate<T: Float>(&self, outputs: &Tensor<T>, diff: &mut Tensor<T>) -> Result<()> {
        self.check_channels(outputs.dim_z())?;
        if outputs.dims() != diff.dims() {
            return Err(Error::Shape(format!("activation outputs {:?} and gradient {:?} differ",
                                            outputs.dims(), diff.dims())));
        }
        if outputs.is_empty() {
            return Ok(());
        }
        let channel_size = outputs.dim_x() * outputs.dim_y();
        let stride = outputs.batch_stride();
        diff.as_mut_slice().par_chunks_mut(stride)
            .zip(outputs.as_slice().par_chunks(stride))
            .for_each(|(diff, outputs)| self.backward_batch(outputs, diff, channel_size));
        Ok(())
    }

    /// Apply the activation in place on device data of dimensions `dims`.
    pub fn propagate_device<T: Float>(&self, ctx: &DeviceContext, data: &mut DeviceBuffer<T>, dims: &[usize]) -> Result<()> {
        let (channel_size, channels) = device_layout(dims);
        self.check_channels(channels)?;
        ctx.check(data)?;
        let kernel = format!("{}{}Propagate", T::KIND.blas_prefix(), self.kind.name());
        ctx.launch(&kernel, || {
            if channel_size > 0 {
                for batch in data.as_mut_slice().chunks_mut(channel_size * channels) {
                    self.forward_batch(batch, channel_size);
                }
            }
        });
        Ok(())
    }

    /// Device counterpart of [back_propagate](#method.back_propagate).
    pub fn back_propagate_device<T: Float>(&self,
                                           ctx: &DeviceContext,
                                           outputs: &DeviceBuffer<T>,
                                           diff: &mut DeviceBuffer<T>,
                                           dims: &[usize]) -> Result<()> {
        let (channel_size, channels) = device_layout(dims);
        self.check_channels(channels)?;
        ctx.check(outputs)?;
        ctx.check(diff)?;
        if outputs.len() != diff.len() {
            return Err(Error::Shape(format!("activation outputs of {} and gradient of {} elements",
                                            outputs.len(), diff.len())));
        }
        let kernel = format!("{}{}BackPropagate", T::KIND.blas_prefix(), self.kind.name());
        ctx.launch(&kernel, || {
            if channel_size > 0 {
                let stride = channel_size * channels;
                for (diff, outputs) in diff.as_mut_slice().chunks_mut(stride).zip(outputs.as_slice().chunks(stride)) {
                    self.backward_batch(outputs, diff, channel_size);
                }
            }
        });
        Ok(())
    }
}

fn device_layout(dims: &[usize]) -> (usize, usize) {
    let dim = |k: usize, default: usize| dims.get(k).cloned().unwrap_or(default);
    (dim(0, 0) * dim(1, 1), dim(2, 1))
}
