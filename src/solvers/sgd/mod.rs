//! A [Stochastic Gradient Descent][1] solver, with [momentum][2].
//! [1]: https://en.wikipedia.org/wiki/Stochastic_gradient_descent
//! [2]: https://en.wikipedia.org/wiki/Stochastic_gradient_descent#Momentum
//!
//! Momentum in solving neural networks works similar to the way it does in
//! physics. Keeping a part of the previous update (the history) in the current
//! one makes solving faster when consecutive gradients point the same way, and
//! more stable when they don't.
//!
//! One update, with `rate` the learning rate given by the [LRPolicy][3] and
//! `rate_diff = rate / (batch_size * iteration_size)`:
//!
//! ```text
//! without momentum and decay:  w += rate_diff * dw
//! otherwise:                   m  = momentum * m + rate_diff * dw - decay * rate * w
//!                              w += m
//! ```
//!
//! followed by clamping `w` to `[-1, 1]` if enabled. With quantization, `w` above
//! is a full precision copy of the parameter, and the parameter receives its
//! quantized projection.
//!
//! [3]: ../../solver/enum.LRPolicy.html
use std::fmt;

use rayon::prelude::*;

use crate::backend::Backend;
use crate::device::{kernels, DeviceContext};
use crate::error::{Error, Result};
use crate::numeric::Float;
use crate::solver::{ISolver, SolverConfig};
use crate::tensor::SharedTensor;

use super::quantize_value;

/// Stochastic Gradient Descent solver for one learnable parameter.
///
/// See [module description][1] for more information.
/// [1]: ./index.html
pub struct SgdSolver<T: Float> {
    config: SolverConfig,
    backend: Backend,
    /// The update from the previous iteration, allocated on first use.
    history: Option<SharedTensor<T>>,
    /// Full precision copy of the parameter, when quantizing.
    continuous: Option<SharedTensor<T>>,
    iterations: u64,
}

impl<T: Float> SgdSolver<T> {
    /// Create a new SGD solver.
    ///
    /// Usually built through [SolverKind::with_config][1].
    /// [1]: ../../solver/enum.SolverKind.html#method.with_config
    pub fn new(backend: Backend, config: SolverConfig) -> SgdSolver<T> {
        SgdSolver {
            config: config,
            backend: backend,
            history: None,
            continuous: None,
            iterations: 0,
        }
    }

    /// The momentum history, once the first update with momentum or decay ran.
    pub fn history(&self) -> Option<&SharedTensor<T>> {
        self.history.as_ref()
    }

    /// The full precision copy of the parameter, when quantizing.
    pub fn continuous(&self) -> Option<&SharedTensor<T>> {
        self.continuous.as_ref()
    }

    fn uses_history(&self) -> bool {
        self.config.momentum != 0.0 || self.config.decay != 0.0
    }

    fn prepare_history(&mut self, dims: &[usize]) -> Result<()> {
        if let Some(ref history) = self.history {
            if history.dims() != dims {
                return Err(Error::Invariant(format!("momentum history {:?} does not match parameter {:?}",
                                                    history.dims(), dims)));
            }
            return Ok(());
        }
        let mut history = SharedTensor::new(dims);
        history.synchronize_to_device(&self.backend)?;
        self.history = Some(history);
        Ok(())
    }

    fn prepare_continuous(&mut self, data: &SharedTensor<T>) -> Result<()> {
        if let Some(ref continuous) = self.continuous {
            if continuous.dims() != data.dims() {
                return Err(Error::Invariant(format!("continuous copy {:?} does not match parameter {:?}",
                                                    continuous.dims(), data.dims())));
            }
            return Ok(());
        }
        let continuous = match self.backend.context() {
            None => SharedTensor::from_tensor(data.host()?.clone()),
            Some(ctx) => {
                let mut continuous = SharedTensor::new(data.dims());
                continuous.synchronize_h_to_d(ctx)?;
                kernels::copy(ctx, data.device()?, continuous.device_mut()?)?;
                continuous
            }
        };
        self.continuous = Some(continuous);
        Ok(())
    }

    fn update_native(&mut self, data: &mut SharedTensor<T>, diff: &SharedTensor<T>, rate: f64, rate_diff: f64) -> Result<()> {
        let levels = self.config.quantization_levels;
        let momentum = T::cast(self.config.momentum);
        let decay_rate = T::cast(self.config.decay * rate);
        let rate_diff = T::cast(rate_diff);
        let clamping = self.config.clamping;
        let uses_history = self.uses_history();

        if uses_history {
            self.prepare_history(data.dims())?;
        }
        if levels > 0 {
            self.prepare_continuous(data)?;
        }

        let diff = diff.host()?.as_slice();
        {
            let params = match self.continuous {
                Some(ref mut continuous) => continuous.host_mut()?.as_mut_slice(),
                None => data.host_mut()?.as_mut_slice(),
            };
            match self.history {
                Some(ref mut history) if uses_history => {
                    params.par_iter_mut()
                        .zip(diff.par_iter())
                        .zip(history.host_mut()?.as_mut_slice().par_iter_mut())
                        .for_each(|((w, &dw), m)| {
                            let mut update = *m * momentum + rate_diff * dw;
                            if decay_rate != T::zero() {
                                update = update - decay_rate * *w;
                            }
                            *m = update;
                            *w = *w + update;
                        });
                }
                _ => {
                    params.par_iter_mut()
                        .zip(diff.par_iter())
                        .for_each(|(w, &dw)| *w = *w + rate_diff * dw);
                }
            }
            if clamping {
                params.par_iter_mut().for_each(|w| *w = w.max(-T::one()).min(T::one()));
            }
        }

        if let Some(ref continuous) = self.continuous {
            data.host_mut()?.as_mut_slice()
                .par_iter_mut()
                .zip(continuous.host()?.as_slice().par_iter())
                .for_each(|(q, &w)| *q = quantize_value(w, levels));
        }
        Ok(())
    }

    fn update_device(&mut self,
                     ctx: &DeviceContext,
                     data: &mut SharedTensor<T>,
                     diff: &SharedTensor<T>,
                     rate: f64,
                     rate_diff: f64) -> Result<()> {
        let levels = self.config.quantization_levels;
        let momentum = T::cast(self.config.momentum);
        let uses_history = self.uses_history();

        data.synchronize_to_device(&self.backend)?;
        if uses_history {
            self.prepare_history(data.dims())?;
        }
        if levels > 0 {
            self.prepare_continuous(data)?;
        }

        let diff = diff.device()?;
        {
            let params = match self.continuous {
                Some(ref mut continuous) => continuous.device_mut()?,
                None => data.device_mut()?,
            };
            match self.history {
                Some(ref mut history) if uses_history => {
                    let history = history.device_mut()?;
                    kernels::scal(ctx, momentum, history)?;
                    kernels::axpy(ctx, T::cast(rate_diff), diff, history)?;
                    if self.config.decay != 0.0 {
                        kernels::axpy(ctx, T::cast(-self.config.decay * rate), params, history)?;
                    }
                    kernels::axpy(ctx, T::one(), history, params)?;
                }
                _ => kernels::axpy(ctx, T::cast(rate_diff), diff, params)?,
            }
            if self.config.clamping {
                kernels::clamp(ctx, params, -T::one(), T::one())?;
            }
        }

        if let Some(ref continuous) = self.continuous {
            kernels::quantize(ctx, data.device_mut()?, continuous.device()?, levels)?;
        }
        Ok(())
    }
}

impl<T: Float> ISolver<T> for SgdSolver<T> {
    fn update(&mut self, data: &mut SharedTensor<T>, diff: &SharedTensor<T>, batch_size: usize) -> Result<()> {
        let rate = self.config.get_learning_rate(self.iterations, batch_size);
        self.iterations += 1;
        if rate == 0.0 {
            return Ok(());
        }
        if data.dims() != diff.dims() {
            return Err(Error::Shape(format!("parameter {:?} and gradient {:?} differ", data.dims(), diff.dims())));
        }
        if batch_size == 0 || self.config.iteration_size == 0 {
            return Err(Error::Config("solver update needs a non-empty batch and iteration size".to_owned()));
        }
        let rate_diff = rate / (batch_size as f64 * self.config.iteration_size as f64);

        match self.backend.clone() {
            Backend::Native => self.update_native(data, diff, rate, rate_diff),
            Backend::Device(ctx) => self.update_device(&ctx, data, diff, rate, rate_diff),
        }
    }

    fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn backend(&self) -> &Backend {
        &self.backend
    }
}

impl<T: Float> fmt::Debug for SgdSolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SgdSolver")
            .field("backend", &self.backend.name())
            .field("iterations", &self.iterations)
            .field("learning_rate", &self.config.learning_rate)
            .field("momentum", &self.config.momentum)
            .finish()
    }
}
