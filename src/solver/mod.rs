//! Provides the generics and interfaces for the specific Solvers.
//!
//! A solver owns the update state of exactly one learnable parameter (its
//! momentum history, its full precision copy when quantizing) and updates the
//! parameter in place from its gradient.
//!
//! See [Solvers][solvers]
//! [solvers]: ../solvers/index.html
use std::fmt;

use crate::backend::Backend;
use crate::error::Result;
use crate::numeric::Float;
use crate::solvers::SgdSolver;
use crate::tensor::SharedTensor;

/// Implementation of a specific Solver.
///
/// See [Solvers][1]
/// [1]: ../solvers/index.html
pub trait ISolver<T: Float>: Send + Sync + fmt::Debug {
    /// Update `data` in place from its gradient `diff`.
    ///
    /// `batch_size` is the number of samples the gradient was summed over, for
    /// one micro-batch. The update is normalized by `batch_size` times the
    /// iteration size of the solver.
    fn update(&mut self, data: &mut SharedTensor<T>, diff: &SharedTensor<T>, batch_size: usize) -> Result<()>;

    /// The configuration of the solver.
    fn config(&self) -> &SolverConfig;

    /// Number of updates performed so far.
    fn iterations(&self) -> u64;

    /// The backend the solver runs on.
    fn backend(&self) -> &Backend;
}

#[derive(Debug, Clone)]
/// Configuration for a Solver
pub struct SolverConfig {
    /// The [Solver implementation][1] to be used.
    /// [1]: ../solvers/index.html
    pub solver: SolverKind,
    /// The base learning rate.
    ///
    /// A learning rate of 0 disables every update.
    ///
    /// Default: 0.01
    pub learning_rate: f64,
    /// The [momentum][1] multiplier.
    /// [1]: https://en.wikipedia.org/wiki/Stochastic_gradient_descent#Momentum
    ///
    /// The value should always be between 0 and 1 and dictates how much of the previous
    /// parameter update will be added to the current one.
    ///
    /// Default: 0
    pub momentum: f64,
    /// The [weight decay][1] multiplier for [regularization][2].
    /// [1]: http://www.alglib.net/dataanalysis/improvinggeneralization.php#header3
    /// [2]: https://cs231n.github.io/neural-networks-2/#reg
    ///
    /// Default: 0
    pub decay: f64,
    /// Exponent of the `PolyDecay` and `InvDecay` policies.
    ///
    /// Default: 0
    pub power: f64,
    /// Number of micro-batches accumulated into one update.
    ///
    /// The effective batch size is the batch size times `iteration_size`.
    ///
    /// Default: 1
    pub iteration_size: usize,
    /// Number of learned stimuli at which `PolyDecay` reaches 0.
    ///
    /// Default: 0
    pub max_iterations: u64,
    /// The learning rate policy to be used.
    ///
    /// Default: None
    pub lr_policy: LRPolicy,
    /// Number of learned stimuli between two `StepDecay` steps.
    ///
    /// Default: 0
    pub step_size: u64,
    /// Decay factor of the learning rate policies.
    ///
    /// Default: 0.1
    pub learning_rate_decay: f64,
    /// Clamp the parameters to `[-1, 1]` after every update.
    ///
    /// Default: false
    pub clamping: bool,
    /// Number of quantization levels of the parameters, 0 to disable quantization.
    ///
    /// With quantization, the solver keeps a full precision copy of the parameter
    /// and writes its quantized projection into the parameter after every update.
    ///
    /// Default: 0
    pub quantization_levels: u32,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            solver: SolverKind::Sgd,
            learning_rate: 0.01,
            momentum: 0.0,
            decay: 0.0,
            power: 0.0,
            iteration_size: 1,
            max_iterations: 0,
            lr_policy: LRPolicy::None,
            step_size: 0,
            learning_rate_decay: 0.1,
            clamping: false,
            quantization_levels: 0,
        }
    }
}

impl SolverConfig {
    /// Return the learning rate after `iterations` updates of batches of `batch_size`.
    ///
    /// The way the learning rate is calculated depends on the configured [LRPolicy][1].
    /// Policies are evaluated against the number of learned stimuli:
    /// `iterations * batch_size * iteration_size`.
    ///
    /// [1]: ./enum.LRPolicy.html
    pub fn get_learning_rate(&self, iterations: u64, batch_size: usize) -> f64 {
        if self.learning_rate == 0.0 {
            return 0.0;
        }
        let pattern = iterations as f64 * batch_size as f64 * self.iteration_size as f64;
        let rate = self.learning_rate;
        let decay = self.learning_rate_decay;

        match self.lr_policy {
            LRPolicy::None => rate,
            LRPolicy::StepDecay => {
                if self.step_size > 0 {
                    let current_step = (pattern / self.step_size as f64).floor();
                    rate * decay.powf(current_step)
                } else {
                    rate
                }
            }
            LRPolicy::ExponentialDecay => rate * (-decay * pattern).exp(),
            LRPolicy::InvTDecay => rate / (1.0 + decay * pattern),
            LRPolicy::PolyDecay => {
                if self.max_iterations > 0 {
                    let progress = (1.0 - pattern / self.max_iterations as f64).max(0.0);
                    rate * progress.powf(self.power)
                } else {
                    rate
                }
            }
            LRPolicy::InvDecay => rate * (1.0 + decay * pattern).powf(-self.power),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// All available types of solvers.
pub enum SolverKind {
    /// Stochastic Gradient Descent with momentum, weight decay, clamping and
    /// quantization. See [SgdSolver][1].
    /// [1]: ../solvers/struct.SgdSolver.html
    Sgd,
}

impl SolverKind {
    /// Create a Solver of the specified kind with the supplied SolverConfig.
    pub fn with_config<T: Float>(&self, backend: Backend, config: &SolverConfig) -> Box<dyn ISolver<T>> {
        match *self {
            SolverKind::Sgd => Box::new(SgdSolver::<T>::new(backend, config.clone())),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Learning Rate Policy for a [Solver][1]
/// [1]: ./trait.ISolver.html
///
/// `rate` is the base learning rate, `decay` the learning rate decay and
/// `pattern` the number of learned stimuli, see [SolverConfig][2].
///
/// [2]: ./struct.SolverConfig.html
pub enum LRPolicy {
    /// always return rate
    None,
    /// learning rate decays every `step_size` stimuli.
    /// return rate * decay ^ (floor(pattern / step_size))
    StepDecay,
    /// return rate * exp(-decay * pattern)
    ExponentialDecay,
    /// return rate / (1 + decay * pattern)
    InvTDecay,
    /// the effective learning rate follows a polynomial decay, to be
    /// zero at `max_iterations`.
    /// return rate * (1 - pattern / max_iterations) ^ power
    PolyDecay,
    /// return rate * (1 + decay * pattern) ^ (- power)
    InvDecay,
}
