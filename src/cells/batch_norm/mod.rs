//! Normalizes every channel of the input over the batch and spatial dimensions,
//! then applies a learned affine transformation `y = scale * x̂ + bias`.
//!
//! For every channel `c`, over the `N = batch * height * width` values of that
//! channel:
//!
//! ```text
//! mean     = Σ x / N
//! variance = Σ (x - mean)² / N
//! x̂        = (x - mean) / sqrt(variance + epsilon)
//! ```
//!
//! Training passes use the statistics of the current batch, save them for the
//! backward pass and fold them into the running statistics with the weight
//! `1 / (1 + t)`, `t` being the number of training passes done so far. Inference
//! passes use the running statistics and leave every state untouched.
//!
//! ## Input
//!
//! Any number of inputs of identical width, height and batch size. The channels
//! of the inputs map onto consecutive ranges of output channels, in the order
//! the inputs were added, and must add up to the number of outputs.
mod device;
mod native;

use std::fmt;
use std::path::Path;

use crate::activation::Activation;
use crate::backend::Backend;
use crate::cell::{self, Block, GradientMode, ICell};
use crate::device::DeviceContext;
use crate::error::{Error, Result};
use crate::filler::FillerType;
use crate::interface::Interface;
use crate::numeric::Float;
use crate::solver::{ISolver, SolverConfig};
use crate::tensor::{SharedTensor, Tensor};
use crate::util::{arc_lock, new_shared_tensor, ArcLock};

const DEFAULT_EPSILON: f64 = 1.0e-5;

#[derive(Debug, Clone)]
/// Specifies configuration parameters for a BatchNorm Cell.
pub struct BatchNormConfig {
    /// Added to the variance before taking its square root.
    ///
    /// A value of 0 selects the default.
    ///
    /// Default: 0 (1e-5)
    pub epsilon: f64,
    /// Activation applied to the normalized outputs.
    ///
    /// Default: None
    pub activation: Option<Activation>,
    /// Initial values of the scale, when it is not shared.
    ///
    /// Default: Constant 1
    pub scale_filler: FillerType,
    /// Initial values of the bias, when it is not shared.
    ///
    /// Default: Constant 0
    pub bias_filler: FillerType,
    /// Solver configuration for the scale parameter.
    pub scale_solver: SolverConfig,
    /// Solver configuration for the bias parameter.
    pub bias_solver: SolverConfig,
}

impl Default for BatchNormConfig {
    fn default() -> BatchNormConfig {
        BatchNormConfig {
            epsilon: 0.0,
            activation: None,
            scale_filler: FillerType::Constant { value: 1.0 },
            bias_filler: FillerType::Constant { value: 0.0 },
            scale_solver: SolverConfig::default(),
            bias_solver: SolverConfig::default(),
        }
    }
}

/// Batch normalization cell.
///
/// See [module description][1] for more information.
/// [1]: ./index.html
pub struct BatchNormCell<T: Float> {
    name: String,
    nb_outputs: usize,
    backend: Backend,
    epsilon: f64,
    activation: Option<Activation>,
    scale_filler: FillerType,
    bias_filler: FillerType,

    width: usize,
    height: usize,
    inputs: Interface<T>,
    diff_outputs: Interface<T>,
    outputs: ArcLock<SharedTensor<T>>,
    diff_inputs: ArcLock<SharedTensor<T>>,

    scale: ArcLock<SharedTensor<T>>,
    bias: ArcLock<SharedTensor<T>>,
    mean: ArcLock<SharedTensor<T>>,
    variance: ArcLock<SharedTensor<T>>,

    saved_mean: SharedTensor<T>,
    saved_variance: SharedTensor<T>,
    diff_scale: SharedTensor<T>,
    diff_bias: SharedTensor<T>,

    scale_solver: Box<dyn ISolver<T>>,
    bias_solver: Box<dyn ISolver<T>>,

    nb_propagate: u64,
    initialized: bool,
    trained: bool,
}

impl<T: Float> BatchNormCell<T> {
    /// Create a BatchNorm cell with `nb_outputs` channels running on `backend`.
    pub fn new(name: &str, nb_outputs: usize, config: BatchNormConfig, backend: Backend) -> BatchNormCell<T> {
        let scale_solver = config.scale_solver.solver.with_config::<T>(backend.clone(), &config.scale_solver);
        let bias_solver = config.bias_solver.solver.with_config::<T>(backend.clone(), &config.bias_solver);

        BatchNormCell {
            name: name.to_owned(),
            nb_outputs: nb_outputs,
            backend: backend,
            epsilon: config.epsilon,
            activation: config.activation,
            scale_filler: config.scale_filler,
            bias_filler: config.bias_filler,

            width: 0,
            height: 0,
            inputs: Interface::new(),
            diff_outputs: Interface::new(),
            outputs: new_shared_tensor(&[]),
            diff_inputs: new_shared_tensor(&[]),

            scale: new_shared_tensor(&[]),
            bias: new_shared_tensor(&[]),
            mean: new_shared_tensor(&[]),
            variance: new_shared_tensor(&[]),

            saved_mean: SharedTensor::new(&[]),
            saved_variance: SharedTensor::new(&[]),
            diff_scale: SharedTensor::new(&[]),
            diff_bias: SharedTensor::new(&[]),

            scale_solver: scale_solver,
            bias_solver: bias_solver,

            nb_propagate: 0,
            initialized: false,
            trained: false,
        }
    }

    fn parameter_dims(&self) -> [usize; 4] {
        [1, 1, self.nb_outputs, 1]
    }

    /// The effective epsilon, after defaulting.
    pub fn epsilon(&self) -> f64 {
        if self.epsilon == 0.0 { DEFAULT_EPSILON } else { self.epsilon }
    }

    /// Number of training passes done so far.
    pub fn nb_propagate(&self) -> u64 {
        self.nb_propagate
    }

    /// The scale parameter.
    pub fn scale(&self) -> ArcLock<SharedTensor<T>> {
        self.scale.clone()
    }

    /// The bias parameter.
    pub fn bias(&self) -> ArcLock<SharedTensor<T>> {
        self.bias.clone()
    }

    /// The running mean.
    pub fn mean(&self) -> ArcLock<SharedTensor<T>> {
        self.mean.clone()
    }

    /// The running variance.
    pub fn variance(&self) -> ArcLock<SharedTensor<T>> {
        self.variance.clone()
    }

    /// Share the scale parameter with another cell. Must be called before
    /// [initialize](#method.initialize).
    pub fn set_scale(&mut self, scale: ArcLock<SharedTensor<T>>) {
        self.scale = scale;
    }

    /// Share the bias parameter with another cell.
    pub fn set_bias(&mut self, bias: ArcLock<SharedTensor<T>>) {
        self.bias = bias;
    }

    /// Share the running mean with another cell.
    pub fn set_mean(&mut self, mean: ArcLock<SharedTensor<T>>) {
        self.mean = mean;
    }

    /// Share the running variance with another cell.
    pub fn set_variance(&mut self, variance: ArcLock<SharedTensor<T>>) {
        self.variance = variance;
    }

    /// Batch mean saved by the last training pass.
    pub fn saved_mean(&self) -> Result<Tensor<T>> {
        self.saved_mean.read(&self.backend)
    }

    /// Batch variance saved by the last training pass.
    pub fn saved_variance(&self) -> Result<Tensor<T>> {
        self.saved_variance.read(&self.backend)
    }

    /// Gradient with respect to the scale, from the last backward pass.
    pub fn diff_scale(&self) -> Result<Tensor<T>> {
        self.diff_scale.read(&self.backend)
    }

    /// Gradient with respect to the bias, from the last backward pass.
    pub fn diff_bias(&self) -> Result<Tensor<T>> {
        self.diff_bias.read(&self.backend)
    }

    fn prepare_parameter(&self, what: &str, parameter: &ArcLock<SharedTensor<T>>, filler: FillerType) -> Result<()> {
        let dims = self.parameter_dims();
        let mut parameter = parameter.write();
        if parameter.is_empty() {
            let mut values = Tensor::new(&dims);
            filler.fill(&mut values);
            parameter.resize(&dims, T::zero());
            parameter.assign(values)?;
        } else if parameter.dims() != dims {
            return Err(Error::Config(format!("{}: {} has dimensions {:?}, expected {:?}",
                                             self.name, what, parameter.dims(), dims)));
        }
        parameter.synchronize_to_device(&self.backend)
    }

    fn block(&self, channels: usize, batch: usize, offset: usize) -> Block {
        Block {
            spatial: self.width * self.height,
            channels: channels,
            batch: batch,
            out_channels: self.nb_outputs,
            offset: offset,
        }
    }

    fn propagate_native(&mut self, inference: bool, factor: T, epsilon: T) -> Result<()> {
        let backend = self.backend.clone();
        for input in self.inputs.iter() {
            input.write().synchronize_to_host(&backend)?;
        }
        let blocks = self.blocks();
        let mut outputs = self.outputs.write();
        {
            let y = outputs.host_mut()?.as_mut_slice();
            let scale = self.scale.read();
            let bias = self.bias.read();
            let mut mean = self.mean.write();
            let mut variance = self.variance.write();

            for (input, block) in self.inputs.iter().zip(blocks) {
                let input = input.read();
                let x = input.host()?.as_slice();
                if inference {
                    let params = native::Params {
                        scale: scale.host()?.as_slice(),
                        bias: bias.host()?.as_slice(),
                        mean: mean.host()?.as_slice(),
                        variance: variance.host()?.as_slice(),
                    };
                    native::normalize(block, x, y, &params, epsilon);
                } else {
                    native::forward_training(block, x, y,
                                             scale.host()?.as_slice(),
                                             bias.host()?.as_slice(),
                                             mean.host_mut()?.as_mut_slice(),
                                             variance.host_mut()?.as_mut_slice(),
                                             self.saved_mean.host_mut()?.as_mut_slice(),
                                             self.saved_variance.host_mut()?.as_mut_slice(),
                                             factor, epsilon);
                }
            }
        }
        if let Some(ref activation) = self.activation {
            activation.propagate(outputs.host_mut()?)?;
        }
        Ok(())
    }

    fn propagate_device(&mut self, ctx: &DeviceContext, inference: bool, factor: T, epsilon: T) -> Result<()> {
        let backend = self.backend.clone();
        for input in self.inputs.iter() {
            input.write().synchronize_to_device(&backend)?;
        }
        for parameter in &[&self.scale, &self.bias, &self.mean, &self.variance] {
            parameter.write().synchronize_to_device(&backend)?;
        }
        let blocks = self.blocks();
        let mut outputs = self.outputs.write();
        outputs.synchronize_to_device(&backend)?;
        {
            let scale = self.scale.read();
            let bias = self.bias.read();
            let mut mean = self.mean.write();
            let mut variance = self.variance.write();

            for (input, block) in self.inputs.iter().zip(blocks) {
                let input = input.read();
                if inference {
                    device::forward_inference(ctx, block, input.device()?, outputs.device_mut()?,
                                              scale.device()?, bias.device()?,
                                              mean.device()?, variance.device()?, epsilon)?;
                } else {
                    device::forward_training(ctx, block, input.device()?, outputs.device_mut()?,
                                             scale.device()?, bias.device()?,
                                             mean.device_mut()?, variance.device_mut()?,
                                             self.saved_mean.device_mut()?, self.saved_variance.device_mut()?,
                                             factor, epsilon)?;
                }
            }
        }
        if let Some(ref activation) = self.activation {
            let dims = outputs.dims().to_vec();
            activation.propagate_device(ctx, outputs.device_mut()?, &dims)?;
        }
        Ok(())
    }

    fn back_propagate_native(&mut self, accumulate_params: bool, epsilon: T) -> Result<()> {
        let backend = self.backend.clone();
        let blocks = self.blocks();
        let mut diff_inputs = self.diff_inputs.write();
        diff_inputs.synchronize_to_host(&backend)?;
        if let Some(ref activation) = self.activation {
            let outputs = self.outputs.read();
            activation.back_propagate(outputs.host()?, diff_inputs.host_mut()?)?;
        }
        let dy = diff_inputs.host()?.as_slice();
        let scale = self.scale.read();

        for (k, (input, block)) in self.inputs.iter().zip(blocks).enumerate() {
            let input = input.read();
            let diff_output = self.diff_outputs.get(k)
                .ok_or_else(|| Error::Invariant(format!("{}: no gradient tensor for input {}", self.name, k)))?;
            let mut diff_output = diff_output.write();
            diff_output.synchronize_to_host(&backend)?;
            let accumulate_dx = diff_output.is_valid();
            native::backward(block,
                             input.host()?.as_slice(),
                             dy,
                             diff_output.host_mut()?.as_mut_slice(),
                             accumulate_dx,
                             scale.host()?.as_slice(),
                             self.saved_mean.host()?.as_slice(),
                             self.saved_variance.host()?.as_slice(),
                             self.diff_scale.host_mut()?.as_mut_slice(),
                             self.diff_bias.host_mut()?.as_mut_slice(),
                             accumulate_params,
                             epsilon);
            diff_output.set_valid();
        }
        Ok(())
    }

    fn back_propagate_device(&mut self, ctx: &DeviceContext, accumulate_params: bool, epsilon: T) -> Result<()> {
        let backend = self.backend.clone();
        let blocks = self.blocks();
        let mut diff_inputs = self.diff_inputs.write();
        diff_inputs.synchronize_to_device(&backend)?;
        if let Some(ref activation) = self.activation {
            let outputs = self.outputs.read();
            let dims = outputs.dims().to_vec();
            activation.back_propagate_device(ctx, outputs.device()?, diff_inputs.device_mut()?, &dims)?;
        }
        let dy = diff_inputs.device()?;
        let scale = self.scale.read();

        for (k, (input, block)) in self.inputs.iter().zip(blocks).enumerate() {
            let input = input.read();
            let diff_output = self.diff_outputs.get(k)
                .ok_or_else(|| Error::Invariant(format!("{}: no gradient tensor for input {}", self.name, k)))?;
            let mut diff_output = diff_output.write();
            diff_output.synchronize_to_device(&backend)?;
            let accumulate_dx = diff_output.is_valid();
            device::backward(ctx, block,
                             input.device()?,
                             dy,
                             diff_output.device_mut()?,
                             accumulate_dx,
                             scale.device()?,
                             self.saved_mean.device()?,
                             self.saved_variance.device()?,
                             self.diff_scale.device_mut()?,
                             self.diff_bias.device_mut()?,
                             accumulate_params,
                             epsilon)?;
            diff_output.set_valid();
        }
        Ok(())
    }

    /// One block per input, at consecutive output channel offsets.
    fn blocks(&self) -> Vec<Block> {
        let batch = self.inputs.dim_b();
        let mut offset = 0;
        self.inputs.iter().map(|input| {
            let channels = input.read().dim_z();
            let block = self.block(channels, batch, offset);
            offset += channels;
            block
        }).collect()
    }

    fn check_initialized(&self, what: &str) -> Result<()> {
        if !self.initialized {
            return Err(Error::Invariant(format!("{}: {} before initialize", self.name, what)));
        }
        Ok(())
    }
}

impl<T: Float> ICell<T> for BatchNormCell<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn cell_type(&self) -> &'static str {
        "BatchNorm"
    }

    fn nb_outputs(&self) -> usize {
        self.nb_outputs
    }

    fn outputs_width(&self) -> usize {
        self.width
    }

    fn outputs_height(&self) -> usize {
        self.height
    }

    fn backend(&self) -> &Backend {
        &self.backend
    }

    fn add_input(&mut self, input: ArcLock<SharedTensor<T>>, diff_output: ArcLock<SharedTensor<T>>) -> Result<()> {
        if self.initialized {
            return Err(Error::Config(format!("{}: inputs must be added before initialize", self.name)));
        }
        let (width, height, batch, dims) = {
            let input = input.read();
            (input.dim_x(), input.dim_y(), input.dim_b(), input.dims().to_vec())
        };
        if !self.inputs.is_empty() && (width != self.width || height != self.height) {
            return Err(Error::Config(format!("{}: input of {}x{} does not match the outputs of {}x{}",
                                             self.name, width, height, self.width, self.height)));
        }
        if diff_output.read().dims() != dims.as_slice() {
            return Err(Error::Shape(format!("{}: gradient tensor {:?} does not match input {:?}",
                                            self.name, diff_output.read().dims(), dims)));
        }
        self.inputs.push(input)?;
        self.diff_outputs.push(diff_output)?;

        self.width = width;
        self.height = height;
        let output_dims = [width, height, self.nb_outputs, batch];
        self.outputs.write().resize(&output_dims, T::zero());
        self.diff_inputs.write().resize(&output_dims, T::zero());
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::Invariant(format!("{}: already initialized", self.name)));
        }
        if self.inputs.is_empty() {
            return Err(Error::Config(format!("{}: a BatchNorm cell needs at least one input", self.name)));
        }
        if self.inputs.dim_z() != self.nb_outputs {
            return Err(Error::Config(format!("{}: the number of outputs ({}) must match the number of input channels ({})",
                                             self.name, self.nb_outputs, self.inputs.dim_z())));
        }

        self.prepare_parameter("scale", &self.scale, self.scale_filler)?;
        self.prepare_parameter("bias", &self.bias, self.bias_filler)?;
        self.prepare_parameter("mean", &self.mean, FillerType::Constant { value: 0.0 })?;
        self.prepare_parameter("variance", &self.variance, FillerType::Constant { value: 0.0 })?;

        let dims = self.parameter_dims();
        let backend = self.backend.clone();
        for state in &mut [&mut self.saved_mean, &mut self.saved_variance, &mut self.diff_scale, &mut self.diff_bias] {
            state.resize(&dims, T::zero());
            state.synchronize_to_device(&backend)?;
        }
        self.outputs.write().synchronize_to_device(&backend)?;
        self.diff_inputs.write().synchronize_to_device(&backend)?;

        self.initialized = true;
        info!("{}: BatchNorm of {} channels ({}x{}), epsilon {}, {} backend",
              self.name, self.nb_outputs, self.width, self.height, self.epsilon(), backend.name());
        Ok(())
    }

    fn propagate(&mut self, inference: bool) -> Result<()> {
        self.check_initialized("propagate")?;
        let epsilon = T::cast(self.epsilon());
        let factor = T::cast(1.0 / (1.0 + self.nb_propagate as f64));

        match self.backend.clone() {
            Backend::Native => self.propagate_native(inference, factor, epsilon)?,
            Backend::Device(ctx) => self.propagate_device(&ctx, inference, factor, epsilon)?,
        }
        if !inference {
            self.nb_propagate += 1;
        }
        self.trained = !inference;
        self.diff_inputs.write().clear_valid();
        trace!("{}: propagate (inference: {})", self.name, inference);
        Ok(())
    }

    fn back_propagate(&mut self, mode: GradientMode) -> Result<()> {
        self.check_initialized("back_propagate")?;
        if !self.trained {
            return Err(Error::Invariant(format!("{}: back_propagate needs a preceding training propagate", self.name)));
        }
        let epsilon = T::cast(self.epsilon());
        let accumulate_params = mode == GradientMode::Accumulate;

        match self.backend.clone() {
            Backend::Native => self.back_propagate_native(accumulate_params, epsilon)?,
            Backend::Device(ctx) => self.back_propagate_device(&ctx, accumulate_params, epsilon)?,
        }
        trace!("{}: back_propagate ({:?})", self.name, mode);
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.check_initialized("update")?;
        let batch_size = self.inputs.dim_b();
        self.scale_solver.update(&mut self.scale.write(), &self.diff_scale, batch_size)?;
        self.bias_solver.update(&mut self.bias.write(), &self.diff_bias, batch_size)?;
        Ok(())
    }

    fn outputs(&self) -> ArcLock<SharedTensor<T>> {
        self.outputs.clone()
    }

    fn diff_inputs(&self) -> ArcLock<SharedTensor<T>> {
        self.diff_inputs.clone()
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let scale = self.scale.read().read(&self.backend)?;
        let bias = self.bias.read().read(&self.backend)?;
        let mean = self.mean.read().read(&self.backend)?;
        let variance = self.variance.read().read(&self.backend)?;
        let path = cell::parameters_path(dir, &self.name);
        cell::write_parameters(&path, &[scale.as_slice(), bias.as_slice(), mean.as_slice(), variance.as_slice()])?;
        debug!("{}: parameters saved to {}", self.name, path.display());
        Ok(())
    }

    fn load(&mut self, dir: &Path, ignore_missing: bool) -> Result<()> {
        let dims = self.parameter_dims();
        let mut scale = Tensor::new(&dims);
        let mut bias = Tensor::new(&dims);
        let mut mean = Tensor::new(&dims);
        let mut variance = Tensor::new(&dims);
        let path = cell::parameters_path(dir, &self.name);
        let found = cell::read_parameters(&path,
                                          &mut [("scale", scale.as_mut_slice()),
                                                ("bias", bias.as_mut_slice()),
                                                ("mean", mean.as_mut_slice()),
                                                ("variance", variance.as_mut_slice())],
                                          ignore_missing)?;
        if !found {
            return Ok(());
        }
        let parameters = [&self.scale, &self.bias, &self.mean, &self.variance];
        for (parameter, loaded) in parameters.iter().zip(vec![scale, bias, mean, variance]) {
            let mut parameter = parameter.write();
            if parameter.dims() != dims {
                parameter.resize(&dims, T::zero());
            }
            parameter.assign(loaded)?;
        }
        debug!("{}: parameters loaded from {}", self.name, path.display());
        Ok(())
    }
}

impl<T: Float> fmt::Debug for BatchNormCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BatchNormCell")
            .field("name", &self.name)
            .field("nb_outputs", &self.nb_outputs)
            .field("backend", &self.backend.name())
            .field("nb_propagate", &self.nb_propagate)
            .finish()
    }
}

/// Build a parameter tensor of `nb_outputs` channels holding `values`, to be
/// shared between cells through the `set_*` methods of [BatchNormCell][1].
/// [1]: ./struct.BatchNormCell.html
pub fn shared_parameter<T: Float>(values: Vec<T>) -> Result<ArcLock<SharedTensor<T>>> {
    let dims = [1, 1, values.len(), 1];
    Ok(arc_lock(SharedTensor::from_tensor(Tensor::from_vec(&dims, values)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(dims: &[usize]) -> (ArcLock<SharedTensor<f32>>, ArcLock<SharedTensor<f32>>) {
        (new_shared_tensor(dims), new_shared_tensor(dims))
    }

    #[test]
    fn channel_count_mismatch_is_a_config_error() {
        let mut cell = BatchNormCell::<f32>::new("bn", 3, BatchNormConfig::default(), Backend::Native);
        let (x, dx) = input(&[2, 2, 2, 1]);
        cell.add_input(x, dx).unwrap();
        match cell.initialize() {
            Err(Error::Config(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn spatial_mismatch_is_a_config_error() {
        let mut cell = BatchNormCell::<f32>::new("bn", 2, BatchNormConfig::default(), Backend::Native);
        let (x, dx) = input(&[2, 2, 1, 1]);
        cell.add_input(x, dx).unwrap();
        let (y, dy) = input(&[3, 2, 1, 1]);
        assert!(cell.add_input(y, dy).is_err());
    }

    #[test]
    fn shared_parameter_shape_is_validated() {
        let mut cell = BatchNormCell::<f32>::new("bn", 2, BatchNormConfig::default(), Backend::Native);
        let (x, dx) = input(&[1, 1, 2, 4]);
        cell.add_input(x, dx).unwrap();
        cell.set_scale(shared_parameter(vec![1.0, 1.0, 1.0]).unwrap());
        assert!(cell.initialize().is_err());
    }

    #[test]
    fn epsilon_defaults_when_zero() {
        let cell = BatchNormCell::<f64>::new("bn", 1, BatchNormConfig::default(), Backend::Native);
        assert_eq!(cell.epsilon(), 1.0e-5);
        let config = BatchNormConfig { epsilon: 1.0e-3, ..BatchNormConfig::default() };
        let cell = BatchNormCell::<f64>::new("bn", 1, config, Backend::Native);
        assert_eq!(cell.epsilon(), 1.0e-3);
    }
}
