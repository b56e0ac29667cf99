//! Provides the generic functionality of a network cell.
//!
//! A cell is one layer of a [Network][network]. Its lifecycle is always the same:
//!
//! 1. the cell is constructed with its static shape parameters,
//! 2. [add_input][add_input] binds the outputs of upstream cells (together with
//! the tensors that receive the gradient with respect to them),
//! 3. [initialize][initialize] validates the wiring and allocates parameters
//! and buffers, exactly once,
//! 4. [propagate][propagate], [back_propagate][back_propagate] and
//! [update][update] are called in that order for every training step,
//! 5. [save][save] and [load][load] persist the learned parameters.
//!
//! The gradient tensors a cell writes into are shared between all consumers of
//! an upstream output. The first consumer to run its backward pass overwrites the
//! tensor and marks it valid, the following ones accumulate into it. A cell
//! clears the validity of its own gradient tensor at the end of every forward
//! pass.
//!
//! Gradients follow the descent convention: `diff_inputs` holds
//! `expected - output`, and solvers add the scaled gradient to the parameters.
//!
//! [network]: ../network/index.html
//! [add_input]: ./trait.ICell.html#tymethod.add_input
//! [initialize]: ./trait.ICell.html#tymethod.initialize
//! [propagate]: ./trait.ICell.html#tymethod.propagate
//! [back_propagate]: ./trait.ICell.html#tymethod.back_propagate
//! [update]: ./trait.ICell.html#tymethod.update
//! [save]: ./trait.ICell.html#tymethod.save
//! [load]: ./trait.ICell.html#tymethod.load
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::numeric::Float;
use crate::tensor::{SharedTensor, Tensor};
use crate::util::ArcLock;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// How a backward pass treats previously computed parameter gradients.
pub enum GradientMode {
    /// First backward pass of a new iteration, parameter gradients are overwritten.
    Overwrite,
    /// Additional micro-batch of the same iteration, parameter gradients are summed.
    Accumulate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Layout of one input block inside the output of a cell.
///
/// The channels of the `k`-th input map onto a consecutive range of output
/// channels, starting at `offset`.
pub struct Block {
    /// Width times height.
    pub spatial: usize,
    /// Channels of the input block.
    pub channels: usize,
    /// Batch size.
    pub batch: usize,
    /// Channels of the cell outputs.
    pub out_channels: usize,
    /// First output channel of the block.
    pub offset: usize,
}

impl Block {
    /// Linear index of `(i, c, b)` in the input block, `i` being the spatial position.
    pub fn input_index(&self, b: usize, c: usize, i: usize) -> usize {
        (b * self.channels + c) * self.spatial + i
    }

    /// Linear index of input channel `c` at `(i, b)` in the outputs.
    pub fn output_index(&self, b: usize, c: usize, i: usize) -> usize {
        (b * self.out_channels + self.offset + c) * self.spatial + i
    }

    /// Number of values reduced per channel: batch times width times height.
    pub fn count(&self) -> usize {
        self.batch * self.spatial
    }
}

/// A network layer, executed on a native or a device [Backend][1].
/// [1]: ../backend/enum.Backend.html
pub trait ICell<T: Float>: Send + Sync {
    /// Unique name of the cell.
    fn name(&self) -> &str;

    /// Type of the cell, e.g. `BatchNorm`.
    fn cell_type(&self) -> &'static str;

    /// Number of output channels.
    fn nb_outputs(&self) -> usize;

    /// Width of the outputs, known once the first input is bound.
    fn outputs_width(&self) -> usize;

    /// Height of the outputs, known once the first input is bound.
    fn outputs_height(&self) -> usize;

    /// The backend the cell runs on.
    fn backend(&self) -> &Backend;

    /// Returns true for cells running on a device backend.
    fn is_accelerated(&self) -> bool {
        self.backend().is_accelerated()
    }

    /// Bind an upstream output, and the tensor receiving the gradient with
    /// respect to it.
    fn add_input(&mut self, input: ArcLock<SharedTensor<T>>, diff_output: ArcLock<SharedTensor<T>>) -> Result<()>;

    /// Validate the inputs and allocate parameters and buffers.
    fn initialize(&mut self) -> Result<()>;

    /// Compute the outputs. Training mode (`inference == false`) may update
    /// running statistics.
    fn propagate(&mut self, inference: bool) -> Result<()>;

    /// Compute the gradients with respect to the inputs and the parameters.
    ///
    /// Must follow a training [propagate](#tymethod.propagate).
    fn back_propagate(&mut self, mode: GradientMode) -> Result<()>;

    /// Apply the parameter gradients through the solvers of the cell.
    fn update(&mut self) -> Result<()>;

    /// The outputs of the cell.
    fn outputs(&self) -> ArcLock<SharedTensor<T>>;

    /// The gradient with respect to the outputs of the cell.
    fn diff_inputs(&self) -> ArcLock<SharedTensor<T>>;

    /// Save the learned parameters into `dir`.
    fn save(&self, dir: &Path) -> Result<()>;

    /// Load the learned parameters from `dir`.
    ///
    /// With `ignore_missing`, a missing parameter file is logged and ignored.
    fn load(&mut self, dir: &Path, ignore_missing: bool) -> Result<()>;

    /// Write `expected - output` into the gradient with respect to the outputs,
    /// and return the mean squared error.
    ///
    /// `targets` holds one class per output position (`[width, height, 1, batch]`).
    /// The expected value is `target_value` for the target channel and
    /// `default_value` for the others. With a single output channel, class 1
    /// expects `target_value` and class 0 `default_value`. Negative targets are
    /// ignored and get a zero gradient.
    fn set_output_targets(&mut self, targets: &Tensor<i32>, target_value: f64, default_value: f64) -> Result<f64> {
        let backend = self.backend().clone();
        let values = self.outputs().read().read(&backend)?;
        let diff_inputs = self.diff_inputs();
        let mut diff = diff_inputs.write();
        diff.synchronize_to_host(&backend)?;
        let loss = output_targets(&values, targets, target_value, default_value, diff.host_mut()?)?;
        diff.synchronize_to_device(&backend)?;
        diff.set_valid();
        Ok(loss)
    }

    /// Index of the largest output of batch position `batch_pos`.
    fn max_output(&self, batch_pos: usize) -> Result<usize> {
        let values = self.outputs().read().read(self.backend())?;
        if batch_pos >= values.dim_b() {
            return Err(Error::Invariant(format!("{}: batch position {} out of range", self.name(), batch_pos)));
        }
        let mut best = 0;
        for (index, value) in values.batch(batch_pos).iter().enumerate() {
            if *value > values.batch(batch_pos)[best] {
                best = index;
            }
        }
        Ok(best)
    }
}

impl<T: Float> fmt::Debug for dyn ICell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.cell_type(), self.name())
    }
}

fn output_targets<T: Float>(outputs: &Tensor<T>,
                            targets: &Tensor<i32>,
                            target_value: f64,
                            default_value: f64,
                            diff: &mut Tensor<T>) -> Result<f64> {
    if targets.dim_x() != outputs.dim_x() || targets.dim_y() != outputs.dim_y() || targets.dim_b() != outputs.dim_b() {
        return Err(Error::Shape(format!("targets {:?} do not cover outputs {:?}", targets.dims(), outputs.dims())));
    }
    if diff.dims() != outputs.dims() {
        return Err(Error::Shape(format!("gradient {:?} does not match outputs {:?}", diff.dims(), outputs.dims())));
    }
    if outputs.is_empty() {
        return Ok(0.0);
    }
    let spatial = outputs.dim_x() * outputs.dim_y();
    let channels = outputs.dim_z();
    let stride = outputs.batch_stride();
    let (sum, count) = diff.as_mut_slice()
        .par_chunks_mut(stride)
        .zip(outputs.as_slice().par_chunks(stride))
        .enumerate()
        .map(|(b, (diff, values))| {
            let targets = targets.batch(b);
            let mut sum = 0.0;
            let mut count = 0usize;
            for c in 0..channels {
                for i in 0..spatial {
                    let index = c * spatial + i;
                    let target = targets[i];
                    if target < 0 {
                        diff[index] = T::zero();
                        continue;
                    }
                    let hit = if channels > 1 { target as usize == c } else { target == 1 };
                    let expected = if hit { target_value } else { default_value };
                    let error = expected - values[index].as_f64();
                    diff[index] = T::cast(error);
                    sum += error * error;
                    count += 1;
                }
            }
            (sum, count)
        })
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
    Ok(if count > 0 { sum / count as f64 } else { 0.0 })
}

/// Path of the parameter file of cell `name` inside `dir`.
pub fn parameters_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.syn", name))
}

/// Write parameter fields as raw, platform-endian values, in order.
///
/// The data is written to a temporary file first and renamed, a failed save
/// leaves no partial file behind.
pub(crate) fn write_parameters<T: Float>(path: &Path, fields: &[&[T]]) -> Result<()> {
    let partial = path.with_extension("syn.partial");
    let written = File::create(&partial).and_then(|mut file| {
        for field in fields {
            file.write_all(bytemuck::cast_slice::<T, u8>(field))?;
        }
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&partial);
        return Err(Error::io(path, err));
    }
    fs::rename(&partial, path).map_err(|err| Error::io(path, err))
}

/// Read parameter fields written by [write_parameters](fn.write_parameters.html).
///
/// Returns `Ok(false)` when the file is missing and `ignore_missing` is set.
pub(crate) fn read_parameters<T: Float>(path: &Path,
                                        fields: &mut [(&'static str, &mut [T])],
                                        ignore_missing: bool) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(ref err) if ignore_missing && err.kind() == ::std::io::ErrorKind::NotFound => {
            info!("Parameter file {} does not exist, keeping current parameters", path.display());
            return Ok(false);
        }
        Err(err) => return Err(Error::io(path, err)),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|err| Error::io(path, err))?;

    let mut offset = 0;
    for field in fields.iter_mut() {
        let what = field.0;
        let dst = bytemuck::cast_slice_mut::<T, u8>(&mut *field.1);
        let end = offset + dst.len();
        if end > bytes.len() {
            return Err(Error::Truncated { path: path.to_path_buf(), what: what });
        }
        dst.copy_from_slice(&bytes[offset..end]);
        offset = end;
    }
    if offset < bytes.len() {
        return Err(Error::Oversized { path: path.to_path_buf() });
    }
    Ok(true)
}
