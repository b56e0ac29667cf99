use crate::backend::Backend;
use crate::device::{DeviceBuffer, DeviceContext};
use crate::error::{Error, Result};
use crate::numeric::Float;

use super::Tensor;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Which copy of a [SharedTensor][1] holds the latest data.
/// [1]: ./struct.SharedTensor.html
pub enum Latest {
    /// Only the host copy is up to date.
    Host,
    /// Only the device copy is up to date.
    Device,
    /// Both copies hold the same data.
    Both,
}

#[derive(Debug, Clone)]
/// A tensor with a host copy and an optional device copy.
///
/// Writing one side marks the other side stale. Reading a stale side is an error
/// until it is brought up to date with an explicit synchronization, which is
/// the only way data moves between host and device.
///
/// The tensor also carries a `valid` flag. It is used for gradient tensors
/// written by several consumers: the first writer overwrites and sets the flag,
/// later writers accumulate.
pub struct SharedTensor<T> {
    host: Tensor<T>,
    device: Option<DeviceBuffer<T>>,
    latest: Latest,
    valid: bool,
}

impl<T: Float> SharedTensor<T> {
    /// Create a zero-filled tensor living on the host.
    pub fn new(dims: &[usize]) -> SharedTensor<T> {
        SharedTensor::from_tensor(Tensor::new(dims))
    }

    /// Wrap an existing host tensor.
    pub fn from_tensor(tensor: Tensor<T>) -> SharedTensor<T> {
        SharedTensor {
            host: tensor,
            device: None,
            latest: Latest::Host,
            valid: false,
        }
    }

    /// The dimensions, fastest first.
    pub fn dims(&self) -> &[usize] {
        self.host.dims()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.host.size()
    }

    /// Returns true when the tensor holds no element.
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Width.
    pub fn dim_x(&self) -> usize {
        self.host.dim_x()
    }

    /// Height.
    pub fn dim_y(&self) -> usize {
        self.host.dim_y()
    }

    /// Number of channels.
    pub fn dim_z(&self) -> usize {
        self.host.dim_z()
    }

    /// Batch size.
    pub fn dim_b(&self) -> usize {
        self.host.dim_b()
    }

    /// Which copy holds the latest data.
    pub fn latest(&self) -> Latest {
        self.latest
    }

    /// Resize on the host, filling with `value`.
    ///
    /// Any device copy is released.
    pub fn resize(&mut self, dims: &[usize], value: T) {
        self.host.resize(dims, value);
        self.device = None;
        self.latest = Latest::Host;
    }

    /// Replace the whole content with `tensor`, of identical dimensions.
    ///
    /// The host copy becomes the latest one, whatever side was newer before.
    pub fn assign(&mut self, tensor: Tensor<T>) -> Result<()> {
        if tensor.dims() != self.host.dims() {
            return Err(Error::Shape(format!("cannot assign {:?} to a tensor of {:?}", tensor.dims(), self.host.dims())));
        }
        self.host = tensor;
        self.latest = Latest::Host;
        Ok(())
    }

    /// The host copy, failing when the device holds newer data.
    pub fn host(&self) -> Result<&Tensor<T>> {
        if self.latest == Latest::Device {
            return Err(Error::Invariant("host copy is stale, synchronize from the device first".to_owned()));
        }
        Ok(&self.host)
    }

    /// The host copy for writing. The device copy becomes stale.
    pub fn host_mut(&mut self) -> Result<&mut Tensor<T>> {
        if self.latest == Latest::Device {
            return Err(Error::Invariant("host copy is stale, synchronize from the device first".to_owned()));
        }
        self.latest = Latest::Host;
        Ok(&mut self.host)
    }

    /// The device copy, failing when it is missing or the host holds newer data.
    pub fn device(&self) -> Result<&DeviceBuffer<T>> {
        match self.device {
            Some(ref buffer) if self.latest != Latest::Host => Ok(buffer),
            Some(_) => Err(Error::Invariant("device copy is stale, synchronize from the host first".to_owned())),
            None => Err(Error::Invariant("tensor has no device copy".to_owned())),
        }
    }

    /// The device copy for writing. The host copy becomes stale.
    pub fn device_mut(&mut self) -> Result<&mut DeviceBuffer<T>> {
        match self.device {
            Some(ref mut buffer) if self.latest != Latest::Host => {
                self.latest = Latest::Device;
                Ok(buffer)
            }
            Some(_) => Err(Error::Invariant("device copy is stale, synchronize from the host first".to_owned())),
            None => Err(Error::Invariant("tensor has no device copy".to_owned())),
        }
    }

    /// Copy the host data to the device, allocating the device copy if needed.
    pub fn synchronize_h_to_d(&mut self, ctx: &DeviceContext) -> Result<()> {
        if self.latest == Latest::Device {
            return Err(Error::Invariant("cannot overwrite newer device data with the host copy".to_owned()));
        }
        let reuse = match self.device {
            Some(ref buffer) => buffer.len() == self.host.size() && buffer.device_id() == ctx.id(),
            None => false,
        };
        if !reuse {
            self.device = Some(ctx.alloc(self.host.size())?);
        }
        if let Some(ref mut buffer) = self.device {
            ctx.upload(self.host.as_slice(), buffer)?;
        }
        self.latest = Latest::Both;
        Ok(())
    }

    /// Copy the device data back to the host.
    pub fn synchronize_d_to_h(&mut self, ctx: &DeviceContext) -> Result<()> {
        match self.device {
            Some(ref buffer) => ctx.download(buffer, self.host.as_mut_slice())?,
            None => return Err(Error::Invariant("tensor has no device copy".to_owned())),
        }
        self.latest = Latest::Both;
        Ok(())
    }

    /// Make the host copy current, if `backend` may have written the device copy.
    pub fn synchronize_to_host(&mut self, backend: &Backend) -> Result<()> {
        if self.latest != Latest::Device {
            return Ok(());
        }
        match backend.context() {
            Some(ctx) => self.synchronize_d_to_h(ctx),
            None => Err(Error::Invariant("device data cannot be read without a device context".to_owned())),
        }
    }

    /// Make the device copy current for the device backend. No-op on the native backend.
    pub fn synchronize_to_device(&mut self, backend: &Backend) -> Result<()> {
        match backend.context() {
            Some(ctx) => {
                if self.latest == Latest::Host || self.device.is_none() {
                    self.synchronize_h_to_d(ctx)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// A host snapshot of the latest data, without changing the tensor state.
    pub fn read(&self, backend: &Backend) -> Result<Tensor<T>> {
        if self.latest != Latest::Device {
            return Ok(self.host.clone());
        }
        let mut snapshot = self.host.clone();
        match (backend.context(), self.device.as_ref()) {
            (Some(ctx), Some(buffer)) => ctx.download(buffer, snapshot.as_mut_slice())?,
            _ => return Err(Error::Invariant("device data cannot be read without a device context".to_owned())),
        }
        Ok(snapshot)
    }

    /// Returns true when a writer marked the content valid.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the content valid.
    pub fn set_valid(&mut self) {
        self.valid = true;
    }

    /// Mark the content invalid, the next writer overwrites it.
    pub fn clear_valid(&mut self) {
        self.valid = false;
    }
}
