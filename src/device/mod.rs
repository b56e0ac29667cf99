//! Provides the explicit accelerator context used by the device backend.
//!
//! A [DeviceContext][1] owns device memory allocations and a single stream. Kernels
//! are launched on the stream in program order and run to completion before the
//! launch returns, so every call stays synchronous from the caller's point of
//! view. Host and device memory are strictly separated: data only moves through
//! [upload][2] and [download][3], which are counted as transfers. Device buffers
//! are allocated in host RAM, no GPU runtime is bound.
//!
//! The context is created once at startup and handed to every device component
//! by `Arc`; there is no process-wide device handle.
//!
//! [1]: ./struct.DeviceContext.html
//! [2]: ./struct.DeviceContext.html#method.upload
//! [3]: ./struct.DeviceContext.html#method.download
pub mod kernels;

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::numeric::Float;

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone)]
/// Configuration of a [DeviceContext][1].
/// [1]: ./struct.DeviceContext.html
pub struct DeviceConfig {
    /// Human readable name used in logs.
    ///
    /// Default: "device"
    pub name: String,
    /// Maximum number of elements the context may allocate in total.
    ///
    /// If set to `None` allocations are unbounded.
    ///
    /// Default: None
    pub capacity: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            name: "device".to_owned(),
            capacity: None,
        }
    }
}

#[derive(Debug, Default)]
struct Stream {
    launches: usize,
    last_kernel: Option<String>,
}

#[derive(Debug)]
/// An accelerator with its own memory and an in-order kernel stream.
pub struct DeviceContext {
    id: usize,
    config: DeviceConfig,
    allocated: AtomicUsize,
    transfers: AtomicUsize,
    stream: Mutex<Stream>,
}

impl DeviceContext {
    /// Create a new device context.
    pub fn new(config: DeviceConfig) -> DeviceContext {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::SeqCst);
        info!("Initializing device context #{} ({})", id, config.name);
        DeviceContext {
            id: id,
            config: config,
            allocated: AtomicUsize::new(0),
            transfers: AtomicUsize::new(0),
            stream: Mutex::new(Stream::default()),
        }
    }

    /// Unique id of the context.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Name of the context.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Allocate a zero-filled buffer of `len` elements.
    pub fn alloc<T: Float>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        let total = self.allocated.fetch_add(len, Ordering::SeqCst) + len;
        if let Some(capacity) = self.config.capacity {
            if total > capacity {
                self.allocated.fetch_sub(len, Ordering::SeqCst);
                return Err(Error::Invariant(format!("device {} out of memory: {} elements requested, {} of {} in use",
                                                    self.config.name, len, total - len, capacity)));
            }
        }
        Ok(DeviceBuffer { device: self.id, data: vec![T::zero(); len] })
    }

    /// Number of elements allocated so far.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Copy host data into a device buffer of the same length.
    pub fn upload<T: Float>(&self, src: &[T], dst: &mut DeviceBuffer<T>) -> Result<()> {
        self.check(dst)?;
        if src.len() != dst.len() {
            return Err(Error::Shape(format!("cannot upload {} elements into a device buffer of {}", src.len(), dst.len())));
        }
        self.synchronize();
        dst.data.copy_from_slice(src);
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Copy a device buffer back into host memory of the same length.
    pub fn download<T: Float>(&self, src: &DeviceBuffer<T>, dst: &mut [T]) -> Result<()> {
        self.check(src)?;
        if src.len() != dst.len() {
            return Err(Error::Shape(format!("cannot download {} elements into a host buffer of {}", src.len(), dst.len())));
        }
        self.synchronize();
        dst.copy_from_slice(&src.data);
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Fail unless `buffer` was allocated on this context.
    pub fn check<T>(&self, buffer: &DeviceBuffer<T>) -> Result<()> {
        if buffer.device != self.id {
            return Err(Error::Invariant(format!("buffer of device #{} used on device #{}", buffer.device, self.id)));
        }
        Ok(())
    }

    /// Launch `kernel` on the stream and wait for it to complete.
    ///
    /// Launches from several threads are serialized in the order the stream
    /// lock is acquired.
    pub fn launch<R, F: FnOnce() -> R>(&self, kernel: &str, f: F) -> R {
        let mut stream = self.stream.lock();
        stream.launches += 1;
        trace!("device #{}: launch {} ({})", self.id, kernel, stream.launches);
        stream.last_kernel = Some(kernel.to_owned());
        f()
    }

    /// Block until all launched kernels have completed.
    pub fn synchronize(&self) {
        // kernels complete within `launch`, taking the lock waits for a running one
        let _stream = self.stream.lock();
    }

    /// Number of kernels launched so far.
    pub fn launches(&self) -> usize {
        self.stream.lock().launches
    }

    /// Name of the most recently launched kernel.
    pub fn last_kernel(&self) -> Option<String> {
        self.stream.lock().last_kernel.clone()
    }

    /// Number of host/device transfers so far.
    pub fn transfers(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
/// Memory owned by a [DeviceContext][1].
/// [1]: ./struct.DeviceContext.html
///
/// The content can only be read back on the host through
/// [DeviceContext::download][2].
///
/// [2]: ./struct.DeviceContext.html#method.download
pub struct DeviceBuffer<T> {
    device: usize,
    data: Vec<T>,
}

impl<T> DeviceBuffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the buffer holds no element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Id of the owning context.
    pub fn device_id(&self) -> usize {
        self.device
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_are_counted() {
        let ctx = DeviceContext::new(DeviceConfig::default());
        let mut buffer = ctx.alloc::<f32>(3).unwrap();
        ctx.upload(&[1.0, 2.0, 3.0], &mut buffer).unwrap();
        let mut host = [0f32; 3];
        ctx.download(&buffer, &mut host).unwrap();
        assert_eq!(host, [1.0, 2.0, 3.0]);
        assert_eq!(ctx.transfers(), 2);
    }

    #[test]
    fn buffers_do_not_cross_devices() {
        let first = DeviceContext::new(DeviceConfig::default());
        let second = DeviceContext::new(DeviceConfig::default());
        let mut buffer = first.alloc::<f64>(1).unwrap();
        assert!(second.upload(&[1.0], &mut buffer).is_err());
    }

    #[test]
    fn capacity_is_enforced() {
        let ctx = DeviceContext::new(DeviceConfig { capacity: Some(4), ..DeviceConfig::default() });
        assert!(ctx.alloc::<f32>(3).is_ok());
        assert!(ctx.alloc::<f32>(2).is_err());
        assert_eq!(ctx.allocated(), 3);
    }
}
