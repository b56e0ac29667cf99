//! Provides the closed set of execution backends.
//!
//! A backend is picked once when a cell or a solver is built, and never changes
//! afterwards.
use std::sync::Arc;

use crate::device::DeviceContext;

#[derive(Debug, Clone)]
/// Where the numerics of a cell or solver are executed.
pub enum Backend {
    /// Host memory, data parallel over the [rayon] thread pool.
    ///
    /// [rayon]: https://docs.rs/rayon
    Native,
    /// Device memory of the given context, kernels launched on its stream.
    Device(Arc<DeviceContext>),
}

impl Backend {
    /// Create a device backend sharing `context`.
    pub fn device(context: &Arc<DeviceContext>) -> Backend {
        Backend::Device(context.clone())
    }

    /// Returns true for the device backend.
    pub fn is_accelerated(&self) -> bool {
        match *self {
            Backend::Native => false,
            Backend::Device(_) => true,
        }
    }

    /// The device context, if any.
    pub fn context(&self) -> Option<&Arc<DeviceContext>> {
        match *self {
            Backend::Native => None,
            Backend::Device(ref context) => Some(context),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match *self {
            Backend::Native => "native",
            Backend::Device(_) => "device",
        }
    }
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Native
    }
}
