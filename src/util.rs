//! Provides common utility functions
use std::sync::Arc;

use parking_lot::RwLock;

use crate::numeric::Float;
use crate::tensor::SharedTensor;

/// Shared Lock used for our tensors
pub type ArcLock<T> = Arc<RwLock<T>>;

/// Wrap a value into a new [ArcLock][1].
/// [1]: ./type.ArcLock.html
pub fn arc_lock<T>(value: T) -> ArcLock<T> {
    Arc::new(RwLock::new(value))
}

/// Create a new shared, zero-filled host tensor with the given dimensions.
pub fn new_shared_tensor<T: Float>(dims: &[usize]) -> ArcLock<SharedTensor<T>> {
    arc_lock(SharedTensor::new(dims))
}
