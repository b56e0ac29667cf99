//! Provides the ordered list of tensors bound to a cell.
//!
//! A cell's inputs are kept in an [Interface][1], in the order they were added. So
//! are the gradient tensors the cell writes back into its producers. The tensors
//! are shared handles, owned by the producing cells.
//!
//! [1]: ./struct.Interface.html
use std::slice;

use crate::error::{Error, Result};
use crate::numeric::Float;
use crate::tensor::SharedTensor;
use crate::util::ArcLock;

#[derive(Debug, Clone)]
/// Ordered collection of shared tensors with a common batch size.
pub struct Interface<T> {
    tensors: Vec<ArcLock<SharedTensor<T>>>,
}

impl<T: Float> Interface<T> {
    /// Create an empty interface.
    pub fn new() -> Interface<T> {
        Interface { tensors: Vec::new() }
    }

    /// Append a tensor.
    ///
    /// Fails when its batch size differs from the tensors already present.
    pub fn push(&mut self, tensor: ArcLock<SharedTensor<T>>) -> Result<()> {
        if !self.tensors.is_empty() {
            let dim_b = tensor.read().dim_b();
            if dim_b != self.dim_b() {
                return Err(Error::Config(format!("batch size {} does not match the interface batch size {}",
                                                 dim_b, self.dim_b())));
            }
        }
        self.tensors.push(tensor);
        Ok(())
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns true when no tensor was added.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// The `k`-th tensor.
    pub fn get(&self, k: usize) -> Option<&ArcLock<SharedTensor<T>>> {
        self.tensors.get(k)
    }

    /// Iterate over the tensors in insertion order.
    pub fn iter(&self) -> slice::Iter<ArcLock<SharedTensor<T>>> {
        self.tensors.iter()
    }

    /// Shared batch size, 0 for an empty interface.
    pub fn dim_b(&self) -> usize {
        self.tensors.first().map(|tensor| tensor.read().dim_b()).unwrap_or(0)
    }

    /// Total number of channels over all tensors.
    pub fn dim_z(&self) -> usize {
        self.tensors.iter().map(|tensor| tensor.read().dim_z()).sum()
    }

    /// Mark every tensor valid.
    pub fn set_valid(&self) {
        for tensor in &self.tensors {
            tensor.write().set_valid();
        }
    }

    /// Mark every tensor invalid.
    pub fn clear_valid(&self) {
        for tensor in &self.tensors {
            tensor.write().clear_valid();
        }
    }

    /// Returns true when the `k`-th tensor is marked valid.
    pub fn is_valid(&self, k: usize) -> bool {
        self.tensors.get(k).map(|tensor| tensor.read().is_valid()).unwrap_or(false)
    }
}

impl<T: Float> Default for Interface<T> {
    fn default() -> Interface<T> {
        Interface::new()
    }
}
