//! Provides the dense N-dimensional array used for data, parameters and gradients.
//!
//! Dimensions are ordered from the fastest varying to the slowest varying:
//! width, height, channel and batch. A [Tensor][1] always lives in host memory,
//! the [SharedTensor][2] adds an optional device copy on top of it.
//!
//! [1]: ./struct.Tensor.html
//! [2]: ./struct.SharedTensor.html
mod shared;

pub use self::shared::{Latest, SharedTensor};

use std::slice;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
/// A dense host tensor of `T` elements.
///
/// The number of elements always equals the product of the dimensions. A tensor
/// without dimensions is empty and holds no element.
pub struct Tensor<T> {
    dims: Vec<usize>,
    data: Vec<T>,
}

fn volume(dims: &[usize]) -> usize {
    if dims.is_empty() {
        0
    } else {
        dims.iter().product()
    }
}

impl<T: Copy + Default> Tensor<T> {
    /// Create a tensor filled with `T::default()`.
    pub fn new(dims: &[usize]) -> Tensor<T> {
        Tensor::filled(dims, T::default())
    }

    /// Create a tensor with every element set to `value`.
    pub fn filled(dims: &[usize], value: T) -> Tensor<T> {
        Tensor {
            dims: dims.to_vec(),
            data: vec![value; volume(dims)],
        }
    }

    /// Create a tensor from existing data.
    ///
    /// Fails when the length of `data` does not match the dimensions.
    pub fn from_vec(dims: &[usize], data: Vec<T>) -> Result<Tensor<T>> {
        if data.len() != volume(dims) {
            return Err(Error::Shape(format!("{} elements cannot fill dimensions {:?}", data.len(), dims)));
        }
        Ok(Tensor { dims: dims.to_vec(), data: data })
    }

    /// The dimensions, fastest first.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the tensor holds no element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Width, or 0 for an empty tensor.
    pub fn dim_x(&self) -> usize {
        self.dims.get(0).cloned().unwrap_or(0)
    }

    /// Height, 1 when the tensor has less than two dimensions.
    pub fn dim_y(&self) -> usize {
        self.dims.get(1).cloned().unwrap_or(1)
    }

    /// Number of channels, 1 when the tensor has less than three dimensions.
    pub fn dim_z(&self) -> usize {
        self.dims.get(2).cloned().unwrap_or(1)
    }

    /// Batch size, 1 when the tensor has less than four dimensions.
    pub fn dim_b(&self) -> usize {
        self.dims.get(3).cloned().unwrap_or(1)
    }

    /// Resize to `dims`, filling every element with `value`.
    ///
    /// The old buffer is dropped; no previous element survives a resize.
    pub fn resize(&mut self, dims: &[usize], value: T) {
        self.data = vec![value; volume(dims)];
        self.dims = dims.to_vec();
    }

    /// Change the dimensions while keeping the elements in place.
    pub fn reshape(&mut self, dims: &[usize]) -> Result<()> {
        if volume(dims) != self.data.len() {
            return Err(Error::Shape(format!("cannot reshape {:?} into {:?}", self.dims, dims)));
        }
        self.dims = dims.to_vec();
        Ok(())
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        for datum in self.data.iter_mut() {
            *datum = value;
        }
    }

    /// All elements, fastest dimension first.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// All elements, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Iterate over all elements.
    pub fn iter(&self) -> slice::Iter<T> {
        self.data.iter()
    }

    /// Linear index of the element at `(x, y, z, b)`.
    pub fn index_of(&self, x: usize, y: usize, z: usize, b: usize) -> usize {
        x + self.dim_x() * (y + self.dim_y() * (z + self.dim_z() * b))
    }

    /// Element at `(x, y, z, b)`.
    pub fn at(&self, x: usize, y: usize, z: usize, b: usize) -> T {
        self.data[self.index_of(x, y, z, b)]
    }

    /// Overwrite the element at `(x, y, z, b)`.
    pub fn set(&mut self, x: usize, y: usize, z: usize, b: usize, value: T) {
        let index = self.index_of(x, y, z, b);
        self.data[index] = value;
    }

    /// Number of elements of one batch position.
    pub fn batch_stride(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.size() / self.dim_b()
        }
    }

    /// Elements of batch position `b`.
    pub fn batch(&self, b: usize) -> &[T] {
        let stride = self.batch_stride();
        &self.data[b * stride..(b + 1) * stride]
    }

    /// Elements of batch position `b`, mutably.
    pub fn batch_mut(&mut self, b: usize) -> &mut [T] {
        let stride = self.batch_stride();
        &mut self.data[b * stride..(b + 1) * stride]
    }

    /// Consume the tensor and return its elements.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T: Copy + Default> Default for Tensor<T> {
    fn default() -> Tensor<T> {
        Tensor { dims: Vec::new(), data: Vec::new() }
    }
}
