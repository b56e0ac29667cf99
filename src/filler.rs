//! Provides the initial values of learnable parameters.
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::numeric::Float;
use crate::tensor::Tensor;

#[derive(Debug, Copy, Clone, PartialEq)]
/// Enum for specifing the type of Filler.
pub enum FillerType {
    /// Fills the parameter with a constant `value` (all values are the same).
    Constant {
        /// The value that will be used to fill the parameter.
        value: f64,
    },
    /// Fills the parameter with values drawn uniformly from `[min, max)`.
    Uniform {
        /// Lower bound.
        min: f64,
        /// Upper bound, exclusive.
        max: f64,
    },
    /// Fills the parameter with values according to [Glorot and Bengio (2010)][1].
    /// [1]: http://machinelearning.wustl.edu/mlpapers/paper_files/AISTATS2010_GlorotB10.pdf
    ///
    /// Also known as Xavier filler.
    Glorot {
        /// Number of input nodes for each output.
        input_size: usize,
        /// Number of output nodes for each input.
        output_size: usize,
    },
}

impl FillerType {
    /// Fill `tensor` with values drawn from the thread random generator.
    pub fn fill<T: Float>(&self, tensor: &mut Tensor<T>) {
        self.fill_with(tensor, &mut rand::thread_rng())
    }

    /// Fill `tensor` with values drawn from `rng`.
    pub fn fill_with<T: Float, R: Rng>(&self, tensor: &mut Tensor<T>, rng: &mut R) {
        let (min, max) = match *self {
            FillerType::Constant { value } => {
                tensor.fill(T::cast(value));
                return;
            }
            FillerType::Uniform { min, max } => (min, max),
            FillerType::Glorot { input_size, output_size } => {
                let range = (6.0 / (input_size + output_size).max(1) as f64).sqrt();
                (-range, range)
            }
        };
        if !(min < max) {
            tensor.fill(T::cast(min));
            return;
        }
        let between = Uniform::new(min, max);
        for value in tensor.as_mut_slice() {
            *value = T::cast(between.sample(rng));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn uniform_stays_within_bounds() {
        let mut tensor = Tensor::<f32>::new(&[64]);
        FillerType::Uniform { min: -0.5, max: 0.25 }.fill_with(&mut tensor, &mut StdRng::seed_from_u64(7));
        assert!(tensor.iter().all(|&x| x >= -0.5 && x < 0.25));
    }

    #[test]
    fn glorot_range_follows_fan_in_and_out() {
        let mut tensor = Tensor::<f64>::new(&[128]);
        FillerType::Glorot { input_size: 2, output_size: 4 }.fill_with(&mut tensor, &mut StdRng::seed_from_u64(7));
        assert!(tensor.iter().all(|&x| x.abs() <= 1.0));
    }
}
