//! Provides the different strategies for updating learnable parameters.
//!
//! All solvers implement the [ISolver][1] trait. For now the only strategy is
//! [Stochastic Gradient Descent][2], with its momentum, weight decay, clamping
//! and quantization extensions.
//!
//! [1]: ../solver/trait.ISolver.html
//! [2]: ./sgd/index.html
pub use self::sgd::SgdSolver;

pub mod sgd;

use crate::numeric::Float;

/// Project `x` onto `levels` uniformly spaced values.
///
/// With more than one level, `round((levels - 1) * x) / (levels - 1)`, which maps
/// `[-1, 1]` onto `2 * (levels - 1) + 1` values. With a single level, the sign
/// of `x`. With 0 levels, `x` unchanged.
pub fn quantize_value<T: Float>(x: T, levels: u32) -> T {
    if levels > 1 {
        let steps = T::cast(f64::from(levels - 1));
        (x * steps).round() / steps
    } else if levels == 1 {
        if x > T::zero() {
            T::one()
        } else if x < T::zero() {
            -T::one()
        } else {
            T::zero()
        }
    } else {
        x
    }
}
