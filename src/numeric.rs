//! Provides the numeric element types a tensor can hold.
//!
//! All algorithms of the engine are written once, generically over [Float][1].
//! The runtime [NumericKind][2] tag is only consulted where the device math
//! library exposes separate entry points per floating-point width.
//!
//! [1]: ./trait.Float.html
//! [2]: ./enum.NumericKind.html
use std::fmt;

use half::f16;
use num::{FromPrimitive, ToPrimitive};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
/// Floating-point width of a tensor element.
pub enum NumericKind {
    /// IEEE 754 binary16
    Half,
    /// IEEE 754 binary32
    Single,
    /// IEEE 754 binary64
    Double,
}

impl NumericKind {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match *self {
            NumericKind::Half => 2,
            NumericKind::Single => 4,
            NumericKind::Double => 8,
        }
    }

    /// Prefix of the device math library routines for this width,
    /// e.g. `s` for `saxpy`.
    pub fn blas_prefix(&self) -> &'static str {
        match *self {
            NumericKind::Half => "h",
            NumericKind::Single => "s",
            NumericKind::Double => "d",
        }
    }
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            NumericKind::Half => "f16",
            NumericKind::Single => "f32",
            NumericKind::Double => "f64",
        };
        write!(f, "{}", name)
    }
}

/// Element type of tensors, parameters and gradients.
pub trait Float: num::Float + FromPrimitive + bytemuck::Pod + Default
               + Send + Sync + fmt::Debug + fmt::Display + 'static {
    /// The runtime tag of this element type.
    const KIND: NumericKind;

    /// Convert from `f64`, rounding to the nearest representable value.
    fn cast(value: f64) -> Self {
        <Self as FromPrimitive>::from_f64(value).unwrap_or_else(Self::nan)
    }

    /// Widen to `f64`.
    fn as_f64(self) -> f64 {
        ToPrimitive::to_f64(&self).unwrap_or(::std::f64::NAN)
    }
}

impl Float for f16 {
    const KIND: NumericKind = NumericKind::Half;
}

impl Float for f32 {
    const KIND: NumericKind = NumericKind::Single;
}

impl Float for f64 {
    const KIND: NumericKind = NumericKind::Double;
}
