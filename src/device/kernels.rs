//! Element-wise kernels of the device math library.
//!
//! Kernel names follow the math library convention, prefixed by the element
//! width (`saxpy`, `daxpy`, ...). Kernels must not call back into the context
//! that launched them.
use crate::error::{Error, Result};
use crate::numeric::Float;

use super::{DeviceBuffer, DeviceContext};

fn kernel_name<T: Float>(op: &str) -> String {
    format!("{}{}", T::KIND.blas_prefix(), op)
}

fn same_len<T>(op: &str, x: &DeviceBuffer<T>, y: &DeviceBuffer<T>) -> Result<()> {
    if x.len() != y.len() {
        return Err(Error::Shape(format!("{}: operands of {} and {} elements", op, x.len(), y.len())));
    }
    Ok(())
}

/// y := alpha*x + y
pub fn axpy<T: Float>(ctx: &DeviceContext, alpha: T, x: &DeviceBuffer<T>, y: &mut DeviceBuffer<T>) -> Result<()> {
    ctx.check(x)?;
    ctx.check(y)?;
    same_len("axpy", x, y)?;
    ctx.launch(&kernel_name::<T>("axpy"), || {
        for (y, &x) in y.as_mut_slice().iter_mut().zip(x.as_slice()) {
            *y = alpha * x + *y;
        }
    });
    Ok(())
}

/// x := alpha*x
pub fn scal<T: Float>(ctx: &DeviceContext, alpha: T, x: &mut DeviceBuffer<T>) -> Result<()> {
    ctx.check(x)?;
    ctx.launch(&kernel_name::<T>("scal"), || {
        for x in x.as_mut_slice() {
            *x = alpha * *x;
        }
    });
    Ok(())
}

/// y := x
pub fn copy<T: Float>(ctx: &DeviceContext, x: &DeviceBuffer<T>, y: &mut DeviceBuffer<T>) -> Result<()> {
    ctx.check(x)?;
    ctx.check(y)?;
    same_len("copy", x, y)?;
    ctx.launch(&kernel_name::<T>("copy"), || y.as_mut_slice().copy_from_slice(x.as_slice()));
    Ok(())
}

/// Clamp every element of `x` into `[min, max]`.
pub fn clamp<T: Float>(ctx: &DeviceContext, x: &mut DeviceBuffer<T>, min: T, max: T) -> Result<()> {
    ctx.check(x)?;
    ctx.launch(&kernel_name::<T>("clamp"), || {
        for x in x.as_mut_slice() {
            *x = (*x).max(min).min(max);
        }
    });
    Ok(())
}

/// y := quantize(x, levels)
///
/// See [quantize_value](../../solvers/fn.quantize_value.html).
pub fn quantize<T: Float>(ctx: &DeviceContext, y: &mut DeviceBuffer<T>, x: &DeviceBuffer<T>, levels: u32) -> Result<()> {
    ctx.check(x)?;
    ctx.check(y)?;
    same_len("quantize", x, y)?;
    ctx.launch(&kernel_name::<T>("quantize"), || {
        for (y, &x) in y.as_mut_slice().iter_mut().zip(x.as_slice()) {
            *y = crate::solvers::quantize_value(x, levels);
        }
    });
    Ok(())
}
