//! Provides the cell implementations.
//!
//! Every cell implements [ICell][1] and runs on either backend, selected when
//! the cell is built.
//!
//! [1]: ../cell/trait.ICell.html
pub use self::batch_norm::{BatchNormCell, BatchNormConfig};

pub mod batch_norm;
