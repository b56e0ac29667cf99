//! Stem is a cell execution engine for deep neural networks, that runs the same
//! numerical contracts on plain host memory and on accelerator memory.
//!
//! The engine is built around a small set of components, which are stacked from
//! bottom to top:
//!
//! * a [Tensor][tensor] is a dense N-dimensional array, ordered from the fastest
//! dimension (width) to the slowest (batch). A [SharedTensor][shared] pairs
//! the host tensor with an optional device buffer and tracks which side holds
//! the latest data.
//! * an [Interface][interface] is the ordered list of tensors a cell receives as
//! inputs, or writes its input gradients into.
//! * a [Cell][cell] is one layer of a network. It owns its outputs and the
//! gradient with respect to them, references the outputs of upstream cells and
//! applies an optional [Activation][activation]. Every cell exists for the
//! native (host, [rayon] parallel) backend and for the device backend, and both
//! variants are required to produce the same numbers.
//! * a [Solver][solver] updates a learnable parameter from its gradient, with
//! learning rate policies, momentum, weight decay, clamping and quantization.
//! * a [Target][target] turns the outputs of a cell into labeled predictions,
//! and its [TargetScore][score] keeps confusion matrices and success rates
//! per stimuli set.
//!
//! Cells are wired together in a [Network][network], an arena that hands out
//! [CellId][cell_id] handles and drives forward, backward and update passes,
//! including gradient accumulation over several micro-batches.
//!
//! ## Backends
//!
//! The backend of a cell or solver is chosen once, when it is built, through the
//! closed [Backend][backend] enum. The device backend takes an explicit
//! [DeviceContext][device], which owns the accelerator memory and executes the
//! kernels in the order they were launched on its stream. Data only moves
//! between host and device through explicit synchronization calls. The device
//! memory of a context is kept in host RAM, no GPU runtime is bound.
//!
//! ## Examples
//!
//! ```
//! # extern crate stem;
//! # use stem::backend::Backend;
//! # use stem::cells::{BatchNormCell, BatchNormConfig};
//! # fn main() {
//! let cell = BatchNormCell::<f32>::new("bn1", 16, BatchNormConfig::default(), Backend::Native);
//! # let _ = cell;
//! # }
//! ```
//!
//! [tensor]: ./tensor/struct.Tensor.html
//! [shared]: ./tensor/struct.SharedTensor.html
//! [interface]: ./interface/struct.Interface.html
//! [cell]: ./cell/trait.ICell.html
//! [activation]: ./activation/struct.Activation.html
//! [solver]: ./solver/trait.ISolver.html
//! [target]: ./target/struct.Target.html
//! [score]: ./target/struct.TargetScore.html
//! [network]: ./network/struct.Network.html
//! [cell_id]: ./network/struct.CellId.html
//! [backend]: ./backend/enum.Backend.html
//! [device]: ./device/struct.DeviceContext.html
//! [rayon]: https://docs.rs/rayon
#![warn(missing_docs,
        missing_debug_implementations,
        trivial_casts, trivial_numeric_casts,
        unsafe_code,
        unused_import_braces, unused_qualifications)]

#[macro_use]
extern crate log;

pub mod error;
pub mod util;
pub mod numeric;
pub mod tensor;
pub mod device;
pub mod backend;
pub mod interface;
pub mod activation;
pub mod filler;
pub mod cell;
pub mod cells;
pub mod solver;
pub mod solvers;
pub mod database;
pub mod target;
pub mod network;

pub use error::{Error, Result};
pub use numeric::{Float, NumericKind};
