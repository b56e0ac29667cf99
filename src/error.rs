//! Provides the error taxonomy of the engine.
//!
//! Every error is terminal for the current run: nothing in the engine retries.
//! The variants only differ in how the cause is reported.
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
/// Errors raised by cells, solvers and targets.
pub enum Error {
    /// A cell, target or mapping file was configured inconsistently.
    ///
    /// Raised for shape mismatches at initialization, malformed or duplicate
    /// label mappings, ambiguous wildcards and out-of-range settings.
    #[error("configuration error: {0}")]
    Config(String),
    /// A file could not be opened, created or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A parameter file ended before all expected values were read.
    #[error("{}: premature end of data while reading {what}", path.display())]
    Truncated {
        /// The file involved.
        path: PathBuf,
        /// The parameter being read.
        what: &'static str,
    },
    /// A parameter file holds more data than the cell expects.
    #[error("{}: size larger than expected", path.display())]
    Oversized {
        /// The file involved.
        path: PathBuf,
    },
    /// Tensor dimensions do not agree with the requested operation.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// A runtime invariant was violated, e.g. a target class out of range.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub(crate) fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Error {
        Error::Io { path: path.as_ref().to_path_buf(), source: source }
    }
}
