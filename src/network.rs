//! Provides the arena wiring cells into a feed-forward network.
//!
//! Cells are added in execution order and addressed through [CellId][1]
//! handles. A connection always goes from an earlier cell to a later one, so the
//! insertion order is a valid forward order and its reverse a valid backward
//! order.
//!
//! The network counts the backward passes of the current iteration: the first
//! one overwrites the parameter gradients, the following ones accumulate into
//! them, and [update][2] applies the solvers once `iteration_size` passes were
//! made.
//!
//! [1]: ./struct.CellId.html
//! [2]: ./struct.Network.html#method.update
use std::fs;
use std::path::Path;

use crate::cell::{GradientMode, ICell};
use crate::error::{Error, Result};
use crate::numeric::Float;
use crate::tensor::SharedTensor;
use crate::util::{arc_lock, ArcLock};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Handle of a cell inside a [Network][1].
/// [1]: ./struct.Network.html
pub struct CellId(usize);

impl CellId {
    /// Position of the cell in execution order.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
/// Specifies configuration parameters for a Network.
pub struct NetworkConfig {
    /// Name of the network, used in logs.
    ///
    /// Default: "network"
    pub name: String,
    /// Number of backward passes accumulated before an update.
    ///
    /// Must match the `iteration_size` of the solvers of the cells.
    ///
    /// Default: 1
    pub iteration_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            name: "network".to_owned(),
            iteration_size: 1,
        }
    }
}

#[derive(Debug)]
/// An ordered arena of cells.
pub struct Network<T: Float> {
    config: NetworkConfig,
    cells: Vec<Box<dyn ICell<T>>>,
    connections: Vec<(CellId, CellId)>,
    input_gradients: Vec<ArcLock<SharedTensor<T>>>,
    passes: usize,
    initialized: bool,
}

impl<T: Float> Network<T> {
    /// Create an empty network.
    pub fn new(config: NetworkConfig) -> Result<Network<T>> {
        if config.iteration_size == 0 {
            return Err(Error::Config(format!("{}: iteration size must be at least 1", config.name)));
        }
        Ok(Network {
            config: config,
            cells: Vec::new(),
            connections: Vec::new(),
            input_gradients: Vec::new(),
            passes: 0,
            initialized: false,
        })
    }

    /// The configuration of the network.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true when the network has no cell.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Connections, as `(producer, consumer)` pairs in the order they were made.
    pub fn connections(&self) -> &[(CellId, CellId)] {
        &self.connections
    }

    /// Number of backward passes made since the last update.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Append `cell` and return its handle. Cell names must be unique.
    pub fn add_cell(&mut self, cell: Box<dyn ICell<T>>) -> Result<CellId> {
        if self.initialized {
            return Err(Error::Invariant(format!("{}: cannot add cell {} after initialization",
                                                self.config.name, cell.name())));
        }
        if self.find(cell.name()).is_some() {
            return Err(Error::Config(format!("{}: a cell named {} already exists", self.config.name, cell.name())));
        }
        debug!("{}: adding {:?}", self.config.name, cell);
        self.cells.push(cell);
        Ok(CellId(self.cells.len() - 1))
    }

    /// Handle of the cell named `name`.
    pub fn find(&self, name: &str) -> Option<CellId> {
        self.cells.iter().position(|cell| cell.name() == name).map(CellId)
    }

    /// The cell `id`.
    pub fn cell(&self, id: CellId) -> Result<&dyn ICell<T>> {
        self.cells.get(id.0)
            .map(|cell| &**cell)
            .ok_or_else(|| Error::Invariant(format!("{}: no cell #{}", self.config.name, id.0)))
    }

    /// Mutable access to the cell `id`.
    pub fn cell_mut(&mut self, id: CellId) -> Result<&mut dyn ICell<T>> {
        let name = &self.config.name;
        match self.cells.get_mut(id.0) {
            Some(cell) => Ok(&mut **cell),
            None => Err(Error::Invariant(format!("{}: no cell #{}", name, id.0))),
        }
    }

    /// Feed the outputs of `from` into `to`.
    pub fn connect(&mut self, from: CellId, to: CellId) -> Result<()> {
        if from >= to {
            return Err(Error::Config(format!("{}: cell #{} cannot feed cell #{}, connections must follow the \
                                              execution order", self.config.name, from.0, to.0)));
        }
        let (outputs, diff_inputs) = {
            let producer = self.cell(from)?;
            (producer.outputs(), producer.diff_inputs())
        };
        self.cell_mut(to)?.add_input(outputs, diff_inputs)?;
        info!("{}: {} -> {}", self.config.name, self.cells[from.0].name(), self.cells[to.0].name());
        self.connections.push((from, to));
        Ok(())
    }

    /// Feed external `data` into `to`.
    ///
    /// Returns the tensor receiving the gradient with respect to `data`. It
    /// holds the gradient of the last backward pass only.
    pub fn bind_input(&mut self, to: CellId, data: ArcLock<SharedTensor<T>>) -> Result<ArcLock<SharedTensor<T>>> {
        let dims = data.read().dims().to_vec();
        let diff = arc_lock(SharedTensor::new(&dims));
        self.cell_mut(to)?.add_input(data, diff.clone())?;
        self.input_gradients.push(diff.clone());
        Ok(diff)
    }

    /// Initialize every cell, in execution order.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::Invariant(format!("{}: already initialized", self.config.name)));
        }
        for cell in &mut self.cells {
            cell.initialize()?;
        }
        self.initialized = true;
        info!("{}: initialized {} cells", self.config.name, self.cells.len());
        Ok(())
    }

    fn check_initialized(&self, operation: &str) -> Result<()> {
        if !self.initialized {
            return Err(Error::Invariant(format!("{}: {} before initialization", self.config.name, operation)));
        }
        Ok(())
    }

    /// Forward pass through every cell.
    ///
    /// The gradients of the bound inputs are marked invalid, the next backward
    /// pass overwrites them.
    pub fn propagate(&mut self, inference: bool) -> Result<()> {
        self.check_initialized("propagate")?;
        for diff in &self.input_gradients {
            diff.write().clear_valid();
        }
        for cell in &mut self.cells {
            trace!("{}: propagate {}", self.config.name, cell.name());
            cell.propagate(inference)?;
        }
        Ok(())
    }

    /// Backward pass through every cell, in reverse order.
    ///
    /// The gradient with respect to the outputs of the last cell must have been
    /// written beforehand, e.g. by a [Target][1].
    /// [1]: ../target/struct.Target.html
    pub fn back_propagate(&mut self) -> Result<()> {
        self.check_initialized("back_propagate")?;
        let mode = if self.passes == 0 { GradientMode::Overwrite } else { GradientMode::Accumulate };
        for cell in self.cells.iter_mut().rev() {
            trace!("{}: back_propagate {} ({:?})", self.config.name, cell.name(), mode);
            cell.back_propagate(mode)?;
        }
        self.passes += 1;
        Ok(())
    }

    /// Apply the solvers of every cell once `iteration_size` backward passes
    /// were made. Returns true when the parameters were updated.
    pub fn update(&mut self) -> Result<bool> {
        self.check_initialized("update")?;
        if self.passes < self.config.iteration_size {
            return Ok(false);
        }
        for cell in &mut self.cells {
            cell.update()?;
        }
        self.passes = 0;
        Ok(true)
    }

    /// Save the parameters of every cell into `dir`, which is created if needed.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
        for cell in &self.cells {
            cell.save(dir)?;
        }
        info!("{}: parameters saved to {}", self.config.name, dir.display());
        Ok(())
    }

    /// Load the parameters of every cell from `dir`.
    pub fn load(&mut self, dir: &Path, ignore_missing: bool) -> Result<()> {
        for cell in &mut self.cells {
            cell.load(dir, ignore_missing)?;
        }
        info!("{}: parameters loaded from {}", self.config.name, dir.display());
        Ok(())
    }
}
