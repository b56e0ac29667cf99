//! Provides the evaluation pipeline that turns cell outputs into labeled predictions.
//!
//! A [Target][target] is attached to one cell, usually the last one of a
//! network. For every batch, [process][process]:
//!
//! 1. maps the ground truth labels of the batch onto target classes, through the
//! [LabelsMapping][mapping]. When the labels are larger than the outputs of the
//! cell, every output position takes the most frequent class of the label
//! region it covers,
//! 2. on the learn set, writes the gradient of the cell outputs towards the targets,
//! 3. estimates the top-N classes of every output position.
//!
//! A [TargetScore][score] then accumulates confusion matrices and success rates
//! from the estimated classes.
//!
//! The steps of a batch are tracked by an explicit [TargetState][state].
//!
//! [target]: ./struct.Target.html
//! [process]: ./struct.Target.html#method.process
//! [mapping]: ./mapping/struct.LabelsMapping.html
//! [score]: ./score/struct.TargetScore.html
//! [state]: ./enum.TargetState.html
pub use self::confusion_matrix::{Accuracy, ConfusionMatrix, ConfusionTable, ConfusionTableMetric};
pub use self::mapping::LabelsMapping;
pub use self::score::{Score, TargetScore};

pub mod confusion_matrix;
pub mod mapping;
pub mod score;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::cell::ICell;
use crate::database::{Database, StimuliProvider, StimuliSet};
use crate::error::{Error, Result};
use crate::numeric::Float;
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
/// Specifies configuration parameters for a Target.
pub struct TargetConfig {
    /// Expected output value of the target class.
    ///
    /// Default: 1
    pub target_value: f64,
    /// Expected output value of the other classes.
    ///
    /// Default: 0
    pub default_value: f64,
    /// Number of estimated classes kept per output position.
    ///
    /// Default: 1
    pub top_n: usize,
    /// Decision threshold of a single output cell.
    ///
    /// Default: 0.5
    pub binary_threshold: f64,
    /// Class that loses against any other class present in the same label
    /// region, when aggregating labels larger than the outputs.
    ///
    /// Default: None
    pub weak_target: Option<i32>,
    /// Labels mapping file, read when the target is created.
    ///
    /// Default: None
    pub labels_mapping: Option<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> TargetConfig {
        TargetConfig {
            target_value: 1.0,
            default_value: 0.0,
            top_n: 1,
            binary_threshold: 0.5,
            weak_target: None,
            labels_mapping: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Processing step reached for the current batch.
pub enum TargetState {
    /// No batch processed yet.
    Idle,
    /// Targets computed from the batch labels.
    TargetsPopulated,
    /// Outputs of the cell read back.
    OutputsRetrieved,
    /// Top-N classes estimated, the batch can be scored.
    LabelsEstimated,
    /// The batch was scored.
    ScoreComputed,
}

#[derive(Debug)]
/// Maps the labels of a batch onto the classes of a cell, and estimates the
/// classes the cell predicts.
pub struct Target {
    name: String,
    cell_name: String,
    nb_outputs: usize,
    config: TargetConfig,
    mapping: LabelsMapping,

    targets: Tensor<i32>,
    estimated_labels: Tensor<i32>,
    estimated_labels_value: Tensor<f64>,
    batch: Vec<i32>,
    loss: Vec<f64>,
    state: TargetState,
}

impl Target {
    /// Create a Target evaluating `cell`.
    ///
    /// The labels mapping file of the config, if any, is read through `database`.
    pub fn new<T: Float>(name: &str, cell: &dyn ICell<T>, config: TargetConfig, database: &dyn Database) -> Result<Target> {
        if config.top_n == 0 {
            return Err(Error::Config(format!("{}: top-N must be at least 1", name)));
        }
        let mapping = match config.labels_mapping {
            Some(ref path) => LabelsMapping::from_file(path, database)?,
            None => LabelsMapping::new(),
        };
        info!("{}: target of cell {} with {} outputs, top-{}", name, cell.name(), cell.nb_outputs(), config.top_n);
        Ok(Target {
            name: name.to_owned(),
            cell_name: cell.name().to_owned(),
            nb_outputs: cell.nb_outputs(),
            config: config,
            mapping: mapping,

            targets: Tensor::default(),
            estimated_labels: Tensor::default(),
            estimated_labels_value: Tensor::default(),
            batch: Vec::new(),
            loss: Vec::new(),
            state: TargetState::Idle,
        })
    }

    /// Name of the target.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the evaluated cell.
    pub fn cell_name(&self) -> &str {
        &self.cell_name
    }

    /// The configuration of the target.
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Processing step reached for the current batch.
    pub fn state(&self) -> TargetState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TargetState) {
        self.state = state;
    }

    /// Number of target classes: the outputs of the cell, or 2 for a single output.
    pub fn get_nb_targets(&self) -> usize {
        if self.nb_outputs > 1 { self.nb_outputs } else { 2 }
    }

    /// Replace the labels mapping with the content of `path`.
    pub fn labels_mapping(&mut self, path: &Path, database: &dyn Database) -> Result<()> {
        self.mapping = LabelsMapping::from_file(path, database)?;
        Ok(())
    }

    /// The labels mapping.
    pub fn mapping(&self) -> &LabelsMapping {
        &self.mapping
    }

    /// Map `label` onto `output`.
    pub fn set_label_target(&mut self, label: i32, output: i32) {
        self.mapping.set_label_target(label, output);
    }

    /// Set the fallback target.
    pub fn set_default_target(&mut self, output: i32) {
        self.mapping.set_default_target(output);
    }

    /// Target class of `label`, see [LabelsMapping::get_label_target][1].
    /// [1]: ./mapping/struct.LabelsMapping.html#method.get_label_target
    pub fn get_label_target(&self, label: i32, database: &dyn Database) -> Result<i32> {
        self.mapping.get_label_target(label, database)
    }

    /// The fallback target.
    pub fn get_default_target(&self) -> Result<i32> {
        self.mapping.get_default_target()
    }

    /// Labels mapped onto `output`.
    pub fn get_target_labels(&self, output: i32) -> Vec<i32> {
        self.mapping.get_target_labels(output)
    }

    /// Display name of every target class.
    ///
    /// `default` for the default target, else the name of the first label mapped
    /// onto the class (`*` for the ignore rule), followed by `...` when several
    /// labels share the class.
    pub fn get_target_labels_name(&self, database: &dyn Database) -> Vec<String> {
        (0..self.get_nb_targets() as i32).map(|target| {
            if Some(target) == self.mapping.default_target() {
                return "default".to_owned();
            }
            let labels = self.get_target_labels(target);
            let mut name = match labels.first() {
                None => return String::new(),
                Some(&label) if label < 0 => "*".to_owned(),
                Some(&label) => database.get_label_name(label).unwrap_or_default(),
            };
            if labels.len() > 1 {
                name.push_str("...");
            }
            name
        }).collect()
    }

    /// Targets of the last batch, `[width, height, 1, batch]`.
    pub fn targets(&self) -> &Tensor<i32> {
        &self.targets
    }

    /// Estimated classes of the last batch, `[width, height, top_n, batch]`,
    /// best first.
    pub fn estimated_labels(&self) -> &Tensor<i32> {
        &self.estimated_labels
    }

    /// Output values of the estimated classes, laid out like
    /// [estimated_labels](#method.estimated_labels).
    pub fn estimated_labels_value(&self) -> &Tensor<f64> {
        &self.estimated_labels_value
    }

    /// Stimulus ids of the last batch.
    pub fn batch(&self) -> &[i32] {
        &self.batch
    }

    /// Loss of every learn batch since the last [clear](#method.clear).
    pub fn loss(&self) -> &[f64] {
        &self.loss
    }

    /// Process the current batch of `provider` through `cell`.
    ///
    /// On the learn set, the gradient of the cell outputs is written towards the
    /// targets, ready for a backward pass.
    pub fn process<T: Float>(&mut self, cell: &mut dyn ICell<T>, provider: &dyn StimuliProvider, set: StimuliSet) -> Result<()> {
        if cell.name() != self.cell_name {
            return Err(Error::Config(format!("{}: evaluates cell {}, not {}", self.name, self.cell_name, cell.name())));
        }
        self.state = TargetState::Idle;
        let labels = provider.labels_data();
        let batch_size = labels.dim_b();
        if provider.batch().len() != batch_size {
            return Err(Error::Shape(format!("{}: {} stimulus ids for labels {:?}",
                                            self.name, provider.batch().len(), labels.dims())));
        }

        let target_dims = [cell.outputs_width(), cell.outputs_height(), 1, batch_size];
        if self.targets.dims() != target_dims {
            let estimated_dims = [target_dims[0], target_dims[1], self.config.top_n, batch_size];
            self.targets = Tensor::new(&target_dims);
            self.estimated_labels = Tensor::new(&estimated_dims);
            self.estimated_labels_value = Tensor::new(&estimated_dims);
        }
        self.batch = provider.batch().to_vec();
        self.populate_targets(labels, provider.database())?;
        self.state = TargetState::TargetsPopulated;

        if set == StimuliSet::Learn {
            if self.targets.dim_x() == 1 && self.targets.dim_y() == 1 {
                for (b, &target) in self.targets.iter().enumerate() {
                    if target < 0 {
                        warn!("{}: ignore label with 1D output for stimuli ID {}", self.name, self.batch[b]);
                    }
                }
            }
            let loss = cell.set_output_targets(&self.targets, self.config.target_value, self.config.default_value)?;
            self.loss.push(loss);
        }

        let values = cell.outputs().read().read(cell.backend())?;
        self.state = TargetState::OutputsRetrieved;
        self.estimate_labels(&values)?;
        self.state = TargetState::LabelsEstimated;
        Ok(())
    }

    fn populate_targets(&mut self, labels: &Tensor<i32>, database: &dyn Database) -> Result<()> {
        let (width, height) = (self.targets.dim_x(), self.targets.dim_y());
        let stride = self.targets.batch_stride();
        if stride == 0 {
            return Ok(());
        }
        let mapping = &self.mapping;
        let weak_target = self.config.weak_target;

        if labels.dim_x() == width && labels.dim_y() == height {
            return self.targets.as_mut_slice()
                .par_chunks_mut(stride)
                .enumerate()
                .try_for_each(|(b, targets)| {
                    for (i, target) in targets.iter_mut().enumerate() {
                        *target = mapping.get_label_target(labels.at(i % width, i / width, 0, b), database)?;
                    }
                    Ok(())
                });
        }

        let x_ratio = labels.dim_x() as f64 / width as f64;
        let y_ratio = labels.dim_y() as f64 / height as f64;
        self.targets.as_mut_slice()
            .par_chunks_mut(stride)
            .enumerate()
            .try_for_each(|(b, targets)| {
                for y in 0..height {
                    let (yl0, yl1) = label_range(y, y_ratio);
                    for x in 0..width {
                        let (xl0, xl1) = label_range(x, x_ratio);
                        let mut histogram = BTreeMap::new();
                        for yl in yl0..yl1 {
                            for xl in xl0..xl1 {
                                let target = mapping.get_label_target(labels.at(xl, yl, 0, b), database)?;
                                *histogram.entry(target).or_insert(0usize) += 1;
                            }
                        }
                        targets[y * width + x] = majority_target(&histogram, weak_target);
                    }
                }
                Ok(())
            })
    }

    fn estimate_labels<T: Float>(&mut self, values: &Tensor<T>) -> Result<()> {
        let nb_outputs = values.dim_z();
        let nb_targets = self.get_nb_targets() as i32;
        let top_n = self.config.top_n;
        if top_n > nb_outputs {
            return Err(Error::Config(format!("{}: top-N ({}) must be <= to the network output size ({})",
                                             self.name, top_n, nb_outputs)));
        }
        if values.dim_b() != self.targets.dim_b() || values.dim_x() != self.targets.dim_x()
            || values.dim_y() != self.targets.dim_y() {
            return Err(Error::Shape(format!("{}: outputs {:?} do not match targets {:?}",
                                            self.name, values.dims(), self.targets.dims())));
        }

        let batch_size = self.batch.iter().position(|&id| id < 0).unwrap_or_else(|| self.batch.len());
        let spatial = values.dim_x() * values.dim_y();
        let stride = self.estimated_labels.batch_stride();
        if spatial == 0 || batch_size == 0 {
            return Ok(());
        }
        let threshold = self.config.binary_threshold;
        let (targets, batch, name) = (&self.targets, &self.batch, &self.name);

        self.estimated_labels.as_mut_slice()
            .par_chunks_mut(stride)
            .zip(self.estimated_labels_value.as_mut_slice().par_chunks_mut(stride))
            .enumerate()
            .take(batch_size)
            .try_for_each(|(b, (labels, labels_value))| {
                let outputs = values.batch(b);
                let targets = targets.batch(b);
                for i in 0..spatial {
                    if targets[i] >= nb_targets {
                        warn!("{}: stimulus #{} has target {} @ ({},{}) but number of output target is {}",
                              name, batch[b], targets[i], i % values.dim_x(), i / values.dim_x(), nb_targets);
                        return Err(Error::Invariant(format!("{}: target out of range", name)));
                    }
                    let value = |c: usize| outputs[c * spatial + i].as_f64();

                    if nb_outputs > 1 && top_n > 1 {
                        let mut order: Vec<usize> = (0..nb_outputs).collect();
                        order.sort_by(|&a, &b| value(b).partial_cmp(&value(a)).unwrap_or(::std::cmp::Ordering::Equal));
                        for (n, &c) in order.iter().take(top_n).enumerate() {
                            labels[n * spatial + i] = c as i32;
                            labels_value[n * spatial + i] = value(c);
                        }
                    } else if nb_outputs > 1 {
                        let mut best = 0;
                        for c in 1..nb_outputs {
                            if value(c) > value(best) {
                                best = c;
                            }
                        }
                        labels[i] = best as i32;
                        labels_value[i] = value(best);
                    } else {
                        let p = value(0);
                        let positive = p > threshold;
                        labels[i] = positive as i32;
                        labels_value[i] = if positive { p } else { 1.0 - p };
                    }
                }
                Ok(())
            })
    }

    /// Write the mapping of every database label into `path`, one
    /// `label name output` line per label.
    pub fn log_labels_mapping(&self, path: &Path, database: &dyn Database) -> Result<()> {
        let file = File::create(path).map_err(|err| Error::io(path, err))?;
        let mut out = BufWriter::new(file);
        let mut lines = vec!["label name output".to_owned()];
        for label in 0..database.get_nb_labels() as i32 {
            lines.push(format!("{} {} {}", label, database.get_label_name(label)?,
                               self.get_label_target(label, database)?));
        }
        for line in lines {
            writeln!(out, "{}", line).map_err(|err| Error::io(path, err))?;
        }
        out.flush().map_err(|err| Error::io(path, err))
    }

    /// Forget the loss history.
    pub fn clear(&mut self, _set: StimuliSet) {
        self.loss.clear();
    }
}

/// Label range `[l0, l1)` covered by output position `x`.
fn label_range(x: usize, ratio: f64) -> (usize, usize) {
    let l0 = (x as f64 * ratio).floor() as usize;
    let l1 = ((x + 1) as f64 * ratio).floor() as usize;
    (l0, l1.max(l0 + 1))
}

/// Most frequent target of a label region, the lowest target winning ties.
///
/// When the winner is the weak target and another target is present in the
/// region, the most frequent other target wins instead.
fn majority_target(histogram: &BTreeMap<i32, usize>, weak_target: Option<i32>) -> i32 {
    let mut ranked: Vec<(i32, usize)> = histogram.iter().map(|(&target, &count)| (target, count)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    match (ranked.get(0), ranked.get(1)) {
        (Some(&(first, _)), Some(&(second, count))) if Some(first) == weak_target && count > 0 => second,
        (Some(&(first, _)), _) => first,
        (None, _) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(entries: &[(i32, usize)]) -> BTreeMap<i32, usize> {
        entries.iter().cloned().collect()
    }

    #[test]
    fn majority_ties_go_to_the_lowest_target() {
        assert_eq!(majority_target(&histogram(&[(2, 3), (1, 3), (0, 1)]), None), 1);
        assert_eq!(majority_target(&histogram(&[(-1, 2), (0, 2)]), None), -1);
    }

    #[test]
    fn weak_target_yields_to_the_runner_up() {
        let region = histogram(&[(0, 6), (3, 2), (1, 1)]);
        assert_eq!(majority_target(&region, Some(0)), 3);
        assert_eq!(majority_target(&region, Some(3)), 0);
        assert_eq!(majority_target(&histogram(&[(0, 6)]), Some(0)), 0);
    }

    #[test]
    fn label_ranges_cover_every_label() {
        assert_eq!(label_range(0, 2.0), (0, 2));
        assert_eq!(label_range(1, 2.0), (2, 4));
        assert_eq!(label_range(2, 0.5), (1, 2));
    }
}
