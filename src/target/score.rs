//! Provides the scoring of the classes estimated by a [Target][1].
//!
//! Every processed batch appends its average success to the history of its
//! stimuli set, and adds its samples to the confusion matrix of the set.
//! Padding positions of the last batch of a set do not count: the appended
//! average is corrected so that the history keeps the exact mean over every
//! valid sample.
//!
//! [1]: ../struct.Target.html
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use rayon::prelude::*;

use super::{ConfusionMatrix, ConfusionTableMetric, Target, TargetState};
use crate::cell::ICell;
use crate::database::{Database, StimuliProvider, StimuliSet};
use crate::error::{Error, Result};
use crate::numeric::Float;

#[derive(Debug, Clone, Default)]
/// Scores accumulated for one stimuli set.
pub struct Score {
    /// Average success of every processed batch.
    pub success: VecDeque<f64>,
    /// Samples of every processed batch, by target and estimated class.
    pub confusion_matrix: ConfusionMatrix,
    /// `(stimulus id, estimated class)` of every misclassified stimulus.
    pub misclassified: Vec<(i32, i32)>,
}

/// Result of one batch position.
struct Sample {
    success: f64,
    top_n_success: f64,
    misclassified: Option<(i32, i32)>,
}

impl Sample {
    fn padding() -> Sample {
        Sample { success: -1.0, top_n_success: -1.0, misclassified: None }
    }
}

#[derive(Debug)]
/// A [Target][1] that also keeps success rates and confusion matrices per
/// stimuli set.
/// [1]: ../struct.Target.html
pub struct TargetScore {
    target: Target,

    scores: [Score; 3],
    top_n_success: [VecDeque<f64>; 3],
    batch_success: Vec<f64>,
    batch_top_n_success: Vec<f64>,

    validation_scores: Vec<(usize, f64)>,
    validation_top_n_scores: Vec<(usize, f64)>,
    max_validation_score: f64,
    max_validation_top_n_score: f64,
}

fn slot(set: StimuliSet) -> usize {
    set as usize
}

impl TargetScore {
    /// Score the classes estimated by `target`.
    pub fn new(target: Target) -> TargetScore {
        TargetScore {
            target: target,

            scores: Default::default(),
            top_n_success: Default::default(),
            batch_success: Vec::new(),
            batch_top_n_success: Vec::new(),

            validation_scores: Vec::new(),
            validation_top_n_scores: Vec::new(),
            max_validation_score: 0.0,
            max_validation_top_n_score: 0.0,
        }
    }

    /// The scored target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Mutable access to the scored target.
    pub fn target_mut(&mut self) -> &mut Target {
        &mut self.target
    }

    fn top_n(&self) -> usize {
        self.target.config().top_n
    }

    /// Process the current batch through the target, then score it.
    pub fn process<T: Float>(&mut self, cell: &mut dyn ICell<T>, provider: &dyn StimuliProvider, set: StimuliSet) -> Result<()> {
        self.target.process(cell, provider, set)?;
        self.compute_score(set)
    }

    /// Score the classes estimated for the current batch.
    ///
    /// Must follow a [Target::process][1] of the batch.
    /// [1]: ../struct.Target.html#method.process
    pub fn compute_score(&mut self, set: StimuliSet) -> Result<()> {
        if self.target.state() != TargetState::LabelsEstimated {
            return Err(Error::Invariant(format!("{}: cannot score a batch in state {:?}",
                                                self.target.name(), self.target.state())));
        }
        let top_n = self.top_n();
        let nb_targets = self.target.get_nb_targets();
        let score = &mut self.scores[slot(set)];
        if score.confusion_matrix.is_empty() {
            score.confusion_matrix.resize(nb_targets);
        }

        let target = &self.target;
        let confusion_matrix = Mutex::new(&mut score.confusion_matrix);
        let samples = (0..target.batch().len())
            .into_par_iter()
            .map(|b| score_position(target, b, top_n, nb_targets, &confusion_matrix))
            .collect::<Result<Vec<Sample>>>()?;

        self.batch_success = samples.iter().map(|sample| sample.success).collect();
        self.batch_top_n_success = if top_n > 1 {
            samples.iter().map(|sample| sample.top_n_success).collect()
        } else {
            Vec::new()
        };
        score.misclassified.extend(samples.iter().filter_map(|sample| sample.misclassified));

        correct_last_batch(&mut self.batch_success, &score.success);
        let average = average_or(&self.batch_success, 1.0);
        score.success.push_back(average);

        if top_n > 1 {
            let history = &mut self.top_n_success[slot(set)];
            correct_last_batch(&mut self.batch_top_n_success, history);
            history.push_back(average_or(&self.batch_top_n_success, 1.0));
        }
        trace!("{}: {} batch success {:.4}", self.target.name(), set, average);
        self.target.set_state(TargetState::ScoreComputed);
        Ok(())
    }

    /// Success of every position of the last batch.
    pub fn get_batch_success(&self) -> &[f64] {
        &self.batch_success
    }

    /// Top-N success of every position of the last batch, empty when N is 1.
    pub fn get_batch_top_n_success(&self) -> &[f64] {
        &self.batch_top_n_success
    }

    /// Average success of the last batch, 1 before any batch.
    pub fn get_batch_average_success(&self) -> f64 {
        average_or(&self.batch_success, 1.0)
    }

    /// Average top-N success of the last batch, 0 when N is 1.
    pub fn get_batch_average_top_n_success(&self) -> f64 {
        if self.top_n() > 1 { average_or(&self.batch_top_n_success, 1.0) } else { 0.0 }
    }

    /// Scores of `set`.
    pub fn get_score(&self, set: StimuliSet) -> &Score {
        &self.scores[slot(set)]
    }

    /// Top-N success history of `set`.
    pub fn get_top_n_success(&self, set: StimuliSet) -> &VecDeque<f64> {
        &self.top_n_success[slot(set)]
    }

    /// Confusion matrix of `set`.
    pub fn get_confusion_matrix(&self, set: StimuliSet) -> &ConfusionMatrix {
        &self.scores[slot(set)].confusion_matrix
    }

    /// Misclassified stimuli of `set`.
    pub fn get_misclassified(&self, set: StimuliSet) -> &[(i32, i32)] {
        &self.scores[slot(set)].misclassified
    }

    /// Average success of `set`, over the last `window` batches when `window > 0`.
    pub fn get_average_success(&self, set: StimuliSet, window: usize) -> f64 {
        windowed_average(&self.scores[slot(set)].success, window)
    }

    /// Average top-N success of `set`, 0 when N is 1.
    pub fn get_average_top_n_success(&self, set: StimuliSet, window: usize) -> f64 {
        if self.top_n() > 1 { windowed_average(&self.top_n_success[slot(set)], window) } else { 0.0 }
    }

    /// Mean of `metric` over the per-class confusion tables of `set`.
    pub fn get_average_score(&self, set: StimuliSet, metric: ConfusionTableMetric) -> f64 {
        let tables = self.get_confusion_matrix(set).confusion_tables();
        if tables.is_empty() {
            return 0.0;
        }
        tables.iter().map(|table| table.metric(metric)).sum::<f64>() / tables.len() as f64
    }

    /// Record a validation score, and return true when it is the best so far.
    pub fn new_validation_score(&mut self, score: f64) -> bool {
        let learned = self.scores[slot(StimuliSet::Learn)].success.len();
        self.validation_scores.push((learned, score));
        if score > self.max_validation_score {
            self.max_validation_score = score;
            true
        } else {
            false
        }
    }

    /// Record a validation top-N score, and return true when it is the best so far.
    ///
    /// Always false when N is 1.
    pub fn new_validation_top_n_score(&mut self, score: f64) -> bool {
        if self.top_n() <= 1 {
            return false;
        }
        let learned = self.top_n_success[slot(StimuliSet::Learn)].len();
        self.validation_top_n_scores.push((learned, score));
        if score > self.max_validation_top_n_score {
            self.max_validation_top_n_score = score;
            true
        } else {
            false
        }
    }

    /// `(learned batches, score)` of every validation score.
    pub fn get_validation_scores(&self) -> &[(usize, f64)] {
        &self.validation_scores
    }

    /// `(learned batches, score)` of every validation top-N score.
    pub fn get_validation_top_n_scores(&self) -> &[(usize, f64)] {
        &self.validation_top_n_scores
    }

    /// Best validation score.
    pub fn get_max_validation_score(&self) -> f64 {
        self.max_validation_score
    }

    /// Best validation top-N score.
    pub fn get_max_validation_top_n_score(&self) -> f64 {
        self.max_validation_top_n_score
    }

    /// Forget the success history of `set`, top-N included.
    pub fn clear_success(&mut self, set: StimuliSet) {
        self.scores[slot(set)].success.clear();
        self.top_n_success[slot(set)].clear();
    }

    /// Forget the confusion matrix of `set`.
    pub fn clear_confusion_matrix(&mut self, set: StimuliSet) {
        self.scores[slot(set)].confusion_matrix.clear();
    }

    /// Forget the misclassified stimuli of `set`.
    pub fn clear_misclassified(&mut self, set: StimuliSet) {
        self.scores[slot(set)].misclassified.clear();
    }

    /// Forget every score of `set`.
    pub fn clear_score(&mut self, set: StimuliSet) {
        self.clear_success(set);
        self.clear_confusion_matrix(set);
        self.clear_misclassified(set);
    }

    /// Forget the loss, the confusion matrix and the misclassified stimuli of
    /// `set`. The success history is kept.
    pub fn clear(&mut self, set: StimuliSet) {
        self.target.clear(set);
        self.clear_confusion_matrix(set);
        self.clear_misclassified(set);
    }

    /// Write the confusion matrix of `set` into `path`.
    pub fn log_confusion_matrix(&self, path: &Path, set: StimuliSet, database: &dyn Database) -> Result<()> {
        let labels_name = self.target.get_target_labels_name(database);
        self.get_confusion_matrix(set).log(path, &labels_name)
    }

    /// Write the misclassified stimuli of `set` into `path`, one
    /// `id "name" label target` line per stimulus.
    pub fn log_misclassified(&self, path: &Path, set: StimuliSet, database: &dyn Database) -> Result<()> {
        let nb_labels = database.get_nb_labels() as i32;
        let label_name = |label: i32| -> Result<String> {
            Ok(if label < 0 {
                "*".to_owned()
            } else if label < nb_labels {
                database.get_label_name(label)?
            } else {
                label.to_string()
            })
        };
        let mut lines = vec!["# name target estimated".to_owned()];
        for &(id, estimated) in self.get_misclassified(set) {
            let labels = self.target.get_target_labels(estimated);
            let mut line = format!("{} \"{}\" {} ", id, database.get_stimulus_name(id)?,
                                   label_name(database.get_stimulus_label(id)?)?);
            if let Some(&first) = labels.first() {
                line.push_str(&label_name(first)?);
                if labels.len() > 1 {
                    line.push_str("...");
                }
            }
            lines.push(line);
        }
        write_lines(path, &lines)
    }

    /// Write the success history of `set` into `path`.
    ///
    /// For the validation set, one `learned_batches score` line per validation
    /// score. For the other sets, one `batch success average` line per batch,
    /// the average running over the last `window` batches.
    pub fn log_success(&self, path: &Path, set: StimuliSet, window: usize) -> Result<()> {
        if set == StimuliSet::Validation {
            write_validation(path, &self.validation_scores)
        } else {
            write_lines(path, &success_lines(&self.scores[slot(set)].success, window))
        }
    }

    /// Write the top-N success history of `set` into `path`, like
    /// [log_success](#method.log_success). Nothing is written when N is 1.
    pub fn log_top_n_success(&self, path: &Path, set: StimuliSet, window: usize) -> Result<()> {
        if self.top_n() <= 1 {
            return Ok(());
        }
        if set == StimuliSet::Validation {
            write_validation(path, &self.validation_top_n_scores)
        } else {
            write_lines(path, &success_lines(&self.top_n_success[slot(set)], window))
        }
    }
}

fn score_position(target: &Target,
                  b: usize,
                  top_n: usize,
                  nb_targets: usize,
                  confusion_matrix: &Mutex<&mut ConfusionMatrix>) -> Result<Sample> {
    let id = target.batch()[b];
    if id < 0 {
        return Ok(Sample::padding());
    }
    let targets = target.targets().batch(b);
    let labels = target.estimated_labels().batch(b);
    let spatial = targets.len();
    let in_top_n = |i: usize, t: i32| (0..top_n).any(|n| labels[n * spatial + i] == t);

    if spatial == 1 {
        let (t, e) = (targets[0], labels[0]);
        if t < 0 {
            return Ok(Sample::padding());
        }
        confusion_matrix.lock().add_sample(t as usize, e as usize)?;
        return Ok(Sample {
            success: if e == t { 1.0 } else { 0.0 },
            top_n_success: if in_top_n(0, t) { 1.0 } else { 0.0 },
            misclassified: if e != t { Some((id, e)) } else { None },
        });
    }

    let mut local = ConfusionMatrix::new(nb_targets);
    let mut nb_labels = vec![0usize; nb_targets];
    let mut nb_hits = vec![0usize; nb_targets];
    let mut nb_hits_top_n = vec![0usize; nb_targets];
    for (i, &t) in targets.iter().enumerate() {
        if t < 0 {
            continue;
        }
        let e = labels[i];
        local.add_sample(t as usize, e as usize)?;
        nb_labels[t as usize] += 1;
        if e == t {
            nb_hits[t as usize] += 1;
        }
        if top_n > 1 && in_top_n(i, t) {
            nb_hits_top_n[t as usize] += 1;
        }
    }
    confusion_matrix.lock().merge(&local)?;

    Ok(Sample {
        success: class_average(&nb_hits, &nb_labels),
        top_n_success: class_average(&nb_hits_top_n, &nb_labels),
        misclassified: None,
    })
}

/// Mean hit rate over the classes present, 1 when no class is present.
fn class_average(hits: &[usize], labels: &[usize]) -> f64 {
    let rates: Vec<f64> = hits.iter().zip(labels)
        .filter(|&(_, &labels)| labels > 0)
        .map(|(&hits, &labels)| hits as f64 / labels as f64)
        .collect();
    average_or(&rates, 1.0)
}

/// Replace the padding entries (`-1`) of `batch_success` so that its average,
/// once appended to `history`, keeps the history mean equal to the mean over
/// every valid sample.
///
/// Every history entry stands for a full batch of `batch_success.len()` samples.
pub fn correct_last_batch(batch_success: &mut Vec<f64>, history: &VecDeque<f64>) {
    let batch_size = batch_success.len();
    batch_success.retain(|&success| success != -1.0);
    let valid = batch_success.len();
    if valid < batch_size {
        let sum = batch_size as f64 * history.iter().sum::<f64>() + batch_success.iter().sum::<f64>();
        let count = history.len() * batch_size + valid;
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        batch_success.resize(batch_size, mean);
    }
}

fn average_or(values: &[f64], empty: f64) -> f64 {
    if values.is_empty() {
        empty
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn windowed_average(values: &VecDeque<f64>, window: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let skip = if window > 0 && values.len() > window { values.len() - window } else { 0 };
    let count = values.len() - skip;
    values.iter().skip(skip).sum::<f64>() / count as f64
}

fn success_lines(success: &VecDeque<f64>, window: usize) -> Vec<String> {
    let values: Vec<f64> = success.iter().cloned().collect();
    values.iter().enumerate().map(|(i, value)| {
        let start = if window > 0 && i + 1 > window { i + 1 - window } else { 0 };
        format!("{} {} {}", i, value, average_or(&values[start..=i], 0.0))
    }).collect()
}

fn write_validation(path: &Path, scores: &[(usize, f64)]) -> Result<()> {
    let lines: Vec<String> = scores.iter().map(|&(learned, score)| format!("{} {}", learned, score)).collect();
    write_lines(path, &lines)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let file = File::create(path).map_err(|err| Error::io(path, err))?;
    let mut out = BufWriter::new(file);
    for line in lines {
        writeln!(out, "{}", line).map_err(|err| Error::io(path, err))?;
    }
    out.flush().map_err(|err| Error::io(path, err))
}
