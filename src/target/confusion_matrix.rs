//! Provides the confusion matrix accumulated by a [TargetScore][1], and the
//! per-class metrics derived from it.
//!
//! [1]: ../struct.TargetScore.html
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// A [ConfusionMatrix][wiki] of sample counts, rows indexed by the expected
/// class and columns by the estimated one.
///
/// [wiki]: https://en.wikipedia.org/wiki/Confusion_matrix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    nb_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    /// Create a ConfusionMatrix that analyzes the predictions of `nb_classes` classes.
    pub fn new(nb_classes: usize) -> ConfusionMatrix {
        ConfusionMatrix {
            nb_classes: nb_classes,
            counts: vec![0; nb_classes * nb_classes],
        }
    }

    /// Number of classes.
    pub fn nb_classes(&self) -> usize {
        self.nb_classes
    }

    /// Returns true when the matrix has no class.
    pub fn is_empty(&self) -> bool {
        self.nb_classes == 0
    }

    /// Drop every class and count.
    pub fn clear(&mut self) {
        self.nb_classes = 0;
        self.counts.clear();
    }

    /// Resize to `nb_classes` classes, resetting every count.
    pub fn resize(&mut self, nb_classes: usize) {
        *self = ConfusionMatrix::new(nb_classes);
    }

    fn check(&self, target: usize, estimated: usize) -> Result<()> {
        if target >= self.nb_classes || estimated >= self.nb_classes {
            return Err(Error::Invariant(format!("confusion matrix entry ({}, {}) out of range for {} classes",
                                                target, estimated, self.nb_classes)));
        }
        Ok(())
    }

    /// Add a sample by providing the expected `target` class and the `estimated` one.
    pub fn add_sample(&mut self, target: usize, estimated: usize) -> Result<()> {
        self.check(target, estimated)?;
        self.counts[target * self.nb_classes + estimated] += 1;
        Ok(())
    }

    /// Number of samples of class `target` estimated as `estimated`.
    pub fn get(&self, target: usize, estimated: usize) -> u64 {
        if target >= self.nb_classes || estimated >= self.nb_classes {
            return 0;
        }
        self.counts[target * self.nb_classes + estimated]
    }

    /// Add the counts of `other`, which must have the same number of classes.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if other.nb_classes != self.nb_classes {
            return Err(Error::Invariant(format!("cannot merge a confusion matrix of {} classes into one of {}",
                                                other.nb_classes, self.nb_classes)));
        }
        for (count, &other) in self.counts.iter_mut().zip(&other.counts) {
            *count += other;
        }
        Ok(())
    }

    /// Total number of samples.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Return the accuracy of the collected predictions.
    pub fn accuracy(&self) -> Accuracy {
        let num_correct = (0..self.nb_classes).map(|c| self.get(c, c)).sum();
        Accuracy { num_samples: self.total(), num_correct: num_correct }
    }

    /// One-vs-rest table of class `class`.
    pub fn confusion_table(&self, class: usize) -> ConfusionTable {
        let tp = self.get(class, class);
        let row: u64 = (0..self.nb_classes).map(|e| self.get(class, e)).sum();
        let column: u64 = (0..self.nb_classes).map(|t| self.get(t, class)).sum();
        let fn_ = row - tp;
        let fp = column - tp;
        ConfusionTable {
            tp: tp,
            fn_: fn_,
            fp: fp,
            tn: self.total() - tp - fn_ - fp,
        }
    }

    /// One-vs-rest tables of every class, in class order.
    pub fn confusion_tables(&self) -> Vec<ConfusionTable> {
        (0..self.nb_classes).map(|c| self.confusion_table(c)).collect()
    }

    /// Write the matrix and the per-class metrics as text into `path`.
    ///
    /// `labels_name` names the classes; missing names fall back to the class index.
    pub fn log(&self, path: &Path, labels_name: &[String]) -> Result<()> {
        let file = File::create(path).map_err(|err| Error::io(path, err))?;
        let mut out = BufWriter::new(file);
        self.write_log(&mut out, labels_name)
            .and_then(|_| out.flush())
            .map_err(|err| Error::io(path, err))
    }

    fn write_log<W: Write>(&self, out: &mut W, labels_name: &[String]) -> io::Result<()> {
        let name = |c: usize| -> String {
            match labels_name.get(c) {
                Some(name) if !name.is_empty() => name.replace(' ', "_"),
                _ => c.to_string(),
            }
        };
        write!(out, "target\\estimated")?;
        for e in 0..self.nb_classes {
            write!(out, " {}", name(e))?;
        }
        writeln!(out)?;
        for t in 0..self.nb_classes {
            write!(out, "{}", name(t))?;
            for e in 0..self.nb_classes {
                write!(out, " {}", self.get(t, e))?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
        writeln!(out, "name sensitivity specificity precision f1-score")?;
        for (c, table) in self.confusion_tables().iter().enumerate() {
            writeln!(out, "{} {:.4} {:.4} {:.4} {:.4}", name(c),
                     table.metric(ConfusionTableMetric::Sensitivity),
                     table.metric(ConfusionTableMetric::Specificity),
                     table.metric(ConfusionTableMetric::Precision),
                     table.metric(ConfusionTableMetric::F1Score))?;
        }
        writeln!(out, "accuracy {}", self.accuracy())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
/// True/false positives and negatives of one class against all the others.
pub struct ConfusionTable {
    /// True positives.
    pub tp: u64,
    /// False negatives.
    pub fn_: u64,
    /// False positives.
    pub fp: u64,
    /// True negatives.
    pub tn: u64,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl ConfusionTable {
    /// Value of `metric` for this table. Ratios with a zero denominator are 0.
    pub fn metric(&self, metric: ConfusionTableMetric) -> f64 {
        let (tp, fn_, fp, tn) = (self.tp, self.fn_, self.fp, self.tn);
        match metric {
            ConfusionTableMetric::Sensitivity => ratio(tp, tp + fn_),
            ConfusionTableMetric::Specificity => ratio(tn, tn + fp),
            ConfusionTableMetric::Precision => ratio(tp, tp + fp),
            ConfusionTableMetric::NegativePredictiveValue => ratio(tn, tn + fn_),
            ConfusionTableMetric::MissRate => ratio(fn_, fn_ + tp),
            ConfusionTableMetric::FallOut => ratio(fp, fp + tn),
            ConfusionTableMetric::FalseDiscoveryRate => ratio(fp, fp + tp),
            ConfusionTableMetric::FalseOmissionRate => ratio(fn_, fn_ + tn),
            ConfusionTableMetric::Accuracy => ratio(tp + tn, tp + tn + fp + fn_),
            ConfusionTableMetric::F1Score => ratio(2 * tp, 2 * tp + fp + fn_),
            ConfusionTableMetric::Informedness => {
                self.metric(ConfusionTableMetric::Sensitivity) + self.metric(ConfusionTableMetric::Specificity) - 1.0
            }
            ConfusionTableMetric::Markedness => {
                self.metric(ConfusionTableMetric::Precision)
                    + self.metric(ConfusionTableMetric::NegativePredictiveValue) - 1.0
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The metrics a [ConfusionTable][1] can report.
/// [1]: ./struct.ConfusionTable.html
pub enum ConfusionTableMetric {
    /// tp / (tp + fn), also known as recall
    Sensitivity,
    /// tn / (tn + fp)
    Specificity,
    /// tp / (tp + fp)
    Precision,
    /// tn / (tn + fn)
    NegativePredictiveValue,
    /// fn / (fn + tp)
    MissRate,
    /// fp / (fp + tn)
    FallOut,
    /// fp / (fp + tp)
    FalseDiscoveryRate,
    /// fn / (fn + tn)
    FalseOmissionRate,
    /// (tp + tn) / total
    Accuracy,
    /// 2 tp / (2 tp + fp + fn)
    F1Score,
    /// sensitivity + specificity - 1
    Informedness,
    /// precision + negative predictive value - 1
    Markedness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The accuracy of the predictions in a ConfusionMatrix.
///
/// Used to print the accuracy.
pub struct Accuracy {
    num_samples: u64,
    num_correct: u64,
}

impl Accuracy {
    /// Fraction of correct predictions, 0 without samples.
    pub fn ratio(&self) -> f64 {
        ratio(self.num_correct, self.num_samples)
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{} = {:.2}%", self.num_correct, self.num_samples, self.ratio() * 100.0)
    }
}
