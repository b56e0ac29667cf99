//! Provides the narrow interfaces to the stimuli database and the batch provider.
//!
//! Loading stimuli is not part of this crate. A [Target][target] only needs to
//! resolve label names and to know the stimulus ids and labels of the current
//! batch, which is what the [Database][database] and
//! [StimuliProvider][provider] traits expose. [LabelDatabase][label_database]
//! and [StimuliBatch][batch] are in-memory implementations.
//!
//! [target]: ../target/struct.Target.html
//! [database]: ./trait.Database.html
//! [provider]: ./trait.StimuliProvider.html
//! [label_database]: ./struct.LabelDatabase.html
//! [batch]: ./struct.StimuliBatch.html
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// The partition of the database a batch was drawn from.
pub enum StimuliSet {
    /// Stimuli used for training.
    Learn,
    /// Stimuli used to select the best parameters during training.
    Validation,
    /// Stimuli used for the final evaluation.
    Test,
}

impl StimuliSet {
    /// All sets, in a fixed order.
    pub fn all() -> [StimuliSet; 3] {
        [StimuliSet::Learn, StimuliSet::Validation, StimuliSet::Test]
    }

    /// Name used in logs and log file names.
    pub fn name(&self) -> &'static str {
        match *self {
            StimuliSet::Learn => "Learn",
            StimuliSet::Validation => "Validation",
            StimuliSet::Test => "Test",
        }
    }
}

impl fmt::Display for StimuliSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Label and stimulus name resolution.
///
/// Label ids are the positions of the labels in the database, from 0 to
/// `get_nb_labels() - 1`. A negative label id marks an ignored position.
pub trait Database: Send + Sync + fmt::Debug {
    /// Returns true when a label is literally named `name`.
    fn is_label(&self, name: &str) -> bool;

    /// Id of the label named `name`.
    fn get_label_id(&self, name: &str) -> Result<i32>;

    /// Ids of every label whose name matches the glob `pattern`, in id order.
    ///
    /// `*` matches any sequence of characters and `?` any single character.
    fn get_matching_labels_ids(&self, pattern: &str) -> Vec<i32>;

    /// Number of labels.
    fn get_nb_labels(&self) -> usize;

    /// Name of label `id`.
    fn get_label_name(&self, id: i32) -> Result<String>;

    /// Name of stimulus `id`.
    fn get_stimulus_name(&self, id: i32) -> Result<String>;

    /// Label of stimulus `id`, negative when the stimulus has no label.
    fn get_stimulus_label(&self, id: i32) -> Result<i32>;
}

#[derive(Debug, Clone, Default)]
/// An in-memory [Database][1] of named labels and labeled stimuli.
/// [1]: ./trait.Database.html
pub struct LabelDatabase {
    labels: Vec<String>,
    stimuli: Vec<(String, i32)>,
}

impl LabelDatabase {
    /// Create a database holding `labels`, in id order.
    pub fn new<S: Into<String>>(labels: Vec<S>) -> LabelDatabase {
        LabelDatabase {
            labels: labels.into_iter().map(Into::into).collect(),
            stimuli: Vec::new(),
        }
    }

    /// Add a label and return its id. An existing label keeps its id.
    pub fn add_label(&mut self, name: &str) -> i32 {
        match self.labels.iter().position(|label| label == name) {
            Some(id) => id as i32,
            None => {
                self.labels.push(name.to_owned());
                (self.labels.len() - 1) as i32
            }
        }
    }

    /// Add a stimulus of label `label` and return its id.
    pub fn add_stimulus(&mut self, name: &str, label: i32) -> i32 {
        self.stimuli.push((name.to_owned(), label));
        (self.stimuli.len() - 1) as i32
    }

    /// Number of stimuli.
    pub fn get_nb_stimuli(&self) -> usize {
        self.stimuli.len()
    }

    fn stimulus(&self, id: i32) -> Result<&(String, i32)> {
        if id < 0 {
            return Err(Error::Invariant(format!("stimulus id {} is not valid", id)));
        }
        self.stimuli.get(id as usize)
            .ok_or_else(|| Error::Invariant(format!("stimulus id {} out of range", id)))
    }
}

impl Database for LabelDatabase {
    fn is_label(&self, name: &str) -> bool {
        self.labels.iter().any(|label| label == name)
    }

    fn get_label_id(&self, name: &str) -> Result<i32> {
        self.labels.iter()
            .position(|label| label == name)
            .map(|id| id as i32)
            .ok_or_else(|| Error::Config(format!("no label named \"{}\" in the database", name)))
    }

    fn get_matching_labels_ids(&self, pattern: &str) -> Vec<i32> {
        self.labels.iter()
            .enumerate()
            .filter(|&(_, label)| glob_match(pattern, label))
            .map(|(id, _)| id as i32)
            .collect()
    }

    fn get_nb_labels(&self) -> usize {
        self.labels.len()
    }

    fn get_label_name(&self, id: i32) -> Result<String> {
        if id < 0 {
            return Err(Error::Invariant(format!("label id {} is not valid", id)));
        }
        self.labels.get(id as usize)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("label id {} out of range", id)))
    }

    fn get_stimulus_name(&self, id: i32) -> Result<String> {
        self.stimulus(id).map(|stimulus| stimulus.0.clone())
    }

    fn get_stimulus_label(&self, id: i32) -> Result<i32> {
        self.stimulus(id).map(|stimulus| stimulus.1)
    }
}

/// Match `text` against a glob `pattern` with `*` and `?` wildcards.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // last `*` seen, and the text position it currently extends to
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// The current batch of a stimuli provider.
pub trait StimuliProvider: Send + Sync {
    /// The database the stimuli come from.
    fn database(&self) -> &dyn Database;

    /// Stimulus ids of the batch positions. A negative id marks a padding
    /// position, at the end of the last batch of a set.
    fn batch(&self) -> &[i32];

    /// Labels of the batch, `[width, height, channels, batch]`. Only channel 0
    /// is used as ground truth.
    fn labels_data(&self) -> &Tensor<i32>;

    /// Size of the batch, padding positions included.
    fn batch_size(&self) -> usize {
        self.batch().len()
    }
}

#[derive(Debug, Clone)]
/// A [StimuliProvider][1] holding one prepared batch.
/// [1]: ./trait.StimuliProvider.html
pub struct StimuliBatch {
    database: Arc<dyn Database>,
    batch: Vec<i32>,
    labels: Tensor<i32>,
}

impl StimuliBatch {
    /// Create a batch of stimuli `ids` with their `labels`.
    pub fn new(database: Arc<dyn Database>, ids: Vec<i32>, labels: Tensor<i32>) -> Result<StimuliBatch> {
        let mut batch = StimuliBatch { database: database, batch: Vec::new(), labels: Tensor::default() };
        batch.set_batch(ids, labels)?;
        Ok(batch)
    }

    /// Replace the batch content. The number of ids must match the label batch size.
    pub fn set_batch(&mut self, ids: Vec<i32>, labels: Tensor<i32>) -> Result<()> {
        if ids.is_empty() || labels.dim_b() != ids.len() {
            return Err(Error::Shape(format!("{} stimulus ids for labels {:?}", ids.len(), labels.dims())));
        }
        self.batch = ids;
        self.labels = labels;
        Ok(())
    }
}

impl StimuliProvider for StimuliBatch {
    fn database(&self) -> &dyn Database {
        &*self.database
    }

    fn batch(&self) -> &[i32] {
        &self.batch
    }

    fn labels_data(&self) -> &Tensor<i32> {
        &self.labels
    }
}
