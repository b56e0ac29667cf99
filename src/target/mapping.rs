//! Provides the mapping from database labels to target classes.
//!
//! A mapping file holds one rule per line:
//!
//! ```text
//! # comment
//! cat 0
//! dog 1
//! big dog 1     # label names may contain spaces
//! c*t 2         # glob patterns resolve through the database
//! * -1          # every label not listed is ignored
//! default 3     # fallback for labels without a rule
//! ```
//!
//! The last word of a rule is the target class, `>= 0` or `-1` to ignore the
//! label. Everything before it is the label name.
//!
//! A label without a rule of its own takes the `*` target when there is one,
//! else the `default` target.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::database::Database;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Label id to target class mapping, with optional `*` and default classes.
///
/// The label id `-1` stands for the `*` rule.
pub struct LabelsMapping {
    labels: BTreeMap<i32, i32>,
    wildcard_target: Option<i32>,
    default_target: Option<i32>,
}

impl LabelsMapping {
    /// An empty mapping, which maps every label onto itself.
    pub fn new() -> LabelsMapping {
        LabelsMapping::default()
    }

    /// Read a mapping file, resolving names through `database`.
    pub fn from_file(path: &Path, database: &dyn Database) -> Result<LabelsMapping> {
        let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        LabelsMapping::parse(&text, &path.display().to_string(), database)
    }

    /// Parse mapping rules. `source` names the origin of `text` in error messages.
    pub fn parse(text: &str, source: &str, database: &dyn Database) -> Result<LabelsMapping> {
        let mut mapping = LabelsMapping::new();

        for line in text.lines() {
            let line = match line.find('#') {
                Some(comment) => &line[..comment],
                None => line,
            }.trim();
            if line.is_empty() {
                continue;
            }

            let (name, output) = parse_rule(line)
                .ok_or_else(|| Error::Config(format!("Unreadable value: {} in file {}", line, source)))?;

            if name == "default" {
                if mapping.default_target.is_some() {
                    return Err(Error::Config(format!("Default mapping already exists in file {}", source)));
                }
                mapping.default_target = Some(output);
                continue;
            }

            if name == "*" {
                if database.is_label(&name) {
                    return Err(Error::Config(format!("Ambiguous ignore wildcard *, because there is a label \
                                                      named \"*\" in the database, in file {}", source)));
                }
                if mapping.wildcard_target.is_some() {
                    return Err(Error::Config(format!("Mapping already exists for label: {} in file {}", line, source)));
                }
                mapping.wildcard_target = Some(output);
                continue;
            }

            let labels = if database.is_label(&name) {
                if name.contains(&['*', '?'][..]) {
                    return Err(Error::Config(format!("Ambiguous use of wildcard: {}, because there is a label \
                                                      named \"{}\" in the database, in file {}", line, name, source)));
                }
                vec![database.get_label_id(&name)?]
            } else {
                database.get_matching_labels_ids(&name)
            };

            if labels.is_empty() {
                warn!("No label exists in the database with the name: {} in file {}", name, source);
                continue;
            }
            for label in labels {
                if mapping.labels.insert(label, output).is_some() {
                    return Err(Error::Config(format!("Mapping already exists for label: {} in file {}", line, source)));
                }
            }
        }
        debug!("{} label mappings read from {}", mapping.labels.len(), source);
        Ok(mapping)
    }

    /// Returns true when neither a label rule nor a `*` rule exists. The
    /// default target alone does not count.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.wildcard_target.is_none()
    }

    /// Map `label` onto `output`, replacing any previous rule. Label `-1` sets
    /// the `*` rule.
    pub fn set_label_target(&mut self, label: i32, output: i32) {
        if label < 0 {
            self.wildcard_target = Some(output);
        } else {
            self.labels.insert(label, output);
        }
    }

    /// Set the fallback target.
    pub fn set_default_target(&mut self, output: i32) {
        self.default_target = Some(output);
    }

    /// Target class of `label`.
    ///
    /// Without any rule every label is its own target. Otherwise the rule of the
    /// label applies, then the `*` rule, then the default target. A label
    /// matching none of them is an incomplete mapping.
    pub fn get_label_target(&self, label: i32, database: &dyn Database) -> Result<i32> {
        if self.is_empty() {
            return Ok(label);
        }
        if let Some(&output) = self.labels.get(&label) {
            return Ok(output);
        }
        if let Some(output) = self.wildcard_target.or(self.default_target) {
            return Ok(output);
        }
        let name = database.get_label_name(label).unwrap_or_default();
        Err(Error::Config(format!("Incomplete class mapping: no output specified for label #{} ({})", label, name)))
    }

    /// The fallback target.
    pub fn get_default_target(&self) -> Result<i32> {
        self.default_target.ok_or_else(|| Error::Config("No default target mapping".to_owned()))
    }

    /// The default target, if any.
    pub fn default_target(&self) -> Option<i32> {
        self.default_target
    }

    /// The `*` target, if any.
    pub fn wildcard_target(&self) -> Option<i32> {
        self.wildcard_target
    }

    /// Labels mapped onto `output`, in label order, `-1` standing for the `*`
    /// rule.
    pub fn get_target_labels(&self, output: i32) -> Vec<i32> {
        if self.is_empty() {
            return vec![output];
        }
        let wildcard = if self.wildcard_target == Some(output) { Some(-1) } else { None };
        wildcard.into_iter()
            .chain(self.labels.iter()
                .filter(|&(_, &target)| target == output)
                .map(|(&label, _)| label))
            .collect()
    }
}

/// Split a rule into its label name and its target class.
fn parse_rule(line: &str) -> Option<(String, i32)> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    let output = words.pop()?.parse::<i32>().ok()?;
    if words.is_empty() || (output < 0 && output != -1) {
        return None;
    }
    let name = words.join(" ");
    let name = if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        name[1..name.len() - 1].to_owned()
    } else {
        name
    };
    Some((name, output))
}
