//! Dataset assembly - labeled examples as an immutable tabular collection
//!
//! A [`Dataset`] is an ordered collection of [`Record`]s with one designated
//! input column and one designated label column, plus arbitrary typed metadata
//! columns. Record identity is the row index; records never change once the
//! dataset is built.
//!
//! Toyota Way: Poka-Yoke - every aligned column is length-validated at build
//! time, so a misshapen dataset cannot exist.

mod io;

pub use io::Row;

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Typed scalar value for metadata fields and run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// UTF-8 string value
    Str(String),
    /// Signed 64-bit integer value
    Int(i64),
    /// 64-bit float value
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// One labeled input example.
///
/// Identity is the row index within its [`Dataset`]; a record carries no ID of
/// its own and is immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    input: String,
    label: String,
    metadata: BTreeMap<String, Scalar>,
}

impl Record {
    /// Create a record with no metadata fields.
    #[must_use]
    pub fn new(input: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            label: label.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Get the input text.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Get the gold label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get all metadata fields.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, Scalar> {
        &self.metadata
    }

    /// Get a single metadata field by name.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&Scalar> {
        self.metadata.get(key)
    }
}

/// Ordered, immutable collection of labeled records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    records: Vec<Record>,
    input_column: String,
    label_column: String,
    created_at: DateTime<Utc>,
}

impl Dataset {
    /// Create a builder for assembling a dataset from aligned columns.
    #[must_use]
    pub fn builder() -> DatasetBuilder {
        DatasetBuilder::new()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the dataset has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get all records in row order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Get a record by row index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Iterate over gold labels in row order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(Record::label)
    }

    /// Name of the designated input column.
    #[must_use]
    pub fn input_column(&self) -> &str {
        &self.input_column
    }

    /// Name of the designated label column.
    #[must_use]
    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    /// Assembly timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Truncate to the first `max_samples` records, preserving source order.
    ///
    /// Returns a new dataset; the original is untouched. Result length is
    /// `min(max_samples, len)`.
    #[must_use]
    pub fn take(&self, max_samples: usize) -> Self {
        Self {
            records: self.records.iter().take(max_samples).cloned().collect(),
            input_column: self.input_column.clone(),
            label_column: self.label_column.clone(),
            created_at: Utc::now(),
        }
    }

    /// Select the first matching records, preserving source order.
    ///
    /// Applies `predicate` to each record in row order and keeps the first
    /// `max_samples` matches (all matches when `max_samples` is `None`).
    /// Result length is `min(max_samples, matching_count)`.
    #[must_use]
    pub fn filter_take<P>(&self, predicate: P, max_samples: Option<usize>) -> Self
    where
        P: Fn(&Record) -> bool,
    {
        let limit = max_samples.unwrap_or(usize::MAX);
        Self {
            records: self
                .records
                .iter()
                .filter(|r| predicate(r))
                .take(limit)
                .cloned()
                .collect(),
            input_column: self.input_column.clone(),
            label_column: self.label_column.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Builder for [`Dataset`].
///
/// Columns are collected first and validated together in [`build`](Self::build):
/// input and label columns must have equal length, and every metadata column
/// must match them. Violations fail with [`Error::ShapeMismatch`].
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    inputs: Vec<String>,
    labels: Vec<String>,
    metadata: BTreeMap<String, Vec<Scalar>>,
    input_column: Option<String>,
    label_column: Option<String>,
}

impl DatasetBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input texts, one per record.
    #[must_use]
    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the gold labels, one per record.
    #[must_use]
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the input column name (default: `"input"`).
    #[must_use]
    pub fn input_column(mut self, name: impl Into<String>) -> Self {
        self.input_column = Some(name.into());
        self
    }

    /// Set the label column name (default: `"label"`).
    #[must_use]
    pub fn label_column(mut self, name: impl Into<String>) -> Self {
        self.label_column = Some(name.into());
        self
    }

    /// Attach a metadata column, one value per record.
    #[must_use]
    pub fn metadata<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        self.metadata
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Build the dataset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the label column or any metadata
    /// column differs in length from the input column.
    pub fn build(self) -> Result<Dataset> {
        let n = self.inputs.len();

        if self.labels.len() != n {
            return Err(Error::shape_mismatch("label column", n, self.labels.len()));
        }

        for (name, values) in &self.metadata {
            if values.len() != n {
                return Err(Error::shape_mismatch(
                    format!("metadata column '{name}'"),
                    n,
                    values.len(),
                ));
            }
        }

        let mut records: Vec<Record> = self
            .inputs
            .into_iter()
            .zip(self.labels)
            .map(|(input, label)| Record::new(input, label))
            .collect();

        for (name, values) in self.metadata {
            for (record, value) in records.iter_mut().zip(values) {
                record.metadata.insert(name.clone(), value);
            }
        }

        Ok(Dataset {
            records,
            input_column: self.input_column.unwrap_or_else(|| "input".to_string()),
            label_column: self.label_column.unwrap_or_else(|| "label".to_string()),
            created_at: Utc::now(),
        })
    }
}
