//! Run registry - named experiment results aligned to a dataset
//!
//! An [`ExperimentRun`] couples a unique name and a parameter mapping with an
//! ordered prediction sequence, one prediction per dataset record. The
//! [`RunRegistry`] enforces the alignment invariant at registration: a run
//! whose prediction count differs from the record count is rejected outright,
//! leaving the registry untouched.
//!
//! Duplicate names are rejected with [`Error::DuplicateRun`] rather than
//! silently overwritten: an overwrite can mask a misconfigured sweep.

use crate::dataset::{Dataset, Scalar};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, parameterized set of predictions aligned to the record collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRun {
    name: String,
    params: BTreeMap<String, Scalar>,
    predictions: Vec<String>,
    registered_at: DateTime<Utc>,
}

impl ExperimentRun {
    /// Get the run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the parameter mapping that produced this run.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, Scalar> {
        &self.params
    }

    /// Get all predictions in record order.
    #[must_use]
    pub fn predictions(&self) -> &[String] {
        &self.predictions
    }

    /// Get the prediction for a record index.
    #[must_use]
    pub fn prediction(&self, index: usize) -> Option<&str> {
        self.predictions.get(index).map(String::as_str)
    }

    /// Registration timestamp.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

/// Ordered collection of experiment runs, keyed by name.
///
/// Iteration yields runs in registration order. Lookup by name is O(1).
#[derive(Debug, Default)]
pub struct RunRegistry {
    expected_len: usize,
    runs: Vec<ExperimentRun>,
    index: FxHashMap<String, usize>,
}

impl RunRegistry {
    /// Create a registry expecting `expected_len` predictions per run.
    #[must_use]
    pub fn new(expected_len: usize) -> Self {
        Self {
            expected_len,
            runs: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Create a registry aligned to a dataset's record count.
    #[must_use]
    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self::new(dataset.len())
    }

    /// Expected prediction count per run.
    #[must_use]
    pub const fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// Number of registered runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Check if no runs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Register a run after validating alignment and name uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the prediction count differs from
    /// the expected record count, or [`Error::DuplicateRun`] if the name is
    /// already registered. In both cases the registry is unchanged.
    pub fn register<P, K, V, Q, S>(
        &mut self,
        name: impl Into<String>,
        params: P,
        predictions: Q,
    ) -> Result<&ExperimentRun>
    where
        P: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
        Q: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let predictions: Vec<String> = predictions.into_iter().map(Into::into).collect();

        if predictions.len() != self.expected_len {
            return Err(Error::shape_mismatch(
                format!("predictions for run '{name}'"),
                self.expected_len,
                predictions.len(),
            ));
        }
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateRun(name));
        }

        let run = ExperimentRun {
            name: name.clone(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            predictions,
            registered_at: Utc::now(),
        };

        let slot = self.runs.len();
        self.index.insert(name, slot);
        self.runs.push(run);
        Ok(&self.runs[slot])
    }

    /// Get a run by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExperimentRun> {
        self.index.get(name).map(|&i| &self.runs[i])
    }

    /// Check whether a run name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterate over runs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ExperimentRun> {
        self.runs.iter()
    }
}

impl<'a> IntoIterator for &'a RunRegistry {
    type Item = &'a ExperimentRun;
    type IntoIter = std::slice::Iter<'a, ExperimentRun>;

    fn into_iter(self) -> Self::IntoIter {
        self.runs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_aligned_run() {
        let mut registry = RunRegistry::new(3);
        let run = registry
            .register(
                "baseline",
                [("temperature", Scalar::Float(0.0))],
                ["a", "b", "c"],
            )
            .unwrap();
        assert_eq!(run.name(), "baseline");
        assert_eq!(run.predictions().len(), 3);
        assert_eq!(run.prediction(1), Some("b"));
    }

    #[test]
    fn test_register_shape_mismatch_leaves_registry_unchanged() {
        let mut registry = RunRegistry::new(4);
        let result = registry.register("short", [("k", Scalar::Int(1))], ["a", "b", "c"]);
        assert!(matches!(
            result,
            Err(Error::ShapeMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
        assert!(registry.is_empty());
        assert!(!registry.contains("short"));
    }

    #[test]
    fn test_register_duplicate_name() {
        let mut registry = RunRegistry::new(1);
        registry
            .register("dup", std::iter::empty::<(String, Scalar)>(), ["x"])
            .unwrap();
        let result = registry.register("dup", std::iter::empty::<(String, Scalar)>(), ["y"]);
        assert!(matches!(result, Err(Error::DuplicateRun(name)) if name == "dup"));
        // Original run untouched
        assert_eq!(registry.get("dup").unwrap().prediction(0), Some("x"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_iteration_in_registration_order() {
        let mut registry = RunRegistry::new(1);
        for name in ["c", "a", "b"] {
            registry
                .register(name, std::iter::empty::<(String, Scalar)>(), ["p"])
                .unwrap();
        }
        let names: Vec<&str> = registry.iter().map(ExperimentRun::name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_params_preserved() {
        let mut registry = RunRegistry::new(1);
        registry
            .register(
                "run",
                [
                    ("temperature", Scalar::Float(0.7)),
                    ("max_tokens", Scalar::Int(256)),
                ],
                ["p"],
            )
            .unwrap();
        let run = registry.get("run").unwrap();
        assert_eq!(run.params().get("max_tokens"), Some(&Scalar::Int(256)));
    }
}
