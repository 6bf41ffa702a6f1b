//! Metric functions - pure scoring over records and predictions
//!
//! A metric is either **per-example** (one record + one prediction -> scalar)
//! or **aggregate** (full aligned collections -> one scalar per run). The
//! shape is a declared tag on the [`Metric`], never inferred from runtime
//! inspection; the evaluation engine dispatches on it.
//!
//! Metric functions are fallible: an `Err` from a call marks that one cell
//! unavailable without touching its siblings. They must be pure and
//! deterministic so that re-evaluation reproduces the same report.

use crate::dataset::Record;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Per-example scoring function: `(record, gold label, prediction) -> score`.
pub type PerExampleFn = Arc<dyn Fn(&Record, &str, &str) -> Result<f64> + Send + Sync>;

/// Aggregate scoring function over full aligned collections:
/// `(records, gold labels, predictions) -> score`.
pub type AggregateFn = Arc<dyn Fn(&[Record], &[&str], &[&str]) -> Result<f64> + Send + Sync>;

/// Declared metric shape, used for dispatch and cell-count accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// One score per (record, run) pair
    PerExample,
    /// One score per run
    Aggregate,
}

/// Tagged scoring function variant.
#[derive(Clone)]
pub enum MetricFn {
    /// Scores a single record/prediction pair
    PerExample(PerExampleFn),
    /// Scores a run's full prediction sequence
    Aggregate(AggregateFn),
}

/// A named, tagged metric.
#[derive(Clone)]
pub struct Metric {
    name: String,
    func: MetricFn,
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

impl Metric {
    /// Create a per-example metric.
    pub fn per_example<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Record, &str, &str) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: MetricFn::PerExample(Arc::new(func)),
        }
    }

    /// Create an aggregate metric.
    pub fn aggregate<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Record], &[&str], &[&str]) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: MetricFn::Aggregate(Arc::new(func)),
        }
    }

    /// Resolve a built-in metric by name.
    ///
    /// Recognized names: `exact_match`, `exact_match_rate`, `prediction_len`,
    /// `token_overlap`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedMetric`] for any other name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "exact_match" => Ok(Self::per_example(name, |_, gold, pred| {
                Ok(f64::from(u8::from(gold.trim() == pred.trim())))
            })),
            "exact_match_rate" => Ok(Self::aggregate(name, |_, golds, preds| {
                if golds.is_empty() {
                    return Ok(0.0);
                }
                let hits = golds
                    .iter()
                    .zip(preds)
                    .filter(|(g, p)| g.trim() == p.trim())
                    .count();
                #[allow(clippy::cast_precision_loss)]
                Ok(hits as f64 / golds.len() as f64)
            })),
            "prediction_len" => Ok(Self::per_example(name, |_, _, pred| {
                #[allow(clippy::cast_precision_loss)]
                Ok(pred.chars().count() as f64)
            })),
            "token_overlap" => Ok(Self::per_example(name, |_, gold, pred| {
                Ok(token_overlap(gold, pred))
            })),
            other => Err(Error::UnsupportedMetric(other.to_string())),
        }
    }

    /// Names of all built-in metrics.
    #[must_use]
    pub const fn builtin_names() -> &'static [&'static str] {
        &[
            "exact_match",
            "exact_match_rate",
            "prediction_len",
            "token_overlap",
        ]
    }

    /// Get the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the declared shape tag.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self.func {
            MetricFn::PerExample(_) => MetricKind::PerExample,
            MetricFn::Aggregate(_) => MetricKind::Aggregate,
        }
    }

    /// Get the tagged scoring function.
    #[must_use]
    pub const fn func(&self) -> &MetricFn {
        &self.func
    }
}

/// Fraction of gold whitespace tokens present in the prediction.
///
/// An empty gold token set scores 1.0 against an empty prediction and 0.0
/// otherwise.
fn token_overlap(gold: &str, pred: &str) -> f64 {
    use std::collections::BTreeSet;

    let gold_tokens: BTreeSet<&str> = gold.split_whitespace().collect();
    if gold_tokens.is_empty() {
        return if pred.split_whitespace().next().is_none() {
            1.0
        } else {
            0.0
        };
    }
    let pred_tokens: BTreeSet<&str> = pred.split_whitespace().collect();
    let shared = gold_tokens.intersection(&pred_tokens).count();
    #[allow(clippy::cast_precision_loss)]
    {
        shared as f64 / gold_tokens.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new("What is 2 + 8?", "10")
    }

    #[test]
    fn test_by_name_unknown_metric() {
        let result = Metric::by_name("bleu_42");
        assert!(matches!(result, Err(Error::UnsupportedMetric(name)) if name == "bleu_42"));
    }

    #[test]
    fn test_exact_match_per_example() {
        let metric = Metric::by_name("exact_match").unwrap();
        assert_eq!(metric.kind(), MetricKind::PerExample);
        let MetricFn::PerExample(f) = metric.func() else {
            panic!("declared shape must be per-example");
        };
        assert!((f(&record(), "10", "10").unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((f(&record(), "10", "5").unwrap()).abs() < f64::EPSILON);
        // Whitespace is not significant
        assert!((f(&record(), "10", " 10 ").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exact_match_rate_aggregate() {
        let metric = Metric::by_name("exact_match_rate").unwrap();
        assert_eq!(metric.kind(), MetricKind::Aggregate);
        let MetricFn::Aggregate(f) = metric.func() else {
            panic!("declared shape must be aggregate");
        };
        let records = vec![record(); 4];
        let golds = vec!["10", "5", "1", "10"];
        let preds = vec!["5", "4", "1", "5"];
        let rate = f(&records, &golds, &preds).unwrap();
        assert!((rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exact_match_rate_empty() {
        let metric = Metric::by_name("exact_match_rate").unwrap();
        let MetricFn::Aggregate(f) = metric.func() else {
            panic!("declared shape must be aggregate");
        };
        assert!(f(&[], &[], &[]).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn test_token_overlap() {
        assert!((token_overlap("the quick fox", "the slow fox") - 2.0 / 3.0).abs() < 1e-12);
        assert!((token_overlap("", "") - 1.0).abs() < f64::EPSILON);
        assert!(token_overlap("", "something").abs() < f64::EPSILON);
    }

    #[test]
    fn test_custom_metric_tag() {
        let metric = Metric::per_example("always_one", |_, _, _| Ok(1.0));
        assert_eq!(metric.kind(), MetricKind::PerExample);
        assert_eq!(metric.name(), "always_one");
    }
}
