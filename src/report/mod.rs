//! Evaluation and reporting engine
//!
//! [`evaluate`] applies every metric to the record x run matrix: per-example
//! metrics yield one cell per (record, run) pair, aggregate metrics one cell
//! per run. The resulting [`ReportTable`] is a derived, read-only view that is
//! recomputed from scratch whenever inputs change, never mutated in place.
//!
//! Toyota Way Principles:
//! - Jidoka: per-cell failure isolation - a failing metric call records an
//!   `Unavailable` sentinel for that cell and its siblings still compute
//! - Heijunka: the matrix is embarrassingly parallel; work is spread across a
//!   bounded rayon pool with no cross-cell dependencies

mod config;
mod table;

pub use config::{ReportConfig, ViewMode};
pub use table::{batch_to_json_rows, ReportRow};

use crate::dataset::Dataset;
use crate::metric::{Metric, MetricFn, MetricKind};
use crate::registry::{ExperimentRun, RunRegistry};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info_span, warn};

/// One scored (or failed) report cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CellValue {
    /// Metric score for this cell
    Score(f64),
    /// Sentinel: the metric call failed for this cell; holds the reason
    Unavailable(String),
}

impl CellValue {
    /// Get the score, if available.
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        match self {
            Self::Score(s) => Some(*s),
            Self::Unavailable(_) => None,
        }
    }

    /// Check whether this cell is a failure sentinel.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One entry in the report's error summary.
#[derive(Debug, Clone, Serialize)]
pub struct CellFailure {
    /// Run name
    pub run: String,
    /// Metric name
    pub metric: String,
    /// Record index, or `None` for an aggregate cell
    pub record: Option<usize>,
    /// Failure reason from the metric function
    pub reason: String,
}

impl CellFailure {
    /// View this summary entry as a typed [`Error::MetricEvaluation`].
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::MetricEvaluation {
            metric: self.metric.clone(),
            run: self.run.clone(),
            scope: self
                .record
                .map_or_else(|| "aggregate".to_string(), |i| format!("record {i}")),
            reason: self.reason.clone(),
        }
    }
}

/// Derived, read-only view joining records x runs x metrics.
///
/// Per-example cells are keyed `(record index, run name, metric name)`;
/// aggregate cells are keyed `(run name, metric name)`.
#[derive(Debug, Clone)]
pub struct ReportTable {
    num_records: usize,
    run_names: Vec<String>,
    metric_names: Vec<String>,
    metric_kinds: Vec<MetricKind>,
    run_index: FxHashMap<String, usize>,
    metric_index: FxHashMap<String, usize>,
    cells: FxHashMap<(usize, usize, usize), CellValue>,
    aggregates: FxHashMap<(usize, usize), CellValue>,
    failures: Vec<CellFailure>,
    created_at: DateTime<Utc>,
}

impl ReportTable {
    /// Number of dataset records the report covers.
    #[must_use]
    pub const fn num_records(&self) -> usize {
        self.num_records
    }

    /// Run names in registration order.
    #[must_use]
    pub fn run_names(&self) -> &[String] {
        &self.run_names
    }

    /// Metric names in declaration order.
    #[must_use]
    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    /// Declared shape of a metric, if present in the report.
    #[must_use]
    pub fn metric_kind(&self, metric: &str) -> Option<MetricKind> {
        self.metric_index.get(metric).map(|&i| self.metric_kinds[i])
    }

    /// Total cell count: per-example cells plus aggregate cells.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len() + self.aggregates.len()
    }

    /// Get a per-example cell.
    #[must_use]
    pub fn cell(&self, record: usize, run: &str, metric: &str) -> Option<&CellValue> {
        let run_idx = *self.run_index.get(run)?;
        let metric_idx = *self.metric_index.get(metric)?;
        self.cells.get(&(record, run_idx, metric_idx))
    }

    /// Get an aggregate cell.
    #[must_use]
    pub fn aggregate(&self, run: &str, metric: &str) -> Option<&CellValue> {
        let run_idx = *self.run_index.get(run)?;
        let metric_idx = *self.metric_index.get(metric)?;
        self.aggregates.get(&(run_idx, metric_idx))
    }

    /// Error summary: every cell that recorded a failure sentinel.
    #[must_use]
    pub fn failures(&self) -> &[CellFailure] {
        &self.failures
    }

    /// Report computation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Compute every metric for every (record, run) pair and run aggregate.
///
/// Per-example metrics are dispatched over the full record x run matrix in
/// parallel (bounded by `config.max_concurrency` when set); aggregate metrics
/// run once per run over the aligned collections. Dispatch follows each
/// metric's declared tag.
///
/// A failing metric call marks its own cell [`CellValue::Unavailable`] and is
/// listed in the report's error summary; sibling cells are unaffected.
///
/// # Errors
///
/// Structural errors are fatal and returned immediately:
/// - [`Error::ShapeMismatch`] if the registry's expected length differs from
///   the dataset's record count
/// - [`Error::Config`] on duplicate metric names or an invalid config
///
/// # Example
///
/// ```rust
/// use cotejo::{Dataset, Metric, ReportConfig, RunRegistry, Scalar};
///
/// # fn main() -> cotejo::Result<()> {
/// let dataset = Dataset::builder()
///     .inputs(["2+8?", "10/2?", "3-2?", "5*2?"])
///     .labels(["10", "5", "1", "10"])
///     .build()?;
/// let mut runs = RunRegistry::for_dataset(&dataset);
/// runs.register("dunce", [("temperature", Scalar::Float(1.0))], ["5", "4", "1", "5"])?;
///
/// let metrics = vec![Metric::by_name("exact_match")?];
/// let report = cotejo::evaluate(&dataset, &runs, &metrics, &ReportConfig::default())?;
/// assert_eq!(report.cell(2, "dunce", "exact_match").unwrap().score(), Some(1.0));
/// # Ok(())
/// # }
/// ```
pub fn evaluate(
    dataset: &Dataset,
    registry: &RunRegistry,
    metrics: &[Metric],
    config: &ReportConfig,
) -> Result<ReportTable> {
    config.validate()?;

    if registry.expected_len() != dataset.len() {
        return Err(Error::shape_mismatch(
            "run registry",
            dataset.len(),
            registry.expected_len(),
        ));
    }

    let mut metric_index: FxHashMap<String, usize> = FxHashMap::default();
    for (i, metric) in metrics.iter().enumerate() {
        if metric_index.insert(metric.name().to_string(), i).is_some() {
            return Err(Error::Config(format!(
                "duplicate metric name '{}'",
                metric.name()
            )));
        }
    }

    let runs: Vec<&ExperimentRun> = registry.iter().collect();
    let span = info_span!(
        "evaluate",
        records = dataset.len(),
        runs = runs.len(),
        metrics = metrics.len()
    );
    let _guard = span.enter();

    let cells: DashMap<(usize, usize, usize), CellValue> = DashMap::new();
    let aggregates: DashMap<(usize, usize), CellValue> = DashMap::new();
    let failures: Mutex<Vec<CellFailure>> = Mutex::new(Vec::new());

    let compute = || {
        runs.par_iter().enumerate().for_each(|(run_idx, run)| {
            debug!(run = run.name(), "scoring run");

            dataset
                .records()
                .par_iter()
                .enumerate()
                .for_each(|(rec_idx, record)| {
                    let prediction = run.prediction(rec_idx).unwrap_or_default();
                    for (metric_idx, metric) in metrics.iter().enumerate() {
                        let MetricFn::PerExample(func) = metric.func() else {
                            continue;
                        };
                        match func(record, record.label(), prediction) {
                            Ok(score) => {
                                cells.insert(
                                    (rec_idx, run_idx, metric_idx),
                                    CellValue::Score(score),
                                );
                            }
                            Err(e) => {
                                let reason = e.to_string();
                                warn!(
                                    run = run.name(),
                                    metric = metric.name(),
                                    record = rec_idx,
                                    %reason,
                                    "metric call failed; recording sentinel"
                                );
                                cells.insert(
                                    (rec_idx, run_idx, metric_idx),
                                    CellValue::Unavailable(reason.clone()),
                                );
                                failures.lock().expect("failure log poisoned").push(
                                    CellFailure {
                                        run: run.name().to_string(),
                                        metric: metric.name().to_string(),
                                        record: Some(rec_idx),
                                        reason,
                                    },
                                );
                            }
                        }
                    }
                });

            let golds: Vec<&str> = dataset.labels().collect();
            let preds: Vec<&str> = run.predictions().iter().map(String::as_str).collect();
            for (metric_idx, metric) in metrics.iter().enumerate() {
                let MetricFn::Aggregate(func) = metric.func() else {
                    continue;
                };
                match func(dataset.records(), &golds, &preds) {
                    Ok(score) => {
                        aggregates.insert((run_idx, metric_idx), CellValue::Score(score));
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(
                            run = run.name(),
                            metric = metric.name(),
                            %reason,
                            "aggregate metric failed; recording sentinel"
                        );
                        aggregates
                            .insert((run_idx, metric_idx), CellValue::Unavailable(reason.clone()));
                        failures
                            .lock()
                            .expect("failure log poisoned")
                            .push(CellFailure {
                                run: run.name().to_string(),
                                metric: metric.name().to_string(),
                                record: None,
                                reason,
                            });
                    }
                }
            }
        });
    };

    match config.max_concurrency {
        Some(workers) => rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Other(format!("failed to build worker pool: {e}")))?
            .install(compute),
        None => compute(),
    }

    let mut failures = failures
        .into_inner()
        .map_err(|_| Error::Other("failure log poisoned".to_string()))?;
    // Deterministic summary order regardless of worker interleaving
    failures.sort_by(|a, b| {
        (&a.run, &a.metric, a.record).cmp(&(&b.run, &b.metric, b.record))
    });

    let table = ReportTable {
        num_records: dataset.len(),
        run_names: runs.iter().map(|r| r.name().to_string()).collect(),
        metric_names: metrics.iter().map(|m| m.name().to_string()).collect(),
        metric_kinds: metrics.iter().map(Metric::kind).collect(),
        run_index: runs
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name().to_string(), i))
            .collect(),
        metric_index,
        cells: cells.into_iter().collect(),
        aggregates: aggregates.into_iter().collect(),
        failures,
        created_at: Utc::now(),
    };

    if let Some(cache_path) = &config.cache_path {
        std::fs::create_dir_all(cache_path)
            .map_err(|e| Error::Storage(format!("failed to create cache dir: {e}")))?;
        let target = cache_path.join("report.parquet");
        table.write_parquet(&target)?;
        debug!(path = %target.display(), "report cached");
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math_dataset() -> Dataset {
        Dataset::builder()
            .inputs(["2+8?", "10/2?", "3-2?", "5*2?"])
            .labels(["10", "5", "1", "10"])
            .build()
            .unwrap()
    }

    fn dunce_registry(dataset: &Dataset) -> RunRegistry {
        let mut registry = RunRegistry::for_dataset(dataset);
        registry
            .register(
                "dunce",
                [("temperature", crate::Scalar::Float(1.0))],
                ["5", "4", "1", "5"],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_dunce_scenario() {
        let dataset = math_dataset();
        let registry = dunce_registry(&dataset);
        let metrics = vec![
            Metric::by_name("exact_match").unwrap(),
            Metric::by_name("exact_match_rate").unwrap(),
        ];

        let report = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

        let scores: Vec<f64> = (0..4)
            .map(|i| report.cell(i, "dunce", "exact_match").unwrap().score().unwrap())
            .collect();
        assert_eq!(scores, vec![0.0, 0.0, 1.0, 0.0]);

        let rate = report
            .aggregate("dunce", "exact_match_rate")
            .unwrap()
            .score()
            .unwrap();
        assert!((rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cell_counts() {
        let dataset = math_dataset();
        let mut registry = dunce_registry(&dataset);
        registry
            .register(
                "echo",
                std::iter::empty::<(String, crate::Scalar)>(),
                ["10", "5", "1", "10"],
            )
            .unwrap();
        let metrics = vec![
            Metric::by_name("exact_match").unwrap(),
            Metric::by_name("exact_match_rate").unwrap(),
        ];

        let report = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

        // Per-example: N x runs. Aggregate: runs.
        assert_eq!(report.num_cells(), 4 * 2 + 2);
        assert_eq!(report.metric_kind("exact_match"), Some(MetricKind::PerExample));
        assert_eq!(
            report.metric_kind("exact_match_rate"),
            Some(MetricKind::Aggregate)
        );
    }

    #[test]
    fn test_registry_dataset_shape_mismatch() {
        let dataset = math_dataset();
        let registry = RunRegistry::new(3);
        let metrics = vec![Metric::by_name("exact_match").unwrap()];
        let result = evaluate(&dataset, &registry, &metrics, &ReportConfig::default());
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_partial_failure_isolation() {
        let dataset = math_dataset();
        let registry = dunce_registry(&dataset);
        let metrics = vec![Metric::per_example("flaky", |_, _, pred| {
            if pred == "4" {
                Err(Error::Other("cannot score a 4".to_string()))
            } else {
                Ok(1.0)
            }
        })];

        let report = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

        assert!(report.cell(1, "dunce", "flaky").unwrap().is_unavailable());
        for i in [0, 2, 3] {
            assert_eq!(report.cell(i, "dunce", "flaky").unwrap().score(), Some(1.0));
        }
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].record, Some(1));
        assert_eq!(report.failures()[0].metric, "flaky");
    }

    #[test]
    fn test_idempotence() {
        let dataset = math_dataset();
        let registry = dunce_registry(&dataset);
        let metrics = vec![
            Metric::by_name("exact_match").unwrap(),
            Metric::by_name("exact_match_rate").unwrap(),
        ];

        let first = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();
        let second = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

        assert_eq!(first.rows(), second.rows());
    }

    #[test]
    fn test_duplicate_metric_names_rejected() {
        let dataset = math_dataset();
        let registry = dunce_registry(&dataset);
        let metrics = vec![
            Metric::by_name("exact_match").unwrap(),
            Metric::per_example("exact_match", |_, _, _| Ok(0.0)),
        ];
        let result = evaluate(&dataset, &registry, &metrics, &ReportConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_bounded_concurrency() {
        let dataset = math_dataset();
        let registry = dunce_registry(&dataset);
        let metrics = vec![Metric::by_name("exact_match").unwrap()];
        let config = ReportConfig::new().max_concurrency(2);

        let report = evaluate(&dataset, &registry, &metrics, &config).unwrap();
        assert_eq!(report.num_cells(), 4);
    }
}
