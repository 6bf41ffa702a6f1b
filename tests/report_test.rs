//! Evaluation & Reporting Engine Tests
//!
//! Cell counts, the reference exact-match scenario, idempotence and per-cell
//! failure isolation.

use cotejo::{
    evaluate, Dataset, Error, Metric, MetricKind, ReportConfig, RunRegistry, Scalar,
};

fn math_dataset() -> Dataset {
    Dataset::builder()
        .inputs([
            "What is 2 + 8?",
            "What is 10 / 2?",
            "What is 3 - 2?",
            "What is 5 * 2?",
        ])
        .labels(["10", "5", "1", "10"])
        .build()
        .expect("dataset builds")
}

fn registry_with(dataset: &Dataset, runs: &[(&str, [&str; 4])]) -> RunRegistry {
    let mut registry = RunRegistry::for_dataset(dataset);
    for (name, predictions) in runs {
        registry
            .register(
                *name,
                [("temperature", Scalar::Float(0.0))],
                predictions.iter().copied(),
            )
            .expect("run registers");
    }
    registry
}

// =============================================================================
// Reference scenario: exact match on four math questions
// =============================================================================

#[test]
fn test_dunce_exact_match_scenario() {
    let dataset = math_dataset();
    let registry = registry_with(&dataset, &[("dunce", ["5", "4", "1", "5"])]);
    let metrics = vec![
        Metric::by_name("exact_match").unwrap(),
        Metric::by_name("exact_match_rate").unwrap(),
    ];

    let report = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

    let per_example: Vec<f64> = (0..4)
        .map(|i| {
            report
                .cell(i, "dunce", "exact_match")
                .expect("cell exists")
                .score()
                .expect("cell scored")
        })
        .collect();
    assert_eq!(per_example, vec![0.0, 0.0, 1.0, 0.0]);

    let rate = report
        .aggregate("dunce", "exact_match_rate")
        .expect("aggregate exists")
        .score()
        .expect("aggregate scored");
    assert!((rate - 0.25).abs() < f64::EPSILON);
}

// =============================================================================
// Cell-count accounting
// =============================================================================

#[test]
fn test_per_example_metric_yields_n_by_runs_cells() {
    let dataset = math_dataset();
    let registry = registry_with(
        &dataset,
        &[
            ("dunce", ["5", "4", "1", "5"]),
            ("echo", ["10", "5", "1", "10"]),
            ("blank", ["", "", "", ""]),
        ],
    );
    let metrics = vec![
        Metric::by_name("exact_match").unwrap(),
        Metric::by_name("exact_match_rate").unwrap(),
    ];

    let report = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

    let mut per_example_cells = 0;
    for record in 0..4 {
        for run in report.run_names() {
            if report.cell(record, run, "exact_match").is_some() {
                per_example_cells += 1;
            }
        }
    }
    assert_eq!(per_example_cells, 4 * 3);

    let aggregate_cells = report
        .run_names()
        .iter()
        .filter_map(|run| report.aggregate(run, "exact_match_rate"))
        .count();
    assert_eq!(aggregate_cells, 3);

    assert_eq!(report.num_cells(), 4 * 3 + 3);
    assert_eq!(report.metric_kind("exact_match"), Some(MetricKind::PerExample));
}

#[test]
fn test_no_table_on_shape_mismatch() {
    let dataset = math_dataset();
    // Registry expecting a different record count than the dataset
    let registry = RunRegistry::new(3);
    let metrics = vec![Metric::by_name("exact_match").unwrap()];

    let result = evaluate(&dataset, &registry, &metrics, &ReportConfig::default());
    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
}

// =============================================================================
// Idempotence: metric functions are pure
// =============================================================================

#[test]
fn test_identical_inputs_identical_report() {
    let dataset = math_dataset();
    let registry = registry_with(
        &dataset,
        &[("dunce", ["5", "4", "1", "5"]), ("echo", ["10", "5", "1", "10"])],
    );
    let metrics = vec![
        Metric::by_name("exact_match").unwrap(),
        Metric::by_name("token_overlap").unwrap(),
        Metric::by_name("exact_match_rate").unwrap(),
    ];
    let config = ReportConfig::default();

    let first = evaluate(&dataset, &registry, &metrics, &config).unwrap();
    let second = evaluate(&dataset, &registry, &metrics, &config).unwrap();

    assert_eq!(first.rows(), second.rows());
}

// =============================================================================
// Partial-failure isolation
// =============================================================================

#[test]
fn test_single_failing_cell_is_isolated() {
    let dataset = math_dataset();
    let registry = registry_with(
        &dataset,
        &[("dunce", ["5", "4", "1", "5"]), ("echo", ["10", "5", "1", "10"])],
    );
    // Fails for exactly one (record, run) pair: prediction "4" occurs only for
    // run "dunce" at record 1
    let metrics = vec![
        Metric::per_example("fragile", |_, _, pred| {
            if pred == "4" {
                Err(Error::Other("refusing to score '4'".to_string()))
            } else {
                Ok(f64::from(u32::try_from(pred.len()).unwrap_or(0)))
            }
        }),
        Metric::by_name("exact_match_rate").unwrap(),
    ];

    let report = evaluate(&dataset, &registry, &metrics, &ReportConfig::default()).unwrap();

    // The failing cell carries a sentinel
    let bad = report.cell(1, "dunce", "fragile").unwrap();
    assert!(bad.is_unavailable());
    assert!(bad.score().is_none());

    // Every sibling cell computed normally
    for record in 0..4 {
        for run in ["dunce", "echo"] {
            if record == 1 && run == "dunce" {
                continue;
            }
            let cell = report.cell(record, run, "fragile").unwrap();
            assert!(cell.score().is_some(), "cell ({record}, {run}) must score");
        }
    }

    // Aggregates unaffected
    assert!(report.aggregate("dunce", "exact_match_rate").unwrap().score().is_some());

    // Error summary lists exactly the one failure
    assert_eq!(report.failures().len(), 1);
    let failure = &report.failures()[0];
    assert_eq!(failure.run, "dunce");
    assert_eq!(failure.metric, "fragile");
    assert_eq!(failure.record, Some(1));
    assert!(failure.reason.contains("refusing to score"));

    // Summary entries surface as typed per-cell errors
    let typed = failure.to_error();
    assert!(matches!(typed, Error::MetricEvaluation { .. }));
    assert!(typed.to_string().contains("record 1"));
}

// =============================================================================
// Structural setup errors
// =============================================================================

#[test]
fn test_unknown_metric_name_is_fatal() {
    let result = Metric::by_name("levenshtein_oops");
    assert!(matches!(result, Err(Error::UnsupportedMetric(_))));
}

#[test]
fn test_config_rejects_unknown_keys() {
    let result = ReportConfig::from_json(serde_json::json!({
        "view": "structured",
        "cache_pth": "/tmp/typo"
    }));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_cache_path_persists_report() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = math_dataset();
    let registry = registry_with(&dataset, &[("dunce", ["5", "4", "1", "5"])]);
    let metrics = vec![Metric::by_name("exact_match").unwrap()];
    let config = ReportConfig::new().cache_path(dir.path().join("cache"));

    evaluate(&dataset, &registry, &metrics, &config).unwrap();

    assert!(dir.path().join("cache").join("report.parquet").exists());
}
