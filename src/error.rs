//! Error types for Cotejo
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Structural errors (shape mismatches, duplicate run names, unknown metrics)
//! are fatal at construction time. Per-cell evaluation failures are recorded as
//! sentinels inside the report and never abort the overall computation.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Cotejo error types
#[derive(Error, Debug)]
pub enum Error {
    /// Aligned collections differ in length (fatal at construction)
    #[error("Shape mismatch in {context}: expected {expected} rows, got {actual}")]
    ShapeMismatch {
        /// What was being aligned (e.g. "predictions", "metadata column 'lang'")
        context: String,
        /// Expected row count
        expected: usize,
        /// Actual row count
        actual: usize,
    },

    /// Run name already registered (fatal at registration)
    #[error("Duplicate run name: '{0}'\nRun names key the registry. Register under a new name or drop the existing run first.")]
    DuplicateRun(String),

    /// Metric name or shape not recognized (fatal at setup)
    #[error("Unsupported metric: '{0}'\nUse a built-in metric name or construct one with Metric::per_example / Metric::aggregate.")]
    UnsupportedMetric(String),

    /// A metric call failed for a single cell (isolated, recorded as sentinel)
    #[error("Metric '{metric}' failed for run '{run}' ({scope}): {reason}")]
    MetricEvaluation {
        /// Metric name
        metric: String,
        /// Run name
        run: String,
        /// Cell scope ("record N" or "aggregate")
        scope: String,
        /// Failure reason from the metric function
        reason: String,
    },

    /// External inference/scoring call failed after exhausting retries
    #[error("Provider error: {0}")]
    Provider(String),

    /// Query parsing error
    #[error("SQL parse error: {0}")]
    Parse(String),

    /// Report materialization / cache persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error (unrecognized key, invalid value)
    #[error("Config error: {0}")]
    Config(String),

    /// Report server error
    #[error("Serve error: {0}")]
    Serve(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow/Parquet error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::ShapeMismatch`] with the given context.
    #[must_use]
    pub fn shape_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}
