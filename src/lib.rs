//! # Cotejo: Embedded Experiment Comparison Engine
//!
//! Cotejo compares named experiment runs of language-model outputs over a
//! labeled dataset: assemble records, register aligned prediction runs,
//! compute per-example and aggregate metrics in parallel, and browse the
//! resulting report table interactively over a local HTTP endpoint.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: Aligned-collection lengths validated at construction
//! - **Jidoka**: Per-cell failure isolation (one bad metric call never sinks the report)
//! - **Heijunka**: Provider calls spread across a requests-per-minute budget
//!
//! ## Example Usage
//!
//! ```rust
//! use cotejo::{Dataset, Metric, ReportConfig, RunRegistry, Scalar};
//!
//! # fn main() -> cotejo::Result<()> {
//! let dataset = Dataset::builder()
//!     .inputs(["What is 2 + 8?", "What is 10 / 2?"])
//!     .labels(["10", "5"])
//!     .build()?;
//!
//! let mut runs = RunRegistry::for_dataset(&dataset);
//! runs.register("baseline", [("temperature", Scalar::Float(0.0))], ["10", "4"])?;
//!
//! let metrics = vec![Metric::by_name("exact_match")?, Metric::by_name("exact_match_rate")?];
//! let report = cotejo::evaluate(&dataset, &runs, &metrics, &ReportConfig::default())?;
//!
//! assert_eq!(report.num_cells(), 2 * 1 + 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod dataset;
pub mod error;
pub mod metric;
#[cfg(feature = "providers")]
pub mod provider;
pub mod query;
pub mod registry;
pub mod report;
#[cfg(feature = "serve")]
pub mod serve;

pub use dataset::{Dataset, DatasetBuilder, Record, Scalar};
pub use error::{Error, Result};
pub use metric::{Metric, MetricKind};
pub use registry::{ExperimentRun, RunRegistry};
pub use report::{evaluate, CellFailure, CellValue, ReportConfig, ReportTable, ViewMode};
