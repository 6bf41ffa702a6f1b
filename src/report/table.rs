//! Report materialization - long-format rows, Arrow batches, Parquet cache
//!
//! The canonical materialized layout is long format: one row per cell, with
//! `record_index` null on aggregate rows. This is the schema the query module
//! slices and the report server exposes.

use super::{CellValue, ReportTable};
use crate::metric::MetricKind;
use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One materialized report row (one cell).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// Record index, or `None` for an aggregate cell
    pub record_index: Option<usize>,
    /// Run name
    pub run: String,
    /// Metric name
    pub metric: String,
    /// Score, or `None` when the cell is unavailable
    pub score: Option<f64>,
    /// Failure reason when the cell is unavailable
    pub error: Option<String>,
}

impl ReportRow {
    fn from_cell(
        record_index: Option<usize>,
        run: &str,
        metric: &str,
        value: &CellValue,
    ) -> Self {
        let (score, error) = match value {
            CellValue::Score(s) => (Some(*s), None),
            CellValue::Unavailable(reason) => (None, Some(reason.clone())),
        };
        Self {
            record_index,
            run: run.to_string(),
            metric: metric.to_string(),
            score,
            error,
        }
    }
}

impl ReportTable {
    /// Materialize the table as long-format rows in deterministic order:
    /// per-example cells record-major (then run, then metric), followed by
    /// aggregate cells (run-major, then metric).
    #[must_use]
    pub fn rows(&self) -> Vec<ReportRow> {
        let mut rows = Vec::with_capacity(self.num_cells());

        for record in 0..self.num_records {
            for (run_idx, run) in self.run_names.iter().enumerate() {
                for (metric_idx, metric) in self.metric_names.iter().enumerate() {
                    if self.metric_kinds[metric_idx] != MetricKind::PerExample {
                        continue;
                    }
                    if let Some(value) = self.cells.get(&(record, run_idx, metric_idx)) {
                        rows.push(ReportRow::from_cell(Some(record), run, metric, value));
                    }
                }
            }
        }

        for (run_idx, run) in self.run_names.iter().enumerate() {
            for (metric_idx, metric) in self.metric_names.iter().enumerate() {
                if self.metric_kinds[metric_idx] != MetricKind::Aggregate {
                    continue;
                }
                if let Some(value) = self.aggregates.get(&(run_idx, metric_idx)) {
                    rows.push(ReportRow::from_cell(None, run, metric, value));
                }
            }
        }

        rows
    }

    /// Materialize the table as a single long-format Arrow record batch.
    ///
    /// Schema: `record_index Int64?`, `run Utf8`, `metric Utf8`,
    /// `score Float64?`, `available Boolean`, `error Utf8?`.
    ///
    /// # Errors
    ///
    /// Returns error if batch construction fails.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let rows = self.rows();

        let record_index: Int64Array = rows
            .iter()
            .map(|r| r.record_index.map(|i| i64::try_from(i).unwrap_or(i64::MAX)))
            .collect();
        let run: StringArray = rows.iter().map(|r| Some(r.run.as_str())).collect();
        let metric: StringArray = rows.iter().map(|r| Some(r.metric.as_str())).collect();
        let score: Float64Array = rows.iter().map(|r| r.score).collect();
        let available: BooleanArray = rows.iter().map(|r| Some(r.error.is_none())).collect();
        let error: StringArray = rows.iter().map(|r| r.error.as_deref()).collect();

        let schema = Arc::new(Schema::new(vec![
            Field::new("record_index", DataType::Int64, true),
            Field::new("run", DataType::Utf8, false),
            Field::new("metric", DataType::Utf8, false),
            Field::new("score", DataType::Float64, true),
            Field::new("available", DataType::Boolean, false),
            Field::new("error", DataType::Utf8, true),
        ]));

        let columns: Vec<ArrayRef> = vec![
            Arc::new(record_index),
            Arc::new(run),
            Arc::new(metric),
            Arc::new(score),
            Arc::new(available),
            Arc::new(error),
        ];

        RecordBatch::try_new(schema, columns)
            .map_err(|e| Error::Storage(format!("Failed to build report batch: {e}")))
    }

    /// Persist the materialized report to a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use parquet::arrow::ArrowWriter;
        use std::fs::File;

        let batch = self.to_record_batch()?;
        let file = File::create(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to create Parquet file: {e}")))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
            .map_err(|e| Error::Storage(format!("Failed to create Parquet writer: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| Error::Storage(format!("Failed to write report batch: {e}")))?;
        writer
            .close()
            .map_err(|e| Error::Storage(format!("Failed to finalize Parquet file: {e}")))?;
        Ok(())
    }
}

/// Convert an arbitrary (possibly projected) batch into JSON row maps.
///
/// Used by the report server to return sliced query results without pinning
/// the response shape to the full report schema.
///
/// # Errors
///
/// Returns error on column types outside the report schema.
pub fn batch_to_json_rows(batch: &RecordBatch) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
    use serde_json::Value;

    let schema = batch.schema();
    let mut rows = vec![serde_json::Map::new(); batch.num_rows()];

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let column = batch.column(col_idx);
        for (row_idx, row) in rows.iter_mut().enumerate() {
            if column.is_null(row_idx) {
                row.insert(field.name().clone(), Value::Null);
                continue;
            }
            let value = match column.data_type() {
                DataType::Int64 => {
                    let array = column
                        .as_any()
                        .downcast_ref::<Int64Array>()
                        .ok_or_else(|| Error::Other("Failed to downcast Int64 column".into()))?;
                    Value::from(array.value(row_idx))
                }
                DataType::Float64 => {
                    let array = column
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .ok_or_else(|| Error::Other("Failed to downcast Float64 column".into()))?;
                    Value::from(array.value(row_idx))
                }
                DataType::Utf8 => {
                    let array = column
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| Error::Other("Failed to downcast Utf8 column".into()))?;
                    Value::from(array.value(row_idx))
                }
                DataType::Boolean => {
                    let array = column
                        .as_any()
                        .downcast_ref::<BooleanArray>()
                        .ok_or_else(|| Error::Other("Failed to downcast Boolean column".into()))?;
                    Value::from(array.value(row_idx))
                }
                dt => {
                    return Err(Error::Storage(format!(
                        "Unsupported column type in report batch: {dt:?}"
                    )))
                }
            };
            row.insert(field.name().clone(), value);
        }
    }

    Ok(rows)
}
