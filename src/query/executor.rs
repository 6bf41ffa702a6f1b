//! Slice plan execution against the materialized report
//!
//! Applies filter, projection, sort and limit to a long-format report batch
//! using Arrow compute kernels. Filtering supports the report schema's column
//! types: Int64, Float64, Utf8 and Boolean.

use super::{OrderDirection, SlicePlan};
use crate::{Error, Result};
use arrow::array::{
    Array, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::compute::{self, SortOptions};
use arrow::datatypes::{DataType, Schema};
use std::sync::Arc;

/// Executor for parsed slice plans
#[derive(Debug, Default, Clone, Copy)]
pub struct SliceExecutor;

impl SliceExecutor {
    /// Create a new executor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute a slice plan against a report batch
    ///
    /// # Errors
    /// Returns error if:
    /// - A referenced column is not in the schema
    /// - The filter predicate is malformed or type-incompatible
    /// - An Arrow kernel fails
    pub fn execute(&self, plan: &SlicePlan, batch: &RecordBatch) -> Result<RecordBatch> {
        let filtered = if let Some(ref filter_expr) = plan.filter {
            Self::apply_filter(batch, filter_expr)?
        } else {
            batch.clone()
        };

        let projected = Self::project_columns(&filtered, &plan.columns)?;

        let sorted = if let Some((ref col, direction)) = plan.order_by {
            Self::apply_order_by(&projected, col, direction)?
        } else {
            projected
        };

        Ok(match plan.limit {
            Some(limit) => sorted.slice(0, limit.min(sorted.num_rows())),
            None => sorted,
        })
    }

    /// Apply a simple `column op value` predicate
    fn apply_filter(batch: &RecordBatch, filter_expr: &str) -> Result<RecordBatch> {
        let parts: Vec<&str> = filter_expr.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::Parse(format!(
                "Invalid filter expression: {filter_expr}"
            )));
        }

        let column_name = parts[0];
        let op = parts[1];
        let value_str = parts.get(2..).unwrap_or(&[]).join(" ");

        let schema = batch.schema();
        let column_index = schema
            .fields()
            .iter()
            .position(|f| f.name() == column_name)
            .ok_or_else(|| Error::Parse(format!("Column not found: {column_name}")))?;

        let column = batch.column(column_index);

        let mask = match column.data_type() {
            DataType::Int64 => {
                let array = column
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| Error::Other("Failed to downcast to Int64Array".to_string()))?;
                let value: i64 = value_str
                    .parse()
                    .map_err(|_| Error::Parse(format!("Invalid Int64 value: {value_str}")))?;
                Self::comparison_mask(array.len(), |i| {
                    !array.is_null(i) && compare_ord(array.value(i), value, op)
                })
            }
            DataType::Float64 => {
                let array = column
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| {
                        Error::Other("Failed to downcast to Float64Array".to_string())
                    })?;
                let value: f64 = value_str
                    .parse()
                    .map_err(|_| Error::Parse(format!("Invalid Float64 value: {value_str}")))?;
                Self::comparison_mask(array.len(), |i| {
                    !array.is_null(i) && compare_f64(array.value(i), value, op)
                })
            }
            DataType::Utf8 => {
                let array = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| {
                        Error::Other("Failed to downcast to StringArray".to_string())
                    })?;
                let value = value_str.trim_matches('\'');
                Self::comparison_mask(array.len(), |i| {
                    !array.is_null(i) && compare_str(array.value(i), value, op)
                })
            }
            DataType::Boolean => {
                let array = column
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| {
                        Error::Other("Failed to downcast to BooleanArray".to_string())
                    })?;
                let value: bool = value_str
                    .parse()
                    .map_err(|_| Error::Parse(format!("Invalid Boolean value: {value_str}")))?;
                Self::comparison_mask(array.len(), |i| {
                    !array.is_null(i)
                        && match op {
                            "=" => array.value(i) == value,
                            "!=" | "<>" => array.value(i) != value,
                            _ => false,
                        }
                })
            }
            dt => {
                return Err(Error::Parse(format!(
                    "Filter not supported for data type: {dt:?}"
                )))
            }
        };

        compute::filter_record_batch(batch, &mask)
            .map_err(|e| Error::Storage(format!("Failed to apply filter: {e}")))
    }

    fn comparison_mask<F: Fn(usize) -> bool>(len: usize, predicate: F) -> BooleanArray {
        BooleanArray::from((0..len).map(|i| predicate(i)).collect::<Vec<bool>>())
    }

    /// Project columns from a batch
    fn project_columns(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
        if columns.len() == 1 && columns[0] == "*" {
            return Ok(batch.clone());
        }

        let schema = batch.schema();
        let mut new_columns = Vec::new();
        let mut new_fields = Vec::new();

        for col_name in columns {
            let index = schema
                .fields()
                .iter()
                .position(|f| f.name() == col_name)
                .ok_or_else(|| Error::Parse(format!("Column not found: {col_name}")))?;

            new_columns.push(batch.column(index).clone());
            new_fields.push(schema.field(index).clone());
        }

        let new_schema = Arc::new(Schema::new(new_fields));
        RecordBatch::try_new(new_schema, new_columns)
            .map_err(|e| Error::Storage(format!("Failed to project columns: {e}")))
    }

    /// Sort the batch by a single column
    fn apply_order_by(
        batch: &RecordBatch,
        col_name: &str,
        direction: OrderDirection,
    ) -> Result<RecordBatch> {
        let schema = batch.schema();
        let col_index = schema
            .fields()
            .iter()
            .position(|f| f.name() == col_name)
            .ok_or_else(|| Error::Parse(format!("Column not found: {col_name}")))?;

        let options = SortOptions {
            descending: matches!(direction, OrderDirection::Desc),
            nulls_first: false,
        };
        let indices = compute::sort_to_indices(batch.column(col_index), Some(options), None)
            .map_err(|e| Error::Storage(format!("Failed to sort: {e}")))?;

        let sorted_columns = batch
            .columns()
            .iter()
            .map(|c| {
                compute::take(c.as_ref(), &indices, None)
                    .map_err(|e| Error::Storage(format!("Failed to reorder column: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        RecordBatch::try_new(batch.schema(), sorted_columns)
            .map_err(|e| Error::Storage(format!("Failed to build sorted batch: {e}")))
    }
}

fn compare_ord(lhs: i64, rhs: i64, op: &str) -> bool {
    match op {
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        "=" => lhs == rhs,
        "!=" | "<>" => lhs != rhs,
        _ => false,
    }
}

fn compare_f64(lhs: f64, rhs: f64, op: &str) -> bool {
    match op {
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        "=" => (lhs - rhs).abs() < f64::EPSILON,
        "!=" | "<>" => (lhs - rhs).abs() >= f64::EPSILON,
        _ => false,
    }
}

fn compare_str(lhs: &str, rhs: &str, op: &str) -> bool {
    match op {
        "=" => lhs == rhs,
        "!=" | "<>" => lhs != rhs,
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        _ => false,
    }
}
