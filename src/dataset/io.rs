//! Dataset ingestion and cache persistence
//!
//! Two format-agnostic entry points: row-iterator ingestion for CSV-like
//! sources (any `(column -> value)` maps), and a Parquet round-trip for
//! caching assembled datasets between analysis sessions.

use super::{Dataset, Record, Scalar};
use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

/// One raw source row: named column values.
pub type Row = std::collections::BTreeMap<String, Scalar>;

impl Dataset {
    /// Assemble a dataset from an iterator of raw rows.
    ///
    /// `input_column` and `label_column` designate which fields hold the model
    /// input and the gold label; every other field becomes record metadata.
    /// Row order is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any row is missing the input or label
    /// column.
    pub fn from_rows<I>(rows: I, input_column: &str, label_column: &str) -> Result<Self>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut records = Vec::new();
        for (index, mut row) in rows.into_iter().enumerate() {
            let input = row.remove(input_column).ok_or_else(|| {
                Error::Config(format!("row {index} is missing input column '{input_column}'"))
            })?;
            let label = row.remove(label_column).ok_or_else(|| {
                Error::Config(format!("row {index} is missing label column '{label_column}'"))
            })?;
            let mut record = Record::new(input.to_string(), label.to_string());
            record.metadata = row;
            records.push(record);
        }

        Ok(Self {
            records,
            input_column: input_column.to_string(),
            label_column: label_column.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Persist the dataset to a Parquet file.
    ///
    /// Metadata columns are written with a uniform Arrow type when all values
    /// share a [`Scalar`] variant, and as strings otherwise.
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
            .map_err(|e| Error::Storage(format!("Failed to write record batch: {e}")))?;
        writer
            .close()
            .map_err(|e| Error::Storage(format!("Failed to finalize Parquet file: {e}")))?;
        Ok(())
    }

    /// Load a dataset previously written with [`write_parquet`](Self::write_parquet).
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, or if the designated input or
    /// label column is absent.
    pub fn read_parquet<P: AsRef<Path>>(
        path: P,
        input_column: &str,
        label_column: &str,
    ) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to open Parquet file: {e}")))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::Storage(format!("Failed to parse Parquet file: {e}")))?;
        let reader = builder
            .build()
            .map_err(|e| Error::Storage(format!("Failed to create Parquet reader: {e}")))?;

        let mut rows: Vec<Row> = Vec::new();
        for batch in reader {
            let batch =
                batch.map_err(|e| Error::Storage(format!("Failed to read record batch: {e}")))?;
            append_rows(&mut rows, &batch)?;
        }

        Self::from_rows(rows, input_column, label_column)
    }

    /// Materialize the dataset as a single Arrow record batch.
    ///
    /// # Errors
    ///
    /// Returns error if batch construction fails.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![
            Field::new(&self.input_column, DataType::Utf8, false),
            Field::new(&self.label_column, DataType::Utf8, false),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                self.records.iter().map(Record::input),
            )),
            Arc::new(StringArray::from_iter_values(
                self.records.iter().map(Record::label),
            )),
        ];

        // Union of metadata keys across records; absent values become nulls
        let mut keys: Vec<String> = Vec::new();
        for record in &self.records {
            for key in record.metadata.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys.sort_unstable();

        for key in &keys {
            let values: Vec<Option<&Scalar>> =
                self.records.iter().map(|r| r.meta(key)).collect();
            let (field, column) = metadata_column(key, &values);
            fields.push(field);
            columns.push(column);
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .map_err(|e| Error::Storage(format!("Failed to build dataset batch: {e}")))
    }
}

/// Pick a uniform Arrow type for a metadata column, falling back to Utf8.
fn metadata_column(name: &str, values: &[Option<&Scalar>]) -> (Field, ArrayRef) {
    let non_null = values.iter().flatten().count();
    let uniform = |pred: fn(&Scalar) -> bool| {
        non_null > 0 && values.iter().flatten().all(|v| pred(v))
    };

    if uniform(|v| matches!(v, Scalar::Int(_))) {
        let array: Int64Array = values
            .iter()
            .map(|v| match v {
                Some(Scalar::Int(i)) => Some(*i),
                _ => None,
            })
            .collect();
        return (Field::new(name, DataType::Int64, true), Arc::new(array));
    }
    if uniform(|v| matches!(v, Scalar::Float(_))) {
        let array: Float64Array = values
            .iter()
            .map(|v| match v {
                Some(Scalar::Float(x)) => Some(*x),
                _ => None,
            })
            .collect();
        return (Field::new(name, DataType::Float64, true), Arc::new(array));
    }
    if uniform(|v| matches!(v, Scalar::Bool(_))) {
        let array: BooleanArray = values
            .iter()
            .map(|v| match v {
                Some(Scalar::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        return (Field::new(name, DataType::Boolean, true), Arc::new(array));
    }

    let array: StringArray = values.iter().map(|v| v.map(ToString::to_string)).collect();
    (Field::new(name, DataType::Utf8, true), Arc::new(array))
}

/// Convert one batch back into raw rows.
fn append_rows(rows: &mut Vec<Row>, batch: &RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let start = rows.len();
    rows.resize_with(start + batch.num_rows(), Row::new);

    for (col_index, field) in schema.fields().iter().enumerate() {
        let column = batch.column(col_index);
        for row_index in 0..batch.num_rows() {
            if column.is_null(row_index) {
                continue;
            }
            let value = scalar_at(column, row_index, field.name())?;
            rows[start + row_index].insert(field.name().clone(), value);
        }
    }
    Ok(())
}

fn scalar_at(column: &ArrayRef, index: usize, name: &str) -> Result<Scalar> {
    match column.data_type() {
        DataType::Utf8 => {
            let array = column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::Other(format!("Failed to downcast column '{name}'")))?;
            Ok(Scalar::Str(array.value(index).to_string()))
        }
        DataType::Int64 => {
            let array = column
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| Error::Other(format!("Failed to downcast column '{name}'")))?;
            Ok(Scalar::Int(array.value(index)))
        }
        DataType::Float64 => {
            let array = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| Error::Other(format!("Failed to downcast column '{name}'")))?;
            Ok(Scalar::Float(array.value(index)))
        }
        DataType::Boolean => {
            let array = column
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| Error::Other(format!("Failed to downcast column '{name}'")))?;
            Ok(Scalar::Bool(array.value(index)))
        }
        dt => Err(Error::Storage(format!(
            "Unsupported column type in dataset file: {dt:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Scalar)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_from_rows_designates_columns() {
        let rows = vec![
            row(&[
                ("question", "What is 2+8?".into()),
                ("answer", "10".into()),
                ("difficulty", Scalar::Int(1)),
            ]),
            row(&[
                ("question", "What is 10/2?".into()),
                ("answer", "5".into()),
                ("difficulty", Scalar::Int(2)),
            ]),
        ];

        let ds = Dataset::from_rows(rows, "question", "answer").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.input_column(), "question");
        assert_eq!(ds.get(0).unwrap().input(), "What is 2+8?");
        assert_eq!(ds.get(1).unwrap().meta("difficulty"), Some(&Scalar::Int(2)));
    }

    #[test]
    fn test_from_rows_missing_column() {
        let rows = vec![row(&[("question", "q".into())])];
        let result = Dataset::from_rows(rows, "question", "answer");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_to_record_batch_column_types() {
        let ds = Dataset::builder()
            .inputs(["a", "b"])
            .labels(["1", "2"])
            .metadata("difficulty", [Scalar::Int(1), Scalar::Int(2)])
            .metadata("lang", ["en", "de"])
            .build()
            .unwrap();

        let batch = ds.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        assert_eq!(
            schema.field_with_name("difficulty").unwrap().data_type(),
            &DataType::Int64
        );
        assert_eq!(
            schema.field_with_name("lang").unwrap().data_type(),
            &DataType::Utf8
        );
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.parquet");

        let ds = Dataset::builder()
            .inputs(["a", "b", "c"])
            .labels(["1", "2", "3"])
            .metadata("score", [Scalar::Float(0.5), Scalar::Float(0.25), Scalar::Float(1.0)])
            .build()
            .unwrap();

        ds.write_parquet(&path).unwrap();
        let loaded = Dataset::read_parquet(&path, "input", "label").unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get(1).unwrap().label(), "2");
        assert_eq!(
            loaded.get(2).unwrap().meta("score"),
            Some(&Scalar::Float(1.0))
        );
    }
}
