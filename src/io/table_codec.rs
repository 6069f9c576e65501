//! Parquet datasets with a column of FEN lists.
//!
//! Decoding keeps the original record batch untouched and parses the
//! position column alongside it. Encoding appends one list column per metric,
//! each list aligned index-for-index with the row's positions.

use crate::error::PipelineError;
use crate::evaluation::EvaluationMetrics;
use crate::position::{Position, PositionSequence};
use arrow::array::{Array, ArrayRef, AsArray, Float64Builder, Int64Builder, ListBuilder};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::sync::Arc;

/// Names of the appended metric columns, in output order.
pub const METRIC_COLUMNS: [&str; 4] = ["eval", "eval_replaced", "winning_chance", "losing_chance"];

/// A decoded dataset: original rows plus parsed positions per row.
#[derive(Debug, Clone)]
pub struct Dataset {
    batch: RecordBatch,
    positions: Vec<PositionSequence>,
}

impl Dataset {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Original columns as read.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn positions(&self) -> &[PositionSequence] {
        &self.positions
    }

    /// Total positions across all rows.
    pub fn position_count(&self) -> usize {
        self.positions.iter().map(Vec::len).sum()
    }

    /// Attach metrics, one sequence per row aligned with that row's positions.
    pub fn enrich(self, metrics: Vec<Vec<EvaluationMetrics>>) -> Result<EnrichedDataset, PipelineError> {
        if metrics.len() != self.positions.len() {
            return Err(PipelineError::Misaligned(format!(
                "{} metric rows for {} dataset rows",
                metrics.len(),
                self.positions.len()
            )));
        }
        for (row, (m, p)) in metrics.iter().zip(&self.positions).enumerate() {
            if m.len() != p.len() {
                return Err(PipelineError::Misaligned(format!(
                    "row {} has {} metrics for {} positions",
                    row,
                    m.len(),
                    p.len()
                )));
            }
        }
        Ok(EnrichedDataset { dataset: self, metrics })
    }
}

/// A dataset with metrics for every position.
#[derive(Debug, Clone)]
pub struct EnrichedDataset {
    dataset: Dataset,
    metrics: Vec<Vec<EvaluationMetrics>>,
}

impl EnrichedDataset {
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn metrics(&self) -> &[Vec<EvaluationMetrics>] {
        &self.metrics
    }
}

/// Reads and writes parquet datasets.
#[derive(Debug, Clone)]
pub struct TableCodec {
    position_column: String,
}

impl TableCodec {
    pub fn new(position_column: impl Into<String>) -> Self {
        Self {
            position_column: position_column.into(),
        }
    }

    /// Decode parquet bytes and parse the position column.
    pub fn decode(&self, bytes: Bytes) -> Result<Dataset, PipelineError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;

        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;

        for name in METRIC_COLUMNS {
            if schema.column_with_name(name).is_some() {
                return Err(PipelineError::ColumnConflict(name.to_string()));
            }
        }

        let (index, _) = schema
            .column_with_name(&self.position_column)
            .ok_or_else(|| PipelineError::MissingColumn(self.position_column.clone()))?;
        let positions = self.parse_positions(batch.column(index))?;

        tracing::debug!(
            "Decoded {} rows ({} batches, {} columns)",
            batch.num_rows(),
            batches.len(),
            batch.num_columns()
        );

        Ok(Dataset { batch, positions })
    }

    /// Encode the original columns followed by the metric columns.
    pub fn encode(&self, enriched: &EnrichedDataset) -> Result<Bytes, PipelineError> {
        let mut eval = ListBuilder::new(Int64Builder::new());
        let mut eval_replaced = ListBuilder::new(Int64Builder::new());
        let mut winning_chance = ListBuilder::new(Float64Builder::new());
        let mut losing_chance = ListBuilder::new(Float64Builder::new());

        for row in enriched.metrics() {
            for m in row {
                eval.values().append_value(m.eval as i64);
                eval_replaced.values().append_value(m.eval_replaced as i64);
                winning_chance.values().append_value(m.winning_chance);
                losing_chance.values().append_value(m.losing_chance);
            }
            eval.append(true);
            eval_replaced.append(true);
            winning_chance.append(true);
            losing_chance.append(true);
        }

        let appended: [ArrayRef; 4] = [
            Arc::new(eval.finish()),
            Arc::new(eval_replaced.finish()),
            Arc::new(winning_chance.finish()),
            Arc::new(losing_chance.finish()),
        ];

        let original = enriched.dataset().batch();
        let original_schema = original.schema();

        let mut fields: Vec<FieldRef> = original_schema.fields().iter().cloned().collect();
        let mut columns: Vec<ArrayRef> = original.columns().to_vec();
        for (name, array) in METRIC_COLUMNS.iter().zip(appended) {
            fields.push(Arc::new(Field::new(*name, array.data_type().clone(), true)));
            columns.push(array);
        }

        let schema = Schema::new_with_metadata(fields, original_schema.metadata().clone());
        let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
        write_batch(&batch)
    }

    fn parse_positions(&self, array: &ArrayRef) -> Result<Vec<PositionSequence>, PipelineError> {
        match array.data_type() {
            DataType::Utf8 => self.parse_json_cells(array.as_string::<i32>().iter()),
            DataType::LargeUtf8 => self.parse_json_cells(array.as_string::<i64>().iter()),
            DataType::List(item) if item.data_type() == &DataType::Utf8 => {
                let list = array.as_list::<i32>();
                let mut rows = Vec::with_capacity(list.len());
                for row in 0..list.len() {
                    if list.is_null(row) {
                        return Err(self.malformed(row, "null cell"));
                    }
                    let values = list.value(row);
                    let mut fens = Vec::with_capacity(values.len());
                    for fen in values.as_string::<i32>().iter() {
                        fens.push(fen.ok_or_else(|| self.malformed(row, "null position in list"))?);
                    }
                    rows.push(parse_sequence(row, fens)?);
                }
                Ok(rows)
            }
            other => Err(PipelineError::UnsupportedColumnType {
                column: self.position_column.clone(),
                data_type: other.to_string(),
            }),
        }
    }

    fn parse_json_cells<'a, I>(&self, cells: I) -> Result<Vec<PositionSequence>, PipelineError>
    where
        I: Iterator<Item = Option<&'a str>>,
    {
        cells
            .enumerate()
            .map(|(row, cell)| {
                let text = cell.ok_or_else(|| self.malformed(row, "null cell"))?;
                let fens: Vec<String> = serde_json::from_str(text)
                    .map_err(|e| self.malformed(row, format!("expected a JSON list of strings: {}", e)))?;
                parse_sequence(row, fens.iter().map(String::as_str))
            })
            .collect()
    }

    fn malformed(&self, row: usize, reason: impl Into<String>) -> PipelineError {
        PipelineError::MalformedColumn {
            column: self.position_column.clone(),
            row,
            reason: reason.into(),
        }
    }
}

fn parse_sequence<'a>(row: usize, fens: impl IntoIterator<Item = &'a str>) -> Result<PositionSequence, PipelineError> {
    fens.into_iter()
        .enumerate()
        .map(|(index, fen)| {
            Position::parse(fen).map_err(|source| PipelineError::InvalidPosition { row, index, source })
        })
        .collect()
}

/// Write a single record batch as a parquet file.
pub fn write_batch(batch: &RecordBatch) -> Result<Bytes, PipelineError> {
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use arrow::array::{Int64Array, StringArray};

    /// Parquet file with columns `game_id`, `fen` (JSON lists) and `white_elo`.
    pub fn games_parquet(games: &[(&str, &[&str])]) -> Bytes {
        let ids: Vec<&str> = games.iter().map(|(id, _)| *id).collect();
        let fens: Vec<String> = games
            .iter()
            .map(|(_, fens)| serde_json::to_string(fens).unwrap())
            .collect();
        let elos: Vec<i64> = (0..games.len() as i64).map(|i| 1500 + i).collect();

        let batch = RecordBatch::try_from_iter([
            ("game_id", Arc::new(StringArray::from(ids)) as ArrayRef),
            ("fen", Arc::new(StringArray::from(fens)) as ArrayRef),
            ("white_elo", Arc::new(Int64Array::from(elos)) as ArrayRef),
        ])
        .unwrap();

        write_batch(&batch).unwrap()
    }

    /// Read every batch of a parquet file into one.
    pub fn read_parquet(bytes: Bytes) -> RecordBatch {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).unwrap();
        let schema = builder.schema().clone();
        let batches: Vec<_> = builder.build().unwrap().map(|b| b.unwrap()).collect();
        concat_batches(&schema, &batches).unwrap()
    }
}
