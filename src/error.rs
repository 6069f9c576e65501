//! Errors that abort a pipeline run.

use crate::engine::EngineError;
use crate::io::StorageError;
use crate::position::PositionError;
use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Fatal conditions for one run. None of them leave an output object behind
/// or tag the input, so a redelivered event retries from scratch.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("column '{0}' not found in dataset")]
    MissingColumn(String),

    #[error("column '{column}' has unsupported type {data_type}")]
    UnsupportedColumnType { column: String, data_type: String },

    #[error("malformed value in column '{column}' at row {row}: {reason}")]
    MalformedColumn {
        column: String,
        row: usize,
        reason: String,
    },

    #[error("row {row}, position {index}: {source}")]
    InvalidPosition {
        row: usize,
        index: usize,
        #[source]
        source: PositionError,
    },

    #[error("dataset already has a '{0}' column")]
    ColumnConflict(String),

    #[error("object {key} already has {count} tags, no room for the processed tag")]
    TagLimit { key: String, count: usize },

    #[error("metrics do not line up with positions: {0}")]
    Misaligned(String),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl PipelineError {
    /// Whether the engine caused this failure.
    pub fn is_engine(&self) -> bool {
        matches!(self, PipelineError::Engine(_))
    }
}
