//! FEN Enrich
//!
//! Event-triggered enrichment of chess position datasets. A new parquet object
//! in the input bucket is scored position by position with a UCI engine and
//! written to the output bucket with four extra columns: `eval`,
//! `eval_replaced`, `winning_chance` and `losing_chance`.
//!
//! # Architecture
//!
//! - **Engine**: UCI engine subprocesses behind [`engine::PositionAnalyzer`]
//! - **Evaluation**: mate sentinel substitution and win/draw/loss chances
//! - **I/O**: object storage with tags (S3 or `object_store`) and the parquet codec
//! - **Pipeline**: idempotency gate and the per-object run
//!
//! # Usage
//!
//! ```no_run
//! use fen_enrich::{build_pipeline, Config, TriggerEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::from_file(&"config.yaml".into())?;
//!     config.validate()?;
//!     let (pipeline, engines) = build_pipeline(&config).await?;
//!     let event = TriggerEvent::new("ObjectCreated:Put", config.input_bucket(), "games/001.parquet");
//!     pipeline.handle(&event).await?;
//!     engines.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod io;
pub mod pipeline;
pub mod position;

pub use config::Config;
pub use engine::{AnalysisScore, EngineError, EnginePool, EngineSettings, PositionAnalyzer, UciEngine};
pub use error::PipelineError;
pub use evaluation::{EvaluationMetrics, MetricsCalculator, WdlModel, MATE_SENTINEL};
pub use event::TriggerEvent;
pub use io::{ObjectStorage, TableCodec, Tag};
pub use pipeline::{GateDecision, IdempotencyGate, Metrics, Pipeline, RunOutcome};
pub use position::Position;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Build a pipeline for a validated configuration.
///
/// Starts `engine.pool_size` engine processes. The returned pool must be shut
/// down by the caller once all events are handled.
pub async fn build_pipeline(config: &Config) -> Result<(Pipeline, Arc<EnginePool>)> {
    let storage = io::create_storage(&config.storage).await?;

    let settings = EngineSettings::from_config(&config.engine);
    tracing::info!(
        "Starting {} engine process(es) from {}",
        config.engine.pool_size,
        settings.path
    );
    let engines = Arc::new(
        EnginePool::start(&settings, config.engine.pool_size)
            .await
            .context("failed to start engine")?,
    );

    let pipeline = Pipeline::new(storage, engines.clone(), config, Metrics::new());
    Ok((pipeline, engines))
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
