//! Per-object processing: gate, fetch, score, store, tag.
//!
//! A run either writes a complete enriched object and then tags the input, or
//! fails without writing anything. The input is tagged only after the output
//! write succeeded, so a tagged input always has an output object.

use crate::config::Config;
use crate::engine::PositionAnalyzer;
use crate::error::PipelineError;
use crate::evaluation::{EvaluationMetrics, MetricsCalculator};
use crate::event::TriggerEvent;
use crate::io::{Dataset, ObjectStorage, StorageError, TableCodec};
use crate::pipeline::{GateDecision, IdempotencyGate, Metrics};
use crate::position::Position;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Run parameters taken from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bucket events are expected to come from
    pub input_bucket: String,

    /// Bucket enriched objects are written to
    pub output_bucket: String,

    /// Engine search depth
    pub depth: u32,

    /// Positions scored concurrently
    pub position_concurrency: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            input_bucket: config.input_bucket().to_string(),
            output_bucket: config.output_bucket().to_string(),
            depth: config.engine.depth,
            position_concurrency: config.processing.position_concurrency.max(1),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Gate rejected the object; nothing was read or written
    Skipped(GateDecision),

    /// Enriched object written and input tagged
    Processed(RunSummary),
}

/// Details of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub key: String,
    pub output_bucket: String,
    pub rows: usize,
    pub positions: usize,
    pub processed_at: String,
}

/// The enrichment pipeline.
pub struct Pipeline {
    storage: Arc<dyn ObjectStorage>,
    analyzer: Arc<dyn PositionAnalyzer>,
    gate: IdempotencyGate,
    codec: TableCodec,
    calculator: MetricsCalculator,
    settings: PipelineSettings,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        analyzer: Arc<dyn PositionAnalyzer>,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            analyzer,
            gate: IdempotencyGate::new(config.table.extension.clone(), config.processing.tag_name.clone()),
            codec: TableCodec::new(config.table.position_column.clone()),
            calculator: MetricsCalculator::new(config.table.wdl_model, config.table.wdl_ply),
            settings: PipelineSettings::from_config(config),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Handle one trigger event.
    pub async fn handle(&self, event: &TriggerEvent) -> Result<RunOutcome, PipelineError> {
        tracing::info!(
            "Received event: {} on bucket: {} for object: {}",
            event.event_name,
            event.bucket_name,
            event.object_key
        );

        if event.bucket_name != self.settings.input_bucket {
            tracing::warn!(
                "Event bucket {} differs from configured input bucket {}",
                event.bucket_name,
                self.settings.input_bucket
            );
        }

        let result = self.run(&event.bucket_name, &event.object_key).await;
        match &result {
            Ok(RunOutcome::Skipped(_)) => self.metrics.add_object_skipped(),
            Ok(RunOutcome::Processed(_)) => self.metrics.add_object_processed(),
            Err(e) => {
                self.metrics.add_failure();
                tracing::error!("Processing of {} failed: {}", event.object_key, e);
            }
        }
        result
    }

    /// Process `bucket/key`.
    pub async fn run(&self, bucket: &str, key: &str) -> Result<RunOutcome, PipelineError> {
        let tags = self.timed(self.storage.get_object_tags(bucket, key)).await?;

        let decision = self.gate.decide(key, &tags);
        match decision {
            GateDecision::WrongFormat => {
                tracing::info!("Will not process {}, expected a {} object", key, self.gate.extension());
                return Ok(RunOutcome::Skipped(decision));
            }
            GateDecision::AlreadyProcessed => {
                tracing::info!("Object {} has previously been processed", key);
                return Ok(RunOutcome::Skipped(decision));
            }
            GateDecision::Eligible => {}
        }

        // Input must be able to take the processed tag
        if !self.gate.has_tag_room(&tags) {
            return Err(PipelineError::TagLimit {
                key: key.to_string(),
                count: tags.len(),
            });
        }

        tracing::info!("Loading {} from bucket {}", key, bucket);
        let body = self.timed(self.storage.get_object(bucket, key)).await?;
        self.metrics.add_bytes_read(body.len() as u64);

        let dataset = self.codec.decode(body)?;
        let rows = dataset.num_rows();
        let positions = dataset.position_count();

        tracing::info!("Analysing {} positions across {} rows", positions, rows);
        let scored = self.score_dataset(&dataset).await?;
        let enriched = dataset.enrich(scored)?;
        let output = self.codec.encode(&enriched)?;

        let now = Utc::now();
        let output_len = output.len() as u64;

        tracing::info!("Uploading enriched {} to bucket {}", key, self.settings.output_bucket);
        self.timed(self.storage.put_object(
            &self.settings.output_bucket,
            key,
            output,
            &[self.gate.processed_tag(now)],
        ))
        .await?;
        self.metrics.add_bytes_written(output_len);

        self.timed(self.storage.put_object_tags(bucket, key, &self.gate.mark_processed(&tags, now)))
            .await?;
        self.metrics.add_rows(rows as u64);

        let processed_at = self.gate.processed_tag(now).value;
        tracing::info!(
            "Processing of {} complete and uploaded to {} bucket",
            key,
            self.settings.output_bucket
        );

        Ok(RunOutcome::Processed(RunSummary {
            key: key.to_string(),
            output_bucket: self.settings.output_bucket.clone(),
            rows,
            positions,
            processed_at,
        }))
    }

    /// Score every position, keeping row and move order.
    async fn score_dataset(&self, dataset: &Dataset) -> Result<Vec<Vec<EvaluationMetrics>>, PipelineError> {
        let flat: Vec<EvaluationMetrics> = stream::iter(dataset.positions().iter().flatten())
            .map(|position| self.score_position(position))
            .buffered(self.settings.position_concurrency)
            .try_collect()
            .await?;

        let mut flat = flat.into_iter();
        Ok(dataset
            .positions()
            .iter()
            .map(|sequence| flat.by_ref().take(sequence.len()).collect())
            .collect())
    }

    async fn score_position(&self, position: &Position) -> Result<EvaluationMetrics, PipelineError> {
        let start = Instant::now();
        let score = self.analyzer.analyze(position, self.settings.depth).await?;
        self.metrics.add_engine_time(start.elapsed());

        let metrics = self.calculator.derive(score, &position.context());
        self.metrics.add_position(score.is_mate());

        tracing::debug!(
            "Scored {} as {:?}: eval {} (replaced: {})",
            position,
            score,
            metrics.eval,
            metrics.eval_replaced
        );
        Ok(metrics)
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.metrics.add_storage_time(start.elapsed());
        Ok(result?)
    }
}
