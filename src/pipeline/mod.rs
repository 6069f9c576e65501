//! Event-driven enrichment of position datasets.

mod gate;
mod metrics;
mod processor;

pub use gate::{GateDecision, IdempotencyGate, MAX_OBJECT_TAGS, TIMESTAMP_FORMAT};
pub use metrics::{Metrics, MetricsSnapshot};
pub use processor::{Pipeline, PipelineSettings, RunOutcome, RunSummary};
