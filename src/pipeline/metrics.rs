//! Counters and timings for pipeline runs.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics shared by all runs of one process.
#[derive(Debug)]
pub struct Metrics {
    /// Objects enriched and written
    pub objects_processed: AtomicU64,

    /// Objects skipped by the gate
    pub objects_skipped: AtomicU64,

    /// Runs that failed
    pub failures: AtomicU64,

    /// Dataset rows enriched
    pub rows_processed: AtomicU64,

    /// Positions scored by the engine
    pub positions_analyzed: AtomicU64,

    /// Positions whose eval was replaced by the mate sentinel
    pub mate_positions: AtomicU64,

    /// Bytes fetched from storage
    pub bytes_read: AtomicU64,

    /// Bytes written to storage
    pub bytes_written: AtomicU64,

    // Per-component timing (in microseconds for precision)
    /// Time spent waiting on the engine (microseconds)
    pub engine_us: AtomicU64,

    /// Time spent in storage calls (microseconds)
    pub storage_us: AtomicU64,

    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            objects_processed: AtomicU64::new(0),
            objects_skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            positions_analyzed: AtomicU64::new(0),
            mate_positions: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            engine_us: AtomicU64::new(0),
            storage_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_object_processed(&self) {
        self.objects_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_object_skipped(&self) {
        self.objects_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows(&self, rows: u64) {
        self.rows_processed.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record one scored position.
    pub fn add_position(&self, was_mate: bool) {
        self.positions_analyzed.fetch_add(1, Ordering::Relaxed);
        if was_mate {
            self.mate_positions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record time spent in an engine call (in microseconds).
    pub fn add_engine_time(&self, duration: Duration) {
        self.engine_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent in a storage call (in microseconds).
    pub fn add_storage_time(&self, duration: Duration) {
        self.storage_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Positions per second since start.
    pub fn positions_per_second(&self) -> f64 {
        let positions = self.positions_analyzed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            positions as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            objects_processed: self.objects_processed.load(Ordering::Relaxed),
            objects_skipped: self.objects_skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
            positions_analyzed: self.positions_analyzed.load(Ordering::Relaxed),
            mate_positions: self.mate_positions.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            positions_per_second: self.positions_per_second(),
            engine_secs: self.engine_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            storage_secs: self.storage_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub objects_processed: u64,
    pub objects_skipped: u64,
    pub failures: u64,
    pub rows_processed: u64,
    pub positions_analyzed: u64,
    pub mate_positions: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub positions_per_second: f64,
    /// Total time waiting on engines (seconds, summed across connections)
    pub engine_secs: f64,
    /// Total time in storage calls (seconds)
    pub storage_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Objects: {} processed, {} skipped, {} failed | Rows: {} | \
             Positions: {} ({} mate) @ {:.1}/s | Read: {:.2} MB | Write: {:.2} MB | \
             Engine {:.1}s | Storage {:.1}s | Elapsed: {:.1}s",
            self.objects_processed,
            self.objects_skipped,
            self.failures,
            self.rows_processed,
            self.positions_analyzed,
            self.mate_positions,
            self.positions_per_second,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.engine_secs,
            self.storage_secs,
            self.elapsed.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.add_object_processed();
        metrics.add_object_skipped();
        metrics.add_object_skipped();
        metrics.add_rows(3);
        metrics.add_position(false);
        metrics.add_position(true);
        metrics.add_bytes_read(2048);
        metrics.add_engine_time(Duration::from_millis(1500));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.objects_processed, 1);
        assert_eq!(snapshot.objects_skipped, 2);
        assert_eq!(snapshot.rows_processed, 3);
        assert_eq!(snapshot.positions_analyzed, 2);
        assert_eq!(snapshot.mate_positions, 1);
        assert_eq!(snapshot.bytes_read, 2048);
        assert!((snapshot.engine_secs - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = Metrics::new().snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["positions_analyzed"], 0);
        assert!(json["elapsed"].is_number());
        assert!(snapshot.to_string().starts_with("Objects: 0 processed"));
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        Metrics::new().snapshot().save_to_file(path.to_str().unwrap()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("objects_processed"));
    }
}
