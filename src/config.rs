//! Configuration for the enrichment pipeline.

use crate::evaluation::WdlModel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where objects are read from and written to
    #[serde(default)]
    pub storage: StorageConfig,

    /// Analysis engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Dataset layout
    #[serde(default)]
    pub table: TableConfig,

    /// Processing behaviour
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket that receives raw datasets (required)
    #[serde(default)]
    pub input_bucket: Option<String>,

    /// Bucket that receives enriched datasets (required)
    #[serde(default)]
    pub output_bucket: Option<String>,

    /// AWS region. Falls back to the default provider chain when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3 endpoint (MinIO, LocalStack, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Serve buckets from this local directory instead of S3.
    /// Each bucket is a subdirectory; tags are kept in sidecar files.
    #[serde(default)]
    pub local_root: Option<String>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to a UCI engine executable (required)
    #[serde(default)]
    pub path: Option<String>,

    /// Search threads per engine
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Hash table size in MB per engine
    #[serde(default = "default_hash_mb")]
    pub hash_mb: u32,

    /// Skill level (0-20)
    #[serde(default = "default_skill_level")]
    pub skill_level: u32,

    /// Enable UCI_LimitStrength
    #[serde(default)]
    pub limit_strength: bool,

    /// Search depth per position
    #[serde(default = "default_depth")]
    pub depth: u32,

    /// Seconds before a stalled engine call is abandoned
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of independent engine processes
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            threads: default_threads(),
            hash_mb: default_hash_mb(),
            skill_level: default_skill_level(),
            limit_strength: false,
            depth: default_depth(),
            timeout_secs: default_timeout_secs(),
            pool_size: default_pool_size(),
        }
    }
}

/// Dataset layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Column holding JSON lists of FEN strings
    #[serde(default = "default_position_column")]
    pub position_column: String,

    /// Object key suffix that marks a dataset
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Model used for winning/losing chances
    #[serde(default)]
    pub wdl_model: WdlModel,

    /// Game ply assumed by the Stockfish WDL model
    #[serde(default = "default_wdl_ply")]
    pub wdl_ply: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            position_column: default_position_column(),
            extension: default_extension(),
            wdl_model: WdlModel::default(),
            wdl_ply: default_wdl_ply(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Positions analysed concurrently (bounded by engine.pool_size)
    #[serde(default = "default_position_concurrency")]
    pub position_concurrency: usize,

    /// Tag that marks an object as processed
    #[serde(default = "default_tag_name")]
    pub tag_name: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            position_concurrency: default_position_concurrency(),
            tag_name: default_tag_name(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    /// Override fields from any variable lookup.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("PREPROCESSED_INPUT_BUCKET_NAME") {
            self.storage.input_bucket = Some(v);
        }
        if let Some(v) = non_empty("PREPROCESSED_OUTPUT_BUCKET_NAME") {
            self.storage.output_bucket = Some(v);
        }
        if let Some(v) = non_empty("AWS_REGION") {
            self.storage.region = Some(v);
        }
        if let Some(v) = non_empty("ENGINE_PATH") {
            self.engine.path = Some(v);
        }
    }

    /// Validate the configuration.
    ///
    /// A `position_concurrency` above the engine pool size is clamped, since
    /// no connection may serve two requests at once.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.storage.input_bucket.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("storage.input_bucket is required");
        }
        if self.storage.output_bucket.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("storage.output_bucket is required");
        }
        if self.engine.path.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("engine.path is required");
        }
        if self.engine.depth == 0 {
            anyhow::bail!("engine.depth must be > 0");
        }
        if self.engine.skill_level > 20 {
            anyhow::bail!("engine.skill_level must be 0-20");
        }
        if self.engine.pool_size == 0 {
            anyhow::bail!("engine.pool_size must be > 0");
        }
        if self.engine.timeout_secs == 0 {
            anyhow::bail!("engine.timeout_secs must be > 0");
        }
        if self.processing.position_concurrency == 0 {
            anyhow::bail!("processing.position_concurrency must be > 0");
        }
        if !self.table.extension.starts_with('.') || self.table.extension.len() < 2 {
            anyhow::bail!("table.extension must look like '.parquet'");
        }
        if self.table.position_column.is_empty() {
            anyhow::bail!("table.position_column must not be empty");
        }
        if self.processing.tag_name.is_empty() {
            anyhow::bail!("processing.tag_name must not be empty");
        }

        if self.processing.position_concurrency > self.engine.pool_size {
            tracing::warn!(
                "position_concurrency {} exceeds engine pool size {}, clamping",
                self.processing.position_concurrency,
                self.engine.pool_size
            );
            self.processing.position_concurrency = self.engine.pool_size;
        }
        Ok(())
    }

    /// Input bucket name (empty before validation).
    pub fn input_bucket(&self) -> &str {
        self.storage.input_bucket.as_deref().unwrap_or("")
    }

    /// Output bucket name (empty before validation).
    pub fn output_bucket(&self) -> &str {
        self.storage.output_bucket.as_deref().unwrap_or("")
    }
}

// Default value functions for serde
fn default_threads() -> u32 { 3 }
fn default_hash_mb() -> u32 { 2048 }
fn default_skill_level() -> u32 { 20 }
fn default_depth() -> u32 { 6 }
fn default_timeout_secs() -> u64 { 60 }
fn default_pool_size() -> usize { 1 }
fn default_position_column() -> String { "fen".to_string() }
fn default_extension() -> String { ".parquet".to_string() }
fn default_wdl_ply() -> u32 { 30 }
fn default_position_concurrency() -> usize { 1 }
fn default_tag_name() -> String { "ProcessedTime".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.storage.input_bucket = Some("raw-games".to_string());
        config.storage.output_bucket = Some("enriched-games".to_string());
        config.engine.path = Some("/usr/local/bin/stockfish".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.threads, 3);
        assert_eq!(config.engine.hash_mb, 2048);
        assert_eq!(config.engine.skill_level, 20);
        assert!(!config.engine.limit_strength);
        assert_eq!(config.engine.depth, 6);
        assert_eq!(config.table.position_column, "fen");
        assert_eq!(config.table.extension, ".parquet");
        assert_eq!(config.table.wdl_model, WdlModel::Stockfish);
        assert_eq!(config.processing.tag_name, "ProcessedTime");
    }

    #[test]
    fn test_validation_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validation_requires_buckets_and_engine() {
        let mut config = valid_config();
        config.storage.input_bucket = None;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.storage.output_bucket = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.engine.path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_values() {
        let mut config = valid_config();
        config.engine.depth = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.engine.skill_level = 21;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.table.extension = "parquet".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_concurrency_clamped_to_pool() {
        let mut config = valid_config();
        config.engine.pool_size = 2;
        config.processing.position_concurrency = 8;
        config.validate().unwrap();
        assert_eq!(config.processing.position_concurrency, 2);
    }

    #[test]
    fn test_apply_vars() {
        let vars: HashMap<&str, &str> = [
            ("PREPROCESSED_INPUT_BUCKET_NAME", "in"),
            ("PREPROCESSED_OUTPUT_BUCKET_NAME", "out"),
            ("AWS_REGION", "us-east-2"),
            ("ENGINE_PATH", ""),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config.apply_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.input_bucket(), "in");
        assert_eq!(config.output_bucket(), "out");
        assert_eq!(config.storage.region.as_deref(), Some("us-east-2"));
        // Empty values do not override
        assert_eq!(config.engine.path.as_deref(), Some("/usr/local/bin/stockfish"));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
storage:
  input_bucket: raw
  output_bucket: enriched
engine:
  path: /opt/stockfish
  depth: 10
table:
  wdl_model: lichess
"#;
        let mut config = Config::from_yaml(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.depth, 10);
        assert_eq!(config.engine.threads, 3);
        assert_eq!(config.table.wdl_model, WdlModel::Lichess);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"storage": {{"input_bucket": "a", "output_bucket": "b"}}, "engine": {{"path": "sf"}}}}"#
        )
        .unwrap();

        let mut config = Config::from_file(&file.path().to_path_buf()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.input_bucket(), "a");
        assert_eq!(config.output_bucket(), "b");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = valid_config();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.input_bucket(), "raw-games");
        assert_eq!(parsed.engine.hash_mb, 2048);
    }
}
