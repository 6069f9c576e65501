//! FEN Enrich CLI
//!
//! Score chess position datasets with a UCI engine as they land in storage.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fen_enrich::{build_pipeline, build_runtime, Config, Pipeline, RunOutcome, TriggerEvent};

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Parser)]
#[command(name = "fen-enrich")]
#[command(about = "Enrich chess position datasets with engine evaluations", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG, global = true)]
    config: PathBuf,

    /// Override position concurrency
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Write run metrics as JSON to this path
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single object
    Process {
        /// Object key in the input bucket
        #[arg(short, long)]
        key: String,

        /// Input bucket (defaults to the configured one)
        #[arg(short, long)]
        bucket: Option<String>,
    },

    /// Handle one storage notification (JSON from a file or stdin)
    Event {
        /// Notification file; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Handle newline-delimited notifications from stdin
    Events,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process { key, bucket } => {
            let config = load_config(&cli.config, cli.concurrency)?;
            let bucket = bucket.unwrap_or_else(|| config.input_bucket().to_string());
            let events = vec![TriggerEvent::new("manual", bucket, key)];
            run_command(config, cli.metrics_out, EventSource::List(events))?;
        }

        Commands::Event { file } => {
            let config = load_config(&cli.config, cli.concurrency)?;
            run_command(config, cli.metrics_out, EventSource::Document(file))?;
        }

        Commands::Events => {
            let config = load_config(&cli.config, cli.concurrency)?;
            run_command(config, cli.metrics_out, EventSource::Stream)?;
        }

        Commands::Validate => {
            validate_command(&cli.config)?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

/// Where trigger events come from.
enum EventSource {
    List(Vec<TriggerEvent>),
    Document(Option<PathBuf>),
    Stream,
}

/// Load the config file, overlay the environment and validate.
///
/// A missing default config file is not an error: everything can come from
/// the environment.
fn load_config(path: &PathBuf, concurrency: Option<usize>) -> Result<Config> {
    let mut config = if path.exists() || path.as_path() != Path::new(DEFAULT_CONFIG) {
        Config::from_file(path).with_context(|| format!("failed to load {}", path.display()))?
    } else {
        tracing::info!("No {} found, configuring from environment", DEFAULT_CONFIG);
        Config::default()
    };

    config.apply_env();

    if let Some(c) = concurrency {
        config.processing.position_concurrency = c;
    }

    config.validate()?;
    Ok(config)
}

fn run_command(config: Config, metrics_out: Option<PathBuf>, source: EventSource) -> Result<()> {
    let runtime = build_runtime(None)?;

    runtime.block_on(async {
        let (pipeline, engines) = build_pipeline(&config).await?;

        let failures = match source {
            EventSource::List(events) => handle_all(&pipeline, &events).await,
            EventSource::Document(file) => match read_document(file.as_deref()).await {
                Ok(events) => handle_all(&pipeline, &events).await,
                Err(e) => {
                    engines.shutdown().await;
                    return Err(e);
                }
            },
            EventSource::Stream => handle_stream(&pipeline).await,
        };

        engines.shutdown().await;

        let snapshot = pipeline.metrics().snapshot();
        tracing::info!("{}", snapshot);
        if let Some(path) = &metrics_out {
            snapshot.save_to_file(&path.to_string_lossy())?;
        }

        match failures {
            Ok(0) => Ok(()),
            Ok(n) => anyhow::bail!("{} event(s) failed", n),
            Err(e) => Err(e),
        }
    })
}

/// Handle events in order, returning how many failed.
async fn handle_all(pipeline: &Pipeline, events: &[TriggerEvent]) -> Result<usize> {
    let mut failures = 0;
    for event in events {
        match pipeline.handle(event).await {
            Ok(RunOutcome::Processed(summary)) => {
                tracing::info!(
                    "{}: {} rows, {} positions, processed at {}",
                    summary.key,
                    summary.rows,
                    summary.positions,
                    summary.processed_at
                );
            }
            Ok(RunOutcome::Skipped(decision)) => {
                tracing::info!("{}: skipped ({})", event.object_key, decision);
            }
            // Already logged by the pipeline
            Err(_) => failures += 1,
        }
    }
    Ok(failures)
}

/// Handle one notification per stdin line, keeping the engine warm.
async fn handle_stream(pipeline: &Pipeline) -> Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut failures = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match TriggerEvent::from_json(line) {
            Ok(events) => failures += handle_all(pipeline, &events).await?,
            Err(e) => {
                tracing::error!("Ignoring unreadable event: {}", e);
                failures += 1;
            }
        }
    }
    Ok(failures)
}

async fn read_document(file: Option<&Path>) -> Result<Vec<TriggerEvent>> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };
    Ok(TriggerEvent::from_json(&text)?)
}

fn validate_command(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path, None)?;
    println!("Configuration is valid");
    println!(
        "Input: {} -> Output: {} | Engine: {} (depth {}, pool {})",
        config.input_bucket(),
        config.output_bucket(),
        config.engine.path.as_deref().unwrap_or(""),
        config.engine.depth,
        config.engine.pool_size
    );
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# FEN Enrich Configuration
#
# Environment variables override the file:
#   PREPROCESSED_INPUT_BUCKET_NAME, PREPROCESSED_OUTPUT_BUCKET_NAME,
#   AWS_REGION, ENGINE_PATH

# === STORAGE: Where datasets are read from and written to ===
storage:
  input_bucket: "preprocessed-games"
  output_bucket: "enriched-games"

  # AWS region (omit to use the default provider chain)
  region: "us-east-1"

  # Custom S3 endpoint (for LocalStack, MinIO, etc.)
  # endpoint_url: "http://localhost:4566"

  # Use a local directory instead of S3; tags are kept in _tags/ sidecars
  # local_root: "/tmp/fen-enrich"

# === ENGINE: UCI engine process ===
engine:
  path: "/usr/local/bin/stockfish"
  threads: 3
  hash_mb: 2048
  skill_level: 20
  limit_strength: false

  # Search depth per position
  depth: 6

  # Seconds allowed for the handshake and for each position
  timeout_secs: 60

  # Independent engine processes
  pool_size: 1

# === TABLE: Dataset layout ===
table:
  # Column holding each row's FEN sequence
  position_column: "fen"

  # Only keys with this suffix are processed
  extension: ".parquet"

  # Win/draw/loss model: stockfish or lichess
  wdl_model: stockfish
  wdl_ply: 30

# === PROCESSING ===
processing:
  # Positions analysed at once (clamped to engine.pool_size)
  position_concurrency: 1

  # Tag marking processed objects
  tag_name: "ProcessedTime"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_process() {
        let cli = Cli::try_parse_from(["fen-enrich", "process", "--key", "games/001.parquet"]).unwrap();
        match cli.command {
            Commands::Process { key, bucket } => {
                assert_eq!(key, "games/001.parquet");
                assert!(bucket.is_none());
            }
            _ => panic!("expected process command"),
        }
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["fen-enrich", "-c", "other.yaml", "events"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["fen-enrich", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_metrics_out() {
        let cli = Cli::try_parse_from(["fen-enrich", "event", "--file", "e.json", "--metrics-out", "m.json"]).unwrap();
        assert_eq!(cli.metrics_out, Some(PathBuf::from("m.json")));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["fen-enrich"]).is_err());
    }

    #[test]
    fn test_generated_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let mut config = Config::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.input_bucket(), "preprocessed-games");
        assert_eq!(config.engine.depth, 6);
    }
}
