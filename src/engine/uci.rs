//! UCI line protocol and the engine subprocess.

use super::{AnalysisScore, EngineError, PositionAnalyzer};
use crate::config::EngineConfig;
use crate::position::Position;
use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Engine launch and tuning parameters, fixed for the connection's lifetime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Path to the engine executable
    pub path: String,

    /// Search threads
    pub threads: u32,

    /// Hash table size in MB
    pub hash_mb: u32,

    /// Skill ceiling (0-20)
    pub skill_level: u32,

    /// Whether strength limiting is enabled
    pub limit_strength: bool,

    /// Deadline for the handshake and for each analysis
    pub timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            path: config.path.clone().unwrap_or_default(),
            threads: config.threads,
            hash_mb: config.hash_mb,
            skill_level: config.skill_level,
            limit_strength: config.limit_strength,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// `setoption` pairs sent once after the handshake.
    pub fn options(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Threads", self.threads.to_string()),
            ("Hash", self.hash_mb.to_string()),
            ("Skill Level", self.skill_level.to_string()),
            ("UCI_LimitStrength", self.limit_strength.to_string()),
        ]
    }
}

/// A UCI conversation over any pair of byte streams.
pub struct UciConnection<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R, W> UciConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Handshake, apply options and wait until the engine is ready.
    pub async fn configure(&mut self, options: &[(&str, String)]) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;

        for (name, value) in options {
            self.send(&format!("setoption name {} value {}", name, value)).await?;
        }

        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    /// Search `fen` to `depth` and return the final score, relative to the
    /// side to move as UCI reports it.
    pub async fn search(&mut self, fen: &str, depth: u32) -> Result<AnalysisScore, EngineError> {
        self.send(&format!("position fen {}", fen)).await?;
        self.send(&format!("go depth {}", depth)).await?;

        let mut score = None;
        loop {
            let line = self.next_line().await?;
            match line.split_whitespace().next() {
                Some("info") => {
                    if let Some(latest) = parse_info_score(&line)? {
                        score = Some(latest);
                    }
                }
                Some("bestmove") => {
                    return score.ok_or_else(|| EngineError::NoScore {
                        fen: fen.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    pub async fn quit(&mut self) -> Result<(), EngineError> {
        self.send("quit").await
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        tracing::trace!("engine <- {}", command);
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        match self.lines.next_line().await? {
            Some(line) => {
                tracing::trace!("engine -> {}", line);
                Ok(line)
            }
            None => Err(EngineError::Protocol("engine closed its output".to_string())),
        }
    }

    async fn wait_for(&mut self, token: &str) -> Result<(), EngineError> {
        loop {
            if self.next_line().await?.trim() == token {
                return Ok(());
            }
        }
    }
}

/// Extract the score from an `info` line.
///
/// Returns `None` for lines without a score, `info string` chatter, and
/// bound-only scores from an unfinished aspiration window.
pub fn parse_info_score(line: &str) -> Result<Option<AnalysisScore>, EngineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.get(1) == Some(&"string") {
        return Ok(None);
    }

    let Some(at) = tokens.iter().position(|t| *t == "score") else {
        return Ok(None);
    };

    let malformed = || EngineError::Protocol(format!("malformed score in '{}'", line));
    let kind = tokens.get(at + 1).ok_or_else(malformed)?;
    let value: i32 = tokens
        .get(at + 2)
        .and_then(|v| v.parse().ok())
        .ok_or_else(malformed)?;

    if matches!(tokens.get(at + 3), Some(&"lowerbound") | Some(&"upperbound")) {
        return Ok(None);
    }

    match *kind {
        "cp" => Ok(Some(AnalysisScore::Centipawns(value))),
        "mate" => Ok(Some(AnalysisScore::Mate(value))),
        _ => Err(malformed()),
    }
}

/// Run `fut`, failing with [`EngineError::Timeout`] after `limit`.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EngineError::Timeout(limit))?
}

/// A running engine subprocess with a configured connection.
struct EngineProcess {
    child: Child,
    conn: UciConnection<ChildStdout, ChildStdin>,
}

impl EngineProcess {
    async fn spawn(settings: &EngineSettings) -> Result<Self, EngineError> {
        tracing::info!("Starting engine: {}", settings.path);

        let mut child = Command::new(&settings.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: settings.path.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout unavailable".to_string()))?;

        let mut conn = UciConnection::new(stdout, stdin);
        with_deadline(settings.timeout, conn.configure(&settings.options())).await?;

        tracing::debug!(
            "Engine ready (threads={}, hash={}MB, skill={})",
            settings.threads,
            settings.hash_mb,
            settings.skill_level
        );

        Ok(Self { child, conn })
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.conn.quit().await {
            tracing::debug!("Engine quit failed: {}", e);
        }
        if tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await.is_err() {
            tracing::warn!("Engine did not exit after quit, killing it");
            let _ = self.child.kill().await;
        }
    }
}

/// Adapter over one engine subprocess.
///
/// The process is started on first use (or eagerly with [`UciEngine::start`])
/// and reused for every later call. A failed or timed-out call discards the
/// process so the next call starts from a clean handshake.
pub struct UciEngine {
    settings: EngineSettings,
    process: Mutex<Option<EngineProcess>>,
}

impl UciEngine {
    /// Create an adapter that launches the engine lazily.
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            process: Mutex::new(None),
        }
    }

    /// Create an adapter and launch the engine immediately.
    pub async fn start(settings: EngineSettings) -> Result<Self, EngineError> {
        let process = EngineProcess::spawn(&settings).await?;
        Ok(Self {
            settings,
            process: Mutex::new(Some(process)),
        })
    }

    /// Ask the engine to quit and wait for it.
    pub async fn shutdown(&self) {
        if let Some(process) = self.process.lock().await.take() {
            process.shutdown().await;
        }
    }
}

#[async_trait]
impl PositionAnalyzer for UciEngine {
    async fn analyze(&self, position: &Position, depth: u32) -> Result<AnalysisScore, EngineError> {
        let mut slot = self.process.lock().await;

        let mut process = match slot.take() {
            Some(process) => process,
            None => EngineProcess::spawn(&self.settings).await?,
        };

        match with_deadline(self.settings.timeout, process.conn.search(position.fen(), depth)).await {
            Ok(score) => {
                *slot = Some(process);
                Ok(score.pov(position.turn()))
            }
            Err(e) => {
                tracing::warn!("Discarding engine connection after failure: {}", e);
                Err(e)
            }
        }
    }
}
