//! Round-robin pool of independent engine connections.

use super::{AnalysisScore, EngineError, EngineSettings, PositionAnalyzer, UciEngine};
use crate::position::Position;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Several analyzers behind one [`PositionAnalyzer`].
///
/// Each member serializes its own requests, so callers may keep up to
/// `len()` analyses in flight without two sharing a connection.
pub struct EnginePool {
    members: Vec<Arc<dyn PositionAnalyzer>>,
    engines: Vec<Arc<UciEngine>>,
    next: AtomicUsize,
}

impl EnginePool {
    /// Pool over existing analyzers.
    pub fn from_members(members: Vec<Arc<dyn PositionAnalyzer>>) -> Result<Self, EngineError> {
        if members.is_empty() {
            return Err(EngineError::Protocol("engine pool needs at least one member".to_string()));
        }
        Ok(Self {
            members,
            engines: Vec::new(),
            next: AtomicUsize::new(0),
        })
    }

    /// Launch `size` engine processes.
    pub async fn start(settings: &EngineSettings, size: usize) -> Result<Self, EngineError> {
        let mut members: Vec<Arc<dyn PositionAnalyzer>> = Vec::with_capacity(size);
        let mut engines = Vec::with_capacity(size);
        for _ in 0..size {
            let engine = Arc::new(UciEngine::start(settings.clone()).await?);
            engines.push(engine.clone());
            members.push(engine);
        }
        tracing::info!("Started engine pool with {} connection(s)", engines.len());

        let mut pool = Self::from_members(members)?;
        pool.engines = engines;
        Ok(pool)
    }

    /// Stop every engine process this pool launched.
    pub async fn shutdown(&self) {
        for engine in &self.engines {
            engine.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl PositionAnalyzer for EnginePool {
    async fn analyze(&self, position: &Position, depth: u32) -> Result<AnalysisScore, EngineError> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.members.len();
        self.members[slot].analyze(position, depth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::fixtures;
    use std::sync::atomic::AtomicU32;

    struct Counting {
        calls: AtomicU32,
        cp: i32,
    }

    #[async_trait]
    impl PositionAnalyzer for Counting {
        async fn analyze(&self, _position: &Position, _depth: u32) -> Result<AnalysisScore, EngineError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(AnalysisScore::Centipawns(self.cp))
        }
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(EnginePool::from_members(vec![]).is_err());
    }

    #[tokio::test]
    async fn test_round_robin_dispatch() {
        let a = Arc::new(Counting { calls: AtomicU32::new(0), cp: 1 });
        let b = Arc::new(Counting { calls: AtomicU32::new(0), cp: 2 });
        let pool = EnginePool::from_members(vec![a.clone() as Arc<dyn PositionAnalyzer>, b.clone()]).unwrap();
        let position = Position::parse(fixtures::START).unwrap();

        let mut scores = Vec::new();
        for _ in 0..4 {
            scores.push(pool.analyze(&position, 6).await.unwrap());
        }

        assert_eq!(pool.len(), 2);
        assert_eq!(a.calls.load(Ordering::Relaxed), 2);
        assert_eq!(b.calls.load(Ordering::Relaxed), 2);
        assert_eq!(
            scores,
            vec![
                AnalysisScore::Centipawns(1),
                AnalysisScore::Centipawns(2),
                AnalysisScore::Centipawns(1),
                AnalysisScore::Centipawns(2),
            ]
        );
    }
}
