//! Position analysis through an external UCI engine.
//!
//! The engine is an owned resource: [`UciEngine`] holds its subprocess behind a
//! mutex so only one request is ever in flight per connection, and
//! [`EnginePool`] fans positions out over several independent connections.

mod pool;
pub mod uci;

pub use pool::EnginePool;
pub use uci::{EngineSettings, UciEngine};

use crate::position::{Position, Side};
use async_trait::async_trait;

/// Engine evaluation of one position, always from the reference side's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisScore {
    /// Centipawns, positive when the reference side is better
    Centipawns(i32),

    /// Forced mate in N moves, positive when the reference side mates.
    /// Zero means the side to move is already mated.
    Mate(i32),
}

impl AnalysisScore {
    /// The same score seen from `side`.
    ///
    /// Also converts a score reported relative to the side to move into the
    /// reference view: `raw.pov(turn)`.
    pub fn pov(self, side: Side) -> Self {
        if side == Side::REFERENCE {
            self
        } else {
            self.negate()
        }
    }

    pub fn is_mate(&self) -> bool {
        matches!(self, AnalysisScore::Mate(_))
    }

    /// Moves to mate, if this is a mate score.
    pub fn mate(&self) -> Option<i32> {
        match self {
            AnalysisScore::Mate(moves) => Some(*moves),
            AnalysisScore::Centipawns(_) => None,
        }
    }

    fn negate(self) -> Self {
        match self {
            AnalysisScore::Centipawns(cp) => AnalysisScore::Centipawns(cp.saturating_neg()),
            AnalysisScore::Mate(moves) => AnalysisScore::Mate(moves.saturating_neg()),
        }
    }
}

/// Engine failures. All of them abort the current run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to launch engine at {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine finished search for '{fen}' without reporting a score")]
    NoScore { fen: String },

    #[error("engine did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Anything that can score a position.
#[async_trait]
pub trait PositionAnalyzer: Send + Sync {
    /// Analyse `position` to `depth` plies.
    async fn analyze(&self, position: &Position, depth: u32) -> Result<AnalysisScore, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_to_move_conversion() {
        let raw = AnalysisScore::Centipawns(45);
        assert_eq!(raw.pov(Side::White), raw);
        assert_eq!(raw.pov(Side::Black), AnalysisScore::Centipawns(-45));
        assert_eq!(AnalysisScore::Mate(3).pov(Side::Black), AnalysisScore::Mate(-3));
    }

    #[test]
    fn test_extreme_scores_do_not_overflow() {
        assert_eq!(
            AnalysisScore::Centipawns(i32::MIN).pov(Side::Black),
            AnalysisScore::Centipawns(i32::MAX)
        );
        assert_eq!(AnalysisScore::Mate(i32::MIN).pov(Side::Black), AnalysisScore::Mate(i32::MAX));
    }

    #[test]
    fn test_pov_roundtrips_through_black() {
        let score = AnalysisScore::Mate(-2);
        assert_eq!(score.pov(Side::White), score);
        assert_eq!(score.pov(Side::Black), AnalysisScore::Mate(2));
        assert_eq!(score.pov(Side::Black).pov(Side::Black), score);
    }

    #[test]
    fn test_mate_accessors() {
        assert!(AnalysisScore::Mate(0).is_mate());
        assert_eq!(AnalysisScore::Mate(0).mate(), Some(0));
        assert!(!AnalysisScore::Centipawns(0).is_mate());
        assert_eq!(AnalysisScore::Centipawns(12).mate(), None);
    }
}
