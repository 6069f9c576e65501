//! Board positions carried through the pipeline.
//!
//! A [`Position`] keeps the original FEN text untouched (it is what gets sent
//! to the engine) together with the two facts metric derivation needs: whose
//! turn it is and whether the position is already checkmate.

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, Position as _};

/// One of the two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The side every reported score and eval is expressed for.
    pub const REFERENCE: Side = Side::White;
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

/// Facts about a position that scoring depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionContext {
    /// Side to move
    pub turn: Side,

    /// Side to move has been checkmated
    pub is_checkmate: bool,
}

/// A single validated board state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    fen: String,
    context: PositionContext,
}

/// Ordered positions of one dataset row (move order).
pub type PositionSequence = Vec<Position>;

/// Reason a FEN string was rejected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid FEN '{fen}': {reason}")]
pub struct PositionError {
    pub fen: String,
    pub reason: String,
}

impl Position {
    /// Parse and validate a FEN string.
    pub fn parse(fen: &str) -> Result<Self, PositionError> {
        let reject = |reason: String| PositionError {
            fen: fen.to_string(),
            reason,
        };

        let parsed: Fen = fen.trim().parse().map_err(|e| reject(format!("{e}")))?;
        let board: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| reject(format!("{e}")))?;

        Ok(Self {
            fen: fen.trim().to_string(),
            context: PositionContext {
                turn: board.turn().into(),
                is_checkmate: board.is_checkmate(),
            },
        })
    }

    pub fn fen(&self) -> &str {
        &self.fen
    }

    pub fn context(&self) -> PositionContext {
        self.context
    }

    pub fn turn(&self) -> Side {
        self.context.turn
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fen)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    /// After 1.e4
    pub const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

    /// Fool's mate: White to move and checkmated.
    pub const WHITE_MATED: &str = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";

    /// Scholar's mate: Black to move and checkmated.
    pub const BLACK_MATED: &str =
        "r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4";
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_start_position() {
        let pos = Position::parse(START).unwrap();
        assert_eq!(pos.fen(), START);
        assert_eq!(pos.turn(), Side::White);
        assert!(!pos.context().is_checkmate);
    }

    #[test]
    fn test_parse_black_to_move() {
        let pos = Position::parse(AFTER_E4).unwrap();
        assert_eq!(pos.turn(), Side::Black);
    }

    #[test]
    fn test_detects_checkmate() {
        let white = Position::parse(WHITE_MATED).unwrap();
        assert!(white.context().is_checkmate);
        assert_eq!(white.turn(), Side::White);

        let black = Position::parse(BLACK_MATED).unwrap();
        assert!(black.context().is_checkmate);
        assert_eq!(black.turn(), Side::Black);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = Position::parse("not a fen").unwrap_err();
        assert_eq!(err.fen, "not a fen");
        assert!(Position::parse("").is_err());
    }

    #[test]
    fn test_reference_side() {
        assert_eq!(Side::REFERENCE, Side::White);
    }
}
