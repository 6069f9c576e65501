//! Mapping from engine scores to the per-position metric tuple.
//!
//! Mate scores have no finite centipawn value, so they are replaced with the
//! sentinel [`MATE_SENTINEL`] and flagged through `eval_replaced`. Centipawn
//! scores pass through unchanged and are turned into win/loss probabilities
//! with a WDL model.

use crate::engine::AnalysisScore;
use crate::position::{PositionContext, Side};
use serde::{Deserialize, Serialize};

/// Eval substituted for any mate score.
pub const MATE_SENTINEL: i32 = 8795;

/// Metrics derived for one position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    /// Centipawns for the reference side, or ±[`MATE_SENTINEL`]
    pub eval: i32,

    /// 1 when `eval` is the mate sentinel
    pub eval_replaced: u8,

    /// Probability of a win, in [0, 1]
    pub winning_chance: f64,

    /// Probability of a loss, in [0, 1]
    pub losing_chance: f64,
}

/// Win/draw/loss model applied to centipawn scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WdlModel {
    /// Stockfish 16.1 model, depends on game ply
    #[default]
    Stockfish,

    /// Lichess logistic model, never predicts draws
    Lichess,
}

/// Per-mille win/draw/loss expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wdl {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl Wdl {
    fn total(&self) -> u32 {
        self.wins + self.draws + self.losses
    }

    pub fn winning_chance(&self) -> f64 {
        self.wins as f64 / self.total() as f64
    }

    pub fn losing_chance(&self) -> f64 {
        self.losses as f64 / self.total() as f64
    }
}

impl WdlModel {
    /// Expected outcome for a centipawn score.
    pub fn wdl(self, cp: i32, ply: u32) -> Wdl {
        match self {
            WdlModel::Stockfish => {
                let wins = sf16_1_wins(cp, ply);
                let losses = sf16_1_wins(cp.saturating_neg(), ply);
                Wdl {
                    wins,
                    draws: 1000 - wins - losses,
                    losses,
                }
            }
            WdlModel::Lichess => {
                let wins = lichess_wins(cp.clamp(-1000, 1000));
                Wdl {
                    wins,
                    draws: 0,
                    losses: 1000 - wins,
                }
            }
        }
    }
}

fn sf16_1_wins(cp: i32, ply: u32) -> u32 {
    const NORMALIZE_TO_PAWN_VALUE: f64 = 356.0;

    let m = (ply as f64 / 2.0 + 1.0).clamp(8.0, 120.0) / 32.0;
    let a = (((-1.06249702 * m + 7.42016937) * m + 0.89425629) * m) + 348.60356174;
    let b = (((-5.33122190 * m + 39.57831533) * m - 90.84473771) * m) + 123.40620748;
    let x = (cp as f64 * NORMALIZE_TO_PAWN_VALUE / 100.0).clamp(-4000.0, 4000.0);

    (0.5 + 1000.0 / (1.0 + ((a - x) / b).exp())) as u32
}

fn lichess_wins(cp: i32) -> u32 {
    (1000.0 / (1.0 + (-0.00368208 * cp as f64).exp())).round() as u32
}

/// Derives [`EvaluationMetrics`] from engine scores.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    model: WdlModel,
    ply: u32,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new(WdlModel::Stockfish, 30)
    }
}

impl MetricsCalculator {
    pub fn new(model: WdlModel, ply: u32) -> Self {
        Self { model, ply }
    }

    /// Turn one engine score into metrics.
    ///
    /// For mate scores the mate distance is read from the side to move. A
    /// position that is already checkmate gets its sign from whose turn it
    /// is, since the side to move there has lost.
    pub fn derive(&self, score: AnalysisScore, context: &PositionContext) -> EvaluationMetrics {
        match score {
            AnalysisScore::Mate(_) => {
                let mate_in = score.pov(context.turn).mate().unwrap_or(0);

                let eval = if context.is_checkmate {
                    if context.turn == Side::REFERENCE {
                        -MATE_SENTINEL
                    } else {
                        MATE_SENTINEL
                    }
                } else if mate_in > 0 {
                    MATE_SENTINEL
                } else {
                    -MATE_SENTINEL
                };

                let (winning_chance, losing_chance) = if mate_in > 0 { (1.0, 0.0) } else { (0.0, 1.0) };

                EvaluationMetrics {
                    eval,
                    eval_replaced: 1,
                    winning_chance,
                    losing_chance,
                }
            }
            AnalysisScore::Centipawns(cp) => {
                let wdl = self.model.wdl(cp, self.ply);
                EvaluationMetrics {
                    eval: cp,
                    eval_replaced: 0,
                    winning_chance: wdl.winning_chance(),
                    losing_chance: wdl.losing_chance(),
                }
            }
        }
    }
}
