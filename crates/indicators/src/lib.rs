pub mod adapters;
pub mod config;
pub mod consensus;
pub mod math;
pub mod registry;

pub use config::{ConsensusConfig, IndicatorSpec, IndicatorsFileConfig, WeightRule};
pub use consensus::{ConsensusAnalyzer, ConsensusResult};
pub use registry::IndicatorRegistry;

use common::{CandleWindow, Trend};

/// Verdict of one indicator for one evaluation cycle.
///
/// A failed computation is data, not an error: the registry logs it and the
/// consensus analyzer skips it, so a broken indicator can never read as a
/// vote or take the cycle down.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorOutcome {
    Valid {
        trend: Trend,
        /// Magnitude of the move backing the verdict, in [0, 1].
        strength: f64,
        /// Self-assessed reliability of the verdict, in [0, 1].
        confidence: f64,
    },
    Failed {
        reason: String,
    },
}

/// One indicator's result for one cycle. Produced fresh each evaluation;
/// never retained across cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorResult {
    pub name: &'static str,
    pub outcome: IndicatorOutcome,
}

impl IndicatorResult {
    pub fn valid(name: &'static str, trend: Trend, strength: f64, confidence: f64) -> Self {
        Self {
            name,
            outcome: IndicatorOutcome::Valid {
                trend,
                strength: strength.clamp(0.0, 1.0),
                confidence: confidence.clamp(0.0, 1.0),
            },
        }
    }

    pub fn failed(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            outcome: IndicatorOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Trend, strength and confidence when the computation succeeded.
    pub fn as_valid(&self) -> Option<(Trend, f64, f64)> {
        match self.outcome {
            IndicatorOutcome::Valid {
                trend,
                strength,
                confidence,
            } => Some((trend, strength, confidence)),
            IndicatorOutcome::Failed { .. } => None,
        }
    }

    /// A result participates in consensus only when it computed successfully
    /// and voted a direction. Sideways is an abstention.
    pub fn is_vote(&self) -> bool {
        matches!(
            self.outcome,
            IndicatorOutcome::Valid { trend, .. } if trend.is_directional()
        )
    }
}

/// All indicator adapters must satisfy this trait.
///
/// `evaluate` is pure with respect to the window contents: the same window
/// and the same adapter parameters always produce the same result, and no
/// state is carried between calls.
pub trait Indicator: Send + Sync {
    /// Stable identifier, matching the `kind` key in configuration.
    fn name(&self) -> &'static str;

    /// Minimum candles required before `evaluate` can succeed.
    fn min_candles(&self) -> usize;

    /// Evaluate the window. Must never panic; computation problems are
    /// returned as `IndicatorOutcome::Failed`.
    fn evaluate(&self, window: &CandleWindow) -> IndicatorResult;
}
