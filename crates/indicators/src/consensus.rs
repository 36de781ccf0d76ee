use std::collections::HashMap;

use common::Trend;
use tracing::info;

use crate::config::{ConsensusConfig, IndicatorsFileConfig, WeightRule};
use crate::IndicatorResult;

/// Aggregated verdict of one evaluation cycle. Stateless and recomputed
/// every cycle; `trend` is only meaningful when `has_consensus` is true.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusResult {
    pub has_consensus: bool,
    pub trend: Option<Trend>,
    /// Aggregate confidence in [0, 1].
    pub confidence: f64,
    /// Indicators voting the consensus trend.
    pub agreeing: usize,
    /// Valid voters: computed successfully and voted a direction.
    pub valid: usize,
    /// All indicators evaluated this cycle, including failed and abstaining.
    pub total: usize,
    pub supporters: Vec<&'static str>,
    pub reason: String,
}

impl ConsensusResult {
    fn rejected(total: usize, valid: usize, reason: String) -> Self {
        Self {
            has_consensus: false,
            trend: None,
            confidence: 0.0,
            agreeing: 0,
            valid,
            total,
            supporters: Vec::new(),
            reason,
        }
    }
}

/// Majority-vote aggregation across indicator results.
///
/// Failed and Sideways results are discarded before counting: an abstention
/// is not a vote, and a tie is never resolved arbitrarily.
pub struct ConsensusAnalyzer {
    cfg: ConsensusConfig,
    weights: HashMap<String, WeightRule>,
}

impl ConsensusAnalyzer {
    pub fn new(cfg: ConsensusConfig, weights: HashMap<String, WeightRule>) -> Self {
        Self { cfg, weights }
    }

    pub fn from_config(file_cfg: &IndicatorsFileConfig) -> Self {
        let weights = file_cfg
            .enabled()
            .map(|spec| (spec.kind.clone(), spec.weight))
            .collect();
        Self::new(file_cfg.consensus.clone(), weights)
    }

    pub fn analyze(&self, results: &[IndicatorResult]) -> ConsensusResult {
        let total = results.len();

        let votes: Vec<(&'static str, Trend, f64, f64)> = results
            .iter()
            .filter(|r| r.is_vote())
            .filter_map(|r| r.as_valid().map(|(t, s, c)| (r.name, t, s, c)))
            .collect();
        let valid = votes.len();

        if valid < self.cfg.min_indicators {
            return ConsensusResult::rejected(
                total,
                valid,
                format!(
                    "insufficient valid indicators: {valid}/{}",
                    self.cfg.min_indicators
                ),
            );
        }

        let rise = votes.iter().filter(|v| v.1 == Trend::Rise).count();
        let fall = valid - rise;

        if rise == fall {
            return ConsensusResult::rejected(
                total,
                valid,
                format!("tie between trends: {rise} RISE vs {fall} FALL"),
            );
        }

        let (majority_trend, agreeing) = if rise > fall {
            (Trend::Rise, rise)
        } else {
            (Trend::Fall, fall)
        };

        let ratio = agreeing as f64 / valid as f64;
        if ratio < self.cfg.consensus_threshold {
            return ConsensusResult::rejected(
                total,
                valid,
                format!(
                    "majority {:.0}% below threshold {:.0}%",
                    ratio * 100.0,
                    self.cfg.consensus_threshold * 100.0
                ),
            );
        }

        let majority: Vec<_> = votes.iter().filter(|v| v.1 == majority_trend).collect();
        let supporters: Vec<&'static str> = majority.iter().map(|v| v.0).collect();

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (name, _, strength, confidence) in &majority {
            let rule = self.weights.get(*name).copied().unwrap_or_default();
            let weight = rule.apply(*strength, *confidence);
            weighted_sum += weight * strength * confidence;
            weight_total += weight;
        }
        let base = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            majority.iter().map(|(_, _, s, c)| s * c).sum::<f64>() / agreeing as f64
        };

        let unanimous = agreeing == valid;
        let confidence = if unanimous {
            base + self.cfg.unanimous_bonus
        } else {
            base - self.cfg.partial_consensus_penalty
        }
        .clamp(0.0, 1.0);

        let result = ConsensusResult {
            has_consensus: true,
            trend: Some(majority_trend),
            confidence,
            agreeing,
            valid,
            total,
            supporters,
            reason: format!(
                "consensus {majority_trend}: {agreeing}/{valid} agree{}",
                if unanimous { " (unanimous)" } else { "" }
            ),
        };
        info!(
            trend = %majority_trend,
            agreeing,
            valid,
            confidence,
            "Consensus reached"
        );
        result
    }
}
