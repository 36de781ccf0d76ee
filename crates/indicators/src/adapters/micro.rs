use std::collections::HashMap;

use common::{CandleWindow, Trend};

use crate::config::{param_f64, param_usize};
use crate::{Indicator, IndicatorResult};

/// Short-lookback directional-persistence detector.
///
/// Scores the last `lookback_period` candles on step direction, body
/// direction and range-normalized momentum. A deliberately noisy,
/// short-horizon signal: strength and confidence are capped below the
/// longer indicators.
#[derive(Debug, Clone)]
pub struct MicroTrendAdapter {
    lookback_period: usize,
    /// Combined score required before a direction is voted.
    trend_threshold: f64,
}

impl MicroTrendAdapter {
    pub const NAME: &'static str = "micro_trend";

    /// Ceiling on strength and confidence for this adapter.
    pub const SCORE_CEILING: f64 = 0.7;

    pub fn new(lookback_period: usize, trend_threshold: f64) -> Self {
        assert!(lookback_period >= 3, "micro-trend lookback must be >= 3");
        Self {
            lookback_period,
            trend_threshold,
        }
    }

    pub fn from_params(params: &HashMap<String, toml::Value>) -> Self {
        Self::new(
            param_usize(params, "lookback_period", 10),
            param_f64(params, "trend_threshold", 0.55),
        )
    }
}

impl Indicator for MicroTrendAdapter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn min_candles(&self) -> usize {
        self.lookback_period
    }

    fn evaluate(&self, window: &CandleWindow) -> IndicatorResult {
        let candles = window.tail(self.lookback_period);
        if candles.is_empty() {
            return IndicatorResult::failed(
                Self::NAME,
                format!(
                    "insufficient candles: {}/{}",
                    window.len(),
                    self.lookback_period
                ),
            );
        }
        if candles
            .iter()
            .any(|c| !c.open.is_finite() || !c.close.is_finite() || !c.high.is_finite() || !c.low.is_finite())
        {
            return IndicatorResult::failed(Self::NAME, "non-finite price in window");
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let steps: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let total_steps = steps.len() as f64;

        let ups = steps.iter().filter(|&&s| s > 0.0).count() as f64;
        let downs = steps.iter().filter(|&&s| s < 0.0).count() as f64;
        let bullish = candles.iter().filter(|c| c.is_bullish()).count() as f64;
        let bearish = candles.iter().filter(|c| c.close < c.open).count() as f64;
        let n = candles.len() as f64;

        let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range = high - low;
        let momentum = if range > 0.0 {
            (closes[closes.len() - 1] - closes[0]) / range
        } else {
            0.0
        };

        let bull_score = (ups / total_steps + bullish / n + momentum.max(0.0)) / 3.0;
        let bear_score = (downs / total_steps + bearish / n + (-momentum).max(0.0)) / 3.0;

        // Trailing run of steps in one direction, as a persistence measure
        let last_sign = steps.last().map(|s| s.signum()).unwrap_or(0.0);
        let run = steps
            .iter()
            .rev()
            .take_while(|s| s.signum() == last_sign && last_sign != 0.0)
            .count() as f64;
        let run_ratio = run / total_steps;

        let (trend, score) = if bull_score >= bear_score && bull_score > self.trend_threshold {
            (Trend::Rise, bull_score)
        } else if bear_score > bull_score && bear_score > self.trend_threshold {
            (Trend::Fall, bear_score)
        } else {
            (Trend::Sideways, bull_score.max(bear_score))
        };

        let strength = score.min(Self::SCORE_CEILING);
        let confidence = match trend {
            Trend::Sideways => strength * 0.4,
            _ => (strength * (0.5 + 0.5 * run_ratio)).min(Self::SCORE_CEILING),
        };
        IndicatorResult::valid(Self::NAME, trend, strength, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testutil::window_from_closes;
    use crate::IndicatorOutcome;

    fn adapter() -> MicroTrendAdapter {
        MicroTrendAdapter::new(10, 0.55)
    }

    #[test]
    fn short_window_fails_instead_of_voting() {
        let result = adapter().evaluate(&window_from_closes(&[100.0; 5]));
        assert!(matches!(result.outcome, IndicatorOutcome::Failed { .. }));
    }

    #[test]
    fn monotonic_rise_votes_rise_at_the_ceiling() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let result = adapter().evaluate(&window_from_closes(&closes));
        let (trend, strength, confidence) = result.as_valid().unwrap();
        assert_eq!(trend, Trend::Rise);
        assert_eq!(strength, MicroTrendAdapter::SCORE_CEILING);
        assert!(confidence <= MicroTrendAdapter::SCORE_CEILING);
    }

    #[test]
    fn monotonic_fall_votes_fall() {
        let closes: Vec<f64> = (0..10).map(|i| 200.0 - i as f64).collect();
        let result = adapter().evaluate(&window_from_closes(&closes));
        let (trend, _, _) = result.as_valid().unwrap();
        assert_eq!(trend, Trend::Fall);
    }

    #[test]
    fn choppy_series_abstains() {
        // Oscillates and finishes where it started: no net momentum
        let closes = [100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0, 100.0];
        let result = adapter().evaluate(&window_from_closes(&closes));
        let (trend, _, _) = result.as_valid().unwrap();
        assert_eq!(trend, Trend::Sideways);
    }

    #[test]
    fn ceiling_is_below_the_other_indicators() {
        assert!(MicroTrendAdapter::SCORE_CEILING < 1.0);
    }
}
