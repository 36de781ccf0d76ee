use std::collections::HashMap;

use common::{CandleWindow, Trend};

use crate::config::{param_f64, param_usize};
use crate::math::{all_finite, hull_series};
use crate::{Indicator, IndicatorResult};

/// Hull moving-average slope detector.
///
/// Computes the HMA of `period` closes and reads the trend off the mean
/// per-bar relative slope over the last `slope_lookback` bars. Slopes inside
/// `dead_band` count as flat.
#[derive(Debug, Clone)]
pub struct HullAdapter {
    period: usize,
    slope_lookback: usize,
    /// Relative per-bar slope below which the market reads as flat.
    dead_band: f64,
}

impl HullAdapter {
    pub const NAME: &'static str = "hull";

    /// Dead-band multiples at which the slope saturates full strength.
    const FULL_SCALE_DEAD_BANDS: f64 = 20.0;

    pub fn new(period: usize, slope_lookback: usize, dead_band: f64) -> Self {
        assert!(period >= 4, "Hull period must be >= 4");
        assert!(slope_lookback >= 1, "Hull slope lookback must be >= 1");
        Self {
            period,
            slope_lookback,
            dead_band,
        }
    }

    pub fn from_params(params: &HashMap<String, toml::Value>) -> Self {
        Self::new(
            param_usize(params, "period", 100),
            param_usize(params, "slope_lookback", 5),
            param_f64(params, "dead_band", 5e-5),
        )
    }

    fn warmup(&self) -> usize {
        let sqrt_p = (self.period as f64).sqrt().floor().max(1.0) as usize;
        self.period + sqrt_p - 1
    }
}

impl Indicator for HullAdapter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn min_candles(&self) -> usize {
        self.warmup() + self.slope_lookback
    }

    fn evaluate(&self, window: &CandleWindow) -> IndicatorResult {
        let closes = window.closes();
        if closes.len() < self.min_candles() {
            return IndicatorResult::failed(
                Self::NAME,
                format!("insufficient candles: {}/{}", closes.len(), self.min_candles()),
            );
        }
        if !all_finite(&closes) {
            return IndicatorResult::failed(Self::NAME, "non-finite close price in window");
        }

        let hma = hull_series(&closes, self.period);
        let n = hma.len();
        let last = hma[n - 1];
        let back = hma[n - 1 - self.slope_lookback];
        if !last.is_finite() || !back.is_finite() {
            return IndicatorResult::failed(Self::NAME, "hull series not warmed up");
        }

        let price = *closes.last().unwrap();
        if price.abs() < f64::EPSILON {
            return IndicatorResult::failed(Self::NAME, "degenerate reference price near zero");
        }
        let rel_slope = (last - back) / (self.slope_lookback as f64 * price);

        if rel_slope.abs() <= self.dead_band {
            let strength = (rel_slope.abs() / self.dead_band).min(1.0) * 0.3;
            return IndicatorResult::valid(Self::NAME, Trend::Sideways, strength, 0.2);
        }

        let full_scale = self.dead_band * Self::FULL_SCALE_DEAD_BANDS;
        let strength = (rel_slope.abs() / full_scale).clamp(0.0, 1.0);
        let trend = if rel_slope > 0.0 { Trend::Rise } else { Trend::Fall };
        IndicatorResult::valid(Self::NAME, trend, strength, strength * 0.9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testutil::window_from_closes;
    use crate::IndicatorOutcome;

    fn adapter() -> HullAdapter {
        // Smaller period keeps test fixtures readable; behavior is identical
        HullAdapter::new(16, 3, 5e-5)
    }

    #[test]
    fn short_window_fails_instead_of_voting() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let result = adapter().evaluate(&window_from_closes(&closes));
        assert!(matches!(result.outcome, IndicatorOutcome::Failed { .. }));
    }

    #[test]
    fn rising_series_votes_rise() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
        let result = adapter().evaluate(&window_from_closes(&closes));
        let (trend, strength, confidence) = result.as_valid().unwrap();
        assert_eq!(trend, Trend::Rise);
        assert!(strength > 0.5);
        assert!(confidence <= strength);
    }

    #[test]
    fn falling_series_votes_fall() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64 * 0.5).collect();
        let result = adapter().evaluate(&window_from_closes(&closes));
        let (trend, _, _) = result.as_valid().unwrap();
        assert_eq!(trend, Trend::Fall);
    }

    #[test]
    fn flat_series_stays_in_the_dead_band() {
        let closes = vec![100.0; 40];
        let result = adapter().evaluate(&window_from_closes(&closes));
        let (trend, strength, _) = result.as_valid().unwrap();
        assert_eq!(trend, Trend::Sideways);
        assert!(strength <= 0.3);
    }

    #[test]
    fn default_params_require_at_least_the_period() {
        let hull = HullAdapter::from_params(&Default::default());
        assert!(hull.min_candles() >= 100);
    }
}
