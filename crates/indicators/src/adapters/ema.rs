use std::collections::HashMap;

use common::{CandleWindow, Trend};

use crate::config::param_usize;
use crate::math::{all_finite, ema_series};
use crate::{Indicator, IndicatorResult};

/// Dual-period EMA crossover trend detector.
///
/// Votes a direction only when the short EMA sits on one side of the long
/// EMA *and* the spread widened against the previous bar; a converging or
/// crossing pair reads as indecision.
#[derive(Debug, Clone)]
pub struct EmaAdapter {
    short_period: usize,
    long_period: usize,
}

impl EmaAdapter {
    pub const NAME: &'static str = "ema";

    /// Spread-to-price multiplier that maps a typical EMA separation onto
    /// the [0, 1] strength scale.
    const SPREAD_SCALE: f64 = 10.0;

    pub fn new(short_period: usize, long_period: usize) -> Self {
        assert!(
            short_period < long_period,
            "EMA short period must be less than long period"
        );
        Self {
            short_period,
            long_period,
        }
    }

    pub fn from_params(params: &HashMap<String, toml::Value>) -> Self {
        Self::new(
            param_usize(params, "short_period", 12),
            param_usize(params, "long_period", 26),
        )
    }
}

impl Indicator for EmaAdapter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn min_candles(&self) -> usize {
        // One extra bar to compare the spread against the previous one
        self.long_period + 1
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

        let short = ema_series(&closes, self.short_period);
        let long = ema_series(&closes, self.long_period);
        let n = closes.len();

        let spread_now = short[n - 1] - long[n - 1];
        let spread_prev = short[n - 2] - long[n - 2];
        let anchor = long[n - 1];
        if anchor.abs() < f64::EPSILON {
            return IndicatorResult::failed(Self::NAME, "degenerate EMA anchor near zero");
        }

        let rel_spread = spread_now.abs() / anchor.abs();
        let raw = rel_spread * Self::SPREAD_SCALE;

        if spread_now > 0.0 && spread_now > spread_prev {
            let strength = raw.clamp(0.3, 0.9);
            return IndicatorResult::valid(Self::NAME, Trend::Rise, strength, strength);
        }
        if spread_now < 0.0 && spread_now < spread_prev {
            let strength = raw.clamp(0.3, 0.9);
            return IndicatorResult::valid(Self::NAME, Trend::Fall, strength, strength);
        }

        // Converging or freshly crossed
        let strength = raw.min(0.3);
        IndicatorResult::valid(Self::NAME, Trend::Sideways, strength, strength * 0.5)
    }
}
