use std::collections::HashMap;

use common::{CandleWindow, Trend};

use crate::config::{param_f64, param_usize};
use crate::math::{all_finite, mean, std_dev};
use crate::{Indicator, IndicatorResult};

/// Bollinger-band breakout detector.
///
/// Builds an SMA ± `std_dev` band over the last `period` closes and votes a
/// direction only when the latest close breaks out of the band by more than
/// `breakout_threshold` of price. Inside the bands it abstains with a
/// confidence that fades toward zero.
#[derive(Debug, Clone)]
pub struct BollingerAdapter {
    period: usize,
    std_dev: f64,
    /// Breakout margin relative to price (0.001 = 0.1%).
    breakout_threshold: f64,
}

impl BollingerAdapter {
    pub const NAME: &'static str = "bollinger";

    pub fn new(period: usize, std_dev: f64, breakout_threshold: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        assert!(std_dev > 0.0, "Bollinger deviation multiplier must be positive");
        Self {
            period,
            std_dev,
            breakout_threshold,
        }
    }

    pub fn from_params(params: &HashMap<String, toml::Value>) -> Self {
        Self::new(
            param_usize(params, "period", 20),
            param_f64(params, "std_dev", 2.0),
            param_f64(params, "breakout_threshold", 0.001),
        )
    }
}

impl Indicator for BollingerAdapter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn min_candles(&self) -> usize {
        self.period
    }

    fn evaluate(&self, window: &CandleWindow) -> IndicatorResult {
        let closes = window.closes();
        if closes.len() < self.period {
            return IndicatorResult::failed(
                Self::NAME,
                format!("insufficient candles: {}/{}", closes.len(), self.period),
            );
        }
        if !all_finite(&closes) {
            return IndicatorResult::failed(Self::NAME, "non-finite close price in window");
        }

        let tail = &closes[closes.len() - self.period..];
        let middle = mean(tail);
        let dev = std_dev(tail);
        let upper = middle + dev * self.std_dev;
        let lower = middle - dev * self.std_dev;
        let width = upper - lower;
        let last = *closes.last().unwrap();

        if width <= 0.0 || last <= 0.0 {
            // Flat series: no band to break
            return IndicatorResult::valid(Self::NAME, Trend::Sideways, 0.0, 0.0);
        }

        if (last - upper) / last > self.breakout_threshold {
            let strength = ((last - upper) / width).clamp(0.0, 1.0);
            return IndicatorResult::valid(Self::NAME, Trend::Rise, strength, strength);
        }
        if (lower - last) / last > self.breakout_threshold {
            let strength = ((lower - last) / width).clamp(0.0, 1.0);
            return IndicatorResult::valid(Self::NAME, Trend::Fall, strength, strength);
        }

        // Inside the bands: report how close price sits to either band, with
        // confidence degrading toward zero near the middle.
        let offset = ((last - middle).abs() / (width / 2.0)).clamp(0.0, 1.0);
        IndicatorResult::valid(Self::NAME, Trend::Sideways, offset * 0.5, offset * 0.25)
    }
}
