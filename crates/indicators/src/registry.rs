use common::{CandleWindow, Error, Result};
use tracing::{debug, info, warn};

use crate::adapters::{BollingerAdapter, EmaAdapter, HullAdapter, MicroTrendAdapter};
use crate::config::{IndicatorSpec, IndicatorsFileConfig};
use crate::{Indicator, IndicatorOutcome, IndicatorResult};

/// Holds the enabled indicator adapters and runs them over a window.
///
/// Built once at startup from the TOML config; unknown indicator kinds are
/// rejected here, eagerly, rather than failing per cycle.
pub struct IndicatorRegistry {
    indicators: Vec<Box<dyn Indicator>>,
}

impl std::fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorRegistry")
            .field("indicators", &self.indicators.len())
            .finish()
    }
}

impl IndicatorRegistry {
    pub fn from_config(cfg: &IndicatorsFileConfig) -> Result<Self> {
        let mut indicators: Vec<Box<dyn Indicator>> = Vec::new();

        for spec in cfg.enabled() {
            let indicator = build_indicator(spec)?;
            info!(
                kind = %spec.kind,
                min_candles = indicator.min_candles(),
                "Registered indicator"
            );
            indicators.push(indicator);
        }

        if indicators.is_empty() {
            return Err(Error::Config("no indicators enabled".to_string()));
        }
        Ok(Self { indicators })
    }

    /// Run every adapter over the window. A failing adapter is logged and
    /// reported as a `Failed` result; it never stops the others.
    pub fn evaluate_all(&self, window: &CandleWindow) -> Vec<IndicatorResult> {
        self.indicators
            .iter()
            .map(|indicator| {
                let result = indicator.evaluate(window);
                match &result.outcome {
                    IndicatorOutcome::Valid {
                        trend,
                        strength,
                        confidence,
                    } => {
                        debug!(
                            indicator = result.name,
                            trend = %trend,
                            strength,
                            confidence,
                            "Indicator evaluated"
                        );
                    }
                    IndicatorOutcome::Failed { reason } => {
                        warn!(indicator = result.name, reason = %reason, "Indicator failed");
                    }
                }
                result
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Largest lookback any enabled indicator needs to evaluate at all.
    pub fn max_min_candles(&self) -> usize {
        self.indicators
            .iter()
            .map(|i| i.min_candles())
            .max()
            .unwrap_or(0)
    }
}

fn build_indicator(spec: &IndicatorSpec) -> Result<Box<dyn Indicator>> {
    match spec.kind.as_str() {
        BollingerAdapter::NAME => Ok(Box::new(BollingerAdapter::from_params(&spec.params))),
        EmaAdapter::NAME => Ok(Box::new(EmaAdapter::from_params(&spec.params))),
        HullAdapter::NAME => Ok(Box::new(HullAdapter::from_params(&spec.params))),
        MicroTrendAdapter::NAME => Ok(Box::new(MicroTrendAdapter::from_params(&spec.params))),
        other => Err(Error::Config(format!("unknown indicator kind '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testutil::window_from_closes;

    fn config(toml_src: &str) -> IndicatorsFileConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn unknown_kind_is_rejected_at_startup() {
        let cfg = config(
            r#"
            [[indicator]]
            kind = "stochastic"
            "#,
        );
        let err = IndicatorRegistry::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("stochastic"));
    }

    #[test]
    fn disabled_indicators_are_not_built() {
        let cfg = config(
            r#"
            [[indicator]]
            kind = "bollinger"

            [[indicator]]
            kind = "ema"
            enabled = false
            "#,
        );
        let registry = IndicatorRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_disabled_is_a_config_error() {
        let cfg = config(
            r#"
            [[indicator]]
            kind = "ema"
            enabled = false
            "#,
        );
        assert!(IndicatorRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn one_failing_adapter_does_not_stop_the_rest() {
        let cfg = config(
            r#"
            [[indicator]]
            kind = "hull"

            [[indicator]]
            kind = "micro_trend"
            "#,
        );
        let registry = IndicatorRegistry::from_config(&cfg).unwrap();
        // Enough candles for micro_trend, far too few for hull(100)
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let results = registry.evaluate_all(&window_from_closes(&closes));
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].outcome, IndicatorOutcome::Failed { .. }));
        assert!(results[1].as_valid().is_some());
    }

    #[test]
    fn evaluation_is_deterministic_for_identical_windows() {
        let cfg = config(
            r#"
            [[indicator]]
            kind = "bollinger"

            [[indicator]]
            kind = "ema"

            [[indicator]]
            kind = "micro_trend"
            "#,
        );
        let registry = IndicatorRegistry::from_config(&cfg).unwrap();
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let window = window_from_closes(&closes);
        assert_eq!(registry.evaluate_all(&window), registry.evaluate_all(&window));
    }
}
