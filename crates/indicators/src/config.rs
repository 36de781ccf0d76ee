use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Top-level indicator config file (TOML).
///
/// Example `config/indicators.toml`:
/// ```toml
/// [consensus]
/// min_indicators = 2
/// consensus_threshold = 0.6
/// unanimous_bonus = 0.2
/// partial_consensus_penalty = 0.05
///
/// [[indicator]]
/// kind = "bollinger"
/// enabled = true
///
/// [indicator.weight]
/// rule = "strength"
/// scale = 25.0
///
/// [indicator.params]
/// period = 20
/// std_dev = 2.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorsFileConfig {
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(rename = "indicator")]
    pub indicators: Vec<IndicatorSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorSpec {
    /// Indicator kind: "bollinger", "ema", "hull" or "micro_trend".
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How this indicator's vote is weighted inside the consensus.
    #[serde(default)]
    pub weight: WeightRule,
    /// Indicator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn default_true() -> bool {
    true
}

/// Consensus thresholds and confidence shaping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum count of valid, directional results required to even vote.
    pub min_indicators: usize,
    /// Required majority share among valid results, in (0, 1].
    pub consensus_threshold: f64,
    /// Added to the aggregate confidence when every valid indicator agrees.
    pub unanimous_bonus: f64,
    /// Subtracted when the majority is not unanimous.
    pub partial_consensus_penalty: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_indicators: 2,
            consensus_threshold: 0.6,
            unanimous_bonus: 0.2,
            partial_consensus_penalty: 0.05,
        }
    }
}

/// Closed set of weight rules, replacing free-form weight formulas.
/// The resulting weight only shapes the consensus confidence average; it
/// never decides the vote itself.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum WeightRule {
    /// Constant weight.
    Fixed { scale: f64 },
    /// Weight grows with the indicator's reported strength.
    Strength { scale: f64 },
    /// Weight grows with strength × confidence.
    StrengthConfidence { scale: f64 },
}

impl Default for WeightRule {
    fn default() -> Self {
        WeightRule::Fixed { scale: 1.0 }
    }
}

impl WeightRule {
    pub fn apply(&self, strength: f64, confidence: f64) -> f64 {
        match *self {
            WeightRule::Fixed { scale } => scale,
            WeightRule::Strength { scale } => strength * scale,
            WeightRule::StrengthConfidence { scale } => strength * confidence * scale,
        }
    }
}

impl IndicatorsFileConfig {
    /// Load and parse the TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read indicator config at '{path}': {e}")))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse indicator config at '{path}': {e}")))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &IndicatorSpec> {
        self.indicators.iter().filter(|s| s.enabled)
    }
}

/// Typed accessors over the free-form params table.
pub fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

pub fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .map(|v| v as usize)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config_file() {
        let cfg: IndicatorsFileConfig = toml::from_str(
            r#"
            [consensus]
            min_indicators = 3
            consensus_threshold = 0.75

            [[indicator]]
            kind = "bollinger"

            [indicator.weight]
            rule = "strength"
            scale = 25.0

            [indicator.params]
            period = 20
            std_dev = 2.0

            [[indicator]]
            kind = "ema"
            enabled = false

            [indicator.weight]
            rule = "fixed"
            scale = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(cfg.consensus.min_indicators, 3);
        assert_eq!(cfg.consensus.consensus_threshold, 0.75);
        // Bonus/penalty fall back to defaults
        assert_eq!(cfg.consensus.unanimous_bonus, 0.2);
        assert_eq!(cfg.indicators.len(), 2);
        assert_eq!(cfg.enabled().count(), 1);

        let bb = &cfg.indicators[0];
        assert_eq!(param_usize(&bb.params, "period", 0), 20);
        assert_eq!(param_f64(&bb.params, "std_dev", 0.0), 2.0);
        assert_eq!(param_f64(&bb.params, "missing", 1.5), 1.5);
    }

    #[test]
    fn weight_rules_apply_as_configured() {
        assert_eq!(WeightRule::Fixed { scale: 15.0 }.apply(0.5, 0.5), 15.0);
        assert_eq!(WeightRule::Strength { scale: 25.0 }.apply(0.8, 0.1), 20.0);
        let w = WeightRule::StrengthConfidence { scale: 20.0 }.apply(0.5, 0.5);
        assert!((w - 5.0).abs() < 1e-12);
    }

    #[test]
    fn integer_params_read_as_floats() {
        let cfg: IndicatorsFileConfig = toml::from_str(
            r#"
            [[indicator]]
            kind = "bollinger"

            [indicator.params]
            std_dev = 2
            "#,
        )
        .unwrap();
        assert_eq!(param_f64(&cfg.indicators[0].params, "std_dev", 0.0), 2.0);
    }
}
