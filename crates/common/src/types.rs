use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directional verdict of an indicator or of the consensus.
/// `Sideways` is an explicit abstention — it never counts as a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Rise,
    Fall,
    Sideways,
}

impl Trend {
    /// True for the two directions that can back a trade.
    pub fn is_directional(self) -> bool {
        !matches!(self, Trend::Sideways)
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Rise => write!(f, "RISE"),
            Trend::Fall => write!(f, "FALL"),
            Trend::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

/// Result of a resolved signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
        }
    }
}

/// A trade signal emitted by the decision engine. Immutable after creation;
/// ownership passes to the notifier and store tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub trend: Trend,
    /// Aggregate consensus confidence in [0, 1] at emission time.
    pub confidence: f64,
    /// Wall-clock instant the deciding analysis ran.
    pub analysis_time: DateTime<Utc>,
    /// Open time of the candle the signal targets.
    pub entry_time: DateTime<Utc>,
    /// Last close price at analysis time.
    pub reference_price: f64,
    /// Gale attempt counter at emission — contextual metadata only.
    pub gale_attempt: u8,
}

impl Signal {
    pub fn new(
        trend: Trend,
        confidence: f64,
        analysis_time: DateTime<Utc>,
        entry_time: DateTime<Utc>,
        reference_price: f64,
        gale_attempt: u8,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trend,
            confidence,
            analysis_time,
            entry_time,
            reference_price,
            gale_attempt,
        }
    }

    /// Confidence as a whole percentage for logs and messages.
    pub fn confidence_pct(&self) -> f64 {
        self.confidence * 100.0
    }
}

/// Bounded gale retry counter, advanced by trade outcomes.
/// A loss increments and arms; a win, or a loss at the cap, resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaleState {
    pub attempts: u8,
    pub armed: bool,
}

impl std::fmt::Display for GaleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.armed {
            write!(f, "G{}", self.attempts)
        } else {
            write!(f, "-")
        }
    }
}

/// Resolution of a previously emitted signal, delivered to the sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub signal_id: String,
    pub outcome: Outcome,
    pub resolved_at: DateTime<Utc>,
    /// Gale state after applying this outcome.
    pub gale: GaleState,
}

/// Event shape consumed by the notification and persistence sinks.
#[derive(Debug, Clone)]
pub enum SignalEvent {
    Emitted(Signal),
    Resolved(TradeOutcome),
}
