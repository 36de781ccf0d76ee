use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use common::{GaleState, Outcome, Signal, Trend};
use indicators::ConsensusResult;

use crate::clock::Clock;
use crate::gale::GaleTracker;

/// Policy thresholds gating signal emission.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Minimum aggregate confidence, as a percentage, required to emit.
    pub min_confidence_to_send: f64,
    /// Minimum time between two emitted signals.
    pub signal_cooldown: Duration,
    /// Stability window before a candidate signal is committed.
    pub validate_signal_cooldown: Duration,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_confidence_to_send: 60.0,
            signal_cooldown: Duration::seconds(120),
            validate_signal_cooldown: Duration::seconds(120),
        }
    }
}

impl DecisionConfig {
    pub fn from_config(cfg: &common::Config) -> Self {
        Self {
            min_confidence_to_send: cfg.min_confidence_to_send,
            signal_cooldown: Duration::seconds(cfg.signal_cooldown_secs as i64),
            validate_signal_cooldown: Duration::seconds(cfg.validate_signal_cooldown_secs as i64),
        }
    }
}

/// Per-cycle facts about the window the decision applies to.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    /// Close of the newest completed candle.
    pub reference_price: f64,
    /// Open time of the newest completed candle.
    pub last_open_time: DateTime<Utc>,
    pub granularity: Duration,
}

impl CycleContext {
    /// Open time of the first candle starting strictly after `now`,
    /// on the grid anchored at the last completed candle.
    pub fn entry_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let gran = self.granularity.num_seconds().max(1);
        let elapsed = (now - self.last_open_time).num_seconds().max(0);
        let boundaries = elapsed / gran + 1;
        self.last_open_time + Duration::seconds(boundaries * gran)
    }
}

/// Candidate signal being held through the stability window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub trend: Trend,
    pub confidence: f64,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineState {
    Idle,
    Validating(Candidate),
    Cooldown { until: DateTime<Utc> },
}

/// Per-instrument signal gate: IDLE → VALIDATING → COOLDOWN → IDLE.
///
/// Every consensus passes through `on_consensus`; at most one signal leaves
/// per eligible window. All state lives here and is mutated only by the
/// owning pipeline task — there is no interior locking.
pub struct DecisionEngine {
    cfg: DecisionConfig,
    clock: Arc<dyn Clock>,
    state: EngineState,
    last_signal_time: Option<DateTime<Utc>>,
    gale: GaleTracker,
}

impl DecisionEngine {
    pub fn new(cfg: DecisionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            state: EngineState::Idle,
            last_signal_time: None,
            gale: GaleTracker::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Deadline of the pending stability re-check, for the pipeline's timer.
    pub fn next_recheck(&self) -> Option<DateTime<Utc>> {
        match self.state {
            EngineState::Validating(c) => Some(c.deadline),
            _ => None,
        }
    }

    pub fn gale_state(&self) -> GaleState {
        self.gale.state()
    }

    /// Apply a trade outcome to the gale counter. Orthogonal to the
    /// emission state machine; never changes it.
    pub fn record_outcome(&mut self, outcome: Outcome) -> GaleState {
        self.gale.record(outcome)
    }

    /// Feed one consensus result through the gate. Returns a signal on the
    /// (at most one) cycle that survives confidence, cooldown and the
    /// stability re-check.
    pub fn on_consensus(
        &mut self,
        consensus: &ConsensusResult,
        ctx: &CycleContext,
    ) -> Option<Signal> {
        let now = self.clock.now();

        if let EngineState::Cooldown { until } = self.state {
            if now >= until {
                debug!("Cooldown elapsed, engine idle");
                self.state = EngineState::Idle;
            }
        }

        match self.state {
            EngineState::Cooldown { .. } => None,
            EngineState::Idle => self.try_enter(consensus, ctx, now),
            EngineState::Validating(candidate) => {
                if now < candidate.deadline {
                    // Last-write-wins: a qualifying opposite call supersedes
                    // the pending candidate and restarts the window.
                    if self.qualifies(consensus) && consensus.trend != Some(candidate.trend) {
                        let takeover = Candidate {
                            trend: consensus.trend.unwrap(),
                            confidence: consensus.confidence,
                            deadline: now + self.cfg.validate_signal_cooldown,
                        };
                        info!(
                            old = %candidate.trend,
                            new = %takeover.trend,
                            "Pending candidate superseded by contradicting consensus"
                        );
                        self.state = EngineState::Validating(takeover);
                    }
                    return None;
                }

                // Single, definitive re-check against the current consensus
                let confirmed = consensus.has_consensus
                    && consensus.trend == Some(candidate.trend)
                    && self.meets_confidence(consensus.confidence);
                if confirmed {
                    Some(self.emit(candidate.trend, consensus.confidence, ctx, now))
                } else {
                    info!(
                        candidate = %candidate.trend,
                        current = ?consensus.trend,
                        confidence = consensus.confidence,
                        "Candidate failed validation, discarding"
                    );
                    self.state = EngineState::Idle;
                    // The latest consensus may immediately open a new window
                    self.try_enter(consensus, ctx, now)
                }
            }
        }
    }

    fn try_enter(
        &mut self,
        consensus: &ConsensusResult,
        ctx: &CycleContext,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        if !self.qualifies(consensus) {
            return None;
        }
        if !self.cooldown_elapsed(now) {
            debug!("Qualifying consensus rejected by cooldown gate");
            return None;
        }
        let trend = consensus.trend.expect("qualifying consensus carries a trend");

        if self.cfg.validate_signal_cooldown.is_zero() {
            return Some(self.emit(trend, consensus.confidence, ctx, now));
        }

        let candidate = Candidate {
            trend,
            confidence: consensus.confidence,
            deadline: now + self.cfg.validate_signal_cooldown,
        };
        info!(
            trend = %trend,
            confidence = consensus.confidence,
            recheck_at = %candidate.deadline,
            "Candidate accepted, validating"
        );
        self.state = EngineState::Validating(candidate);
        None
    }

    fn qualifies(&self, consensus: &ConsensusResult) -> bool {
        consensus.has_consensus
            && consensus.trend.is_some()
            && self.meets_confidence(consensus.confidence)
    }

    fn meets_confidence(&self, confidence: f64) -> bool {
        confidence * 100.0 >= self.cfg.min_confidence_to_send
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_signal_time {
            None => true,
            Some(last) => now - last >= self.cfg.signal_cooldown,
        }
    }

    fn emit(
        &mut self,
        trend: Trend,
        confidence: f64,
        ctx: &CycleContext,
        now: DateTime<Utc>,
    ) -> Signal {
        let signal = Signal::new(
            trend,
            confidence,
            now,
            ctx.entry_after(now),
            ctx.reference_price,
            self.gale.state().attempts,
        );
        self.last_signal_time = Some(now);
        self.state = EngineState::Cooldown {
            until: now + self.cfg.signal_cooldown,
        };
        info!(
            id = %signal.id,
            trend = %trend,
            confidence_pct = signal.confidence_pct(),
            entry = %signal.entry_time,
            gale = signal.gale_attempt,
            "Signal emitted"
        );
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn consensus(trend: Trend, confidence: f64) -> ConsensusResult {
        ConsensusResult {
            has_consensus: true,
            trend: Some(trend),
            confidence,
            agreeing: 2,
            valid: 2,
            total: 4,
            supporters: vec!["bollinger", "hull"],
            reason: "test".to_string(),
        }
    }

    fn no_consensus() -> ConsensusResult {
        ConsensusResult {
            has_consensus: false,
            trend: None,
            confidence: 0.0,
            agreeing: 0,
            valid: 1,
            total: 4,
            supporters: vec![],
            reason: "test".to_string(),
        }
    }

    fn ctx() -> CycleContext {
        CycleContext {
            reference_price: 1234.5,
            last_open_time: t0() - Duration::seconds(60),
            granularity: Duration::seconds(60),
        }
    }

    fn engine(cfg: DecisionConfig, clock: &ManualClock) -> DecisionEngine {
        DecisionEngine::new(cfg, Arc::new(clock.clone()))
    }

    fn instant_cfg(cooldown_secs: i64) -> DecisionConfig {
        DecisionConfig {
            min_confidence_to_send: 60.0,
            signal_cooldown: Duration::seconds(cooldown_secs),
            validate_signal_cooldown: Duration::zero(),
        }
    }

    #[test]
    fn qualifying_consensus_enters_validation_then_emits() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(DecisionConfig::default(), &clock);

        let first = engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx());
        assert!(first.is_none());
        assert!(matches!(engine.state(), EngineState::Validating(_)));
        assert_eq!(engine.next_recheck(), Some(t0() + Duration::seconds(120)));

        clock.advance(Duration::seconds(120));
        let signal = engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx()).unwrap();
        assert_eq!(signal.trend, Trend::Rise);
        assert_eq!(signal.reference_price, 1234.5);
        assert_eq!(signal.gale_attempt, 0);
        assert!(matches!(engine.state(), EngineState::Cooldown { .. }));
    }

    #[test]
    fn trend_flip_during_validation_emits_nothing() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(DecisionConfig::default(), &clock);

        engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx());
        clock.advance(Duration::seconds(120));
        // Flipped and no longer qualifying: discard, stay quiet
        let result = engine.on_consensus(&consensus(Trend::Fall, 0.5), &ctx());
        assert!(result.is_none());
        assert!(matches!(engine.state(), EngineState::Idle));
    }

    #[test]
    fn confidence_drop_during_validation_emits_nothing() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(DecisionConfig::default(), &clock);

        engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx());
        clock.advance(Duration::seconds(120));
        let result = engine.on_consensus(&consensus(Trend::Rise, 0.4), &ctx());
        assert!(result.is_none());
        assert!(matches!(engine.state(), EngineState::Idle));
    }

    #[test]
    fn qualifying_flip_supersedes_the_pending_candidate() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(DecisionConfig::default(), &clock);

        engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx());
        clock.advance(Duration::seconds(60));
        // Contradicting but qualifying: takes over, restarts the window
        assert!(engine.on_consensus(&consensus(Trend::Fall, 0.9), &ctx()).is_none());
        assert_eq!(engine.next_recheck(), Some(t0() + Duration::seconds(180)));

        clock.advance(Duration::seconds(120));
        let signal = engine.on_consensus(&consensus(Trend::Fall, 0.9), &ctx()).unwrap();
        assert_eq!(signal.trend, Trend::Fall);
    }

    #[test]
    fn below_min_confidence_stays_idle() {
        let clock = ManualClock::starting_at(t0());
        let cfg = DecisionConfig {
            min_confidence_to_send: 90.0,
            ..Default::default()
        };
        let mut engine = engine(cfg, &clock);
        // 0.84 aggregate < 90% requirement
        assert!(engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx()).is_none());
        assert!(matches!(engine.state(), EngineState::Idle));
    }

    #[test]
    fn cooldown_gate_rejects_then_accepts() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(instant_cfg(300), &clock);

        let first = engine.on_consensus(&consensus(Trend::Rise, 0.9), &ctx());
        assert!(first.is_some());

        // t = 150: inside the cooldown, an otherwise-qualifying consensus is rejected
        clock.advance(Duration::seconds(150));
        assert!(engine.on_consensus(&consensus(Trend::Rise, 0.9), &ctx()).is_none());

        // t = 301: cooldown elapsed, identical consensus accepted
        clock.advance(Duration::seconds(151));
        assert!(engine.on_consensus(&consensus(Trend::Rise, 0.9), &ctx()).is_some());
    }

    #[test]
    fn never_two_signals_within_the_cooldown() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(instant_cfg(300), &clock);
        let mut emissions = Vec::new();

        for step in 0..100 {
            if let Some(sig) = engine.on_consensus(&consensus(Trend::Rise, 0.95), &ctx()) {
                emissions.push((step, sig.analysis_time));
            }
            clock.advance(Duration::seconds(10));
        }
        for pair in emissions.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::seconds(300));
        }
    }

    #[test]
    fn no_consensus_never_enters_validation() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(DecisionConfig::default(), &clock);
        assert!(engine.on_consensus(&no_consensus(), &ctx()).is_none());
        assert!(matches!(engine.state(), EngineState::Idle));
    }

    #[test]
    fn entry_time_is_the_next_candle_boundary() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(instant_cfg(0), &clock);
        let signal = engine.on_consensus(&consensus(Trend::Rise, 0.9), &ctx()).unwrap();
        // Last candle opened at t0 − 60, now = t0: next boundary is t0 + 60
        assert_eq!(signal.entry_time, t0() + Duration::seconds(60));
        assert!(signal.entry_time > signal.analysis_time);
    }

    #[test]
    fn emitted_signal_carries_the_gale_attempt() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(instant_cfg(0), &clock);

        engine.record_outcome(Outcome::Loss);
        let signal = engine.on_consensus(&consensus(Trend::Rise, 0.9), &ctx()).unwrap();
        assert_eq!(signal.gale_attempt, 1);
    }

    #[test]
    fn outcomes_do_not_disturb_the_emission_state() {
        let clock = ManualClock::starting_at(t0());
        let mut engine = engine(DecisionConfig::default(), &clock);

        engine.on_consensus(&consensus(Trend::Rise, 0.84), &ctx());
        let before = engine.state();
        engine.record_outcome(Outcome::Loss);
        engine.record_outcome(Outcome::Win);
        assert_eq!(engine.state(), before);
    }
}
