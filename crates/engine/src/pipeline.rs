use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use common::{Candle, CandleWindow, Outcome, SignalEvent, TradeOutcome, Trend};
use decision::{CycleContext, DecisionEngine};
use indicators::{ConsensusAnalyzer, ConsensusResult, IndicatorRegistry};

use crate::deriv::FeedEvent;

/// A signal waiting for its entry candle to close so it can be judged.
#[derive(Debug, Clone)]
struct PendingSignal {
    id: String,
    trend: Trend,
    entry_time: DateTime<Utc>,
}

/// Per-instrument decision pipeline.
///
/// Owns the candle window, the indicator registry, the consensus analyzer
/// and the decision engine. Everything runs on this one task: each completed
/// candle triggers one synchronous pass, so partial state is never observed
/// and gale updates apply atomically with respect to the instrument.
pub struct SignalPipeline {
    window: CandleWindow,
    registry: IndicatorRegistry,
    analyzer: ConsensusAnalyzer,
    engine: DecisionEngine,
    feed_rx: mpsc::Receiver<FeedEvent>,
    notify_tx: mpsc::Sender<SignalEvent>,
    store_tx: mpsc::Sender<SignalEvent>,
    /// Live snapshot of the candle currently forming; completed candles only
    /// ever enter the window.
    forming: Option<Candle>,
    pending: Vec<PendingSignal>,
    /// Latest consensus and its context, re-checked when validation fires.
    last_consensus: Option<(ConsensusResult, CycleContext)>,
}

impl SignalPipeline {
    pub fn new(
        window: CandleWindow,
        registry: IndicatorRegistry,
        analyzer: ConsensusAnalyzer,
        engine: DecisionEngine,
        feed_rx: mpsc::Receiver<FeedEvent>,
        notify_tx: mpsc::Sender<SignalEvent>,
        store_tx: mpsc::Sender<SignalEvent>,
    ) -> Self {
        Self {
            window,
            registry,
            analyzer,
            engine,
            feed_rx,
            notify_tx,
            store_tx,
            forming: None,
            pending: Vec::new(),
            last_consensus: None,
        }
    }

    /// Run the pipeline loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            indicators = self.registry.len(),
            min_window = self.registry.max_min_candles(),
            "Signal pipeline running"
        );

        loop {
            let recheck = self.engine.next_recheck().map(deadline_instant);

            tokio::select! {
                event = self.feed_rx.recv() => match event {
                    Some(FeedEvent::History(candles)) => self.seed_history(candles),
                    Some(FeedEvent::Tick(tick)) => {
                        if let Some(completed) = self.absorb(tick) {
                            if !self.on_completed_candle(completed).await {
                                return;
                            }
                        }
                    }
                    None => {
                        warn!("Feed channel closed — stopping pipeline");
                        return;
                    }
                },
                // Validation window elapsed: definitive re-check of the
                // latest consensus, without blocking candle ingestion.
                _ = async { sleep_until(recheck.unwrap()).await }, if recheck.is_some() => {
                    if !self.revalidate().await {
                        return;
                    }
                }
            }
        }
    }

    fn seed_history(&mut self, candles: Vec<Candle>) {
        let mut accepted = 0usize;
        for candle in candles {
            match self.window.push(candle) {
                Ok(()) => accepted += 1,
                Err(e) => debug!(error = %e, "Skipping history candle"),
            }
        }
        info!(accepted, window = self.window.len(), "Candle history seeded");
    }

    /// Fold a live tick into the forming candle. Returns the completed
    /// candle when a later open time supersedes the one being formed.
    fn absorb(&mut self, tick: Candle) -> Option<Candle> {
        match self.forming {
            None => {
                let is_new = self
                    .window
                    .last()
                    .map_or(true, |last| tick.open_time > last.open_time);
                if is_new {
                    self.forming = Some(tick);
                }
                None
            }
            Some(current) if tick.open_time == current.open_time => {
                self.forming = Some(tick);
                None
            }
            Some(current) if tick.open_time > current.open_time => {
                self.forming = Some(tick);
                Some(current)
            }
            Some(_) => {
                warn!(open_time = %tick.open_time, "Stale tick ignored");
                None
            }
        }
    }

    async fn on_completed_candle(&mut self, completed: Candle) -> bool {
        if let Err(e) = self.window.push(completed) {
            warn!(error = %e, "Rejected completed candle");
            return true;
        }
        debug!(
            open_time = %completed.open_time,
            close = completed.close,
            window = self.window.len(),
            "Candle completed"
        );

        if !self.resolve_pending(&completed).await {
            return false;
        }
        self.run_cycle().await
    }

    /// One synchronous pass: indicators → consensus → decision.
    async fn run_cycle(&mut self) -> bool {
        let Some(last) = self.window.last().copied() else {
            return true;
        };
        let ctx = CycleContext {
            reference_price: last.close,
            last_open_time: last.open_time,
            granularity: self.window.granularity(),
        };

        let results = self.registry.evaluate_all(&self.window);
        let consensus = self.analyzer.analyze(&results);
        debug!(
            has_consensus = consensus.has_consensus,
            valid = consensus.valid,
            reason = %consensus.reason,
            "Cycle evaluated"
        );

        let signal = self.engine.on_consensus(&consensus, &ctx);
        self.last_consensus = Some((consensus, ctx));

        match signal {
            Some(signal) => self.dispatch_signal(signal).await,
            None => true,
        }
    }

    /// Re-check fired by the validation timer between candles.
    async fn revalidate(&mut self) -> bool {
        let Some((consensus, ctx)) = self.last_consensus.clone() else {
            return true;
        };
        match self.engine.on_consensus(&consensus, &ctx) {
            Some(signal) => self.dispatch_signal(signal).await,
            None => true,
        }
    }

    async fn dispatch_signal(&mut self, signal: common::Signal) -> bool {
        self.pending.push(PendingSignal {
            id: signal.id.clone(),
            trend: signal.trend,
            entry_time: signal.entry_time,
        });
        self.publish(SignalEvent::Emitted(signal)).await
    }

    /// Judge any signal whose entry candle just completed: RISE wins on a
    /// bullish entry candle, FALL on a bearish one.
    async fn resolve_pending(&mut self, completed: &Candle) -> bool {
        let mut resolved = Vec::new();
        let mut waiting = Vec::new();

        for pending in self.pending.drain(..) {
            if completed.open_time == pending.entry_time {
                let won = match pending.trend {
                    Trend::Rise => completed.close > completed.open,
                    Trend::Fall => completed.close < completed.open,
                    Trend::Sideways => false,
                };
                let outcome = if won { Outcome::Win } else { Outcome::Loss };
                let gale = self.engine.record_outcome(outcome);
                info!(
                    signal = %pending.id,
                    outcome = %outcome,
                    gale = %gale,
                    "Signal resolved"
                );
                resolved.push(TradeOutcome {
                    signal_id: pending.id,
                    outcome,
                    resolved_at: Utc::now(),
                    gale,
                });
            } else if completed.open_time > pending.entry_time {
                warn!(signal = %pending.id, "Entry candle never observed — dropping unresolved signal");
            } else {
                waiting.push(pending);
            }
        }
        self.pending = waiting;

        for outcome in resolved {
            if !self.publish(SignalEvent::Resolved(outcome)).await {
                return false;
            }
        }
        true
    }

    async fn publish(&self, event: SignalEvent) -> bool {
        if self.notify_tx.send(event.clone()).await.is_err() {
            warn!("Notification channel closed — stopping pipeline");
            return false;
        }
        if self.store_tx.send(event).await.is_err() {
            warn!("Store channel closed — stopping pipeline");
            return false;
        }
        true
    }
}

fn deadline_instant(deadline: DateTime<Utc>) -> Instant {
    let remaining = (deadline - Utc::now()).num_milliseconds().max(0) as u64;
    Instant::now() + std::time::Duration::from_millis(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use decision::{DecisionConfig, ManualClock};
    use std::sync::Arc;

    fn candle(secs: i64, open: f64, close: f64) -> Candle {
        Candle::new(
            Utc.timestamp_opt(secs, 0).unwrap(),
            open,
            open.max(close),
            open.min(close),
            close,
        )
    }

    fn test_pipeline(
        min_indicators: usize,
        decision_cfg: DecisionConfig,
    ) -> (
        SignalPipeline,
        mpsc::Sender<FeedEvent>,
        mpsc::Receiver<SignalEvent>,
        mpsc::Receiver<SignalEvent>,
    ) {
        let file_cfg: indicators::IndicatorsFileConfig = toml::from_str(&format!(
            r#"
            [consensus]
            min_indicators = {min_indicators}

            [[indicator]]
            kind = "micro_trend"

            [indicator.params]
            lookback_period = 5
            "#
        ))
        .unwrap();
        let registry = IndicatorRegistry::from_config(&file_cfg).unwrap();
        let analyzer = ConsensusAnalyzer::from_config(&file_cfg);
        let clock = ManualClock::starting_at(Utc.timestamp_opt(10_000, 0).unwrap());
        let engine = DecisionEngine::new(decision_cfg, Arc::new(clock));

        let (feed_tx, feed_rx) = mpsc::channel(64);
        let (notify_tx, notify_rx) = mpsc::channel(64);
        let (store_tx, store_rx) = mpsc::channel(64);
        let pipeline = SignalPipeline::new(
            CandleWindow::new(50, 60),
            registry,
            analyzer,
            engine,
            feed_rx,
            notify_tx,
            store_tx,
        );
        (pipeline, feed_tx, notify_rx, store_rx)
    }

    fn instant_cfg() -> DecisionConfig {
        DecisionConfig {
            min_confidence_to_send: 30.0,
            signal_cooldown: Duration::zero(),
            validate_signal_cooldown: Duration::zero(),
        }
    }

    #[test]
    fn absorb_completes_a_candle_when_a_newer_open_time_arrives() {
        let (mut pipeline, _tx, _n, _s) = test_pipeline(2, DecisionConfig::default());

        assert!(pipeline.absorb(candle(0, 100.0, 100.1)).is_none());
        // Same open time: still forming
        assert!(pipeline.absorb(candle(0, 100.0, 100.3)).is_none());
        // Newer open time: previous candle is complete, final close kept
        let completed = pipeline.absorb(candle(60, 100.3, 100.4)).unwrap();
        assert_eq!(completed.open_time.timestamp(), 0);
        assert_eq!(completed.close, 100.3);
    }

    #[test]
    fn absorb_ignores_ticks_older_than_the_window() {
        let (mut pipeline, _tx, _n, _s) = test_pipeline(2, DecisionConfig::default());
        pipeline.seed_history(vec![candle(0, 100.0, 100.1), candle(60, 100.1, 100.2)]);
        // Update for the already-recorded last candle: not tracked
        assert!(pipeline.absorb(candle(60, 100.1, 100.25)).is_none());
        assert!(pipeline.forming.is_none());
        // Genuinely new candle is tracked
        assert!(pipeline.absorb(candle(120, 100.2, 100.3)).is_none());
        assert!(pipeline.forming.is_some());
    }

    #[tokio::test]
    async fn completed_candles_drive_cycles_and_emit_signals() {
        let (mut pipeline, _tx, mut notify_rx, mut store_rx) = test_pipeline(1, instant_cfg());

        // Rising history so the micro-trend indicator votes RISE
        let history: Vec<Candle> = (0..10)
            .map(|i| candle(i * 60, 100.0 + i as f64, 101.0 + i as f64))
            .collect();
        pipeline.seed_history(history);

        // Forming candle, then its completion
        assert!(pipeline.absorb(candle(600, 110.0, 111.0)).is_none());
        let completed = pipeline.absorb(candle(660, 111.0, 112.0)).unwrap();
        assert!(pipeline.on_completed_candle(completed).await);

        let emitted = notify_rx.try_recv().expect("signal on notify channel");
        let SignalEvent::Emitted(signal) = emitted else {
            panic!("expected an emitted signal");
        };
        assert_eq!(signal.trend, Trend::Rise);
        assert!(matches!(
            store_rx.try_recv().expect("signal on store channel"),
            SignalEvent::Emitted(_)
        ));
    }

    #[tokio::test]
    async fn entry_candle_close_resolves_the_signal_and_advances_gale() {
        let (mut pipeline, _tx, mut notify_rx, _s) = test_pipeline(1, instant_cfg());
        pipeline.pending.push(PendingSignal {
            id: "sig-1".to_string(),
            trend: Trend::Rise,
            entry_time: Utc.timestamp_opt(600, 0).unwrap(),
        });

        // Entry candle closes bearish: a RISE signal loses
        let entry_candle = candle(600, 110.0, 109.0);
        assert!(pipeline.resolve_pending(&entry_candle).await);

        let SignalEvent::Resolved(outcome) = notify_rx.try_recv().unwrap() else {
            panic!("expected a resolved outcome");
        };
        assert_eq!(outcome.signal_id, "sig-1");
        assert_eq!(outcome.outcome, Outcome::Loss);
        assert_eq!(outcome.gale.attempts, 1);
        assert!(outcome.gale.armed);
        assert!(pipeline.pending.is_empty());
    }

    #[tokio::test]
    async fn unrelated_candles_leave_pending_signals_waiting() {
        let (mut pipeline, _tx, mut notify_rx, _s) = test_pipeline(1, instant_cfg());
        pipeline.pending.push(PendingSignal {
            id: "sig-2".to_string(),
            trend: Trend::Fall,
            entry_time: Utc.timestamp_opt(600, 0).unwrap(),
        });

        let earlier = candle(540, 110.0, 109.0);
        assert!(pipeline.resolve_pending(&earlier).await);
        assert_eq!(pipeline.pending.len(), 1);
        assert!(notify_rx.try_recv().is_err());
    }
}
