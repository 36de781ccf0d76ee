use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{Signal, SignalEvent, TradeOutcome};

/// Persists emitted signals and their outcomes to SQLite.
///
/// Consumes the same event stream as the notifier; the pipeline never waits
/// on persistence. Database failures are logged and the loop continues —
/// a broken store must not take down signal generation.
pub struct SignalStore {
    db: SqlitePool,
    event_rx: mpsc::Receiver<SignalEvent>,
}

impl SignalStore {
    pub fn new(db: SqlitePool, event_rx: mpsc::Receiver<SignalEvent>) -> Self {
        Self { db, event_rx }
    }

    /// Run the persistence loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Signal store running");
        while let Some(event) = self.event_rx.recv().await {
            let result = match &event {
                SignalEvent::Emitted(signal) => self.insert_signal(signal).await,
                SignalEvent::Resolved(outcome) => self.record_outcome(outcome).await,
            };
            if let Err(e) = result {
                error!(error = %e, "Failed to persist signal event");
            }
        }
        warn!("SignalStore: event channel closed");
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO signals
                (id, trend, confidence, analysis_time, entry_time, reference_price, gale_attempt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&signal.id)
        .bind(signal.trend.to_string())
        .bind(signal.confidence)
        .bind(signal.analysis_time.to_rfc3339())
        .bind(signal.entry_time.to_rfc3339())
        .bind(signal.reference_price)
        .bind(i64::from(signal.gale_attempt))
        .execute(&self.db)
        .await?;

        info!(id = %signal.id, trend = %signal.trend, "Signal persisted");
        Ok(())
    }

    async fn record_outcome(&self, outcome: &TradeOutcome) -> Result<(), sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE signals
            SET outcome = ?1, resolved_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(outcome.outcome.to_string())
        .bind(outcome.resolved_at.to_rfc3339())
        .bind(&outcome.signal_id)
        .execute(&self.db)
        .await?
        .rows_affected();

        if updated == 0 {
            warn!(id = %outcome.signal_id, "Outcome for unknown signal");
        } else {
            info!(id = %outcome.signal_id, outcome = %outcome.outcome, "Outcome persisted");
        }
        Ok(())
    }
}
