use std::collections::HashMap;

use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::{Signal, SignalEvent, TradeOutcome};

/// Delivers emitted signals and their results to a Telegram chat.
///
/// Results are sent as replies to the original signal message, so the chat
/// history reads as signal → outcome threads. Delivery failures are logged
/// and dropped — the core never learns about them.
pub struct Notifier {
    bot: Bot,
    chat_id: ChatId,
    event_rx: mpsc::Receiver<SignalEvent>,
    /// Telegram message id per signal id, for result replies.
    message_ids: HashMap<String, MessageId>,
}

impl Notifier {
    pub fn new(token: &str, chat_id: i64, event_rx: mpsc::Receiver<SignalEvent>) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
            event_rx,
            message_ids: HashMap::new(),
        }
    }

    /// Run the notifier loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(chat_id = self.chat_id.0, "Telegram notifier running");
        while let Some(event) = self.event_rx.recv().await {
            match event {
                SignalEvent::Emitted(signal) => self.send_signal(&signal).await,
                SignalEvent::Resolved(outcome) => self.send_result(&outcome).await,
            }
        }
        warn!("Notifier: event channel closed");
    }

    async fn send_signal(&mut self, signal: &Signal) {
        let text = compose_signal_message(signal);
        match self.bot.send_message(self.chat_id, text).await {
            Ok(message) => {
                self.message_ids.insert(signal.id.clone(), message.id);
                info!(id = %signal.id, "Signal message delivered");
            }
            Err(e) => {
                warn!(id = %signal.id, error = %e, "Failed to deliver signal message");
            }
        }
    }

    async fn send_result(&mut self, outcome: &TradeOutcome) {
        let text = compose_result_message(outcome);
        let request = self.bot.send_message(self.chat_id, text);
        let request = match self.message_ids.remove(&outcome.signal_id) {
            Some(message_id) => request.reply_to_message_id(message_id),
            None => request,
        };
        if let Err(e) = request.await {
            warn!(id = %outcome.signal_id, error = %e, "Failed to deliver result message");
        }
    }
}

fn compose_signal_message(signal: &Signal) -> String {
    let mut text = format!(
        "🔖 ID: {}\n\
         🔔 Next-candle projection!\n\
         🎯 Projection: {}\n\
         🕒 Analysis: {}\n\
         📈 Last price: {}\n\
         🎯 Confidence: {:.0}%\n\
         🕒 Entry candle: {}",
        signal.id,
        signal.trend,
        signal.analysis_time.format("%Y-%m-%d %H:%M:%S"),
        signal.reference_price,
        signal.confidence_pct(),
        signal.entry_time.format("%Y-%m-%d %H:%M:%S"),
    );
    if signal.gale_attempt > 0 {
        text.push_str(&format!("\n♻️ Gale attempt: G{}", signal.gale_attempt));
    }
    text
}

fn compose_result_message(outcome: &TradeOutcome) -> String {
    let mut text = match outcome.outcome {
        common::Outcome::Win => format!("✅ Result for signal {}: WIN", outcome.signal_id),
        common::Outcome::Loss => format!("❌ Result for signal {}: LOSS", outcome.signal_id),
    };
    if outcome.gale.armed {
        text.push_str(&format!("\n🚨 Gale G{} armed for the next signal", outcome.gale.attempts));
    }
    text
}
