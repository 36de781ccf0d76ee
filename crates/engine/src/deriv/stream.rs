use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use common::{Candle, Error, Result};
use tracing::{info, warn};

/// Candle data pushed by the Deriv stream.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Initial history, oldest first. Sent once per (re)connection.
    History(Vec<Candle>),
    /// Live snapshot of the currently forming candle. Repeats for the same
    /// open time until the candle closes and the next open time appears.
    Tick(Candle),
}

/// Deriv candle WebSocket stream for a single symbol.
///
/// Authorizes, requests `count` candles of history with a live subscription,
/// and forwards parsed events to the pipeline. Reconnects automatically with
/// exponential backoff.
pub struct DerivStream {
    endpoint: String,
    token: String,
    symbol: String,
    granularity_secs: u32,
    count: usize,
    feed_tx: mpsc::Sender<FeedEvent>,
}

impl DerivStream {
    pub fn new(
        app_id: &str,
        token: impl Into<String>,
        symbol: impl Into<String>,
        granularity_secs: u32,
        count: usize,
        feed_tx: mpsc::Sender<FeedEvent>,
    ) -> Self {
        Self {
            endpoint: format!("wss://ws.derivws.com/websockets/v3?app_id={app_id}"),
            token: token.into(),
            symbol: symbol.into(),
            granularity_secs,
            count,
            feed_tx,
        }
    }

    /// Run the stream loop forever, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            info!(symbol = %self.symbol, "Connecting to Deriv WebSocket stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "WebSocket stream closed cleanly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(Error::Feed(reason)) if reason == "pipeline gone" => {
                    warn!(symbol = %self.symbol, "Feed channel closed — stopping stream");
                    return;
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "WebSocket error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(json!({ "authorize": self.token }).to_string()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            let Message::Text(text) = msg else { continue };

            match parse_frame(&text) {
                Ok(Frame::Authorized) => {
                    info!(symbol = %self.symbol, count = self.count, "Authorized, requesting candle history");
                    let request = json!({
                        "ticks_history": self.symbol,
                        "style": "candles",
                        "granularity": self.granularity_secs,
                        "count": self.count,
                        "end": "latest",
                        "subscribe": 1,
                    });
                    write
                        .send(Message::Text(request.to_string()))
                        .await
                        .map_err(|e| Error::WebSocket(e.to_string()))?;
                }
                Ok(Frame::History(candles)) => {
                    info!(candles = candles.len(), "Candle history received");
                    self.forward(FeedEvent::History(candles)).await?;
                }
                Ok(Frame::Tick(candle)) => {
                    self.forward(FeedEvent::Tick(candle)).await?;
                }
                Ok(Frame::Other) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to parse Deriv frame");
                }
            }
        }

        Ok(())
    }

    async fn forward(&self, event: FeedEvent) -> Result<()> {
        self.feed_tx
            .send(event)
            .await
            .map_err(|_| Error::Feed("pipeline gone".to_string()))
    }
}

// ─── Deriv frame parsing ─────────────────────────────────────────────────────

#[derive(Debug)]
enum Frame {
    Authorized,
    History(Vec<Candle>),
    Tick(Candle),
    Other,
}

fn parse_frame(text: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown API error");
        return Err(Error::Feed(message.to_string()));
    }

    match value.get("msg_type").and_then(Value::as_str) {
        Some("authorize") => Ok(Frame::Authorized),
        Some("candles") => {
            let raw = value
                .get("candles")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::Feed("candles frame without candle array".to_string()))?;
            let candles = raw
                .iter()
                .filter_map(|c| parse_candle(c, "epoch"))
                .collect();
            Ok(Frame::History(candles))
        }
        Some("ohlc") => {
            let ohlc = value
                .get("ohlc")
                .ok_or_else(|| Error::Feed("ohlc frame without ohlc object".to_string()))?;
            parse_candle(ohlc, "open_time")
                .map(Frame::Tick)
                .ok_or_else(|| Error::Feed("unparseable ohlc frame".to_string()))
        }
        _ => Ok(Frame::Other),
    }
}

/// Deriv sends prices as JSON numbers in history frames and as strings in
/// live ohlc frames; accept both.
fn field_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn field_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_candle(value: &Value, time_key: &str) -> Option<Candle> {
    let open_time = Utc.timestamp_opt(field_i64(value, time_key)?, 0).single()?;
    Some(Candle::new(
        open_time,
        field_f64(value, "open")?,
        field_f64(value, "high")?,
        field_f64(value, "low")?,
        field_f64(value, "close")?,
    ))
}
