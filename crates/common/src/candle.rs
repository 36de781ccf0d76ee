use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One completed OHLC price bar at a fixed granularity.
/// Immutable once appended to a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(open_time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
        }
    }

    /// Absolute size of the candle body.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WindowError {
    #[error("candle open time {new} is not after the last candle at {last}")]
    OutOfOrder {
        new: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    #[error("candle open time {new} is not aligned to a {granularity}s granularity")]
    Misaligned { new: DateTime<Utc>, granularity: u32 },
}

/// Bounded sliding buffer of completed candles, most-recent-last.
///
/// Invariants: open times strictly increase and stay aligned to the window's
/// granularity; the oldest candle is evicted once `max_len` is reached.
/// Purely in-memory — persistence is a sink concern.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    max_len: usize,
    granularity_secs: u32,
}

impl CandleWindow {
    pub fn new(max_len: usize, granularity_secs: u32) -> Self {
        assert!(max_len > 0, "candle window must hold at least one candle");
        assert!(granularity_secs > 0, "granularity must be positive");
        Self {
            candles: VecDeque::with_capacity(max_len),
            max_len,
            granularity_secs,
        }
    }

    /// Append a completed candle, evicting the oldest on overflow.
    pub fn push(&mut self, candle: Candle) -> Result<(), WindowError> {
        if let Some(last) = self.candles.back() {
            if candle.open_time <= last.open_time {
                return Err(WindowError::OutOfOrder {
                    new: candle.open_time,
                    last: last.open_time,
                });
            }
            let gap = candle.open_time - last.open_time;
            if gap.num_seconds() % i64::from(self.granularity_secs) != 0 {
                return Err(WindowError::Misaligned {
                    new: candle.open_time,
                    granularity: self.granularity_secs,
                });
            }
        }
        if self.candles.len() == self.max_len {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// The last `n` candles, oldest first. Empty if fewer are held.
    pub fn tail(&self, n: usize) -> Vec<Candle> {
        if self.candles.len() < n {
            return Vec::new();
        }
        self.candles.iter().skip(self.candles.len() - n).copied().collect()
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn granularity_secs(&self) -> u32 {
        self.granularity_secs
    }

    pub fn granularity(&self) -> Duration {
        Duration::seconds(i64::from(self.granularity_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn candle(secs: i64, close: f64) -> Candle {
        Candle::new(at(secs), close, close, close, close)
    }

    #[test]
    fn push_keeps_most_recent_up_to_max_len() {
        let mut window = CandleWindow::new(3, 60);
        for i in 0..5 {
            window.push(candle(i * 60, 100.0 + i as f64)).unwrap();
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.closes(), vec![102.0, 103.0, 104.0]);
        assert_eq!(window.last().unwrap().open_time, at(240));
    }

    #[test]
    fn push_rejects_out_of_order_candles() {
        let mut window = CandleWindow::new(10, 60);
        window.push(candle(120, 100.0)).unwrap();
        let err = window.push(candle(60, 99.0)).unwrap_err();
        assert!(matches!(err, WindowError::OutOfOrder { .. }));
        // Duplicate open time is also out of order
        let err = window.push(candle(120, 99.0)).unwrap_err();
        assert!(matches!(err, WindowError::OutOfOrder { .. }));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn push_rejects_misaligned_open_times() {
        let mut window = CandleWindow::new(10, 60);
        window.push(candle(0, 100.0)).unwrap();
        let err = window.push(candle(90, 101.0)).unwrap_err();
        assert!(matches!(err, WindowError::Misaligned { .. }));
    }

    #[test]
    fn gaps_of_whole_candles_are_accepted() {
        let mut window = CandleWindow::new(10, 60);
        window.push(candle(0, 100.0)).unwrap();
        window.push(candle(180, 101.0)).unwrap();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn tail_returns_empty_when_short() {
        let mut window = CandleWindow::new(10, 60);
        window.push(candle(0, 100.0)).unwrap();
        assert!(window.tail(2).is_empty());
        window.push(candle(60, 101.0)).unwrap();
        assert_eq!(window.tail(2).len(), 2);
        assert_eq!(window.tail(2)[0].close, 100.0);
    }
}
