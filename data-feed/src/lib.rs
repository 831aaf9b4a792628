use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_core::{Candle, TimeFrame, Timestamp};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("no candles for {symbol} at {timeframe}")]
    UnknownSymbol { symbol: String, timeframe: String },
    #[error("series for {0} is empty")]
    Empty(String),
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(Timestamp),
}

/// Source of historical candles. Concrete network fetchers live outside this workspace.
pub trait CandleProvider {
    /// Returns up to `limit` most recent candles, oldest first.
    fn candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<Candle>, FeedError>;
}

/// Candle store keyed by symbol and timeframe; the provider used by tests and offline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryProvider {
    series: HashMap<String, Vec<Candle>>,
}

fn series_key(symbol: &str, timeframe: TimeFrame) -> String {
    format!("{}@{}", symbol.to_ascii_uppercase(), timeframe.name())
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored series. Candles are sorted by timestamp and deduplicated (last wins).
    pub fn insert(&mut self, symbol: &str, mut candles: Vec<Candle>) -> Result<(), FeedError> {
        let Some(first) = candles.first() else {
            return Err(FeedError::Empty(symbol.to_string()));
        };
        let timeframe = first.timeframe;
        candles.sort_by_key(|c| c.ts);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.ts == candle.ts => *last = candle,
                _ => deduped.push(candle),
            }
        }
        self.series.insert(series_key(symbol, timeframe), deduped);
        Ok(())
    }

    pub fn with_series(mut self, symbol: &str, candles: Vec<Candle>) -> Result<Self, FeedError> {
        self.insert(symbol, candles)?;
        Ok(self)
    }
}

impl CandleProvider for MemoryProvider {
    fn candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<Candle>, FeedError> {
        let series = self
            .series
            .get(&series_key(symbol, timeframe))
            .ok_or_else(|| FeedError::UnknownSymbol {
                symbol: symbol.to_string(),
                timeframe: timeframe.name(),
            })?;
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }
}

/// Lay out one daily candle per close so the last bar opens on the UTC day containing `end_ts`.
///
/// Open is the previous close (the first bar opens at its own close); high and low bracket
/// open and close; volume is zero.
pub fn daily_series(end_ts: Timestamp, closes: &[f64]) -> Result<Vec<Candle>, FeedError> {
    let end: DateTime<Utc> = Utc
        .timestamp_millis_opt(end_ts)
        .single()
        .ok_or(FeedError::InvalidTimestamp(end_ts))?;
    let last_open = end.date_naive().and_time(NaiveTime::MIN).and_utc();
    let count = closes.len() as i64;
    let mut prev_close = None;
    let mut out = Vec::with_capacity(closes.len());
    for (i, &close) in closes.iter().enumerate() {
        let day = last_open - Duration::days(count - 1 - i as i64);
        let open = prev_close.unwrap_or(close);
        out.push(Candle {
            ts: day.timestamp_millis(),
            timeframe: TimeFrame::Days(1),
            open,
            high: f64::max(open, close),
            low: f64::min(open, close),
            close,
            volume: 0.0,
        });
        prev_close = Some(close);
    }
    Ok(out)
}
