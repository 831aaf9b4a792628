use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Number of milliseconds in common units.
pub const MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Bar granularity of a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Minutes(u32),
    Hours(u32),
    Days(u32),
    Weeks(u32),
}

impl TimeFrame {
    pub fn duration_ms(&self) -> i64 {
        match *self {
            TimeFrame::Minutes(m) => m as i64 * MINUTE_MS,
            TimeFrame::Hours(h) => h as i64 * HOUR_MS,
            TimeFrame::Days(d) => d as i64 * DAY_MS,
            TimeFrame::Weeks(w) => w as i64 * 7 * DAY_MS,
        }
    }

    /// Align a timestamp to this timeframe boundary.
    pub fn align_ts(&self, ts: Timestamp) -> Timestamp {
        let dur = self.duration_ms();
        if dur == 0 {
            ts
        } else {
            ts.div_euclid(dur) * dur
        }
    }

    pub fn name(&self) -> String {
        match *self {
            TimeFrame::Minutes(m) => format!("{m}m"),
            TimeFrame::Hours(h) => format!("{h}h"),
            TimeFrame::Days(d) => format!("{d}d"),
            TimeFrame::Weeks(w) => format!("{w}w"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeFrameError(pub String);

impl fmt::Display for ParseTimeFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid timeframe `{}`", self.0)
    }
}

impl std::error::Error for ParseTimeFrameError {}

impl FromStr for TimeFrame {
    type Err = ParseTimeFrameError;

    /// Accepts "15m", "4h", "1d", "1w" and the single-letter aliases "D" / "W".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "D" => return Ok(TimeFrame::Days(1)),
            "W" => return Ok(TimeFrame::Weeks(1)),
            _ => {}
        }
        let err = || ParseTimeFrameError(trimmed.to_string());
        let (digits, unit) = trimmed.split_at(trimmed.len().saturating_sub(1));
        let n: u32 = digits.parse().map_err(|_| err())?;
        if n == 0 {
            return Err(err());
        }
        match unit {
            "m" => Ok(TimeFrame::Minutes(n)),
            "h" => Ok(TimeFrame::Hours(n)),
            "d" => Ok(TimeFrame::Days(n)),
            "w" => Ok(TimeFrame::Weeks(n)),
            _ => Err(err()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: Timestamp,        // bucket start time
    pub timeframe: TimeFrame, // timeframe of this candle
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Last millisecond covered by this bar.
    pub fn close_ts(&self) -> Timestamp {
        self.ts + self.timeframe.duration_ms() - 1
    }

    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn hlc3(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn ohlc4(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

/// Bars-ago history buffer: index 0 is the current bar, index 1 the previous one, and so on.
///
/// A buffer grows by one slot per [`History::advance`] or [`History::push`]. When a
/// `capacity` is set, the oldest values beyond it are discarded; reads past the retained
/// depth return `None` exactly like reads before the first bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History<T> {
    values: VecDeque<T>,
    capacity: Option<usize>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self {
            values: VecDeque::new(),
            capacity: None,
        }
    }
}

impl<T: Clone> History<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            values: VecDeque::new(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    pub fn with_current(value: T, capacity: Option<usize>) -> Self {
        let mut history = Self::new(capacity);
        history.push(value);
        history
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn get(&self, bars_ago: usize) -> Option<&T> {
        self.values.get(bars_ago)
    }

    pub fn current(&self) -> Option<&T> {
        self.values.front()
    }

    /// Prepend a new current value, shifting every older value one bar further back.
    pub fn push(&mut self, value: T) {
        self.values.push_front(value);
        if let Some(cap) = self.capacity {
            self.values.truncate(cap);
        }
    }

    /// Overwrite the current value; an empty buffer receives its first value.
    pub fn set_current(&mut self, value: T) {
        match self.values.front_mut() {
            Some(slot) => *slot = value,
            None => self.values.push_front(value),
        }
    }

    /// Overwrite the value `bars_ago` back. Returns false when that bar is not retained.
    pub fn set(&mut self, bars_ago: usize, value: T) -> bool {
        match self.values.get_mut(bars_ago) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Open a new bar that starts out carrying the previous current value.
    pub fn advance(&mut self) {
        if let Some(current) = self.values.front().cloned() {
            self.push(current);
        }
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    /// Oldest first.
    pub fn to_chronological(&self) -> Vec<T> {
        self.values.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mk_candle(ts: i64, close: f64) -> Candle {
        Candle {
            ts,
            timeframe: TimeFrame::Days(1),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn timeframe_parses_units_and_aliases() {
        assert_eq!("15m".parse::<TimeFrame>(), Ok(TimeFrame::Minutes(15)));
        assert_eq!("4h".parse::<TimeFrame>(), Ok(TimeFrame::Hours(4)));
        assert_eq!("D".parse::<TimeFrame>(), Ok(TimeFrame::Days(1)));
        assert_eq!("1w".parse::<TimeFrame>(), Ok(TimeFrame::Weeks(1)));
        assert!("0d".parse::<TimeFrame>().is_err());
        assert!("x".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn candle_derived_prices() {
        let c = mk_candle(0, 100.0);
        assert_eq!(c.hl2(), 100.0);
        assert_eq!(c.hlc3(), 100.0);
        assert_eq!(c.ohlc4(), (99.0 + 102.0 + 98.0 + 100.0) / 4.0);
        assert_eq!(c.close_ts(), DAY_MS - 1);
    }

    #[test]
    fn history_indexes_bars_ago() {
        let mut h = History::new(None);
        h.push(1.0);
        h.push(2.0);
        h.push(3.0);
        assert_eq!(h.current(), Some(&3.0));
        assert_eq!(h.get(1), Some(&2.0));
        assert_eq!(h.get(2), Some(&1.0));
        assert_eq!(h.get(3), None);
        assert_eq!(h.to_chronological(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn advance_carries_current_value_forward() {
        let mut h = History::with_current(5, None);
        h.advance();
        assert_eq!(h.len(), 2);
        h.set_current(6);
        assert_eq!(h.get(0), Some(&6));
        assert_eq!(h.get(1), Some(&5));
    }

    #[test]
    fn bounded_history_drops_oldest() {
        let mut h = History::new(Some(2));
        for v in 0..5 {
            h.push(v);
        }
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(0), Some(&4));
        assert_eq!(h.get(1), Some(&3));
        assert_eq!(h.get(2), None);
    }

    proptest! {
        #[test]
        fn retained_depth_matches_capacity(values in proptest::collection::vec(-1e6f64..1e6, 1..64), cap in 1usize..16) {
            let mut h = History::new(Some(cap));
            for v in &values {
                h.push(*v);
            }
            prop_assert_eq!(h.len(), values.len().min(cap));
            for k in 0..h.len() {
                prop_assert_eq!(h.get(k), values.iter().rev().nth(k));
            }
        }
    }
}
