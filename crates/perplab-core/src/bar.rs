//! Bar (OHLCV) data types and series containers.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PerpLabError, Result};
use crate::timeframe::Timeframe;

/// A single OHLCV bar. Bars are right-open: the bar owns `[ts_open, ts_close)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open timestamp (UTC, aligned to the timeframe step)
    pub ts_open: DateTime<Utc>,

    /// Close timestamp (`ts_open + step`)
    pub ts_close: DateTime<Utc>,

    /// Opening price
    pub open: f64,

    /// Highest price during the bar
    pub high: f64,

    /// Lowest price during the bar
    pub low: f64,

    /// Closing price
    pub close: f64,

    /// Traded volume
    pub volume: f64,
}

impl Bar {
    pub fn new(
        ts_open: DateTime<Utc>,
        ts_close: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            ts_open,
            ts_close,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Returns the bar's range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Returns true if this is a bullish (green) bar.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Check the OHLC invariants: `low <= min(open, close)`,
    /// `high >= max(open, close)`, `volume >= 0`, no NaN, `ts_close > ts_open`.
    pub fn validate(&self) -> Result<()> {
        let vals = [self.open, self.high, self.low, self.close, self.volume];
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(PerpLabError::SanityViolation(format!(
                "non-finite value in bar at {}",
                self.ts_open
            )));
        }
        if self.high < self.low {
            return Err(PerpLabError::SanityViolation(format!(
                "high ({}) < low ({}) at {}",
                self.high, self.low, self.ts_open
            )));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(PerpLabError::SanityViolation(format!(
                "OHLC out of range at {}: O={} H={} L={} C={}",
                self.ts_open, self.open, self.high, self.low, self.close
            )));
        }
        if self.volume < 0.0 {
            return Err(PerpLabError::SanityViolation(format!(
                "negative volume ({}) at {}",
                self.volume, self.ts_open
            )));
        }
        if self.ts_close <= self.ts_open {
            return Err(PerpLabError::SanityViolation(format!(
                "ts_close ({}) <= ts_open ({})",
                self.ts_close, self.ts_open
            )));
        }
        Ok(())
    }
}

/// An ordered sequence of bars for one `(symbol, timeframe)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub symbol: String,
    pub tf: Timeframe,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, tf: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            tf,
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_open(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.ts_open)
    }

    pub fn last_close(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.ts_close)
    }

    /// Check series-level invariants: per-bar sanity plus strictly
    /// monotonic, unique `ts_open`.
    pub fn validate(&self) -> Result<()> {
        for bar in &self.bars {
            bar.validate()?;
        }
        for pair in self.bars.windows(2) {
            if pair[1].ts_open <= pair[0].ts_open {
                return Err(PerpLabError::SanityViolation(format!(
                    "bars out of order or duplicated: {} then {}",
                    pair[0].ts_open, pair[1].ts_open
                )));
            }
        }
        Ok(())
    }

    /// Bars whose `[ts_open, ts_close]` falls entirely within `[start, end]`.
    pub fn slice_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Bar] {
        let lo = self.bars.partition_point(|b| b.ts_open < start);
        let hi = self.bars.partition_point(|b| b.ts_close <= end);
        &self.bars[lo..hi.max(lo)]
    }

    /// Timestamps of all bar opens (used by the health gate).
    pub fn open_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(|b| b.ts_open).collect()
    }
}

/// A funding rate observation. Bybit USDT perps fund every 8 hours at
/// 00:00, 08:00, 16:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    pub ts: DateTime<Utc>,
    pub rate: f64,
}

/// The funding interval for USDT perpetuals.
pub const FUNDING_INTERVAL_HOURS: i64 = 8;

/// True when `ts` is an 8h funding boundary (00:00 / 08:00 / 16:00 UTC).
pub fn is_funding_boundary(ts: DateTime<Utc>) -> bool {
    ts.minute() == 0
        && ts.second() == 0
        && ts.nanosecond() == 0
        && i64::from(ts.hour()) % FUNDING_INTERVAL_HOURS == 0
}

/// Enumerate the funding boundaries in `(after, through]`, ascending.
pub fn funding_boundaries_between(
    after: DateTime<Utc>,
    through: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let step = Duration::hours(FUNDING_INTERVAL_HOURS);
    let secs = after.timestamp();
    let aligned = secs - secs.rem_euclid(step.num_seconds());
    let mut boundary = Utc
        .timestamp_opt(aligned, 0)
        .single()
        .expect("aligned funding ts is valid");
    let mut out = Vec::new();
    while boundary <= after {
        boundary += step;
    }
    while boundary <= through {
        out.push(boundary);
        boundary += step;
    }
    out
}
