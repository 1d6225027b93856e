//! Market data provider contract.
//!
//! Defines the read-only interface the engine consumes. Implementations
//! with network or columnar-cache I/O live outside the core; the core only
//! ever sees ordered, duplicate-free bar sequences.

use chrono::{DateTime, Utc};

use crate::bar::{BarSeries, FundingRecord};
use crate::error::Result;
use crate::timeframe::Timeframe;

/// An open-interest observation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OpenInterestRecord {
    pub ts: DateTime<Utc>,
    pub oi: f64,
}

/// Read-only access to historical market data.
///
/// Contract:
/// - Bars are returned in ascending `ts_open` with no duplicates.
/// - Every returned bar satisfies `start <= ts_open` and `ts_close <= end`.
/// - Missing coverage maps to `NoDataInRange`; unknown symbol or timeframe
///   maps to `NotFound`; transport faults map to `Backend`.
pub trait MarketDataProvider {
    /// OHLCV bars for `(symbol, tf)` within `[start, end]`.
    fn get_ohlcv(
        &self,
        symbol: &str,
        tf: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BarSeries>;

    /// The 1-minute series used for intrabar fills and mark prices.
    fn get_1m_quotes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BarSeries> {
        self.get_ohlcv(symbol, Timeframe::M1, start, end)
    }

    /// Funding rate history within `[start, end]`.
    fn get_funding(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FundingRecord>>;

    /// Open interest history. Optional; defaults to an empty sequence.
    fn get_open_interest(
        &self,
        _symbol: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<OpenInterestRecord>> {
        Ok(Vec::new())
    }

    /// Timeframes this provider can serve for `symbol`.
    fn list_timeframes(&self, symbol: &str) -> Result<Vec<Timeframe>>;
}
