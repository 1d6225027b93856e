//! Trade, equity point, and exit classification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short. Used in the Bybit PnL and funding
    /// formulas.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Why a trade closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    #[serde(rename = "tp")]
    TakeProfit,
    #[serde(rename = "sl")]
    StopLoss,
    Signal,
    EndOfData,
    Liquidated,
    MaxDrawdownHit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "tp",
            ExitReason::StopLoss => "sl",
            ExitReason::Signal => "signal",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::Liquidated => "liquidated",
            ExitReason::MaxDrawdownHit => "max_drawdown_hit",
        }
    }
}

/// Why a run stopped before the end of its data window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopClassification {
    Liquidated,
    MaxDrawdownHit,
    Aborted,
}

impl StopClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopClassification::Liquidated => "liquidated",
            StopClassification::MaxDrawdownHit => "max_drawdown_hit",
            StopClassification::Aborted => "aborted",
        }
    }
}

/// A closed round-trip trade. Created at entry fill, mutated only by the
/// appended exit fill, immutable once written to artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: Side,

    pub entry_ts: DateTime<Utc>,
    pub entry_bar_index: u64,
    pub entry_price: f64,
    /// Notional in USDT at entry.
    pub entry_size_usdt: f64,
    /// Quantity in base currency (`entry_size_usdt / entry_price`,
    /// rounded to the symbol's quantity step).
    pub entry_size: f64,

    pub exit_ts: DateTime<Utc>,
    pub exit_bar_index: u64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    pub realized_pnl: f64,
    pub funding_pnl: f64,
    pub fees_paid: f64,
    pub net_pnl: f64,

    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Trade {
    /// Trade duration in exec bars.
    pub fn duration_bars(&self) -> u64 {
        self.exit_bar_index.saturating_sub(self.entry_bar_index)
    }
}

/// One point on the equity curve, emitted at every exec-bar close and after
/// every trade close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub equity: f64,
    pub drawdown_abs: f64,
    pub drawdown_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn exit_reason_wire_form() {
        assert_eq!(
            serde_json::to_string(&ExitReason::TakeProfit).unwrap(),
            "\"tp\""
        );
        assert_eq!(
            serde_json::to_string(&ExitReason::MaxDrawdownHit).unwrap(),
            "\"max_drawdown_hit\""
        );
        assert_eq!(ExitReason::StopLoss.as_str(), "sl");
    }
}
