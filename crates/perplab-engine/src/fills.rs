//! Order fill simulation: entries, intrabar TP/SL/liquidation, funding
//! accrual, and exit math.
//!
//! All monetary values are f64 USDT. Per-trade constants (base quantity,
//! notional, liquidation price) are computed once at entry; the intrabar
//! loop only compares prices.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use perplab_core::bar::{funding_boundaries_between, Bar};
use perplab_core::risk::{bar_touches_liquidation, liquidation_price};
use perplab_core::trade::{ExitReason, Side, Trade};

/// Immutable fill parameters derived from the play.
#[derive(Debug, Clone, Copy)]
pub struct FillConfig {
    /// Taker fee as a fraction (bps / 10_000).
    pub taker_rate: f64,
    /// Slippage as a fraction, applied in the worse direction per fill.
    pub slippage: f64,
    pub leverage: f64,
    pub maintenance_margin_rate: f64,
    /// Base-currency quantity step for the symbol.
    pub qty_step: f64,
    pub funding_enabled: bool,
}

impl FillConfig {
    /// Slippage-adjusted fill price. Buys fill worse upward, sells worse
    /// downward.
    pub fn slip(&self, reference: f64, buying: bool) -> f64 {
        if buying {
            reference * (1.0 + self.slippage)
        } else {
            reference * (1.0 - self.slippage)
        }
    }

    /// Round a base quantity down to the symbol's step.
    pub fn round_qty(&self, qty: f64) -> f64 {
        if self.qty_step <= 0.0 {
            return qty;
        }
        (qty / self.qty_step).floor() * self.qty_step
    }
}

/// Funding rate lookup keyed by boundary timestamp.
#[derive(Debug, Clone, Default)]
pub struct FundingIndex {
    rates: BTreeMap<DateTime<Utc>, f64>,
}

impl FundingIndex {
    pub fn new(records: impl IntoIterator<Item = (DateTime<Utc>, f64)>) -> Self {
        Self {
            rates: records.into_iter().collect(),
        }
    }

    pub fn rate_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        self.rates.get(&ts).copied()
    }
}

/// One applied funding payment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingEvent {
    pub ts: DateTime<Utc>,
    pub rate: f64,
    /// Signed PnL impact: `-side * notional * rate`.
    pub amount: f64,
}

/// A live position between entry and exit fill.
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub trade_id: String,
    pub side: Side,
    pub entry_ts: DateTime<Utc>,
    pub entry_bar_index: u64,
    pub entry_price: f64,
    pub size_usdt: f64,
    pub size_base: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub liq_price: f64,
    pub funding_pnl: f64,
    pub fees_paid: f64,
    /// Timestamp up to which funding has been settled.
    funding_mark: DateTime<Utc>,
    /// Set when the strategy requested an exit; fills on the next 1m open.
    pub exit_requested: bool,
}

impl OpenPosition {
    /// Margin locked by this position under isolated margin.
    pub fn used_margin(&self, leverage: f64) -> f64 {
        self.size_usdt / leverage
    }

    /// Unrealized PnL at a mark price.
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.side.sign() * self.size_base * (mark - self.entry_price)
    }

    /// This position's running contribution to equity at a mark price:
    /// unrealized + funding - fees already paid.
    pub fn equity_contribution(&self, mark: f64) -> f64 {
        self.unrealized_pnl(mark) + self.funding_pnl - self.fees_paid
    }
}

/// A resolved exit decision from the intrabar pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitFill {
    pub price: f64,
    pub ts: DateTime<Utc>,
    pub reason: ExitReason,
}

/// Result of one intrabar pass.
#[derive(Debug, Clone, Default)]
pub struct IntrabarOutcome {
    pub exit: Option<ExitFill>,
    pub funding_events: Vec<FundingEvent>,
    /// Close of the last 1m quote inspected, as the mark price.
    pub last_mark: Option<f64>,
}

/// Stateless fill machinery; all mutable state lives in `OpenPosition`.
#[derive(Debug, Clone, Copy)]
pub struct FillSimulator {
    config: FillConfig,
}

impl FillSimulator {
    pub fn new(config: FillConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FillConfig {
        &self.config
    }

    /// TP/SL levels from the signal bar's close. The levels are anchored
    /// to the signal close, not the (later) fill price, so a large
    /// signal-to-fill gap can put a level on the far side of the entry;
    /// that is accepted, not an error.
    pub fn levels_from_signal_close(
        &self,
        signal_close: f64,
        side: Side,
        sl_pct: Option<f64>,
        tp_pct: Option<f64>,
    ) -> (Option<f64>, Option<f64>) {
        let lev = self.config.leverage;
        let sl = sl_pct.map(|pct| {
            let rate = pct / (100.0 * lev);
            signal_close * (1.0 - side.sign() * rate)
        });
        let tp = tp_pct.map(|pct| {
            let rate = pct / (100.0 * lev);
            signal_close * (1.0 + side.sign() * rate)
        });
        (sl, tp)
    }

    /// Open a position at a fill reference price (the next 1m open, or the
    /// signal bar close when no 1m data exists). Quantity is pre-rounded
    /// to the symbol step and the notional recomputed from it.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        trade_id: String,
        side: Side,
        fill_reference: f64,
        size_usdt: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        ts: DateTime<Utc>,
        bar_index: u64,
    ) -> Option<OpenPosition> {
        let entry_price = self.config.slip(fill_reference, side == Side::Long);
        let size_base = self.config.round_qty(size_usdt / entry_price);
        if size_base <= 0.0 {
            return None;
        }
        let notional = size_base * entry_price;
        let entry_fee = notional * self.config.taker_rate;
        let liq_price = liquidation_price(
            entry_price,
            self.config.leverage,
            self.config.maintenance_margin_rate,
            side,
        );

        Some(OpenPosition {
            trade_id,
            side,
            entry_ts: ts,
            entry_bar_index: bar_index,
            entry_price,
            size_usdt: notional,
            size_base,
            stop_loss,
            take_profit,
            liq_price,
            funding_pnl: 0.0,
            fees_paid: entry_fee,
            funding_mark: ts,
            exit_requested: false,
        })
    }

    /// Walk the 1m quotes of one exec bar against an open position.
    ///
    /// Trigger precedence within a single 1m bar is fixed:
    /// liquidation > stop-loss > take-profit > signal exit. When both SL
    /// and TP ranges are crossed in one bar, the adverse side fires.
    pub fn intrabar_pass(
        &self,
        position: &mut OpenPosition,
        quotes: &[Bar],
        funding: &FundingIndex,
    ) -> IntrabarOutcome {
        let mut outcome = IntrabarOutcome::default();

        for quote in quotes {
            // Funding settles at boundaries reached by this quote's open.
            if self.config.funding_enabled {
                for boundary in
                    funding_boundaries_between(position.funding_mark, quote.ts_open)
                {
                    if let Some(rate) = funding.rate_at(boundary) {
                        let amount = -position.side.sign() * position.size_usdt * rate;
                        position.funding_pnl += amount;
                        outcome.funding_events.push(FundingEvent {
                            ts: boundary,
                            rate,
                            amount,
                        });
                    }
                }
                position.funding_mark = quote.ts_open;
            }

            if bar_touches_liquidation(quote, position.liq_price, position.side) {
                outcome.exit = Some(ExitFill {
                    price: position.liq_price,
                    ts: quote.ts_close,
                    reason: ExitReason::Liquidated,
                });
                outcome.last_mark = Some(position.liq_price);
                return outcome;
            }

            if let Some(sl) = position.stop_loss {
                let touched = match position.side {
                    Side::Long => quote.low <= sl,
                    Side::Short => quote.high >= sl,
                };
                if touched {
                    // Exit is a sell for longs (worse down), a buy for
                    // shorts (worse up).
                    let price = self.config.slip(sl, position.side == Side::Short);
                    outcome.exit = Some(ExitFill {
                        price,
                        ts: quote.ts_close,
                        reason: ExitReason::StopLoss,
                    });
                    outcome.last_mark = Some(price);
                    return outcome;
                }
            }

            if let Some(tp) = position.take_profit {
                let touched = match position.side {
                    Side::Long => quote.high >= tp,
                    Side::Short => quote.low <= tp,
                };
                if touched {
                    let price = self.config.slip(tp, position.side == Side::Short);
                    outcome.exit = Some(ExitFill {
                        price,
                        ts: quote.ts_close,
                        reason: ExitReason::TakeProfit,
                    });
                    outcome.last_mark = Some(price);
                    return outcome;
                }
            }

            if position.exit_requested {
                let price = self.config.slip(quote.open, position.side == Side::Short);
                outcome.exit = Some(ExitFill {
                    price,
                    ts: quote.ts_open,
                    reason: ExitReason::Signal,
                });
                outcome.last_mark = Some(price);
                return outcome;
            }

            outcome.last_mark = Some(quote.close);
        }

        outcome
    }

    /// Close a position into an immutable trade record.
    pub fn close_position(
        &self,
        mut position: OpenPosition,
        symbol: &str,
        exit_price: f64,
        exit_ts: DateTime<Utc>,
        exit_bar_index: u64,
        reason: ExitReason,
    ) -> Trade {
        let exit_notional = position.size_base * exit_price;
        let exit_fee = exit_notional * self.config.taker_rate;
        position.fees_paid += exit_fee;

        let realized_pnl =
            position.side.sign() * position.size_base * (exit_price - position.entry_price);
        let net_pnl = realized_pnl - position.fees_paid + position.funding_pnl;

        Trade {
            id: position.trade_id,
            symbol: symbol.to_string(),
            side: position.side,
            entry_ts: position.entry_ts,
            entry_bar_index: position.entry_bar_index,
            entry_price: position.entry_price,
            entry_size_usdt: position.size_usdt,
            entry_size: position.size_base,
            exit_ts,
            exit_bar_index,
            exit_price,
            exit_reason: reason,
            realized_pnl,
            funding_pnl: position.funding_pnl,
            fees_paid: position.fees_paid,
            net_pnl,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config() -> FillConfig {
        FillConfig {
            taker_rate: 0.00055,
            slippage: 0.0001,
            leverage: 2.0,
            maintenance_margin_rate: 0.005,
            qty_step: 0.001,
            funding_enabled: true,
        }
    }

    fn sim() -> FillSimulator {
        FillSimulator::new(config())
    }

    fn ts(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, mi, 0).unwrap()
    }

    fn quote(h: u32, mi: u32, o: f64, hi: f64, lo: f64, c: f64) -> Bar {
        Bar::new(ts(h, mi), ts(h, mi) + Duration::minutes(1), o, hi, lo, c, 5.0)
    }

    fn open_long(sl: Option<f64>, tp: Option<f64>) -> OpenPosition {
        sim()
            .open_position(
                "t0".to_string(),
                Side::Long,
                50_000.0,
                5_000.0,
                sl,
                tp,
                ts(0, 0),
                10,
            )
            .unwrap()
    }

    #[test]
    fn entry_applies_slippage_and_qty_rounding() {
        let pos = open_long(None, None);
        assert!((pos.entry_price - 50_005.0).abs() < 1e-9);
        // 5000 / 50005 = 0.099990 -> rounded down to 0.099.
        assert!((pos.size_base - 0.099).abs() < 1e-12);
        assert!((pos.size_usdt - 0.099 * 50_005.0).abs() < 1e-6);
        assert!((pos.fees_paid - pos.size_usdt * 0.00055).abs() < 1e-9);
    }

    #[test]
    fn entry_below_one_step_is_dropped() {
        let pos = sim().open_position(
            "t0".to_string(),
            Side::Long,
            50_000.0,
            10.0, // 0.0002 base, under the 0.001 step
            None,
            None,
            ts(0, 0),
            0,
        );
        assert!(pos.is_none());
    }

    #[test]
    fn levels_from_signal_close_long() {
        let (sl, tp) = sim().levels_from_signal_close(50_000.0, Side::Long, Some(1.0), Some(2.0));
        // Leverage 2: sl rate 0.5%, tp rate 1%.
        assert!((sl.unwrap() - 49_750.0).abs() < 1e-9);
        assert!((tp.unwrap() - 50_500.0).abs() < 1e-9);
    }

    #[test]
    fn levels_from_signal_close_short() {
        let (sl, tp) = sim().levels_from_signal_close(50_000.0, Side::Short, Some(1.0), Some(2.0));
        assert!((sl.unwrap() - 50_250.0).abs() < 1e-9);
        assert!((tp.unwrap() - 49_500.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_fires_on_touch() {
        let mut pos = open_long(Some(49_750.0), Some(50_500.0));
        let quotes = vec![
            quote(0, 0, 50_000.0, 50_050.0, 49_900.0, 49_950.0),
            quote(0, 1, 49_950.0, 49_960.0, 49_700.0, 49_720.0), // SL touched
        ];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &FundingIndex::default());
        let exit = outcome.exit.unwrap();
        assert_eq!(exit.reason, ExitReason::StopLoss);
        // Long exit sells: worse downward.
        assert!((exit.price - 49_750.0 * (1.0 - 0.0001)).abs() < 1e-6);
    }

    #[test]
    fn sl_beats_tp_in_same_minute_bar() {
        // Both levels inside one wide 1m bar: pessimistic tie-break says SL.
        let mut pos = open_long(Some(49_750.0), Some(50_500.0));
        let quotes = vec![quote(0, 0, 50_000.0, 50_600.0, 49_700.0, 50_100.0)];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &FundingIndex::default());
        assert_eq!(outcome.exit.unwrap().reason, ExitReason::StopLoss);
    }

    #[test]
    fn liquidation_beats_stop_loss() {
        let mut pos = open_long(Some(49_750.0), None);
        // Force the liq price above the SL so both trigger on one bar.
        pos.liq_price = 49_800.0;
        let quotes = vec![quote(0, 0, 50_000.0, 50_050.0, 49_600.0, 49_650.0)];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &FundingIndex::default());
        let exit = outcome.exit.unwrap();
        assert_eq!(exit.reason, ExitReason::Liquidated);
        assert_eq!(exit.price, 49_800.0); // fills at the liq price itself
    }

    #[test]
    fn take_profit_fires_alone() {
        let mut pos = open_long(Some(49_750.0), Some(50_500.0));
        let quotes = vec![quote(0, 0, 50_400.0, 50_550.0, 50_390.0, 50_520.0)];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &FundingIndex::default());
        let exit = outcome.exit.unwrap();
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert!((exit.price - 50_500.0 * (1.0 - 0.0001)).abs() < 1e-6);
    }

    #[test]
    fn requested_exit_fills_at_next_open() {
        let mut pos = open_long(None, None);
        pos.exit_requested = true;
        let quotes = vec![quote(0, 0, 50_100.0, 50_150.0, 50_050.0, 50_120.0)];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &FundingIndex::default());
        let exit = outcome.exit.unwrap();
        assert_eq!(exit.reason, ExitReason::Signal);
        assert!((exit.price - 50_100.0 * (1.0 - 0.0001)).abs() < 1e-6);
        assert_eq!(exit.ts, ts(0, 0));
    }

    #[test]
    fn funding_long_pays_positive_rate() {
        let mut pos = open_long(None, None);
        let funding = FundingIndex::new(vec![(ts(8, 0), 0.0001)]);
        let quotes = vec![quote(8, 0, 50_000.0, 50_010.0, 49_990.0, 50_005.0)];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &funding);
        assert_eq!(outcome.funding_events.len(), 1);
        let event = outcome.funding_events[0];
        assert!(event.amount < 0.0, "long pays positive funding");
        assert!((event.amount + pos.size_usdt * 0.0001).abs() < 1e-9);
        assert!((pos.funding_pnl - event.amount).abs() < 1e-12);
    }

    #[test]
    fn funding_not_applied_twice() {
        let mut pos = open_long(None, None);
        let funding = FundingIndex::new(vec![(ts(8, 0), 0.0001)]);
        let quotes = vec![
            quote(8, 0, 50_000.0, 50_010.0, 49_990.0, 50_005.0),
            quote(8, 1, 50_005.0, 50_015.0, 49_995.0, 50_010.0),
        ];
        let outcome = sim().intrabar_pass(&mut pos, &quotes, &funding);
        assert_eq!(outcome.funding_events.len(), 1);
    }

    #[test]
    fn close_position_pnl_formula() {
        let pos = open_long(None, None);
        let entry_price = pos.entry_price;
        let size_base = pos.size_base;
        let entry_fee = pos.fees_paid;
        let trade = sim().close_position(
            pos,
            "BTCUSDT",
            51_000.0,
            ts(4, 0),
            26,
            ExitReason::Signal,
        );
        let expected_realized = size_base * (51_000.0 - entry_price);
        assert!((trade.realized_pnl - expected_realized).abs() < 1e-9);
        let exit_fee = size_base * 51_000.0 * 0.00055;
        assert!((trade.fees_paid - (entry_fee + exit_fee)).abs() < 1e-9);
        assert!(
            (trade.net_pnl - (trade.realized_pnl - trade.fees_paid + trade.funding_pnl)).abs()
                < 1e-9
        );
        assert_eq!(trade.exit_reason, ExitReason::Signal);
    }

    #[test]
    fn short_realized_pnl_sign() {
        let pos = sim()
            .open_position(
                "t1".to_string(),
                Side::Short,
                50_000.0,
                5_000.0,
                None,
                None,
                ts(0, 0),
                0,
            )
            .unwrap();
        let entry = pos.entry_price;
        let qty = pos.size_base;
        let trade =
            sim().close_position(pos, "BTCUSDT", 49_000.0, ts(1, 0), 4, ExitReason::Signal);
        // Short profits when price falls.
        assert!((trade.realized_pnl - qty * (entry - 49_000.0)).abs() < 1e-9);
        assert!(trade.realized_pnl > 0.0);
    }
}
