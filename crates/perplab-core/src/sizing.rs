//! Position sizing.
//!
//! Single source of truth for order sizing. Three models share one cap
//! stack so a change of sizing mode never changes the exposure limits:
//!
//! - `percent_equity`: Bybit isolated-margin style, margin * leverage.
//! - `risk_based`: size so a stop-out loses exactly `risk_per_trade_pct`.
//! - `fixed_notional`: caller-requested notional.

use serde::{Deserialize, Serialize};

use crate::trade::Side;

/// Hard ceiling preventing float overflow from compounding equity.
const MAX_NOTIONAL: f64 = 1.0e15;

/// Sizing model selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    #[default]
    PercentEquity,
    RiskBased,
    FixedNotional,
}

/// Configuration for position sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    pub mode: SizingMode,
    pub risk_per_trade_pct: f64,
    pub max_leverage: f64,
    pub min_trade_usdt: f64,
    /// Max position as % of total equity. The default 95% leaves a buffer
    /// for entry + exit fees.
    pub max_position_equity_pct: f64,
    /// Reserve balance for entry + exit taker fees when sizing.
    pub reserve_fee_buffer: bool,
    pub taker_fee_rate: f64,
    /// Minimum distance from entry to the liquidation price, in percent.
    pub min_liq_distance_pct: f64,
    /// Maintenance margin rate (Bybit ~0.5%).
    pub maintenance_margin_rate: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            mode: SizingMode::PercentEquity,
            risk_per_trade_pct: 1.0,
            max_leverage: 2.0,
            min_trade_usdt: 1.0,
            max_position_equity_pct: 95.0,
            reserve_fee_buffer: true,
            taker_fee_rate: 0.00055,
            min_liq_distance_pct: 10.0,
            maintenance_margin_rate: 0.005,
        }
    }
}

/// Which sizing path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    PercentEquity,
    RiskBased,
    /// Risk-based requested but no usable stop; fell back to percent_equity.
    RiskBasedFallback,
    FixedNotional,
    Rejected,
}

/// Which cap bound the size, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapKind {
    EquityPct,
    FeeReserve,
    Leverage,
    AbsoluteCeiling,
}

/// Result of a position size calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    pub size_usdt: f64,
    pub method: SizingMethod,
    pub was_capped: bool,
    pub cap: Option<CapKind>,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
}

impl SizingResult {
    fn sized(size_usdt: f64, method: SizingMethod, cap: Option<CapKind>) -> Self {
        Self {
            size_usdt,
            method,
            was_capped: cap.is_some(),
            cap,
            rejected: false,
            rejection_reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            size_usdt: 0.0,
            method: SizingMethod::Rejected,
            was_capped: false,
            cap: None,
            rejected: true,
            rejection_reason: Some(reason),
        }
    }
}

/// An order sizing request at one decision point.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizingInputs {
    pub equity: f64,
    pub used_margin: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub requested_size: Option<f64>,
}

/// Unified position sizing model.
#[derive(Debug, Clone)]
pub struct SizingModel {
    config: SizingConfig,
}

impl SizingModel {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Compute position size for the configured model, then apply the hard
    /// notional ceiling.
    pub fn size_order(&self, inputs: &SizingInputs) -> SizingResult {
        let mut result = match self.config.mode {
            SizingMode::PercentEquity => self.size_percent_equity(inputs),
            SizingMode::RiskBased => self.size_risk_based(inputs),
            SizingMode::FixedNotional => self.size_fixed_notional(inputs),
        };

        if result.size_usdt > MAX_NOTIONAL {
            result.size_usdt = MAX_NOTIONAL;
            result.was_capped = true;
            result.cap = Some(CapKind::AbsoluteCeiling);
        }
        result
    }

    /// Sizing plus the liquidation-distance gate. Returns a rejected result
    /// when the isolated-margin liquidation price sits closer than
    /// `min_liq_distance_pct`.
    pub fn size_order_with_liq_check(&self, inputs: &SizingInputs, side: Side) -> SizingResult {
        if let Some(entry_price) = inputs.entry_price {
            let check =
                self.check_liquidation_distance(entry_price, self.config.max_leverage, side);
            if !check.is_safe {
                return SizingResult::rejected(check.reason);
            }
        }
        self.size_order(inputs)
    }

    /// True if the size meets the minimum trade notional.
    pub fn meets_min_size(&self, size_usdt: f64) -> bool {
        size_usdt >= self.config.min_trade_usdt
    }

    /// The min-of cap stack shared by every sizing mode:
    /// equity-pct cap, fee reserve, and leverage cap.
    fn max_size(&self, equity: f64, free_margin: f64) -> (f64, CapKind) {
        let max_by_equity_pct = equity * (self.config.max_position_equity_pct / 100.0);
        let max_by_leverage = free_margin * self.config.max_leverage;
        let max_by_fees = if self.config.reserve_fee_buffer {
            // position * (1 + 2*taker) <= free_margin * leverage
            let fee_factor = 1.0 + 2.0 * self.config.taker_fee_rate;
            max_by_leverage / fee_factor
        } else {
            f64::INFINITY
        };

        let mut max_size = max_by_equity_pct;
        let mut cap = CapKind::EquityPct;
        if max_by_fees < max_size {
            max_size = max_by_fees;
            cap = CapKind::FeeReserve;
        }
        if max_by_leverage < max_size {
            max_size = max_by_leverage;
            cap = CapKind::Leverage;
        }
        (max_size.max(0.0), cap)
    }

    fn size_percent_equity(&self, inputs: &SizingInputs) -> SizingResult {
        let free_margin = inputs.equity - inputs.used_margin;
        let (max_size, cap_kind) = self.max_size(inputs.equity, free_margin);

        let margin = free_margin * (self.config.risk_per_trade_pct / 100.0);
        let size_usdt = margin * self.config.max_leverage;

        if size_usdt > max_size {
            SizingResult::sized(max_size, SizingMethod::PercentEquity, Some(cap_kind))
        } else {
            SizingResult::sized(size_usdt.max(0.0), SizingMethod::PercentEquity, None)
        }
    }

    fn size_risk_based(&self, inputs: &SizingInputs) -> SizingResult {
        let free_margin = inputs.equity - inputs.used_margin;
        let (max_size, cap_kind) = self.max_size(inputs.equity, free_margin);
        let risk_dollars = inputs.equity * (self.config.risk_per_trade_pct / 100.0);

        if let (Some(entry), Some(stop)) = (inputs.entry_price, inputs.stop_loss) {
            let stop_distance = (entry - stop).abs();
            if entry > 0.0 && stop_distance > 0.0 {
                let size_usdt = risk_dollars * entry / stop_distance;
                return if size_usdt > max_size {
                    SizingResult::sized(max_size, SizingMethod::RiskBased, Some(cap_kind))
                } else {
                    SizingResult::sized(size_usdt, SizingMethod::RiskBased, None)
                };
            }
        }

        // No usable stop distance: percent_equity fallback.
        let margin = free_margin * (self.config.risk_per_trade_pct / 100.0);
        let size_usdt = margin * self.config.max_leverage;
        if size_usdt > max_size {
            SizingResult::sized(max_size, SizingMethod::RiskBasedFallback, Some(cap_kind))
        } else {
            SizingResult::sized(size_usdt.max(0.0), SizingMethod::RiskBasedFallback, None)
        }
    }

    fn size_fixed_notional(&self, inputs: &SizingInputs) -> SizingResult {
        let max_by_equity_pct = inputs.equity * (self.config.max_position_equity_pct / 100.0);
        let max_by_leverage = inputs.equity * self.config.max_leverage;
        let (max_size, cap_kind) = if max_by_equity_pct <= max_by_leverage {
            (max_by_equity_pct, CapKind::EquityPct)
        } else {
            (max_by_leverage, CapKind::Leverage)
        };

        let size_usdt = inputs.requested_size.unwrap_or(max_size);
        if size_usdt > max_size {
            SizingResult::sized(max_size, SizingMethod::FixedNotional, Some(cap_kind))
        } else {
            SizingResult::sized(size_usdt.max(0.0), SizingMethod::FixedNotional, None)
        }
    }

    /// Check the liquidation distance for an entry at `entry_price`.
    ///
    /// Isolated-margin (Bybit) formulas:
    ///   long:  liq = entry * (1 - 1/leverage + mmr)
    ///   short: liq = entry * (1 + 1/leverage - mmr)
    pub fn check_liquidation_distance(
        &self,
        entry_price: f64,
        leverage: f64,
        side: Side,
    ) -> LiqDistanceCheck {
        if leverage <= 0.0 || entry_price <= 0.0 {
            return LiqDistanceCheck {
                is_safe: false,
                liq_price: 0.0,
                liq_distance_pct: 0.0,
                reason: "invalid leverage or entry price".to_string(),
            };
        }

        let liq_price = crate::risk::liquidation_price(
            entry_price,
            leverage,
            self.config.maintenance_margin_rate,
            side,
        );
        let liq_distance_pct = (entry_price - liq_price).abs() / entry_price * 100.0;
        let is_safe = liq_distance_pct >= self.config.min_liq_distance_pct;

        let reason = if is_safe {
            String::new()
        } else {
            format!(
                "liquidation too close: {:.2}% from entry (min required: {:.1}%); at {:.1}x leverage liq price = {:.2}",
                liq_distance_pct, self.config.min_liq_distance_pct, leverage, liq_price
            )
        };

        LiqDistanceCheck {
            is_safe,
            liq_price,
            liq_distance_pct,
            reason,
        }
    }
}

/// Result of the pre-trade liquidation distance gate.
#[derive(Debug, Clone, PartialEq)]
pub struct LiqDistanceCheck {
    pub is_safe: bool,
    pub liq_price: f64,
    pub liq_distance_pct: f64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(mode: SizingMode) -> SizingModel {
        SizingModel::new(SizingConfig {
            mode,
            risk_per_trade_pct: 10.0,
            max_leverage: 10.0,
            min_liq_distance_pct: 0.0,
            ..SizingConfig::default()
        })
    }

    #[test]
    fn percent_equity_is_margin_times_leverage() {
        // 10% of $10,000 free margin = $1,000 margin; at 10x -> $10,000,
        // but capped by 95% equity = $9,500.
        let result = model(SizingMode::PercentEquity).size_order(&SizingInputs {
            equity: 10_000.0,
            ..SizingInputs::default()
        });
        assert!((result.size_usdt - 9_500.0).abs() < 1e-9);
        assert!(result.was_capped);
        assert_eq!(result.cap, Some(CapKind::EquityPct));
    }

    #[test]
    fn percent_equity_uncapped_when_small() {
        let m = SizingModel::new(SizingConfig {
            risk_per_trade_pct: 1.0,
            max_leverage: 2.0,
            ..SizingConfig::default()
        });
        // 1% of $10,000 = $100 margin at 2x = $200, well below every cap.
        let result = m.size_order(&SizingInputs {
            equity: 10_000.0,
            ..SizingInputs::default()
        });
        assert!((result.size_usdt - 200.0).abs() < 1e-9);
        assert!(!result.was_capped);
    }

    #[test]
    fn used_margin_reduces_free_margin() {
        let m = SizingModel::new(SizingConfig {
            risk_per_trade_pct: 10.0,
            max_leverage: 2.0,
            ..SizingConfig::default()
        });
        let full = m.size_order(&SizingInputs {
            equity: 10_000.0,
            ..SizingInputs::default()
        });
        let half = m.size_order(&SizingInputs {
            equity: 10_000.0,
            used_margin: 5_000.0,
            ..SizingInputs::default()
        });
        assert!((full.size_usdt - 2_000.0).abs() < 1e-9);
        assert!((half.size_usdt - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn risk_based_sizes_to_stop_distance() {
        // $10,000 equity, 1% risk = $100; entry 64,200, stop 62,916
        // (2% stop) -> distance 1,284 -> size = 100 * 64200 / 1284 = 5,000.
        let m = SizingModel::new(SizingConfig {
            mode: SizingMode::RiskBased,
            risk_per_trade_pct: 1.0,
            max_leverage: 10.0,
            ..SizingConfig::default()
        });
        let result = m.size_order(&SizingInputs {
            equity: 10_000.0,
            entry_price: Some(64_200.0),
            stop_loss: Some(62_916.0),
            ..SizingInputs::default()
        });
        assert_eq!(result.method, SizingMethod::RiskBased);
        assert!((result.size_usdt - 5_000.0).abs() < 1.0);
    }

    #[test]
    fn risk_based_without_stop_falls_back() {
        let result = model(SizingMode::RiskBased).size_order(&SizingInputs {
            equity: 10_000.0,
            entry_price: Some(50_000.0),
            ..SizingInputs::default()
        });
        assert_eq!(result.method, SizingMethod::RiskBasedFallback);
    }

    #[test]
    fn fixed_notional_respects_request_and_caps() {
        let m = model(SizingMode::FixedNotional);
        let small = m.size_order(&SizingInputs {
            equity: 10_000.0,
            requested_size: Some(500.0),
            ..SizingInputs::default()
        });
        assert!((small.size_usdt - 500.0).abs() < 1e-9);
        assert!(!small.was_capped);

        let big = m.size_order(&SizingInputs {
            equity: 10_000.0,
            requested_size: Some(50_000.0),
            ..SizingInputs::default()
        });
        assert!((big.size_usdt - 9_500.0).abs() < 1e-9);
        assert!(big.was_capped);
    }

    #[test]
    fn fee_reserve_binds_below_leverage_cap() {
        let m = SizingModel::new(SizingConfig {
            risk_per_trade_pct: 100.0,
            max_leverage: 10.0,
            max_position_equity_pct: 100.0,
            taker_fee_rate: 0.00055,
            ..SizingConfig::default()
        });
        let result = m.size_order(&SizingInputs {
            equity: 10_000.0,
            ..SizingInputs::default()
        });
        // Raw = 100% * 10,000 * 10 = 100,000; fee reserve cap =
        // 100,000 / 1.0011.
        let expected = 100_000.0 / (1.0 + 2.0 * 0.00055);
        assert!((result.size_usdt - expected).abs() < 1e-6);
        assert_eq!(result.cap, Some(CapKind::FeeReserve));
    }

    #[test]
    fn absolute_ceiling_caps_runaway_equity() {
        let m = SizingModel::new(SizingConfig {
            mode: SizingMode::FixedNotional,
            max_position_equity_pct: 100.0,
            ..SizingConfig::default()
        });
        let result = m.size_order(&SizingInputs {
            equity: 1.0e18,
            requested_size: Some(1.0e17),
            ..SizingInputs::default()
        });
        assert_eq!(result.size_usdt, 1.0e15);
        assert_eq!(result.cap, Some(CapKind::AbsoluteCeiling));
    }

    #[test]
    fn liq_distance_gate_rejects_high_leverage() {
        let m = SizingModel::new(SizingConfig {
            max_leverage: 50.0,
            min_liq_distance_pct: 10.0,
            ..SizingConfig::default()
        });
        // At 50x, liq is ~1.5% away for a long: 1/50 - 0.005.
        let check = m.check_liquidation_distance(50_000.0, 50.0, Side::Long);
        assert!(!check.is_safe);
        assert!((check.liq_distance_pct - 1.5).abs() < 1e-9);

        let result = m.size_order_with_liq_check(
            &SizingInputs {
                equity: 10_000.0,
                entry_price: Some(50_000.0),
                ..SizingInputs::default()
            },
            Side::Long,
        );
        assert!(result.rejected);
        assert_eq!(result.method, SizingMethod::Rejected);
    }

    #[test]
    fn liq_distance_gate_passes_low_leverage() {
        let m = SizingModel::new(SizingConfig {
            max_leverage: 2.0,
            min_liq_distance_pct: 10.0,
            ..SizingConfig::default()
        });
        // At 2x, liq distance for a long is 1/2 - 0.005 = 49.5%.
        let check = m.check_liquidation_distance(50_000.0, 2.0, Side::Long);
        assert!(check.is_safe);
        assert!((check.liq_distance_pct - 49.5).abs() < 1e-9);
    }

    #[test]
    fn min_size_gate() {
        let m = SizingModel::new(SizingConfig {
            min_trade_usdt: 10.0,
            ..SizingConfig::default()
        });
        assert!(m.meets_min_size(10.0));
        assert!(!m.meets_min_size(9.99));
    }
}
