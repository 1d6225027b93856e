//! Math-audit verifier.
//!
//! Independently recomputes per-trade math and summary metrics from the
//! artifacts of a finished run and cross-checks them against
//! `result.json`. This is the contract test for the whole core: every
//! check failing here points at a bookkeeping bug, not a data problem.

use std::path::Path;

use serde::{Deserialize, Serialize};

use perplab_core::error::Result;
use perplab_core::metrics::{
    compute_sharpe, compute_sortino, max_drawdown, per_bar_returns,
};
use perplab_core::trade::{EquityPoint, ExitReason, Side, Trade};

use crate::artifacts::{
    detect_smoke_mode, read_equity, read_trades, ArtifactPaths, RunManifest, RunResult,
    FUNDING_CONVENTION,
};

/// Absolute tolerance for PnL comparisons, in USDT.
const ABS_TOL: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

/// One audit check outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

/// Full audit outcome for one run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub run_dir: String,
    pub checks: Vec<AuditCheck>,
    pub passed: bool,
}

impl AuditReport {
    pub fn failures(&self) -> Vec<&AuditCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .collect()
    }
}

/// The verifier. Holds the loaded artifacts for one run.
pub struct MathAudit {
    run_dir: String,
    manifest: RunManifest,
    result: RunResult,
    trades: Vec<Trade>,
    equity: Vec<EquityPoint>,
    events: Vec<serde_json::Value>,
    checks: Vec<AuditCheck>,
}

impl MathAudit {
    /// Load a run directory. Fails on manifest version mismatch or schema
    /// violations before any check runs.
    pub fn load(run_dir: &Path) -> Result<Self> {
        let manifest = RunManifest::read(run_dir)?;
        let result = RunResult::read(run_dir)?;
        let smoke = detect_smoke_mode(run_dir);
        let paths = ArtifactPaths::at(run_dir.to_path_buf(), smoke);
        let trades = read_trades(&paths)?;
        let equity = read_equity(&paths)?;
        let events = std::fs::read_to_string(run_dir.join("events.jsonl"))?
            .lines()
            .map(serde_json::from_str)
            .collect::<std::result::Result<Vec<serde_json::Value>, _>>()?;
        Ok(Self {
            run_dir: run_dir.display().to_string(),
            manifest,
            result,
            trades,
            equity,
            events,
            checks: Vec::new(),
        })
    }

    /// Run every check and produce the report.
    pub fn verify(mut self) -> AuditReport {
        self.check_funding_convention();
        self.check_event_log();
        self.check_trade_sanity();
        self.check_trade_counts();
        self.check_pnl_aggregates();
        self.check_rates();
        self.check_extremes();
        self.check_bybit_pnl();
        self.check_net_pnl_formula();
        self.check_fee_bounds();
        self.check_sl_tp_derivation();
        self.check_exit_fill_band();
        self.check_equity_walk();
        self.check_equity_positive();
        self.check_drawdown();
        self.check_risk_metrics();
        self.check_duration();
        self.check_recovery_factor();
        self.check_no_overlap();

        let run_dir = self.run_dir.clone();
        let passed = !self.checks.iter().any(|c| c.status == CheckStatus::Fail);
        AuditReport {
            run_dir,
            checks: self.checks,
            passed,
        }
    }

    fn pass(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(AuditCheck {
            name: name.to_string(),
            status: CheckStatus::Pass,
            detail: detail.into(),
        });
    }

    fn fail(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(AuditCheck {
            name: name.to_string(),
            status: CheckStatus::Fail,
            detail: detail.into(),
        });
    }

    fn skip(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(AuditCheck {
            name: name.to_string(),
            status: CheckStatus::Skip,
            detail: detail.into(),
        });
    }

    fn check_funding_convention(&mut self) {
        if self.manifest.funding_convention == FUNDING_CONVENTION {
            self.pass("FUNDING_CONVENTION", "trade row is authoritative");
        } else {
            self.fail(
                "FUNDING_CONVENTION",
                format!(
                    "manifest declares '{}', reader requires '{}'",
                    self.manifest.funding_convention, FUNDING_CONVENTION
                ),
            );
        }
    }

    /// The event log is the lossless record: ids must be gapless, the
    /// trailing `log_finished` must account for every line, and every
    /// trade row must have exactly one entry and one exit event.
    fn check_event_log(&mut self) {
        let mut issues = Vec::new();

        for (i, event) in self.events.iter().enumerate() {
            if event.get("event_id").and_then(|v| v.as_u64()) != Some(i as u64) {
                issues.push(format!("line {i}: event_id out of sequence"));
                break;
            }
        }

        let event_type = |e: &serde_json::Value| {
            e.get("event_type")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string()
        };

        match self.events.first() {
            Some(first) if event_type(first) == "log_started" => {}
            _ => issues.push("first event is not log_started".to_string()),
        }
        match self.events.last() {
            Some(last) if event_type(last) == "log_finished" => {
                let total = last.get("total_events").and_then(|v| v.as_u64());
                if total != Some(self.events.len() as u64 - 1) {
                    issues.push(format!(
                        "log_finished total_events={total:?} vs {} preceding lines",
                        self.events.len() - 1
                    ));
                }
            }
            _ => issues.push("last event is not log_finished".to_string()),
        }

        let count_of = |kind: &str| {
            self.events
                .iter()
                .filter(|e| event_type(e) == kind)
                .count() as u64
        };
        let entries = count_of("trade_entry");
        let exits = count_of("trade_exit");
        let expected = self.trades.len() as u64;
        if entries != expected {
            issues.push(format!("{entries} trade_entry events vs {expected} trades"));
        }
        if exits != expected {
            issues.push(format!("{exits} trade_exit events vs {expected} trades"));
        }

        if issues.is_empty() {
            self.pass(
                "EVENT_LOG",
                format!("{} events, gapless ids, entries/exits account for every trade", self.events.len()),
            );
        } else {
            self.fail("EVENT_LOG", issues.join("; "));
        }
    }

    fn check_trade_sanity(&mut self) {
        let mut issues = Vec::new();
        for (i, t) in self.trades.iter().enumerate() {
            let numerics = [
                t.entry_price,
                t.entry_size_usdt,
                t.entry_size,
                t.exit_price,
                t.realized_pnl,
                t.funding_pnl,
                t.fees_paid,
                t.net_pnl,
            ];
            if numerics.iter().any(|v| !v.is_finite()) {
                issues.push(format!("trade {i}: non-finite numeric column"));
            }
        }
        if issues.is_empty() {
            self.pass(
                "TRADE_SANITY",
                format!("{} trades, all numeric columns finite", self.trades.len()),
            );
        } else {
            self.fail("TRADE_SANITY", issues.join("; "));
        }
    }

    fn check_trade_counts(&mut self) {
        let r = &self.result.summary;
        let total = self.trades.len() as u64;
        let wins = self.trades.iter().filter(|t| t.net_pnl > 0.0).count() as u64;
        let losses = self.trades.iter().filter(|t| t.net_pnl < 0.0).count() as u64;
        let longs = self.trades.iter().filter(|t| t.side == Side::Long).count() as u64;
        let shorts = self.trades.iter().filter(|t| t.side == Side::Short).count() as u64;

        let mut issues = Vec::new();
        for (name, computed, expected) in [
            ("trades_count", total, r.trades_count),
            ("winning_trades", wins, r.winning_trades),
            ("losing_trades", losses, r.losing_trades),
            ("long_trades", longs, r.long_trades),
            ("short_trades", shorts, r.short_trades),
        ] {
            if computed != expected {
                issues.push(format!("{name}: computed={computed} vs result={expected}"));
            }
        }
        if issues.is_empty() {
            self.pass(
                "TRADE_COUNTS",
                format!("all counts match ({total} trades, {wins}W/{losses}L)"),
            );
        } else {
            self.fail("TRADE_COUNTS", issues.join("; "));
        }
    }

    fn check_pnl_aggregates(&mut self) {
        if self.trades.is_empty() {
            self.skip("PNL_AGGREGATES", "no trades");
            return;
        }
        let r = &self.result.summary;
        let pnls: Vec<f64> = self.trades.iter().map(|t| t.net_pnl).collect();
        let gp: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gl: f64 = pnls.iter().filter(|p| **p < 0.0).sum();
        let net: f64 = pnls.iter().sum();
        let fees: f64 = self.trades.iter().map(|t| t.fees_paid).sum();
        let expectancy = net / pnls.len() as f64;

        let mut issues = Vec::new();
        let mut check = |name: &str, computed: f64, expected: f64| {
            let tol = ABS_TOL.max(expected.abs() * 0.01);
            if (computed - expected).abs() > tol {
                issues.push(format!(
                    "{name}: computed={computed:.4} vs result={expected:.4} [tol={tol:.4}]"
                ));
            }
        };
        check("gross_profit_usdt", gp, r.gross_profit_usdt);
        check("gross_loss_usdt", gl, r.gross_loss_usdt);
        check("net_pnl_usdt", net, r.net_pnl_usdt);
        check("total_fees_usdt", fees, r.total_fees_usdt);
        check("expectancy_usdt", expectancy, r.expectancy_usdt);

        if issues.is_empty() {
            self.pass("PNL_AGGREGATES", format!("all PnL aggregates match (net={net:.2})"));
        } else {
            self.fail("PNL_AGGREGATES", issues.join("; "));
        }
    }

    fn check_rates(&mut self) {
        if self.trades.is_empty() {
            self.skip("RATES", "no trades");
            return;
        }
        let r = &self.result.summary;
        let pnls: Vec<f64> = self.trades.iter().map(|t| t.net_pnl).collect();
        let total = pnls.len() as f64;
        let wins = pnls.iter().filter(|p| **p > 0.0).count() as f64;
        let losses = pnls.iter().filter(|p| **p < 0.0).count() as f64;
        let gp: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gl_abs: f64 = -pnls.iter().filter(|p| **p < 0.0).sum::<f64>();

        let win_rate = wins / total;
        let pf = if gl_abs > 0.0 {
            gp / gl_abs
        } else if gp > 0.0 {
            100.0
        } else {
            0.0
        };
        let avg_win = if wins > 0.0 { gp / wins } else { 0.0 };
        let avg_loss = if losses > 0.0 { gl_abs / losses } else { 0.0 };
        let payoff = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };

        let mut issues = Vec::new();
        if (win_rate - r.win_rate).abs() > 0.01 {
            issues.push(format!(
                "win_rate: computed={win_rate:.4} vs result={:.4}",
                r.win_rate
            ));
        }
        if (pf - r.profit_factor).abs() > 0.01f64.max(r.profit_factor.abs() * 0.02) {
            issues.push(format!(
                "profit_factor: computed={pf:.4} vs result={:.4}",
                r.profit_factor
            ));
        }
        if (payoff - r.payoff_ratio).abs() > 0.01f64.max(r.payoff_ratio.abs() * 0.02) {
            issues.push(format!(
                "payoff_ratio: computed={payoff:.4} vs result={:.4}",
                r.payoff_ratio
            ));
        }
        if issues.is_empty() {
            self.pass("RATES", format!("rates match (WR={wins}/{total})"));
        } else {
            self.fail("RATES", issues.join("; "));
        }
    }

    fn check_extremes(&mut self) {
        if self.trades.is_empty() {
            self.skip("EXTREMES", "no trades");
            return;
        }
        let r = &self.result.summary;
        let pnls: Vec<f64> = self.trades.iter().map(|t| t.net_pnl).collect();
        let largest_win = pnls.iter().copied().filter(|p| *p > 0.0).fold(0.0, f64::max);
        let largest_loss = pnls
            .iter()
            .copied()
            .filter(|p| *p < 0.0)
            .fold(0.0, f64::min)
            .abs();

        let mut max_cw = 0u64;
        let mut max_cl = 0u64;
        let mut cw = 0u64;
        let mut cl = 0u64;
        for p in &pnls {
            if *p > 0.0 {
                cw += 1;
                cl = 0;
                max_cw = max_cw.max(cw);
            } else if *p < 0.0 {
                cl += 1;
                cw = 0;
                max_cl = max_cl.max(cl);
            } else {
                cw = 0;
                cl = 0;
            }
        }

        let mut issues = Vec::new();
        if (largest_win - r.largest_win_usdt).abs() > ABS_TOL {
            issues.push(format!(
                "largest_win_usdt: computed={largest_win:.4} vs result={:.4}",
                r.largest_win_usdt
            ));
        }
        if (largest_loss - r.largest_loss_usdt).abs() > ABS_TOL {
            issues.push(format!(
                "largest_loss_usdt: computed={largest_loss:.4} vs result={:.4}",
                r.largest_loss_usdt
            ));
        }
        if max_cw != r.max_consecutive_wins {
            issues.push(format!(
                "max_consecutive_wins: computed={max_cw} vs result={}",
                r.max_consecutive_wins
            ));
        }
        if max_cl != r.max_consecutive_losses {
            issues.push(format!(
                "max_consecutive_losses: computed={max_cl} vs result={}",
                r.max_consecutive_losses
            ));
        }
        if issues.is_empty() {
            self.pass("EXTREMES", format!("extremes/streaks match ({max_cw}W/{max_cl}L)"));
        } else {
            self.fail("EXTREMES", issues.join("; "));
        }
    }

    /// Bybit USDT-perp PnL: `realized = side * qty * (exit - entry)`.
    fn check_bybit_pnl(&mut self) {
        if self.trades.is_empty() {
            self.skip("BYBIT_PNL", "no trades");
            return;
        }
        let mut issues = Vec::new();
        for (i, t) in self.trades.iter().enumerate() {
            let expected = t.side.sign() * t.entry_size * (t.exit_price - t.entry_price);
            let tol = ABS_TOL.max(t.entry_size_usdt.abs() * 0.001);
            if (t.realized_pnl - expected).abs() > tol {
                issues.push(format!(
                    "trade {i}: realized={:.4} vs qty*delta={expected:.4} [tol={tol:.4}]",
                    t.realized_pnl
                ));
            }
        }
        if issues.is_empty() {
            self.pass("BYBIT_PNL", "realized PnL matches the perp formula for every trade");
        } else {
            self.fail("BYBIT_PNL", issues.join("; "));
        }
    }

    /// `net = realized - fees + funding` per trade.
    fn check_net_pnl_formula(&mut self) {
        if self.trades.is_empty() {
            self.skip("NET_FORMULA", "no trades");
            return;
        }
        let mut issues = Vec::new();
        for (i, t) in self.trades.iter().enumerate() {
            let expected = t.realized_pnl - t.fees_paid + t.funding_pnl;
            if (t.net_pnl - expected).abs() > ABS_TOL {
                issues.push(format!(
                    "trade {i}: net={:.4} vs realized-fees+funding={expected:.4}",
                    t.net_pnl
                ));
            }
        }
        if issues.is_empty() {
            self.pass("NET_FORMULA", "net = realized - fees + funding holds");
        } else {
            self.fail("NET_FORMULA", issues.join("; "));
        }
    }

    /// Fees must sit within [0.5, 2.0] of taker-rate * round-trip notional.
    fn check_fee_bounds(&mut self) {
        if self.trades.is_empty() {
            self.skip("FEE_BOUNDS", "no trades");
            return;
        }
        let taker = self.manifest.config.account.fee_model.taker_rate();
        if taker <= 0.0 {
            self.skip("FEE_BOUNDS", "zero taker rate configured");
            return;
        }
        let mut issues = Vec::new();
        for (i, t) in self.trades.iter().enumerate() {
            let round_trip = t.entry_size_usdt + t.entry_size * t.exit_price;
            let expected = taker * round_trip;
            if expected <= 0.0 {
                continue;
            }
            let ratio = t.fees_paid / expected;
            if !(0.5..=2.0).contains(&ratio) {
                issues.push(format!(
                    "trade {i}: fees={:.4} vs expected~{expected:.4} (ratio {ratio:.2})",
                    t.fees_paid
                ));
            }
        }
        if issues.is_empty() {
            self.pass("FEE_BOUNDS", "fees within [0.5x, 2.0x] of taker model");
        } else {
            self.fail("FEE_BOUNDS", issues.join("; "));
        }
    }

    /// SL and TP must back-derive the same signal close.
    fn check_sl_tp_derivation(&mut self) {
        let risk = &self.manifest.config.risk;
        let (sl_pct, tp_pct) = match (risk.stop_loss_pct, risk.take_profit_pct) {
            (Some(sl), Some(tp)) => (sl, tp),
            _ => {
                self.skip("SL_TP_CALC", "needs both stop_loss_pct and take_profit_pct");
                return;
            }
        };
        let leverage = self.manifest.config.account.max_leverage;
        let sl_rate = sl_pct / (100.0 * leverage);
        let tp_rate = tp_pct / (100.0 * leverage);

        let mut checked = 0;
        let mut issues = Vec::new();
        for (i, t) in self.trades.iter().enumerate() {
            let (sl, tp) = match (t.stop_loss, t.take_profit) {
                (Some(sl), Some(tp)) => (sl, tp),
                _ => continue,
            };
            let (signal_close, expected_tp) = match t.side {
                Side::Long => {
                    let denom = 1.0 - sl_rate;
                    if denom <= 0.0 {
                        continue;
                    }
                    let sc = sl / denom;
                    (sc, sc * (1.0 + tp_rate))
                }
                Side::Short => {
                    let sc = sl / (1.0 + sl_rate);
                    (sc, sc * (1.0 - tp_rate))
                }
            };
            checked += 1;
            if expected_tp > 0.0 && ((tp - expected_tp) / expected_tp).abs() > 0.001 {
                issues.push(format!(
                    "trade {i}: tp={tp:.4} vs expected={expected_tp:.4} (signal_close={signal_close:.4})"
                ));
            }
        }
        if checked == 0 {
            self.skip("SL_TP_CALC", "no trades carrying both levels");
        } else if issues.is_empty() {
            self.pass(
                "SL_TP_CALC",
                format!("{checked} trades back-derive a consistent signal close"),
            );
        } else {
            self.fail("SL_TP_CALC", issues.join("; "));
        }
    }

    /// TP/SL exits must fill within the slippage band of the claimed level.
    fn check_exit_fill_band(&mut self) {
        let slippage = self.manifest.config.account.slippage_bps / 10_000.0;
        let mut checked = 0;
        let mut issues = Vec::new();
        for (i, t) in self.trades.iter().enumerate() {
            let level = match t.exit_reason {
                ExitReason::StopLoss => t.stop_loss,
                ExitReason::TakeProfit => t.take_profit,
                _ => None,
            };
            let Some(level) = level else { continue };
            if level <= 0.0 {
                continue;
            }
            checked += 1;
            let deviation = (t.exit_price - level).abs() / level;
            if deviation > slippage + 0.001 {
                issues.push(format!(
                    "trade {i}: exit={:.4} deviates {:.4}% from level={level:.4}",
                    t.exit_price,
                    deviation * 100.0
                ));
            }
        }
        if checked == 0 {
            self.skip("EXIT_FILL", "no TP/SL exits");
        } else if issues.is_empty() {
            self.pass("EXIT_FILL", format!("{checked} TP/SL exits within slippage band"));
        } else {
            self.fail("EXIT_FILL", issues.join("; "));
        }
    }

    /// `final_equity == initial + sum(net_pnl)` within accumulation
    /// tolerance.
    fn check_equity_walk(&mut self) {
        let Some(final_point) = self.equity.last() else {
            self.skip("EQUITY_WALK", "no equity curve");
            return;
        };
        let final_equity = final_point.equity;
        let initial = self.manifest.config.account.starting_equity_usdt;
        let sum_net: f64 = self.trades.iter().map(|t| t.net_pnl).sum();
        let expected = initial + sum_net;
        let tolerance = 0.50f64.max(self.trades.len() as f64 * 0.01);
        let diff = (final_equity - expected).abs();
        if diff > tolerance {
            self.fail(
                "EQUITY_WALK",
                format!(
                    "final={:.2} vs initial({initial:.2}) + sum(net)({sum_net:.2}) = {expected:.2} [diff={diff:.2}]",
                    final_equity
                ),
            );
        } else {
            self.pass(
                "EQUITY_WALK",
                format!("{initial:.0} + {sum_net:.2} = {expected:.2} (diff={diff:.2})"),
            );
        }

        // Cross-check against the reported final equity too.
        let reported = self.result.summary.final_equity_usdt;
        if (reported - final_equity).abs() > tolerance {
            self.fail(
                "EQUITY_FINAL",
                format!(
                    "result.final_equity={reported:.2} vs curve={:.2}",
                    final_equity
                ),
            );
        } else {
            self.pass("EQUITY_FINAL", "result.json matches the equity curve");
        }
    }

    fn check_equity_positive(&mut self) {
        let negatives = self
            .equity
            .iter()
            .filter(|p| !p.equity.is_finite() || p.equity < 0.0)
            .count();
        if negatives == 0 {
            self.pass("EQUITY_POSITIVE", "no negative or non-finite equity points");
        } else {
            self.fail(
                "EQUITY_POSITIVE",
                format!("{negatives} negative/non-finite equity points"),
            );
        }
    }

    fn check_drawdown(&mut self) {
        if self.equity.len() < 2 {
            self.skip("DRAWDOWN", "equity curve too short");
            return;
        }
        let r = &self.result.summary;
        let (dd_abs, dd_pct) = max_drawdown(&self.equity);
        let mut issues = Vec::new();
        let tol_abs = ABS_TOL.max(r.max_drawdown_usdt.abs() * 0.02);
        if (dd_abs - r.max_drawdown_usdt).abs() > tol_abs {
            issues.push(format!(
                "max_drawdown_usdt: computed={dd_abs:.4} vs result={:.4}",
                r.max_drawdown_usdt
            ));
        }
        let tol_pct = 0.0001f64.max(r.max_drawdown_pct.abs() * 0.02);
        if (dd_pct - r.max_drawdown_pct).abs() > tol_pct {
            issues.push(format!(
                "max_drawdown_pct: computed={dd_pct:.6} vs result={:.6}",
                r.max_drawdown_pct
            ));
        }
        if issues.is_empty() {
            self.pass(
                "DRAWDOWN",
                format!("drawdown matches (abs={dd_abs:.2}, pct={dd_pct:.4})"),
            );
        } else {
            self.fail("DRAWDOWN", issues.join("; "));
        }
    }

    fn check_risk_metrics(&mut self) {
        if self.equity.len() < 3 {
            self.skip("RISK_METRICS", "equity curve too short");
            return;
        }
        let r = &self.result.summary;
        let exec_tf = self.manifest.config.timeframes.exec;
        let annualization = (exec_tf.bars_per_year() as f64).sqrt();
        let returns = per_bar_returns(&self.equity);

        let sharpe = compute_sharpe(&returns, annualization);
        let sortino = compute_sortino(&returns, annualization);

        let mut issues = Vec::new();
        let mut check = |name: &str, computed: f64, expected: f64| {
            let rel = (computed - expected).abs() / expected.abs().max(0.01);
            if rel > 0.10 && (computed - expected).abs() > ABS_TOL {
                issues.push(format!(
                    "{name}: computed={computed:.4} vs result={expected:.4} [rel={rel:.2}]"
                ));
            }
        };
        check("sharpe", sharpe, r.sharpe);
        check("sortino", sortino, r.sortino);

        // Calmar from CAGR and the recomputed drawdown.
        let initial = self.equity.first().map(|p| p.equity).unwrap_or(0.0);
        let final_eq = self.equity.last().map(|p| p.equity).unwrap_or(0.0);
        let years = self.equity.len() as f64 / exec_tf.bars_per_year() as f64;
        let cagr = if years > 0.0 && initial > 0.0 && final_eq > 0.0 {
            (final_eq / initial).powf(1.0 / years) - 1.0
        } else {
            0.0
        };
        let (_, dd_pct) = max_drawdown(&self.equity);
        let calmar = if dd_pct > 0.0 {
            cagr / dd_pct
        } else if cagr > 0.0 {
            100.0
        } else {
            0.0
        };
        check("calmar", calmar, r.calmar);

        if issues.is_empty() {
            self.pass(
                "RISK_METRICS",
                format!("sharpe={sharpe:.2}, sortino={sortino:.2}, calmar={calmar:.2}"),
            );
        } else {
            self.fail("RISK_METRICS", issues.join("; "));
        }
    }

    fn check_duration(&mut self) {
        if self.trades.is_empty() {
            self.skip("DURATION", "no trades");
            return;
        }
        let avg = self
            .trades
            .iter()
            .map(|t| (t.exit_bar_index.saturating_sub(t.entry_bar_index)) as f64)
            .sum::<f64>()
            / self.trades.len() as f64;
        let expected = self.result.summary.avg_trade_duration_bars;
        if (avg - expected).abs() > 0.5 {
            self.fail(
                "DURATION",
                format!("avg_trade_duration_bars: computed={avg:.2} vs result={expected:.2}"),
            );
        } else {
            self.pass("DURATION", format!("avg duration {avg:.1} bars"));
        }
    }

    fn check_recovery_factor(&mut self) {
        let r = &self.result.summary;
        if r.max_drawdown_usdt == 0.0 {
            let consistent = r.recovery_factor == 0.0 || r.recovery_factor == 100.0;
            if consistent {
                self.pass("RECOVERY", "consistent with zero drawdown");
            } else {
                self.fail(
                    "RECOVERY",
                    format!("no drawdown but recovery_factor={}", r.recovery_factor),
                );
            }
            return;
        }
        let computed = r.net_pnl_usdt / r.max_drawdown_usdt;
        let tol = ABS_TOL.max(r.recovery_factor.abs() * 0.05);
        if (computed - r.recovery_factor).abs() > tol {
            self.fail(
                "RECOVERY",
                format!(
                    "recovery_factor: computed={computed:.4} vs result={:.4}",
                    r.recovery_factor
                ),
            );
        } else {
            self.pass("RECOVERY", format!("recovery factor {computed:.2}"));
        }
    }

    fn check_no_overlap(&mut self) {
        if self.manifest.config.policy.max_positions_per_symbol != 1 {
            self.skip("NO_OVERLAP", "policy allows concurrent positions");
            return;
        }
        let mut sorted: Vec<&Trade> = self.trades.iter().collect();
        sorted.sort_by_key(|t| t.entry_ts);
        let overlaps: Vec<String> = sorted
            .windows(2)
            .filter(|w| w[1].entry_ts < w[0].exit_ts)
            .map(|w| format!("{} overlaps {}", w[1].id, w[0].id))
            .collect();
        if overlaps.is_empty() {
            self.pass("NO_OVERLAP", "no overlapping trades");
        } else {
            self.fail("NO_OVERLAP", overlaps.join("; "));
        }
    }
}

/// Load and verify one run directory.
pub fn verify_run(run_dir: &Path) -> Result<AuditReport> {
    let report = MathAudit::load(run_dir)?.verify();
    if report.passed {
        tracing::info!(run_dir = %run_dir.display(), checks = report.checks.len(), "math audit passed");
    } else {
        tracing::warn!(
            run_dir = %run_dir.display(),
            failures = report.failures().len(),
            "math audit failed"
        );
    }
    Ok(report)
}
