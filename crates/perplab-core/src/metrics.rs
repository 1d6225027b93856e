//! Summary metric computation from the trade ledger and equity curve.
//!
//! Conventions (load-bearing for the math-audit verifier):
//! - `win_rate` is a 0-1 decimal; `max_drawdown_pct` is a 0-1 decimal.
//! - `gross_loss_usdt` is stored negative; `largest_loss_usdt` positive.
//! - `profit_factor` saturates at 100.0 when there are no losses,
//!   mirrored by `sortino`/`calmar`/`recovery_factor` when their
//!   denominators vanish.

use serde::{Deserialize, Serialize};

use crate::timeframe::Timeframe;
use crate::trade::{EquityPoint, Side, Trade};

/// Summary metrics for one run. Field names match `result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub trades_count: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub long_trades: u64,
    pub short_trades: u64,

    pub net_pnl_usdt: f64,
    pub gross_profit_usdt: f64,
    pub gross_loss_usdt: f64,
    pub total_fees_usdt: f64,
    pub expectancy_usdt: f64,

    pub win_rate: f64,
    pub profit_factor: f64,
    pub payoff_ratio: f64,

    pub largest_win_usdt: f64,
    pub largest_loss_usdt: f64,
    pub max_consecutive_wins: u64,
    pub max_consecutive_losses: u64,

    pub max_drawdown_usdt: f64,
    pub max_drawdown_pct: f64,

    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub recovery_factor: f64,

    pub avg_trade_duration_bars: f64,
    pub final_equity_usdt: f64,
}

/// Saturation value for ratios whose denominator vanished while the
/// numerator stayed favorable.
const RATIO_SATURATION: f64 = 100.0;

/// Compute all summary metrics.
pub fn compute_summary(
    trades: &[Trade],
    equity: &[EquityPoint],
    exec_tf: Timeframe,
    initial_equity: f64,
) -> Summary {
    let trades_count = trades.len() as u64;
    let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();

    let winning_trades = pnls.iter().filter(|p| **p > 0.0).count() as u64;
    let losing_trades = pnls.iter().filter(|p| **p < 0.0).count() as u64;
    let long_trades = trades.iter().filter(|t| t.side == Side::Long).count() as u64;
    let short_trades = trades.iter().filter(|t| t.side == Side::Short).count() as u64;

    let gross_profit_usdt: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss_usdt: f64 = pnls.iter().filter(|p| **p < 0.0).sum();
    let net_pnl_usdt: f64 = pnls.iter().sum();
    let total_fees_usdt: f64 = trades.iter().map(|t| t.fees_paid).sum();
    let expectancy_usdt = if trades_count > 0 {
        net_pnl_usdt / trades_count as f64
    } else {
        0.0
    };

    let win_rate = if trades_count > 0 {
        winning_trades as f64 / trades_count as f64
    } else {
        0.0
    };

    let gross_loss_abs = gross_loss_usdt.abs();
    let profit_factor = if gross_loss_abs > 0.0 {
        gross_profit_usdt / gross_loss_abs
    } else if gross_profit_usdt > 0.0 {
        RATIO_SATURATION
    } else {
        0.0
    };

    let avg_win = if winning_trades > 0 {
        gross_profit_usdt / winning_trades as f64
    } else {
        0.0
    };
    let avg_loss = if losing_trades > 0 {
        gross_loss_abs / losing_trades as f64
    } else {
        0.0
    };
    let payoff_ratio = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };

    let largest_win_usdt = pnls.iter().copied().filter(|p| *p > 0.0).fold(0.0, f64::max);
    let largest_loss_usdt = pnls
        .iter()
        .copied()
        .filter(|p| *p < 0.0)
        .fold(0.0, f64::min)
        .abs();

    let (max_consecutive_wins, max_consecutive_losses) = streaks(&pnls);
    let (max_drawdown_usdt, max_drawdown_pct) = max_drawdown(equity);

    let returns = per_bar_returns(equity);
    let bars_per_year = exec_tf.bars_per_year() as f64;
    let annualization = bars_per_year.sqrt();

    let sharpe = compute_sharpe(&returns, annualization);
    let sortino = compute_sortino(&returns, annualization);

    let final_equity_usdt = equity.last().map(|p| p.equity).unwrap_or(initial_equity);
    let total_bars = equity.len() as f64;
    let years = if bars_per_year > 0.0 { total_bars / bars_per_year } else { 0.0 };
    let cagr = if years > 0.0 && initial_equity > 0.0 && final_equity_usdt > 0.0 {
        (final_equity_usdt / initial_equity).powf(1.0 / years) - 1.0
    } else {
        0.0
    };
    let calmar = if max_drawdown_pct > 0.0 {
        cagr / max_drawdown_pct
    } else if cagr > 0.0 {
        RATIO_SATURATION
    } else {
        0.0
    };

    let recovery_factor = if max_drawdown_usdt > 0.0 {
        net_pnl_usdt / max_drawdown_usdt
    } else if net_pnl_usdt > 0.0 {
        RATIO_SATURATION
    } else {
        0.0
    };

    let avg_trade_duration_bars = if trades_count > 0 {
        trades.iter().map(|t| t.duration_bars() as f64).sum::<f64>() / trades_count as f64
    } else {
        0.0
    };

    Summary {
        trades_count,
        winning_trades,
        losing_trades,
        long_trades,
        short_trades,
        net_pnl_usdt,
        gross_profit_usdt,
        gross_loss_usdt,
        total_fees_usdt,
        expectancy_usdt,
        win_rate,
        profit_factor,
        payoff_ratio,
        largest_win_usdt,
        largest_loss_usdt,
        max_consecutive_wins,
        max_consecutive_losses,
        max_drawdown_usdt,
        max_drawdown_pct,
        sharpe,
        sortino,
        calmar,
        recovery_factor,
        avg_trade_duration_bars,
        final_equity_usdt,
    }
}

/// Per-bar simple returns `equity_i / equity_{i-1} - 1`.
pub fn per_bar_returns(equity: &[EquityPoint]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| w[1].equity / w[0].equity - 1.0)
        .collect()
}

/// Annualized Sharpe over per-bar returns (population std, zero risk-free).
pub fn compute_sharpe(returns: &[f64], annualization: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std > 0.0 {
        mean / std * annualization
    } else {
        0.0
    }
}

/// Annualized Sortino: downside deviation uses `sum(min(r, 0)^2) / N` over
/// the full sample. Saturates when there is no downside at all.
pub fn compute_sortino(returns: &[f64], annualization: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let downside_var = returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / n;
    if downside_var > 0.0 {
        mean / downside_var.sqrt() * annualization
    } else if mean > 0.0 {
        RATIO_SATURATION
    } else {
        0.0
    }
}

/// Walk the equity curve for max drawdown. Absolute and percentage maxima
/// are tracked independently (they can peak at different points).
pub fn max_drawdown(equity: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_abs: f64 = 0.0;
    let mut max_pct: f64 = 0.0;
    for point in equity {
        if point.equity > peak {
            peak = point.equity;
        }
        let dd_abs = peak - point.equity;
        if dd_abs > max_abs {
            max_abs = dd_abs;
        }
        if peak > 0.0 {
            let dd_pct = dd_abs / peak;
            if dd_pct > max_pct {
                max_pct = dd_pct;
            }
        }
    }
    (max_abs, max_pct)
}

/// Longest winning and losing streaks. Zero-PnL trades break both streaks.
fn streaks(pnls: &[f64]) -> (u64, u64) {
    let mut max_wins = 0u64;
    let mut max_losses = 0u64;
    let mut cur_wins = 0u64;
    let mut cur_losses = 0u64;
    for &pnl in pnls {
        if pnl > 0.0 {
            cur_wins += 1;
            cur_losses = 0;
            max_wins = max_wins.max(cur_wins);
        } else if pnl < 0.0 {
            cur_losses += 1;
            cur_wins = 0;
            max_losses = max_losses.max(cur_losses);
        } else {
            cur_wins = 0;
            cur_losses = 0;
        }
    }
    (max_wins, max_losses)
}
