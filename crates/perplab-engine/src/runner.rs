//! Process surface: `preflight`, `run`, `verify`, and the trade-ledger
//! hash used by determinism regressions.

use std::path::Path;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use perplab_core::data::MarketDataProvider;
use perplab_core::error::Result;
use perplab_core::play::Play;
use perplab_core::strategy::StrategyRegistry;
use perplab_core::trade::Trade;

use crate::audit::{verify_run, AuditReport};
use crate::engine::{BacktestEngine, PreflightOutcome, RunOptions, RunReport, RunWindow};

/// Resolve the load window and run the data health gate without touching
/// disk. Fails with `PreflightFailed` (carrying the health report) when
/// the data is not fit to simulate on.
pub fn preflight(
    play: &Play,
    window: RunWindow,
    provider: &dyn MarketDataProvider,
    registry: &StrategyRegistry,
) -> Result<PreflightOutcome> {
    BacktestEngine::new(play, provider, registry).preflight(window)
}

/// Execute one backtest run, producing a fresh artifact directory under
/// `out_root`.
pub fn run(
    play: &Play,
    window: RunWindow,
    provider: &dyn MarketDataProvider,
    registry: &StrategyRegistry,
    out_root: &Path,
    options: &RunOptions,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4().to_string();
    BacktestEngine::new(play, provider, registry).run(window, out_root, &run_id, options)
}

/// Re-verify a finished run directory with the math audit.
pub fn verify(run_dir: &Path) -> Result<AuditReport> {
    verify_run(run_dir)
}

/// SHA-256 over the ordered `(entry_ts, entry_price, exit_ts, exit_price,
/// net_pnl)` tuples of a trade ledger. Two runs of the same play over the
/// same data must hash identically.
pub fn trade_ledger_hash(trades: &[Trade]) -> String {
    let mut hasher = Sha256::new();
    for trade in trades {
        hasher.update(
            format!(
                "{},{:.8},{},{:.8},{:.8};",
                trade.entry_ts.timestamp_millis(),
                trade.entry_price,
                trade.exit_ts.timestamp_millis(),
                trade.exit_price,
                trade.net_pnl,
            )
            .as_bytes(),
        );
    }
    format!("{:x}", hasher.finalize())
}
