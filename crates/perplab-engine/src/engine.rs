//! The bar-by-bar backtest engine.
//!
//! State machine per run: Init -> Preflight -> Warmup -> Running ->
//! (Closed | Halted). Single-threaded and cooperative; the only suspension
//! points are provider reads and artifact writes. Within one exec bar the
//! processing order is fixed:
//!
//! 1. pending entry fill + 1m intrabar pass (liq > SL > TP > signal exit)
//! 2. HTF/MTF refresh for closes on or before this exec close
//! 3. snapshot assembly + step event
//! 4. strategy evaluation and signal routing (sizing -> liq gate -> pend)
//! 5. equity point at the exec close
//!
//! Refreshes land after the intrabar pass so the event log stays ordered
//! by `(ts, event_id)`; the strategy still always sees roles refreshed
//! through the current close.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use perplab_core::bar::{Bar, BarSeries};
use perplab_core::data::MarketDataProvider;
use perplab_core::error::{PerpLabError, RejectReason, Result};
use perplab_core::features::snapshot::{ExchangeStateView, SnapshotBuilder};
use perplab_core::health::{DataHealthCheck, HealthReport, SeriesKind};
use perplab_core::metrics::compute_summary;
use perplab_core::play::Play;
use perplab_core::risk::DrawdownTracker;
use perplab_core::sizing::{SizingConfig, SizingInputs, SizingModel};
use perplab_core::strategy::StrategyRegistry;
use perplab_core::timeframe::{Role, Timeframe};
use perplab_core::trade::{EquityPoint, ExitReason, Side, StopClassification, Trade};
use perplab_core::warmup::{resolve_warmup, WarmupPlan};

use crate::artifacts::{
    write_equity, write_trades, ArtifactPaths, DataWindow, EventLogWriter, RunManifest, RunResult,
};
use crate::fills::{FillConfig, FillSimulator, FundingIndex, OpenPosition};

/// Requested simulation window (strategy-active portion; warmup extends
/// the loaded window backwards).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Caller-facing run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Write CSV tables instead of Parquet.
    pub smoke_mode: bool,
    /// Emit per-bar `snapshot_context` events (debug artifacts).
    pub log_snapshot_context: bool,
    /// Recorded in the manifest when the embedder knows its revision.
    pub git_commit: Option<String>,
    /// Cooperative cancellation, checked once per exec bar.
    pub abort: Option<Arc<AtomicBool>>,
}

/// Everything preflight resolves before a run may start.
#[derive(Debug, Clone)]
pub struct PreflightOutcome {
    pub warmup: WarmupPlan,
    pub health: HealthReport,
    pub load_start: DateTime<Utc>,
    pub load_end: DateTime<Utc>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: RunResult,
    pub run_dir: std::path::PathBuf,
    pub trades: Vec<Trade>,
    pub equity: Vec<EquityPoint>,
}

/// A signal accepted at an exec close, waiting for its next-1m-open fill.
#[derive(Debug, Clone)]
struct PendingEntry {
    side: Side,
    size_usdt: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

/// Loaded market data for one run.
struct LoadedData {
    series_by_tf: BTreeMap<Timeframe, BarSeries>,
    m1: Option<BarSeries>,
    funding: FundingIndex,
    funding_timestamps: Vec<DateTime<Utc>>,
}

/// The engine. Owns nothing across runs; every `run` call is independent.
pub struct BacktestEngine<'a> {
    play: &'a Play,
    provider: &'a dyn MarketDataProvider,
    registry: &'a StrategyRegistry,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(
        play: &'a Play,
        provider: &'a dyn MarketDataProvider,
        registry: &'a StrategyRegistry,
    ) -> Self {
        Self {
            play,
            provider,
            registry,
        }
    }

    fn sizing_model(&self) -> SizingModel {
        let risk = &self.play.risk;
        SizingModel::new(SizingConfig {
            mode: risk.sizing_model,
            risk_per_trade_pct: risk.risk_per_trade_pct,
            max_leverage: self.play.account.max_leverage,
            min_trade_usdt: risk.min_trade_usdt,
            max_position_equity_pct: risk.max_position_equity_pct,
            reserve_fee_buffer: true,
            taker_fee_rate: self.play.account.fee_model.taker_rate(),
            min_liq_distance_pct: risk.min_liq_distance_pct,
            maintenance_margin_rate: risk.maintenance_margin_rate,
        })
    }

    fn fill_simulator(&self) -> FillSimulator {
        FillSimulator::new(FillConfig {
            taker_rate: self.play.account.fee_model.taker_rate(),
            slippage: self.play.account.slippage_bps / 10_000.0,
            leverage: self.play.account.max_leverage,
            maintenance_margin_rate: self.play.risk.maintenance_margin_rate,
            qty_step: self.play.qty_step,
            funding_enabled: self.play.account.funding_enabled,
        })
    }

    fn load_data(&self, load_start: DateTime<Utc>, load_end: DateTime<Utc>) -> Result<LoadedData> {
        let mut series_by_tf = BTreeMap::new();
        for tf in self.play.timeframes.distinct_tfs() {
            let series = self
                .provider
                .get_ohlcv(&self.play.symbol, tf, load_start, load_end)?;
            series.validate()?;
            series_by_tf.insert(tf, series);
        }

        let m1 = if self.play.timeframes.exec == Timeframe::M1 {
            series_by_tf.get(&Timeframe::M1).cloned()
        } else {
            self.provider
                .get_1m_quotes(&self.play.symbol, load_start, load_end)
                .ok()
        };

        let (funding, funding_timestamps) = if self.play.account.funding_enabled {
            let records = self
                .provider
                .get_funding(&self.play.symbol, load_start, load_end)?;
            let timestamps = records.iter().map(|r| r.ts).collect();
            (
                FundingIndex::new(records.into_iter().map(|r| (r.ts, r.rate))),
                timestamps,
            )
        } else {
            (FundingIndex::default(), Vec::new())
        };

        Ok(LoadedData {
            series_by_tf,
            m1,
            funding,
            funding_timestamps,
        })
    }

    fn run_health_gate(
        &self,
        data: &LoadedData,
        load_start: DateTime<Utc>,
        load_end: DateTime<Utc>,
    ) -> HealthReport {
        let required_tfs = self.play.timeframes.distinct_tfs();

        let mut ohlcv_ts: BTreeMap<Timeframe, Vec<DateTime<Utc>>> = BTreeMap::new();
        let mut bars_by_tf: BTreeMap<Timeframe, Vec<Bar>> = BTreeMap::new();
        for (tf, series) in &data.series_by_tf {
            ohlcv_ts.insert(*tf, series.open_timestamps());
            bars_by_tf.insert(*tf, series.bars.clone());
        }

        let mut by_series = BTreeMap::new();
        by_series.insert(SeriesKind::Ohlcv, ohlcv_ts);

        let mut required_series = vec![SeriesKind::Ohlcv];
        if self.play.account.funding_enabled {
            required_series.push(SeriesKind::Funding);
            let mut funding_ts = BTreeMap::new();
            funding_ts.insert(Timeframe::H1, data.funding_timestamps.clone());
            by_series.insert(SeriesKind::Funding, funding_ts);
        }

        DataHealthCheck::new(load_start, load_end, required_tfs, self.play.symbol.clone())
            .with_required_series(required_series)
            .run(&by_series, &bars_by_tf)
    }

    fn prepare(&self, window: RunWindow) -> Result<(PreflightOutcome, LoadedData)> {
        self.play.validate()?;
        let strategy = self
            .registry
            .get(&self.play.strategy.id, &self.play.strategy.version)?;
        let specs = strategy.declared_features(&self.play.strategy.params);
        let warmup = resolve_warmup(&specs, &self.play.timeframes, window.start);
        let load_start = warmup.load_start_extended;
        let load_end = window.end;

        let data = self.load_data(load_start, load_end)?;
        let health = self.run_health_gate(&data, load_start, load_end);
        if !health.passed {
            let issues = health.issue_count();
            warn!(
                play = %self.play.id,
                issues,
                missing_bars = health.total_missing_bars,
                "preflight health gate failed"
            );
            return Err(PerpLabError::PreflightFailed {
                issues,
                report: Box::new(health),
            });
        }

        info!(play = %self.play.id, %load_start, %load_end, "preflight passed");
        Ok((
            PreflightOutcome {
                warmup,
                health,
                load_start,
                load_end,
            },
            data,
        ))
    }

    /// Resolve the load window and run the data health gate. Does not
    /// touch the artifact directory.
    pub fn preflight(&self, window: RunWindow) -> Result<PreflightOutcome> {
        self.prepare(window).map(|(outcome, _)| outcome)
    }

    /// Execute the full run, writing artifacts under `out_root`.
    pub fn run(
        &self,
        window: RunWindow,
        out_root: &Path,
        run_id: &str,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let (preflight, data) = self.prepare(window)?;

        let strategy = self
            .registry
            .get(&self.play.strategy.id, &self.play.strategy.version)?;
        let specs = strategy.declared_features(&self.play.strategy.params);
        let mut builder =
            SnapshotBuilder::new(self.play.symbol.as_str(), &self.play.timeframes, &specs)?;

        let paths = ArtifactPaths::create(out_root, run_id, options.smoke_mode)?;
        let data_window = DataWindow {
            requested_start: window.start,
            requested_end: window.end,
            load_start: preflight.load_start,
            load_end: preflight.load_end,
        };
        RunManifest::new(
            run_id,
            self.play,
            data_window,
            &preflight.health,
            options.git_commit.clone(),
        )
        .write(&paths)?;
        let mut events = EventLogWriter::create(&paths)?;

        let exec_tf = self.play.timeframes.exec;
        let exec_series = data
            .series_by_tf
            .get(&exec_tf)
            .ok_or_else(|| {
                PerpLabError::InternalInvariantViolated("exec series missing after load".into())
            })?
            .clone();

        let sims = self.fill_simulator();
        let sizing = self.sizing_model();
        let params = self.play.strategy.params.clone();
        let starting_equity = self.play.account.starting_equity_usdt;
        let leverage = self.play.account.max_leverage;

        // Cursors over the non-exec role timeframes.
        let other_tfs: Vec<Timeframe> = self
            .play
            .timeframes
            .distinct_tfs()
            .into_iter()
            .filter(|tf| *tf != exec_tf)
            .collect();
        let mut tf_cursors: BTreeMap<Timeframe, usize> =
            other_tfs.iter().map(|tf| (*tf, 0usize)).collect();
        let mut m1_cursor = 0usize;

        let mut base_equity = starting_equity;
        let mut drawdown = DrawdownTracker::new(starting_equity);
        let mut open: Option<OpenPosition> = None;
        let mut pending: Option<PendingEntry> = None;
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut trade_seq = 0u64;
        let mut simulation_start_ts: Option<DateTime<Utc>> = None;
        let mut stop_classification: Option<StopClassification> = None;

        info!(
            play = %self.play.id,
            run_id,
            exec_tf = %exec_tf,
            bars = exec_series.len(),
            "run starting"
        );

        'bars: for (bar_index, bar) in exec_series.bars.iter().enumerate() {
            let bar_index = bar_index as u64;
            let running = bar.ts_close >= window.start;

            // Cooperative cancellation, once per exec bar.
            if let Some(abort) = &options.abort {
                if abort.load(Ordering::Relaxed) && running {
                    if let Some(position) = open.take() {
                        let trade = sims.close_position(
                            position,
                            &self.play.symbol,
                            bar.close,
                            bar.ts_close,
                            bar_index,
                            ExitReason::EndOfData,
                        );
                        base_equity += trade.net_pnl;
                        Self::log_trade_exit(&mut events, &trade)?;
                        Self::push_equity(&mut equity_curve, &mut drawdown, trade.exit_ts, base_equity);
                        trades.push(trade);
                    }
                    stop_classification = Some(StopClassification::Aborted);
                    info!(run_id, "run aborted by caller");
                    break 'bars;
                }
            }

            // 1m quotes spanning this exec bar (the exec bar itself when no
            // 1m series exists).
            let quotes: &[Bar] = match &data.m1 {
                Some(m1) => {
                    while m1_cursor < m1.bars.len() && m1.bars[m1_cursor].ts_open < bar.ts_open {
                        m1_cursor += 1;
                    }
                    let start = m1_cursor;
                    let mut end = start;
                    while end < m1.bars.len() && m1.bars[end].ts_close <= bar.ts_close {
                        end += 1;
                    }
                    m1_cursor = end;
                    &m1.bars[start..end]
                }
                None => std::slice::from_ref(bar),
            };
            let quotes: Vec<Bar> = if quotes.is_empty() {
                vec![*bar]
            } else {
                quotes.to_vec()
            };

            // 1. Fill a pending entry at the first 1m open of this bar.
            if running {
                if let Some(entry) = pending.take() {
                    let fill_reference = quotes[0].open;
                    let fill_ts = quotes[0].ts_open;
                    trade_seq += 1;
                    let trade_id = format!("t{trade_seq:04}");
                    match sims.open_position(
                        trade_id.clone(),
                        entry.side,
                        fill_reference,
                        entry.size_usdt,
                        entry.stop_loss,
                        entry.take_profit,
                        fill_ts,
                        bar_index,
                    ) {
                        Some(position) => {
                            events.log(
                                "fill",
                                fill_ts,
                                serde_json::json!({
                                    "trade_id": trade_id,
                                    "kind": "entry",
                                    "side": position.side.as_str(),
                                    "price": position.entry_price,
                                    "size_usdt": position.size_usdt,
                                    "size_base": position.size_base,
                                    "fee": position.fees_paid,
                                }),
                            )?;
                            events.log(
                                "trade_entry",
                                fill_ts,
                                serde_json::json!({
                                    "trade_id": trade_id,
                                    "bar_index": bar_index,
                                    "entry_price": position.entry_price,
                                    "side": position.side.as_str(),
                                    "size_usdt": position.size_usdt,
                                    "stop_loss": position.stop_loss,
                                    "take_profit": position.take_profit,
                                }),
                            )?;
                            debug!(%trade_id, price = position.entry_price, "entry filled");
                            open = Some(position);
                        }
                        None => {
                            warn!(
                                %trade_id,
                                size_usdt = entry.size_usdt,
                                "entry dropped: notional rounds below one quantity step"
                            );
                        }
                    }
                }
            }

            // Intrabar pass against the open position.
            let mut intrabar_mark: Option<f64> = None;
            if running {
                if let Some(position) = open.as_mut() {
                    let outcome = sims.intrabar_pass(position, &quotes, &data.funding);
                    for funding_event in &outcome.funding_events {
                        events.log(
                            "funding",
                            funding_event.ts,
                            serde_json::json!({
                                "trade_id": position.trade_id,
                                "rate": funding_event.rate,
                                "amount": funding_event.amount,
                            }),
                        )?;
                    }
                    intrabar_mark = outcome.last_mark;

                    if let Some(exit) = outcome.exit {
                        let position = open.take().expect("position is open");
                        let liquidated = exit.reason == ExitReason::Liquidated;
                        if liquidated {
                            events.log(
                                "liquidation",
                                exit.ts,
                                serde_json::json!({
                                    "trade_id": position.trade_id,
                                    "liq_price": position.liq_price,
                                    "side": position.side.as_str(),
                                }),
                            )?;
                        }
                        let trade = sims.close_position(
                            position,
                            &self.play.symbol,
                            exit.price,
                            exit.ts,
                            bar_index,
                            exit.reason,
                        );
                        base_equity += trade.net_pnl;
                        Self::log_trade_exit(&mut events, &trade)?;
                        Self::push_equity(&mut equity_curve, &mut drawdown, trade.exit_ts, base_equity);
                        trades.push(trade);

                        if liquidated {
                            events.log(
                                "entries_disabled",
                                exit.ts,
                                serde_json::json!({ "reason": "liquidated" }),
                            )?;
                            stop_classification = Some(StopClassification::Liquidated);
                            warn!(run_id, "position liquidated; halting run");
                            break 'bars;
                        }
                    }
                }
            }

            // 2. Refresh the non-exec roles through this exec close, then
            // fold in the exec bar itself.
            for tf in &other_tfs {
                let series = &data.series_by_tf[tf];
                let cursor = tf_cursors.get_mut(tf).expect("cursor exists");
                while *cursor < series.bars.len()
                    && series.bars[*cursor].ts_close <= bar.ts_close
                {
                    let tf_bar = &series.bars[*cursor];
                    builder.on_bar_close(*tf, tf_bar);
                    *cursor += 1;
                    if running {
                        for role in [Role::Htf, Role::Mtf] {
                            if self.play.timeframes.tf_for(role) == *tf {
                                events.log(
                                    &format!("{role}_refresh"),
                                    tf_bar.ts_close,
                                    serde_json::json!({
                                        "tf": tf.to_string(),
                                        "ts_close": tf_bar.ts_close.to_rfc3339(),
                                        "features": builder.named_features(role),
                                    }),
                                )?;
                            }
                        }
                    }
                }
            }
            builder.on_bar_close(exec_tf, bar);

            if !running {
                continue;
            }
            if simulation_start_ts.is_none() {
                simulation_start_ts = Some(bar.ts_close);
                info!(ts = %bar.ts_close, "warmup complete; strategy active");
            }

            // Mark-to-market at the bar boundary.
            let (mark_price, mark_source) = match (intrabar_mark, &data.m1) {
                (Some(mark), _) => (mark, "1m_close"),
                (None, Some(_)) => (quotes.last().map(|q| q.close).unwrap_or(bar.close), "1m_close"),
                (None, None) => (bar.close, "exec_close"),
            };
            let equity = base_equity
                + open
                    .as_ref()
                    .map(|p| p.equity_contribution(mark_price))
                    .unwrap_or(0.0);

            // Max-drawdown stop, evaluated at the bar close.
            if let Some(limit_pct) = self.play.risk.max_drawdown_pct {
                let mut probe = drawdown;
                probe.observe(equity);
                if probe.breaches(equity, limit_pct) {
                    if let Some(position) = open.take() {
                        let trade = sims.close_position(
                            position,
                            &self.play.symbol,
                            bar.close,
                            bar.ts_close,
                            bar_index,
                            ExitReason::MaxDrawdownHit,
                        );
                        base_equity += trade.net_pnl;
                        Self::log_trade_exit(&mut events, &trade)?;
                        trades.push(trade);
                    }
                    events.log(
                        "entries_disabled",
                        bar.ts_close,
                        serde_json::json!({ "reason": "max_drawdown_hit" }),
                    )?;
                    Self::push_equity(&mut equity_curve, &mut drawdown, bar.ts_close, base_equity);
                    stop_classification = Some(StopClassification::MaxDrawdownHit);
                    warn!(run_id, limit_pct, "max drawdown stop hit; halting run");
                    break 'bars;
                }
            }

            // 3. Snapshot + step event.
            let exchange_state = match &open {
                Some(p) => ExchangeStateView {
                    position_side: Some(p.side),
                    position_size_usdt: p.size_usdt,
                    entry_price: Some(p.entry_price),
                    take_profit: p.take_profit,
                    stop_loss: p.stop_loss,
                    unrealized_pnl: p.unrealized_pnl(mark_price),
                    equity,
                    used_margin: p.used_margin(leverage),
                },
                None => ExchangeStateView::flat(equity),
            };
            let snapshot = builder.assemble(bar_index, bar, exchange_state);

            events.log(
                "step",
                bar.ts_close,
                serde_json::json!({
                    "ts_open": bar.ts_open.to_rfc3339(),
                    "ts_close": bar.ts_close.to_rfc3339(),
                    "bar_index": bar_index,
                    "mark_price": mark_price,
                    "mark_price_source": mark_source,
                    "bar": {
                        "open": bar.open,
                        "high": bar.high,
                        "low": bar.low,
                        "close": bar.close,
                        "volume": bar.volume,
                    },
                    "exchange_state": {
                        "position_side": exchange_state.position_side.map(|s| s.as_str()),
                        "position_size_usdt": exchange_state.position_size_usdt,
                        "equity": exchange_state.equity,
                        "unrealized_pnl": exchange_state.unrealized_pnl,
                    },
                }),
            )?;

            if options.log_snapshot_context {
                let role_ctx = |role: Role| {
                    let ctx = snapshot.role(role);
                    serde_json::json!({
                        "tf": ctx.tf.to_string(),
                        "features_ts_close": ctx.features_ts_close.map(|t| t.to_rfc3339()),
                        "is_stale": ctx.is_stale,
                    })
                };
                events.log(
                    "snapshot_context",
                    bar.ts_close,
                    serde_json::json!({
                        "bar_index": bar_index,
                        "exec_ts_close": bar.ts_close.to_rfc3339(),
                        "snapshot_ready": snapshot.snapshot_ready,
                        "exec_ctx": role_ctx(Role::Exec),
                        "mtf_ctx": role_ctx(Role::Mtf),
                        "htf_ctx": role_ctx(Role::Htf),
                    }),
                )?;
            }

            // 4. Strategy evaluation and signal routing.
            if snapshot.snapshot_ready {
                if let Some(signal) = strategy.evaluate(&snapshot, &params)? {
                    match open.as_mut() {
                        Some(position) => {
                            if signal.direction != position.side && !position.exit_requested {
                                position.exit_requested = true;
                                debug!(
                                    trade_id = %position.trade_id,
                                    "opposite signal; exit queued for next 1m open"
                                );
                            }
                        }
                        None => {
                            if pending.is_none() {
                                // The play's pct formulas are authoritative
                                // when configured; signal-carried levels
                                // only fill the gaps.
                                let (formula_sl, formula_tp) = sims.levels_from_signal_close(
                                    bar.close,
                                    signal.direction,
                                    self.play.risk.stop_loss_pct,
                                    self.play.risk.take_profit_pct,
                                );
                                let stop_loss = formula_sl.or(signal.stop_loss);
                                let take_profit = formula_tp.or(signal.take_profit);

                                let sized = sizing.size_order_with_liq_check(
                                    &SizingInputs {
                                        equity,
                                        used_margin: 0.0,
                                        entry_price: Some(bar.close),
                                        stop_loss,
                                        requested_size: signal.size_hint_usdt,
                                    },
                                    signal.direction,
                                );

                                // Pre-trade rejections drop the signal and
                                // the run continues.
                                let rejection = if sized.rejected {
                                    Some(PerpLabError::OrderRejected {
                                        reason: RejectReason::LiquidationTooClose,
                                        detail: sized
                                            .rejection_reason
                                            .clone()
                                            .unwrap_or_default(),
                                    })
                                } else if sized.size_usdt <= 0.0 {
                                    Some(PerpLabError::OrderRejected {
                                        reason: RejectReason::CappedToZero,
                                        detail: format!("sized to {} USDT", sized.size_usdt),
                                    })
                                } else if !sizing.meets_min_size(sized.size_usdt) {
                                    Some(PerpLabError::OrderRejected {
                                        reason: RejectReason::BelowMinSize,
                                        detail: format!(
                                            "{} USDT below minimum {}",
                                            sized.size_usdt, self.play.risk.min_trade_usdt
                                        ),
                                    })
                                } else {
                                    None
                                };

                                if let Some(rejection) = rejection {
                                    warn!(ts = %bar.ts_close, error = %rejection, "signal dropped");
                                } else {
                                    pending = Some(PendingEntry {
                                        side: signal.direction,
                                        size_usdt: sized.size_usdt,
                                        stop_loss,
                                        take_profit,
                                    });
                                }
                            }
                        }
                    }
                }
            }

            // 5. Equity point at the exec close.
            Self::push_equity(&mut equity_curve, &mut drawdown, bar.ts_close, equity);
        }

        // Closed state: force-close any open position at the last close.
        if let Some(position) = open.take() {
            let last_bar = exec_series.bars.last().expect("series non-empty");
            let trade = sims.close_position(
                position,
                &self.play.symbol,
                last_bar.close,
                last_bar.ts_close,
                exec_series.len() as u64 - 1,
                ExitReason::EndOfData,
            );
            base_equity += trade.net_pnl;
            Self::log_trade_exit(&mut events, &trade)?;
            Self::push_equity(&mut equity_curve, &mut drawdown, trade.exit_ts, base_equity);
            trades.push(trade);
        }

        let summary = compute_summary(&trades, &equity_curve, exec_tf, starting_equity);
        let result = RunResult {
            run_id: run_id.to_string(),
            symbol: self.play.symbol.clone(),
            strategy_id: self.play.strategy.id.clone(),
            strategy_version: self.play.strategy.version.clone(),
            summary,
            stopped_early: stop_classification.is_some(),
            stop_classification,
            warmup_bars: preflight.warmup.max_bars() as u64,
            data_window_requested_start: window.start,
            data_window_requested_end: window.end,
            data_window_loaded_start: preflight.load_start,
            data_window_loaded_end: preflight.load_end,
            simulation_start_ts,
        };

        write_trades(&trades, &paths)?;
        write_equity(&equity_curve, &paths)?;
        result.write(&paths)?;
        events.finish()?;

        info!(
            run_id,
            trades = trades.len(),
            net_pnl = result.summary.net_pnl_usdt,
            stopped_early = result.stopped_early,
            "run finished"
        );

        Ok(RunReport {
            result,
            run_dir: paths.run_dir.clone(),
            trades,
            equity: equity_curve,
        })
    }

    fn log_trade_exit(events: &mut EventLogWriter, trade: &Trade) -> Result<()> {
        events.log(
            "fill",
            trade.exit_ts,
            serde_json::json!({
                "trade_id": trade.id,
                "kind": "exit",
                "side": trade.side.opposite().as_str(),
                "price": trade.exit_price,
                "size_base": trade.entry_size,
            }),
        )?;
        events.log(
            "trade_exit",
            trade.exit_ts,
            serde_json::json!({
                "trade_id": trade.id,
                "bar_index": trade.exit_bar_index,
                "exit_price": trade.exit_price,
                "exit_reason": trade.exit_reason.as_str(),
                "net_pnl": trade.net_pnl,
            }),
        )?;
        Ok(())
    }

    fn push_equity(
        curve: &mut Vec<EquityPoint>,
        drawdown: &mut DrawdownTracker,
        ts: DateTime<Utc>,
        equity: f64,
    ) {
        let (dd_abs, dd_pct) = drawdown.observe(equity);
        curve.push(EquityPoint {
            ts,
            equity,
            drawdown_abs: dd_abs,
            drawdown_pct: dd_pct,
        });
    }
}
