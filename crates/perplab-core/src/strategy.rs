//! Strategy contract and registry.
//!
//! A strategy is a pure `snapshot -> Option<Signal>` evaluation registered
//! under a stable `(id, version)` pair. Strategies hold no state between
//! calls, perform no I/O, and must tolerate stale HTF/MTF roles via the
//! snapshot's readiness flags.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PerpLabError, Result};
use crate::features::indicators::{IndicatorKind, IndicatorSpec};
use crate::features::snapshot::RuntimeSnapshot;
use crate::timeframe::Role;
use crate::trade::Side;

/// A strategy's trade intent at one exec-bar close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Side,
    /// Optional notional hint for the fixed_notional sizing model.
    pub size_hint_usdt: Option<f64>,
    /// Explicit stop loss; overrides the play's `stop_loss_pct` formula.
    pub stop_loss: Option<f64>,
    /// Explicit take profit; overrides the play's `take_profit_pct` formula.
    pub take_profit: Option<f64>,
    pub strategy_id: String,
    pub strategy_version: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Signal {
    pub fn new(direction: Side, strategy_id: &str, strategy_version: &str) -> Self {
        Self {
            direction,
            size_hint_usdt: None,
            stop_loss: None,
            take_profit: None,
            strategy_id: strategy_id.to_string(),
            strategy_version: strategy_version.to_string(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Strategy evaluation contract.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Stable family identifier.
    fn id(&self) -> &str;

    /// Explicit version string.
    fn version(&self) -> &str;

    /// Indicator specs this strategy needs per role. The engine builds the
    /// feature registry and the warmup plan from these.
    fn declared_features(&self, params: &serde_json::Value) -> Vec<IndicatorSpec>;

    /// Evaluate one snapshot. Must be pure.
    fn evaluate(
        &self,
        snapshot: &RuntimeSnapshot,
        params: &serde_json::Value,
    ) -> Result<Option<Signal>>;
}

/// Immutable registry of strategies keyed by `(id, version)`, constructed
/// once at startup.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<(String, String), Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmaRsiAtr));
        registry.register(Arc::new(HtfTrendFollow));
        registry.register(Arc::new(AlwaysLong));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        let key = (strategy.id().to_string(), strategy.version().to_string());
        self.strategies.insert(key, strategy);
    }

    pub fn get(&self, id: &str, version: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .get(&(id.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| PerpLabError::UnknownStrategy {
                id: id.to_string(),
                version: version.to_string(),
            })
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.strategies.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.list())
            .finish()
    }
}

fn param_usize(params: &serde_json::Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn param_f64(params: &serde_json::Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// EMA crossover + RSI filter + ATR-scaled TP/SL.
///
/// Entry: long when `ema_fast > ema_slow` and RSI below the overbought
/// band; short when `ema_fast < ema_slow` and RSI above the oversold band.
/// Exits ride the engine's TP/SL; an opposite-direction signal closes the
/// position at the next fill.
#[derive(Debug)]
pub struct EmaRsiAtr;

impl EmaRsiAtr {
    pub const ID: &'static str = "ema_rsi_atr";
    pub const VERSION: &'static str = "1.0.0";
}

impl Strategy for EmaRsiAtr {
    fn id(&self) -> &str {
        Self::ID
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn declared_features(&self, params: &serde_json::Value) -> Vec<IndicatorSpec> {
        let fast = param_usize(params, "ema_fast_period", 12);
        let slow = param_usize(params, "ema_slow_period", 26);
        let rsi = param_usize(params, "rsi_period", 14);
        let atr = param_usize(params, "atr_period", 14);
        vec![
            IndicatorSpec::new(Role::Exec, "ema_fast", IndicatorKind::Ema { period: fast }),
            IndicatorSpec::new(Role::Exec, "ema_slow", IndicatorKind::Ema { period: slow }),
            IndicatorSpec::new(Role::Exec, "rsi", IndicatorKind::Rsi { period: rsi }),
            IndicatorSpec::new(Role::Exec, "atr", IndicatorKind::Atr { period: atr }),
        ]
    }

    fn evaluate(
        &self,
        snapshot: &RuntimeSnapshot,
        params: &serde_json::Value,
    ) -> Result<Option<Signal>> {
        if !snapshot.snapshot_ready {
            return Ok(None);
        }

        let exec = &snapshot.exec;
        let (ema_fast, ema_slow, rsi, atr) = match (
            exec.feature("ema_fast")?,
            exec.feature("ema_slow")?,
            exec.feature("rsi")?,
            exec.feature("atr")?,
        ) {
            (Some(f), Some(s), Some(r), Some(a)) => (f, s, r, a),
            _ => return Ok(None),
        };

        let rsi_overbought = param_f64(params, "rsi_overbought", 70.0);
        let rsi_oversold = param_f64(params, "rsi_oversold", 30.0);
        let atr_sl_mult = param_f64(params, "atr_sl_multiplier", 1.5);
        let atr_tp_mult = param_f64(params, "atr_tp_multiplier", 2.0);

        // Opposite-trend exit while positioned; the engine turns an
        // opposite-direction signal into a signal exit.
        if let Some(side) = snapshot.exchange_state.position_side {
            let reversed = match side {
                Side::Long => ema_fast < ema_slow,
                Side::Short => ema_fast > ema_slow,
            };
            if reversed {
                return Ok(Some(Signal::new(side.opposite(), Self::ID, Self::VERSION)));
            }
            return Ok(None);
        }

        let close = snapshot.bar.close;
        if ema_fast > ema_slow && rsi < rsi_overbought {
            let mut signal = Signal::new(Side::Long, Self::ID, Self::VERSION);
            signal.stop_loss = Some(close - atr * atr_sl_mult);
            signal.take_profit = Some(close + atr * atr_tp_mult);
            return Ok(Some(signal));
        }
        if ema_fast < ema_slow && rsi > rsi_oversold {
            let mut signal = Signal::new(Side::Short, Self::ID, Self::VERSION);
            signal.stop_loss = Some(close + atr * atr_sl_mult);
            signal.take_profit = Some(close - atr * atr_tp_mult);
            return Ok(Some(signal));
        }
        Ok(None)
    }
}

/// Higher-timeframe trend filter with exec-timeframe timing.
///
/// The HTF role supplies the regime (EMA trend direction), the MTF role a
/// confirmation EMA, and the exec role times entries with MACD histogram
/// sign flips. Stale HTF/MTF contexts are tolerated: the most recent
/// closed bar's features are used as long as the role has seeded.
#[derive(Debug)]
pub struct HtfTrendFollow;

impl HtfTrendFollow {
    pub const ID: &'static str = "htf_trend_follow";
    pub const VERSION: &'static str = "1.0.0";
}

impl Strategy for HtfTrendFollow {
    fn id(&self) -> &str {
        Self::ID
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn declared_features(&self, params: &serde_json::Value) -> Vec<IndicatorSpec> {
        let htf_fast = param_usize(params, "htf_ema_fast_period", 8);
        let htf_slow = param_usize(params, "htf_ema_slow_period", 21);
        let mtf_ema = param_usize(params, "mtf_ema_period", 20);
        let fast = param_usize(params, "macd_fast", 12);
        let slow = param_usize(params, "macd_slow", 26);
        let signal = param_usize(params, "macd_signal", 9);
        vec![
            IndicatorSpec::new(Role::Htf, "trend_fast", IndicatorKind::Ema { period: htf_fast }),
            IndicatorSpec::new(Role::Htf, "trend_slow", IndicatorKind::Ema { period: htf_slow }),
            IndicatorSpec::new(Role::Mtf, "confirm_ema", IndicatorKind::Ema { period: mtf_ema }),
            IndicatorSpec::new(
                Role::Exec,
                "macd",
                IndicatorKind::Macd { fast, slow, signal },
            ),
        ]
    }

    fn evaluate(
        &self,
        snapshot: &RuntimeSnapshot,
        _params: &serde_json::Value,
    ) -> Result<Option<Signal>> {
        if !snapshot.snapshot_ready {
            return Ok(None);
        }

        let (trend_fast, trend_slow) = match (
            snapshot.htf.feature("trend_fast")?,
            snapshot.htf.feature("trend_slow")?,
        ) {
            (Some(f), Some(s)) => (f, s),
            _ => return Ok(None),
        };
        let confirm_ema = match snapshot.mtf.feature("confirm_ema")? {
            Some(v) => v,
            None => return Ok(None),
        };
        let hist = match snapshot.exec.feature("macd_hist")? {
            Some(v) => v,
            None => return Ok(None),
        };

        let close = snapshot.bar.close;
        let uptrend = trend_fast > trend_slow && close > confirm_ema;
        let downtrend = trend_fast < trend_slow && close < confirm_ema;

        if let Some(side) = snapshot.exchange_state.position_side {
            let regime_flipped = match side {
                Side::Long => !uptrend,
                Side::Short => !downtrend,
            };
            if regime_flipped {
                return Ok(Some(Signal::new(side.opposite(), Self::ID, Self::VERSION)));
            }
            return Ok(None);
        }

        if uptrend && hist > 0.0 {
            return Ok(Some(Signal::new(Side::Long, Self::ID, Self::VERSION)));
        }
        if downtrend && hist < 0.0 {
            return Ok(Some(Signal::new(Side::Short, Self::ID, Self::VERSION)));
        }
        Ok(None)
    }
}

/// Goes long on the first ready bar and then stays quiet. Exists to drive
/// validation scenarios where TP/SL/liquidation mechanics are the subject
/// under test.
#[derive(Debug)]
pub struct AlwaysLong;

impl AlwaysLong {
    pub const ID: &'static str = "always_long";
    pub const VERSION: &'static str = "1.0.0";
}

impl Strategy for AlwaysLong {
    fn id(&self) -> &str {
        Self::ID
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn declared_features(&self, _params: &serde_json::Value) -> Vec<IndicatorSpec> {
        Vec::new()
    }

    fn evaluate(
        &self,
        snapshot: &RuntimeSnapshot,
        _params: &serde_json::Value,
    ) -> Result<Option<Signal>> {
        if !snapshot.snapshot_ready || snapshot.exchange_state.position_side.is_some() {
            return Ok(None);
        }
        Ok(Some(Signal::new(Side::Long, Self::ID, Self::VERSION)))
    }
}
