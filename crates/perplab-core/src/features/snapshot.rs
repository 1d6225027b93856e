//! Per-role feature state and runtime snapshot assembly.
//!
//! Each role (exec/mtf/htf) owns a streaming feature state that advances
//! only on its own timeframe's bar closes. At every exec-bar close the
//! builder assembles a frozen `RuntimeSnapshot` for the strategy.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::error::Result;
use crate::features::indicators::{BoundIndicator, IndicatorSpec};
use crate::features::registry::{FeatureMap, FeatureRegistry};
use crate::play::TfMapping;
use crate::timeframe::{Role, Timeframe};
use crate::trade::Side;

/// Streaming feature state for one role.
#[derive(Debug, Clone)]
struct RoleState {
    tf: Timeframe,
    registry: Arc<FeatureRegistry>,
    evaluators: Vec<BoundIndicator>,
    features: FeatureMap,
    /// Close of the most recent bar folded in.
    last_close_ts: Option<DateTime<Utc>>,
    bars_seen: u64,
}

impl RoleState {
    fn new(tf: Timeframe, specs: &[IndicatorSpec]) -> Result<Self> {
        let keys: Vec<String> = specs
            .iter()
            .flat_map(|s| s.kind.output_keys(&s.key))
            .collect();
        let registry = FeatureRegistry::from_keys(keys)?;
        let evaluators = specs
            .iter()
            .map(|s| BoundIndicator::bind(s, &registry))
            .collect::<Result<Vec<_>>>()?;
        let features = FeatureMap::new(registry.len());
        Ok(Self {
            tf,
            registry,
            evaluators,
            features,
            last_close_ts: None,
            bars_seen: 0,
        })
    }

    fn advance(&mut self, bar: &Bar) {
        for evaluator in &mut self.evaluators {
            evaluator.update(bar, &mut self.features);
        }
        self.last_close_ts = Some(bar.ts_close);
        self.bars_seen += 1;
    }
}

/// Frozen per-role feature view inside a snapshot.
#[derive(Debug, Clone)]
pub struct RoleContext {
    pub role: Role,
    pub tf: Timeframe,
    /// Close of the exec bar this context was assembled at.
    pub ctx_ts_close: DateTime<Utc>,
    /// Close of the bar the features were computed from.
    pub features_ts_close: Option<DateTime<Utc>>,
    pub features: FeatureMap,
    registry: Arc<FeatureRegistry>,
    /// True when this role's most recent close predates the exec bar's
    /// open.
    pub is_stale: bool,
}

impl RoleContext {
    /// Look up a feature by key. Unknown keys are a configuration error;
    /// a known key that has not warmed up yet reads as `None`.
    pub fn feature(&self, key: &str) -> Result<Option<f64>> {
        let id = self.registry.resolve(key)?;
        Ok(self.features.get(id))
    }

    /// Named view of all published features (event logging).
    pub fn named_features(&self) -> BTreeMap<String, f64> {
        self.features.to_named(&self.registry)
    }
}

/// Account/position state visible to the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeStateView {
    pub position_side: Option<Side>,
    pub position_size_usdt: f64,
    pub entry_price: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub used_margin: f64,
}

impl ExchangeStateView {
    pub fn flat(equity: f64) -> Self {
        Self {
            position_side: None,
            position_size_usdt: 0.0,
            entry_price: None,
            take_profit: None,
            stop_loss: None,
            unrealized_pnl: 0.0,
            equity,
            used_margin: 0.0,
        }
    }
}

/// The read-only view handed to a strategy at one exec-bar close.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub symbol: String,
    pub bar_index: u64,
    /// The exec bar that just closed.
    pub bar: Bar,
    pub exec: RoleContext,
    pub mtf: RoleContext,
    pub htf: RoleContext,
    pub exchange_state: ExchangeStateView,
    /// False while any role has not yet published its first closed bar.
    pub snapshot_ready: bool,
}

impl RuntimeSnapshot {
    pub fn role(&self, role: Role) -> &RoleContext {
        match role {
            Role::Exec => &self.exec,
            Role::Mtf => &self.mtf,
            Role::Htf => &self.htf,
        }
    }
}

/// Maintains all role states and assembles snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    symbol: String,
    roles: BTreeMap<Role, RoleState>,
}

impl SnapshotBuilder {
    pub fn new(symbol: impl Into<String>, tf_map: &TfMapping, specs: &[IndicatorSpec]) -> Result<Self> {
        let mut roles = BTreeMap::new();
        for role in Role::ALL {
            let role_specs: Vec<IndicatorSpec> = specs
                .iter()
                .filter(|s| s.role == role)
                .cloned()
                .collect();
            roles.insert(role, RoleState::new(tf_map.tf_for(role), &role_specs)?);
        }
        Ok(Self {
            symbol: symbol.into(),
            roles,
        })
    }

    /// Timeframe serving a role.
    pub fn tf_for(&self, role: Role) -> Timeframe {
        self.roles[&role].tf
    }

    /// Fold in a closed bar for every role whose timeframe matches `tf`.
    /// Distinct roles may share a timeframe; all of them advance.
    pub fn on_bar_close(&mut self, tf: Timeframe, bar: &Bar) {
        for state in self.roles.values_mut() {
            if state.tf == tf {
                state.advance(bar);
            }
        }
    }

    /// Most recent close folded into a role (None before the first bar).
    pub fn last_close(&self, role: Role) -> Option<DateTime<Utc>> {
        self.roles[&role].last_close_ts
    }

    /// Named view of a role's currently published features (refresh
    /// events).
    pub fn named_features(&self, role: Role) -> BTreeMap<String, f64> {
        let state = &self.roles[&role];
        state.features.to_named(&state.registry)
    }

    fn role_context(&self, role: Role, exec_bar: &Bar) -> RoleContext {
        let state = &self.roles[&role];
        let is_stale = match state.last_close_ts {
            Some(close) => close < exec_bar.ts_open,
            None => true,
        };
        RoleContext {
            role,
            tf: state.tf,
            ctx_ts_close: exec_bar.ts_close,
            features_ts_close: state.last_close_ts,
            features: state.features.clone(),
            registry: Arc::clone(&state.registry),
            is_stale,
        }
    }

    /// Assemble the frozen snapshot for one exec-bar close. The exec bar
    /// itself must already have been folded in via `on_bar_close`.
    pub fn assemble(
        &self,
        bar_index: u64,
        exec_bar: &Bar,
        exchange_state: ExchangeStateView,
    ) -> RuntimeSnapshot {
        let exec = self.role_context(Role::Exec, exec_bar);
        let mtf = self.role_context(Role::Mtf, exec_bar);
        let htf = self.role_context(Role::Htf, exec_bar);
        let snapshot_ready = self.roles.values().all(|s| s.bars_seen > 0);
        RuntimeSnapshot {
            symbol: self.symbol.clone(),
            bar_index,
            bar: *exec_bar,
            exec,
            mtf,
            htf,
            exchange_state,
            snapshot_ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::indicators::IndicatorKind;
    use chrono::TimeZone;

    fn tf_map() -> TfMapping {
        TfMapping {
            exec: Timeframe::M15,
            mtf: Timeframe::H1,
            htf: Timeframe::H4,
        }
    }

    fn specs() -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::new(Role::Exec, "ema_fast", IndicatorKind::Ema { period: 2 }),
            IndicatorSpec::new(Role::Htf, "ema_trend", IndicatorKind::Ema { period: 2 }),
        ]
    }

    fn bar_at(tf: Timeframe, h: u32, mi: u32, close: f64) -> Bar {
        let open = Utc.with_ymd_and_hms(2024, 1, 1, h, mi, 0).unwrap();
        Bar::new(open, tf.advance(open), close, close, close, close, 10.0)
    }

    #[test]
    fn roles_advance_only_on_their_tf() {
        let mut builder = SnapshotBuilder::new("BTCUSDT", &tf_map(), &specs()).unwrap();
        builder.on_bar_close(Timeframe::M15, &bar_at(Timeframe::M15, 0, 0, 100.0));
        assert!(builder.last_close(Role::Exec).is_some());
        assert!(builder.last_close(Role::Htf).is_none());
    }

    #[test]
    fn snapshot_not_ready_until_all_roles_seen() {
        let mut builder = SnapshotBuilder::new("BTCUSDT", &tf_map(), &specs()).unwrap();
        let exec_bar = bar_at(Timeframe::M15, 0, 0, 100.0);
        builder.on_bar_close(Timeframe::M15, &exec_bar);
        let snap = builder.assemble(0, &exec_bar, ExchangeStateView::flat(10_000.0));
        assert!(!snap.snapshot_ready);
        assert!(snap.htf.is_stale);

        // Feed mtf and htf closes; now every role has published.
        builder.on_bar_close(Timeframe::H1, &bar_at(Timeframe::H1, 0, 0, 100.0));
        builder.on_bar_close(Timeframe::H4, &bar_at(Timeframe::H4, 0, 0, 100.0));
        let exec_bar2 = bar_at(Timeframe::M15, 4, 0, 101.0);
        builder.on_bar_close(Timeframe::M15, &exec_bar2);
        let snap = builder.assemble(16, &exec_bar2, ExchangeStateView::flat(10_000.0));
        assert!(snap.snapshot_ready);
    }

    #[test]
    fn staleness_relative_to_exec_open() {
        let mut builder = SnapshotBuilder::new("BTCUSDT", &tf_map(), &specs()).unwrap();
        // HTF bar closing at 04:00.
        builder.on_bar_close(Timeframe::H4, &bar_at(Timeframe::H4, 0, 0, 100.0));

        // Exec bar opening exactly at 04:00: HTF close == exec open, fresh.
        let exec_bar = bar_at(Timeframe::M15, 4, 0, 100.0);
        builder.on_bar_close(Timeframe::M15, &exec_bar);
        let snap = builder.assemble(0, &exec_bar, ExchangeStateView::flat(10_000.0));
        assert!(!snap.htf.is_stale);

        // Exec bar opening at 07:45: HTF close (04:00) predates it.
        let late_bar = bar_at(Timeframe::M15, 7, 45, 100.0);
        builder.on_bar_close(Timeframe::M15, &late_bar);
        let snap = builder.assemble(15, &late_bar, ExchangeStateView::flat(10_000.0));
        assert!(snap.htf.is_stale);
        assert_eq!(
            snap.htf.features_ts_close,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn features_visible_after_warmup() {
        let mut builder = SnapshotBuilder::new("BTCUSDT", &tf_map(), &specs()).unwrap();
        let b1 = bar_at(Timeframe::M15, 0, 0, 100.0);
        let b2 = bar_at(Timeframe::M15, 0, 15, 102.0);
        builder.on_bar_close(Timeframe::M15, &b1);
        let snap = builder.assemble(0, &b1, ExchangeStateView::flat(10_000.0));
        assert_eq!(snap.exec.feature("ema_fast").unwrap(), None);

        builder.on_bar_close(Timeframe::M15, &b2);
        let snap = builder.assemble(1, &b2, ExchangeStateView::flat(10_000.0));
        assert_eq!(snap.exec.feature("ema_fast").unwrap(), Some(101.0));
    }

    #[test]
    fn unknown_feature_key_errors() {
        let mut builder = SnapshotBuilder::new("BTCUSDT", &tf_map(), &specs()).unwrap();
        let b1 = bar_at(Timeframe::M15, 0, 0, 100.0);
        builder.on_bar_close(Timeframe::M15, &b1);
        let snap = builder.assemble(0, &b1, ExchangeStateView::flat(10_000.0));
        let err = snap.exec.feature("nope").unwrap_err();
        assert_eq!(err.kind(), "unknown_feature");
    }

    #[test]
    fn byte_identical_feature_maps_for_same_history() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| {
                bar_at(
                    Timeframe::M15,
                    (i / 4) as u32,
                    (i % 4) as u32 * 15,
                    100.0 + i as f64,
                )
            })
            .collect();
        let run = || {
            let mut builder = SnapshotBuilder::new("BTCUSDT", &tf_map(), &specs()).unwrap();
            for bar in &bars {
                builder.on_bar_close(Timeframe::M15, bar);
            }
            let snap = builder.assemble(
                bars.len() as u64 - 1,
                bars.last().unwrap(),
                ExchangeStateView::flat(10_000.0),
            );
            snap.exec.named_features()
        };
        assert_eq!(run(), run());
    }
}
