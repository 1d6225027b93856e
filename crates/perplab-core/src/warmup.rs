//! Warmup resolution.
//!
//! Computes, per role, how many bars must be loaded ahead of the requested
//! window so every declared indicator has seeded before the first strategy
//! call. Warmup is a pure function of the declared specs; it never looks
//! at data.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::features::indicators::IndicatorSpec;
use crate::play::TfMapping;
use crate::timeframe::Role;

/// Resolved warmup requirements for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupPlan {
    /// Bars required per role (max over that role's declared indicators).
    pub bars_by_role: Vec<(Role, usize)>,
    /// `load_start` extended backwards far enough for the largest
    /// role-level warmup window.
    pub load_start_extended: DateTime<Utc>,
    /// The originally requested start.
    pub requested_start: DateTime<Utc>,
}

impl WarmupPlan {
    pub fn bars_for(&self, role: Role) -> usize {
        self.bars_by_role
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Largest warmup across roles, in bars of that role's own TF.
    pub fn max_bars(&self) -> usize {
        self.bars_by_role.iter().map(|(_, n)| *n).max().unwrap_or(0)
    }
}

/// Resolve the warmup plan from declared indicator specs.
pub fn resolve_warmup(
    specs: &[IndicatorSpec],
    tf_map: &TfMapping,
    requested_start: DateTime<Utc>,
) -> WarmupPlan {
    let mut bars_by_role = Vec::with_capacity(Role::ALL.len());
    let mut max_extension = Duration::zero();

    for role in Role::ALL {
        let bars = specs
            .iter()
            .filter(|s| s.role == role)
            .map(|s| s.kind.warmup_bars())
            .max()
            .unwrap_or(0);
        bars_by_role.push((role, bars));

        let extension = tf_map.tf_for(role).step() * bars as i32;
        if extension > max_extension {
            max_extension = extension;
        }
    }

    WarmupPlan {
        bars_by_role,
        load_start_extended: requested_start - max_extension,
        requested_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::indicators::IndicatorKind;
    use crate::timeframe::Timeframe;
    use chrono::TimeZone;

    fn tf_map() -> TfMapping {
        TfMapping {
            exec: Timeframe::M15,
            mtf: Timeframe::H1,
            htf: Timeframe::H1,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn extension_driven_by_largest_role_window() {
        // ema_slow lookback 200 on the 1h role: extension must be 200h,
        // dominating the 15m exec indicator.
        let specs = vec![
            IndicatorSpec::new(Role::Exec, "ema_fast", IndicatorKind::Ema { period: 12 }),
            IndicatorSpec::new(Role::Htf, "ema_slow", IndicatorKind::Ema { period: 200 }),
        ];
        let plan = resolve_warmup(&specs, &tf_map(), start());
        assert_eq!(plan.bars_for(Role::Htf), 200);
        assert_eq!(plan.bars_for(Role::Exec), 12);
        assert_eq!(plan.load_start_extended, start() - Duration::hours(200));
    }

    #[test]
    fn exec_extension_wins_when_larger() {
        // 400 bars of 15m = 100h > 24 bars of 1h.
        let specs = vec![
            IndicatorSpec::new(Role::Exec, "dc", IndicatorKind::Donchian { lookback: 399 }),
            IndicatorSpec::new(Role::Mtf, "ema", IndicatorKind::Ema { period: 24 }),
        ];
        let plan = resolve_warmup(&specs, &tf_map(), start());
        assert_eq!(plan.load_start_extended, start() - Duration::minutes(400 * 15));
    }

    #[test]
    fn no_specs_means_no_extension() {
        let plan = resolve_warmup(&[], &tf_map(), start());
        assert_eq!(plan.load_start_extended, start());
        assert_eq!(plan.max_bars(), 0);
    }

    #[test]
    fn role_max_over_multiple_specs() {
        let specs = vec![
            IndicatorSpec::new(Role::Exec, "rsi", IndicatorKind::Rsi { period: 14 }),
            IndicatorSpec::new(Role::Exec, "atr", IndicatorKind::Atr { period: 20 }),
        ];
        let plan = resolve_warmup(&specs, &tf_map(), start());
        assert_eq!(plan.bars_for(Role::Exec), 20);
    }
}
