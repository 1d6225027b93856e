//! Liquidation math and drawdown tracking.

use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::trade::Side;

/// Isolated-margin liquidation price (Bybit USDT-perp).
///
/// - long:  `entry * (1 - 1/leverage + mmr)`
/// - short: `entry * (1 + 1/leverage - mmr)`
pub fn liquidation_price(entry_price: f64, leverage: f64, mmr: f64, side: Side) -> f64 {
    match side {
        Side::Long => entry_price * (1.0 - 1.0 / leverage + mmr),
        Side::Short => entry_price * (1.0 + 1.0 / leverage - mmr),
    }
}

/// True when the side-adverse extreme of a 1m bar touches the liquidation
/// price.
pub fn bar_touches_liquidation(bar: &Bar, liq_price: f64, side: Side) -> bool {
    match side {
        Side::Long => bar.low <= liq_price,
        Side::Short => bar.high >= liq_price,
    }
}

/// Tracks peak equity and the running maximum drawdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownTracker {
    pub peak: f64,
    pub max_dd_abs: f64,
    pub max_dd_pct: f64,
}

impl DrawdownTracker {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            peak: initial_equity,
            max_dd_abs: 0.0,
            max_dd_pct: 0.0,
        }
    }

    /// Fold one equity observation in; returns the current drawdown
    /// `(abs, pct)` from peak.
    pub fn observe(&mut self, equity: f64) -> (f64, f64) {
        if equity > self.peak {
            self.peak = equity;
        }
        let dd_abs = self.peak - equity;
        let dd_pct = if self.peak > 0.0 { dd_abs / self.peak } else { 0.0 };
        if dd_abs > self.max_dd_abs {
            self.max_dd_abs = dd_abs;
        }
        if dd_pct > self.max_dd_pct {
            self.max_dd_pct = dd_pct;
        }
        (dd_abs, dd_pct)
    }

    /// True when drawdown from peak has reached `limit_pct` percent.
    pub fn breaches(&self, equity: f64, limit_pct: f64) -> bool {
        if self.peak <= 0.0 {
            return false;
        }
        (self.peak - equity) / self.peak * 100.0 >= limit_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn liq_price_long_short_symmetry() {
        let long = liquidation_price(50_000.0, 10.0, 0.005, Side::Long);
        let short = liquidation_price(50_000.0, 10.0, 0.005, Side::Short);
        // 1/10 - 0.005 = 9.5% either side of entry.
        assert!((long - 45_250.0).abs() < 1e-9);
        assert!((short - 54_750.0).abs() < 1e-9);
    }

    #[test]
    fn touch_detection_uses_adverse_extreme() {
        let open = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bar = Bar::new(open, open + Duration::minutes(1), 100.0, 101.0, 95.0, 99.0, 1.0);
        assert!(bar_touches_liquidation(&bar, 95.5, Side::Long));
        assert!(!bar_touches_liquidation(&bar, 94.0, Side::Long));
        assert!(!bar_touches_liquidation(&bar, 102.0, Side::Short));
        assert!(bar_touches_liquidation(&bar, 100.5, Side::Short));
    }

    #[test]
    fn drawdown_tracks_peak() {
        let mut dd = DrawdownTracker::new(100.0);
        dd.observe(110.0);
        let (abs, pct) = dd.observe(99.0);
        assert!((abs - 11.0).abs() < 1e-12);
        assert!((pct - 0.1).abs() < 1e-12);
        assert!((dd.max_dd_abs - 11.0).abs() < 1e-12);
    }

    #[test]
    fn drawdown_breach_at_limit() {
        let mut dd = DrawdownTracker::new(100.0);
        dd.observe(100.0);
        assert!(!dd.breaches(96.0, 5.0));
        assert!(dd.breaches(95.0, 5.0));
        assert!(dd.breaches(90.0, 5.0));
    }
}
