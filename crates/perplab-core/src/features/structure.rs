//! Market structure detection: swing pivots, supply/demand zones, and
//! fibonacci retracements.
//!
//! Pivots live in an arena indexed by insertion order; zones reference
//! pivots by index and carry `confirmed_at_bar`. A pivot at bar N with
//! `right` confirmation bars becomes observable only at bar `N + right`
//! (no-lookahead invariant).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bar::Bar;

/// Pivot kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotKind {
    High,
    Low,
}

/// A confirmed swing pivot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub kind: PivotKind,
    /// Bar index (within this role's stream) at which the extreme printed.
    pub bar_index: u64,
    pub ts_open: DateTime<Utc>,
    pub price: f64,
    /// Bar index at which the pivot became observable.
    pub confirmed_at_bar: u64,
    /// The pivot bar's body edge toward the extreme, used as the inner
    /// boundary of derived zones.
    pub body_edge: f64,
}

/// Arena index of a pivot.
pub type PivotIndex = usize;

/// A supply or demand zone anchored to a confirmed pivot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub pivot: PivotIndex,
    pub upper: f64,
    pub lower: f64,
    pub confirmed_at_bar: u64,
}

/// Streaming swing pivot detector for one pivot kind.
///
/// A bar is a pivot high when its high strictly exceeds the highs of the
/// `left` bars before it and the `right` bars after it (symmetric for
/// lows). Detection requires the full right side, so confirmation lags by
/// `right` bars.
#[derive(Debug, Clone)]
pub struct PivotDetector {
    kind: PivotKind,
    left: usize,
    right: usize,
    window: VecDeque<(u64, Bar)>,
    pivots: Vec<Pivot>,
    bar_count: u64,
}

impl PivotDetector {
    pub fn new(kind: PivotKind, left: usize, right: usize) -> Self {
        Self {
            kind,
            left,
            right,
            window: VecDeque::with_capacity(left + right + 2),
            pivots: Vec::new(),
            bar_count: 0,
        }
    }

    /// Bars needed before the first pivot can confirm.
    pub fn warmup_bars(&self) -> usize {
        self.left + self.right + 1
    }

    fn extreme(&self, bar: &Bar) -> f64 {
        match self.kind {
            PivotKind::High => bar.high,
            PivotKind::Low => bar.low,
        }
    }

    /// Advance by one closed bar. Returns the arena index of a newly
    /// confirmed pivot, if any.
    pub fn update(&mut self, bar: &Bar) -> Option<PivotIndex> {
        let current_index = self.bar_count;
        self.bar_count += 1;
        self.window.push_back((current_index, *bar));
        while self.window.len() > self.left + self.right + 1 {
            self.window.pop_front();
        }
        if self.window.len() < self.left + self.right + 1 {
            return None;
        }

        // Candidate sits `right` bars back from the newest.
        let candidate_pos = self.window.len() - 1 - self.right;
        let (candidate_index, candidate) = self.window[candidate_pos];
        let candidate_extreme = self.extreme(&candidate);

        let beats = |other: f64| match self.kind {
            PivotKind::High => candidate_extreme > other,
            PivotKind::Low => candidate_extreme < other,
        };

        for (pos, (_, other)) in self.window.iter().enumerate() {
            if pos == candidate_pos {
                continue;
            }
            if !beats(self.extreme(other)) {
                return None;
            }
        }

        let body_edge = match self.kind {
            PivotKind::High => candidate.open.max(candidate.close),
            PivotKind::Low => candidate.open.min(candidate.close),
        };
        self.pivots.push(Pivot {
            kind: self.kind,
            bar_index: candidate_index,
            ts_open: candidate.ts_open,
            price: candidate_extreme,
            confirmed_at_bar: current_index,
            body_edge,
        });
        Some(self.pivots.len() - 1)
    }

    pub fn pivots(&self) -> &[Pivot] {
        &self.pivots
    }

    /// The most recently confirmed pivot.
    pub fn last_confirmed(&self) -> Option<&Pivot> {
        self.pivots.last()
    }
}

/// Streaming zone detector. A demand zone spans from a confirmed pivot
/// low's wick to its body edge; a supply zone spans from the body edge to
/// the pivot high's wick.
#[derive(Debug, Clone)]
pub struct ZoneDetector {
    detector: PivotDetector,
    zones: Vec<Zone>,
}

impl ZoneDetector {
    pub fn demand(left: usize, right: usize) -> Self {
        Self {
            detector: PivotDetector::new(PivotKind::Low, left, right),
            zones: Vec::new(),
        }
    }

    pub fn supply(left: usize, right: usize) -> Self {
        Self {
            detector: PivotDetector::new(PivotKind::High, left, right),
            zones: Vec::new(),
        }
    }

    pub fn warmup_bars(&self) -> usize {
        self.detector.warmup_bars()
    }

    pub fn update(&mut self, bar: &Bar) -> Option<&Zone> {
        if let Some(pivot_idx) = self.detector.update(bar) {
            let pivot = self.detector.pivots()[pivot_idx];
            let (upper, lower) = match pivot.kind {
                PivotKind::Low => (pivot.body_edge, pivot.price),
                PivotKind::High => (pivot.price, pivot.body_edge),
            };
            self.zones.push(Zone {
                pivot: pivot_idx,
                upper,
                lower,
                confirmed_at_bar: pivot.confirmed_at_bar,
            });
        }
        self.zones.last()
    }

    pub fn last_zone(&self) -> Option<&Zone> {
        self.zones.last()
    }
}

/// Fibonacci retracement levels between the last confirmed swing low and
/// swing high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibLevels {
    pub level_382: f64,
    pub level_500: f64,
    pub level_618: f64,
}

/// Tracks both pivot kinds and derives retracement levels of the most
/// recent completed swing leg.
#[derive(Debug, Clone)]
pub struct FibRetracement {
    highs: PivotDetector,
    lows: PivotDetector,
}

impl FibRetracement {
    pub fn new(left: usize, right: usize) -> Self {
        Self {
            highs: PivotDetector::new(PivotKind::High, left, right),
            lows: PivotDetector::new(PivotKind::Low, left, right),
        }
    }

    /// Two pivots must confirm before levels exist.
    pub fn warmup_bars(&self) -> usize {
        2 * self.highs.warmup_bars()
    }

    pub fn update(&mut self, bar: &Bar) -> Option<FibLevels> {
        self.highs.update(bar);
        self.lows.update(bar);
        self.levels()
    }

    /// Retracement of the leg from the older pivot to the newer one.
    /// Levels measure pullback from the leg's end toward its start.
    pub fn levels(&self) -> Option<FibLevels> {
        let high = self.highs.last_confirmed()?;
        let low = self.lows.last_confirmed()?;
        let range = high.price - low.price;
        if range <= 0.0 {
            return None;
        }

        // Up-leg (low then high): retrace down from the high.
        // Down-leg (high then low): retrace up from the low.
        let up_leg = low.bar_index < high.bar_index;
        let level = |ratio: f64| {
            if up_leg {
                high.price - range * ratio
            } else {
                low.price + range * ratio
            }
        };
        Some(FibLevels {
            level_382: level(0.382),
            level_500: level(0.5),
            level_618: level(0.618),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_ohlc(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| {
                let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::minutes(15 * i as i64);
                Bar::new(open, open + Duration::minutes(15), o, h, l, c, 100.0)
            })
            .collect()
    }

    #[test]
    fn pivot_high_confirms_after_right_bars() {
        // Peak at index 2 (high 110); left=2, right=2 -> confirm at index 4.
        let bars = bars_from_ohlc(&[
            (100.0, 102.0, 99.0, 101.0),
            (101.0, 104.0, 100.0, 103.0),
            (103.0, 110.0, 102.0, 108.0),
            (108.0, 109.0, 104.0, 105.0),
            (105.0, 106.0, 101.0, 102.0),
        ]);
        let mut detector = PivotDetector::new(PivotKind::High, 2, 2);
        let mut confirmed_at = None;
        for (i, bar) in bars.iter().enumerate() {
            if detector.update(bar).is_some() {
                confirmed_at = Some(i);
            }
        }
        assert_eq!(confirmed_at, Some(4));
        let pivot = detector.last_confirmed().unwrap();
        assert_eq!(pivot.bar_index, 2);
        assert_eq!(pivot.price, 110.0);
        assert_eq!(pivot.confirmed_at_bar, 4);
        // No-lookahead: confirmation index is pivot index + right bars.
        assert_eq!(pivot.confirmed_at_bar, pivot.bar_index + 2);
    }

    #[test]
    fn no_pivot_without_strict_extreme() {
        // Flat highs: no bar strictly exceeds its neighbors.
        let bars = bars_from_ohlc(&[
            (100.0, 105.0, 99.0, 101.0),
            (101.0, 105.0, 100.0, 102.0),
            (102.0, 105.0, 101.0, 103.0),
            (103.0, 105.0, 102.0, 104.0),
            (104.0, 105.0, 103.0, 104.5),
        ]);
        let mut detector = PivotDetector::new(PivotKind::High, 2, 2);
        for bar in &bars {
            assert!(detector.update(bar).is_none());
        }
    }

    #[test]
    fn demand_zone_from_pivot_low() {
        // Trough at index 2: low 90, body min(open, close) = 94.
        let bars = bars_from_ohlc(&[
            (100.0, 102.0, 98.0, 99.0),
            (99.0, 100.0, 96.0, 97.0),
            (97.0, 98.0, 90.0, 94.0),
            (94.0, 99.0, 93.0, 98.0),
            (98.0, 103.0, 97.0, 102.0),
        ]);
        let mut zones = ZoneDetector::demand(2, 2);
        let mut last = None;
        for bar in &bars {
            last = zones.update(bar).copied();
        }
        let zone = last.unwrap();
        assert_eq!(zone.lower, 90.0);
        assert_eq!(zone.upper, 94.0);
        assert_eq!(zone.confirmed_at_bar, 4);
    }

    #[test]
    fn fib_levels_for_up_leg() {
        // Low pivot (90) at index 2, then high pivot (110) at index 6.
        let bars = bars_from_ohlc(&[
            (100.0, 101.0, 95.0, 96.0),
            (96.0, 97.0, 92.0, 93.0),
            (93.0, 94.0, 90.0, 91.0),
            (91.0, 97.0, 91.0, 96.0),
            (96.0, 101.0, 95.0, 100.0),
            (100.0, 105.0, 99.0, 104.0),
            (104.0, 110.0, 103.0, 108.0),
            (108.0, 109.0, 102.0, 103.0),
            (103.0, 104.0, 100.0, 101.0),
        ]);
        let mut fib = FibRetracement::new(2, 2);
        let mut levels = None;
        for bar in &bars {
            if let Some(l) = fib.update(bar) {
                levels = Some(l);
            }
        }
        let levels = levels.unwrap();
        // Up leg 90 -> 110, range 20: 0.382 retrace = 110 - 7.64.
        assert!((levels.level_382 - 102.36).abs() < 1e-9);
        assert!((levels.level_500 - 100.0).abs() < 1e-9);
        assert!((levels.level_618 - 97.64).abs() < 1e-9);
    }
}
