//! Timeframe algebra: parsing, bar steps, alignment, close enumeration.
//!
//! Key invariant: for any finer TF `a` and coarser TF `b` whose step is a
//! multiple of `a`'s, every bar close of `b` lands on a bar close of `a`.
//! Weekly bars anchor to ISO Monday 00:00 UTC; monthly bars anchor to the
//! first of the calendar month 00:00 UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PerpLabError;

/// Canonical closed set of supported timeframes, ordered by duration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
    Mo1,
}

impl Timeframe {
    /// All supported timeframes in ascending duration order.
    pub const ALL: [Timeframe; 13] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    /// Canonical string form (matches the wire/config spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "D",
            Timeframe::W1 => "W",
            Timeframe::Mo1 => "M",
        }
    }

    /// Bar step duration. Monthly uses a nominal 30 days; alignment and
    /// close enumeration for monthly bars are calendar-exact instead.
    pub fn step(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M3 => Duration::minutes(3),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H2 => Duration::hours(2),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::H6 => Duration::hours(6),
            Timeframe::H12 => Duration::hours(12),
            Timeframe::D1 => Duration::days(1),
            Timeframe::W1 => Duration::days(7),
            Timeframe::Mo1 => Duration::days(30),
        }
    }

    /// Approximate bars per year for annualization (crypto markets trade
    /// ~365 days).
    pub fn bars_per_year(&self) -> u32 {
        match self {
            Timeframe::M1 => 525_600,
            Timeframe::M3 => 175_200,
            Timeframe::M5 => 105_120,
            Timeframe::M15 => 35_040,
            Timeframe::M30 => 17_520,
            Timeframe::H1 => 8_760,
            Timeframe::H2 => 4_380,
            Timeframe::H4 => 2_190,
            Timeframe::H6 => 1_460,
            Timeframe::H12 => 730,
            Timeframe::D1 => 365,
            Timeframe::W1 => 52,
            Timeframe::Mo1 => 12,
        }
    }

    /// Align a timestamp down to the containing bar's open. Idempotent.
    pub fn align_down(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::W1 => {
                let day = ts.date_naive() - Duration::days(ts.weekday().num_days_from_monday() as i64);
                Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight is valid"))
            }
            Timeframe::Mo1 => Utc
                .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
                .single()
                .expect("first of month is valid"),
            _ => {
                let step = self.step().num_seconds();
                let secs = ts.timestamp();
                let aligned = secs - secs.rem_euclid(step);
                Utc.timestamp_opt(aligned, 0).single().expect("aligned ts is valid")
            }
        }
    }

    /// Advance an aligned timestamp by one bar step (calendar-exact for
    /// monthly).
    pub fn advance(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Mo1 => ts
                .checked_add_months(Months::new(1))
                .expect("month add in supported range"),
            _ => ts + self.step(),
        }
    }

    /// True when `ts` is a bar boundary (a close of one bar and the open of
    /// the next) for this timeframe.
    pub fn is_close_of(&self, ts: DateTime<Utc>) -> bool {
        ts.nanosecond() == 0 && self.align_down(ts) == ts
    }

    /// Enumerate all bar closes in `[start, end]`, ascending.
    pub fn closes_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut closes = Vec::new();
        let mut close = self.align_down(start);
        if close < start {
            close = self.advance(close);
        }
        while close <= end {
            closes.push(close);
            close = self.advance(close);
        }
        closes
    }

    /// True when every bar close of `self` lands on a bar close of `finer`.
    pub fn aligns_with(&self, finer: Timeframe) -> bool {
        if finer > *self {
            return false;
        }
        match (self, finer) {
            // Calendar TFs align with any fixed TF that divides a day.
            (Timeframe::W1 | Timeframe::Mo1, f) => {
                Duration::days(1).num_seconds() % f.step().num_seconds() == 0
            }
            (s, f) => s.step().num_seconds() % f.step().num_seconds() == 0,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = PerpLabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .find(|tf| tf.as_str() == s)
            .copied()
            .ok_or_else(|| PerpLabError::UnknownTimeframe(s.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = PerpLabError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> String {
        tf.as_str().to_string()
    }
}

/// Role a timeframe plays in a multi-TF strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Exec,
    Mtf,
    Htf,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Exec, Role::Mtf, Role::Htf];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Exec => "exec",
            Role::Mtf => "mtf",
            Role::Htf => "htf",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parse_roundtrip_all() {
        for tf in Timeframe::ALL {
            let parsed: Timeframe = tf.as_str().parse().unwrap();
            assert_eq!(parsed, tf);
        }
    }

    #[test]
    fn parse_unknown_is_error() {
        let err = "7m".parse::<Timeframe>().unwrap_err();
        assert_eq!(err.kind(), "unknown_timeframe");
    }

    #[test]
    fn ordering_by_duration() {
        assert!(Timeframe::M1 < Timeframe::M15);
        assert!(Timeframe::H4 < Timeframe::D1);
        assert!(Timeframe::W1 < Timeframe::Mo1);
    }

    #[test]
    fn align_down_fixed_tf() {
        let t = ts(2024, 3, 5, 10, 47);
        assert_eq!(Timeframe::M15.align_down(t), ts(2024, 3, 5, 10, 45));
        assert_eq!(Timeframe::H4.align_down(t), ts(2024, 3, 5, 8, 0));
        assert_eq!(Timeframe::D1.align_down(t), ts(2024, 3, 5, 0, 0));
    }

    #[test]
    fn align_down_is_idempotent() {
        let t = ts(2024, 3, 5, 10, 47);
        for tf in Timeframe::ALL {
            let once = tf.align_down(t);
            assert_eq!(tf.align_down(once), once, "{tf} not idempotent");
        }
    }

    #[test]
    fn align_down_week_anchors_monday() {
        // 2024-03-05 is a Tuesday; the ISO week starts Monday 2024-03-04.
        let t = ts(2024, 3, 5, 10, 47);
        assert_eq!(Timeframe::W1.align_down(t), ts(2024, 3, 4, 0, 0));
        // A Monday midnight aligns to itself.
        assert_eq!(Timeframe::W1.align_down(ts(2024, 3, 4, 0, 0)), ts(2024, 3, 4, 0, 0));
    }

    #[test]
    fn align_down_month_anchors_first() {
        let t = ts(2024, 2, 29, 23, 59);
        assert_eq!(Timeframe::Mo1.align_down(t), ts(2024, 2, 1, 0, 0));
    }

    #[test]
    fn advance_month_is_calendar_exact() {
        assert_eq!(Timeframe::Mo1.advance(ts(2024, 1, 1, 0, 0)), ts(2024, 2, 1, 0, 0));
        assert_eq!(Timeframe::Mo1.advance(ts(2024, 2, 1, 0, 0)), ts(2024, 3, 1, 0, 0));
    }

    #[test]
    fn closes_between_enumerates_inclusive() {
        let closes = Timeframe::H1.closes_between(ts(2024, 1, 1, 0, 30), ts(2024, 1, 1, 3, 0));
        assert_eq!(
            closes,
            vec![ts(2024, 1, 1, 1, 0), ts(2024, 1, 1, 2, 0), ts(2024, 1, 1, 3, 0)]
        );
    }

    #[test]
    fn closes_between_starts_on_boundary() {
        let closes = Timeframe::H1.closes_between(ts(2024, 1, 1, 1, 0), ts(2024, 1, 1, 2, 0));
        assert_eq!(closes, vec![ts(2024, 1, 1, 1, 0), ts(2024, 1, 1, 2, 0)]);
    }

    #[test]
    fn is_close_of_matches_alignment() {
        assert!(Timeframe::M15.is_close_of(ts(2024, 1, 1, 10, 45)));
        assert!(!Timeframe::M15.is_close_of(ts(2024, 1, 1, 10, 44)));
        assert!(Timeframe::W1.is_close_of(ts(2024, 3, 4, 0, 0)));
    }

    #[test]
    fn coarser_tfs_align_with_finer() {
        assert!(Timeframe::H4.aligns_with(Timeframe::M15));
        assert!(Timeframe::H1.aligns_with(Timeframe::M1));
        assert!(Timeframe::W1.aligns_with(Timeframe::H1));
        assert!(!Timeframe::M15.aligns_with(Timeframe::H1));
    }

    #[test]
    fn bars_per_year_table() {
        assert_eq!(Timeframe::H1.bars_per_year(), 8760);
        assert_eq!(Timeframe::M15.bars_per_year(), 35_040);
        assert_eq!(Timeframe::D1.bars_per_year(), 365);
    }
}
