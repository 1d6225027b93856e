//! Data health gate for backtest preflight.
//!
//! Validates coverage, gap-freeness, and sanity of the loaded series before
//! a run starts. The gate never modifies data; when it fails, the caller
//! may repair and re-run it a bounded number of times before the engine
//! refuses to start.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bar::{Bar, FUNDING_INTERVAL_HOURS};
use crate::timeframe::Timeframe;

/// Data series kinds the gate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Ohlcv,
    Funding,
    OpenInterest,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Ohlcv => "ohlcv",
            SeriesKind::Funding => "funding",
            SeriesKind::OpenInterest => "open_interest",
        }
    }
}

/// A contiguous range of missing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tf: Timeframe,
    pub series: SeriesKind,
    /// Estimated missing bars in the range.
    pub missing_count: usize,
}

/// Coverage information for a single series/TF pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageInfo {
    pub series: SeriesKind,
    pub tf: Timeframe,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub bar_count: usize,
    pub covers_start: bool,
    pub covers_end: bool,
}

/// A data sanity issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityIssue {
    pub timestamp: DateTime<Utc>,
    pub series: SeriesKind,
    pub tf: Timeframe,
    pub issue_type: String,
    pub detail: String,
}

/// Complete data health report for one preflight pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub load_start: DateTime<Utc>,
    pub load_end: DateTime<Utc>,
    pub required_tfs: Vec<Timeframe>,
    pub required_series: Vec<SeriesKind>,
    pub symbol: String,

    pub passed: bool,
    pub coverage: BTreeMap<String, CoverageInfo>,
    pub coverage_issues: Vec<String>,
    pub gaps: Vec<GapRange>,
    pub total_missing_bars: usize,
    pub sanity_issues: Vec<SanityIssue>,

    /// True when gaps or coverage issues exist; the ranges a sync tool
    /// would need to backfill are in `gaps`.
    pub repair_required: bool,
}

impl HealthReport {
    pub fn issue_count(&self) -> usize {
        self.coverage_issues.len() + self.gaps.len() + self.sanity_issues.len()
    }
}

/// Validates data health for one backtest window.
#[derive(Debug, Clone)]
pub struct DataHealthCheck {
    load_start: DateTime<Utc>,
    load_end: DateTime<Utc>,
    required_tfs: Vec<Timeframe>,
    required_series: Vec<SeriesKind>,
    symbol: String,
}

impl DataHealthCheck {
    pub fn new(
        load_start: DateTime<Utc>,
        load_end: DateTime<Utc>,
        required_tfs: Vec<Timeframe>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            load_start,
            load_end,
            required_tfs,
            required_series: vec![SeriesKind::Ohlcv, SeriesKind::Funding],
            symbol: symbol.into(),
        }
    }

    pub fn with_required_series(mut self, series: Vec<SeriesKind>) -> Self {
        self.required_series = series;
        self
    }

    /// Coverage tolerance for a series. Funding only occurs at fixed 8h
    /// boundaries, so it gets an 8h allowance at both window edges.
    fn tolerance(series: SeriesKind) -> Duration {
        match series {
            SeriesKind::Funding => Duration::hours(FUNDING_INTERVAL_HOURS),
            _ => Duration::zero(),
        }
    }

    /// Check coverage for each required TF of one series.
    pub fn check_coverage(
        &self,
        timestamps_by_tf: &BTreeMap<Timeframe, Vec<DateTime<Utc>>>,
        series: SeriesKind,
    ) -> (BTreeMap<String, CoverageInfo>, Vec<String>) {
        let mut coverage = BTreeMap::new();
        let mut issues = Vec::new();
        let tolerance = Self::tolerance(series);

        let tfs: Vec<Timeframe> = if series == SeriesKind::Ohlcv {
            self.required_tfs.clone()
        } else {
            // Funding/OI are not per-TF series; track them once.
            vec![Timeframe::H1]
        };

        for tf in tfs {
            // OHLCV timestamps are bar opens and bars are right-open, so a
            // series covering through load_end has its last open one step
            // earlier.
            let end_slack = match series {
                SeriesKind::Ohlcv => tf.step(),
                _ => tolerance,
            };
            let timestamps = timestamps_by_tf.get(&tf).cloned().unwrap_or_default();
            let info = if timestamps.is_empty() {
                issues.push(format!("No data for {}/{}", series.as_str(), tf));
                CoverageInfo {
                    series,
                    tf,
                    earliest: None,
                    latest: None,
                    bar_count: 0,
                    covers_start: false,
                    covers_end: false,
                }
            } else {
                let earliest = *timestamps.iter().min().expect("non-empty");
                let latest = *timestamps.iter().max().expect("non-empty");
                let covers_start = earliest <= self.load_start + tolerance;
                let covers_end = latest >= self.load_end - end_slack;
                if !covers_start {
                    issues.push(format!(
                        "{}/{} starts at {}, need {}",
                        series.as_str(),
                        tf,
                        earliest,
                        self.load_start
                    ));
                }
                if !covers_end {
                    issues.push(format!(
                        "{}/{} ends at {}, need {}",
                        series.as_str(),
                        tf,
                        latest,
                        self.load_end
                    ));
                }
                CoverageInfo {
                    series,
                    tf,
                    earliest: Some(earliest),
                    latest: Some(latest),
                    bar_count: timestamps.len(),
                    covers_start,
                    covers_end,
                }
            };
            coverage.insert(format!("{}/{}", series.as_str(), tf), info);
        }

        (coverage, issues)
    }

    /// Detect gaps in OHLCV coverage within `[load_start, load_end]`.
    /// Head and tail gaps against the window edges are reported too.
    pub fn detect_gaps(
        &self,
        timestamps_by_tf: &BTreeMap<Timeframe, Vec<DateTime<Utc>>>,
        series: SeriesKind,
    ) -> Vec<GapRange> {
        let mut gaps = Vec::new();

        for &tf in &self.required_tfs {
            let step = tf.step();
            let missing_in = |start: DateTime<Utc>, end: DateTime<Utc>| -> usize {
                ((end - start).num_seconds() / step.num_seconds()).max(0) as usize
            };

            let mut relevant: Vec<DateTime<Utc>> = timestamps_by_tf
                .get(&tf)
                .map(|ts| {
                    ts.iter()
                        .copied()
                        .filter(|t| *t >= self.load_start && *t <= self.load_end)
                        .collect()
                })
                .unwrap_or_default();
            relevant.sort();

            if relevant.is_empty() {
                let missing = missing_in(self.load_start, self.load_end);
                if missing > 0 {
                    gaps.push(GapRange {
                        start: self.load_start,
                        end: self.load_end,
                        tf,
                        series,
                        missing_count: missing,
                    });
                }
                continue;
            }

            // Head gap.
            let first = relevant[0];
            if first > self.load_start {
                let missing = missing_in(self.load_start, first);
                if missing > 0 {
                    gaps.push(GapRange {
                        start: self.load_start,
                        end: first,
                        tf,
                        series,
                        missing_count: missing,
                    });
                }
            }

            // Interior gaps: any delta beyond one step.
            for pair in relevant.windows(2) {
                let expected_next = pair[0] + step;
                if pair[1] > expected_next {
                    let missing = missing_in(expected_next, pair[1]);
                    if missing > 0 {
                        gaps.push(GapRange {
                            start: expected_next,
                            end: pair[1],
                            tf,
                            series,
                            missing_count: missing,
                        });
                    }
                }
            }

            // Tail gap.
            let last = *relevant.last().expect("non-empty");
            if last < self.load_end {
                let gap_start = last + step;
                let missing = missing_in(gap_start, self.load_end);
                if missing > 0 {
                    gaps.push(GapRange {
                        start: gap_start,
                        end: self.load_end,
                        tf,
                        series,
                        missing_count: missing,
                    });
                }
            }
        }

        gaps
    }

    /// Per-bar sanity: OHLC invariants, NaN, negative volume.
    pub fn check_sanity(&self, bars: &[Bar], tf: Timeframe) -> Vec<SanityIssue> {
        let mut issues = Vec::new();

        for bar in bars {
            let vals = [
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
                ("close", bar.close),
            ];
            let mut has_nan = false;
            for (name, val) in vals {
                if !val.is_finite() {
                    has_nan = true;
                    issues.push(SanityIssue {
                        timestamp: bar.ts_open,
                        series: SeriesKind::Ohlcv,
                        tf,
                        issue_type: "nan_value".to_string(),
                        detail: format!("{name} is NaN/Inf"),
                    });
                }
            }
            if has_nan {
                continue;
            }

            if bar.high < bar.low {
                issues.push(SanityIssue {
                    timestamp: bar.ts_open,
                    series: SeriesKind::Ohlcv,
                    tf,
                    issue_type: "high_lt_low".to_string(),
                    detail: format!("high ({}) < low ({})", bar.high, bar.low),
                });
            }
            if bar.high < bar.open.max(bar.close) || bar.low > bar.open.min(bar.close) {
                issues.push(SanityIssue {
                    timestamp: bar.ts_open,
                    series: SeriesKind::Ohlcv,
                    tf,
                    issue_type: "ohlc_range".to_string(),
                    detail: format!(
                        "OHLC out of range: O={} H={} L={} C={}",
                        bar.open, bar.high, bar.low, bar.close
                    ),
                });
            }
            if bar.volume < 0.0 {
                issues.push(SanityIssue {
                    timestamp: bar.ts_open,
                    series: SeriesKind::Ohlcv,
                    tf,
                    issue_type: "negative_volume".to_string(),
                    detail: format!("volume ({}) < 0", bar.volume),
                });
            }
        }

        issues
    }

    /// Run the full gate over timestamps (per series per TF) and bar data.
    pub fn run(
        &self,
        timestamps_by_series_tf: &BTreeMap<SeriesKind, BTreeMap<Timeframe, Vec<DateTime<Utc>>>>,
        bars_by_tf: &BTreeMap<Timeframe, Vec<Bar>>,
    ) -> HealthReport {
        let mut report = HealthReport {
            load_start: self.load_start,
            load_end: self.load_end,
            required_tfs: self.required_tfs.clone(),
            required_series: self.required_series.clone(),
            symbol: self.symbol.clone(),
            passed: false,
            coverage: BTreeMap::new(),
            coverage_issues: Vec::new(),
            gaps: Vec::new(),
            total_missing_bars: 0,
            sanity_issues: Vec::new(),
            repair_required: false,
        };

        let empty = BTreeMap::new();
        for &series in &self.required_series {
            let ts_by_tf = timestamps_by_series_tf.get(&series).unwrap_or(&empty);

            let (coverage, issues) = self.check_coverage(ts_by_tf, series);
            report.coverage.extend(coverage);
            report.coverage_issues.extend(issues);

            // Gap detection applies only to OHLCV; funding tolerates its
            // native 8h spacing.
            if series == SeriesKind::Ohlcv {
                report.gaps.extend(self.detect_gaps(ts_by_tf, series));
            }
        }

        for (&tf, bars) in bars_by_tf {
            report.sanity_issues.extend(self.check_sanity(bars, tf));
        }

        report.total_missing_bars = report.gaps.iter().map(|g| g.missing_count).sum();
        report.repair_required = !report.gaps.is_empty() || !report.coverage_issues.is_empty();
        report.passed = !report.repair_required && report.sanity_issues.is_empty();

        tracing::debug!(
            symbol = %self.symbol,
            passed = report.passed,
            gaps = report.gaps.len(),
            missing_bars = report.total_missing_bars,
            coverage_issues = report.coverage_issues.len(),
            sanity_issues = report.sanity_issues.len(),
            "data health gate evaluated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, mi, 0).unwrap()
    }

    fn checker(start: DateTime<Utc>, end: DateTime<Utc>) -> DataHealthCheck {
        DataHealthCheck::new(start, end, vec![Timeframe::M15], "BTCUSDT")
            .with_required_series(vec![SeriesKind::Ohlcv])
    }

    fn m15_timestamps(from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        (0..count).map(|i| from + Duration::minutes(15 * i as i64)).collect()
    }

    #[test]
    fn clean_window_passes() {
        let start = ts(0, 0);
        let end = ts(1, 0);
        let mut by_tf = BTreeMap::new();
        by_tf.insert(Timeframe::M15, m15_timestamps(start, 5));
        let mut by_series = BTreeMap::new();
        by_series.insert(SeriesKind::Ohlcv, by_tf);

        let report = checker(start, end).run(&by_series, &BTreeMap::new());
        assert!(report.passed, "issues: {:?}", report.coverage_issues);
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn interior_gap_detected() {
        let start = ts(0, 0);
        let end = ts(1, 30);
        // 00:00, 00:15, [missing 00:30, 00:45], 01:00, 01:15, 01:30
        let mut stamps = m15_timestamps(start, 2);
        stamps.extend(m15_timestamps(ts(1, 0), 3));
        let mut by_tf = BTreeMap::new();
        by_tf.insert(Timeframe::M15, stamps);
        let mut by_series = BTreeMap::new();
        by_series.insert(SeriesKind::Ohlcv, by_tf);

        let report = checker(start, end).run(&by_series, &BTreeMap::new());
        assert!(!report.passed);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].start, ts(0, 30));
        assert_eq!(report.gaps[0].end, ts(1, 0));
        assert_eq!(report.gaps[0].missing_count, 2);
        assert!(report.repair_required);
    }

    #[test]
    fn head_and_tail_gaps_detected() {
        let start = ts(0, 0);
        let end = ts(2, 0);
        let mut by_tf = BTreeMap::new();
        by_tf.insert(Timeframe::M15, m15_timestamps(ts(0, 30), 4)); // 00:30..01:15
        let mut by_series = BTreeMap::new();
        by_series.insert(SeriesKind::Ohlcv, by_tf);

        let report = checker(start, end).run(&by_series, &BTreeMap::new());
        assert_eq!(report.gaps.len(), 2);
        assert_eq!(report.gaps[0].start, start); // head
        assert_eq!(report.gaps[1].end, end); // tail
    }

    #[test]
    fn coverage_issue_when_series_missing() {
        let start = ts(0, 0);
        let end = ts(1, 0);
        let report = checker(start, end).run(&BTreeMap::new(), &BTreeMap::new());
        assert!(!report.passed);
        assert!(!report.coverage_issues.is_empty());
    }

    #[test]
    fn funding_gets_8h_tolerance() {
        let start = ts(0, 0);
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let check = DataHealthCheck::new(start, end, vec![Timeframe::M15], "BTCUSDT");

        // Funding latest observation 8h before load_end still covers.
        let mut by_tf = BTreeMap::new();
        by_tf.insert(
            Timeframe::H1,
            vec![ts(0, 0), ts(8, 0), ts(16, 0)],
        );
        let (_, issues) = check.check_coverage(&by_tf, SeriesKind::Funding);
        assert!(issues.is_empty(), "unexpected: {issues:?}");
    }

    #[test]
    fn sanity_issues_fail_the_gate() {
        let start = ts(0, 0);
        let end = ts(0, 45);
        let mut by_tf = BTreeMap::new();
        by_tf.insert(Timeframe::M15, m15_timestamps(start, 4));
        let mut by_series = BTreeMap::new();
        by_series.insert(SeriesKind::Ohlcv, by_tf);

        let bad = Bar::new(
            ts(0, 15),
            ts(0, 30),
            100.0,
            99.0, // high < open
            98.0,
            100.0,
            10.0,
        );
        let mut bars_by_tf = BTreeMap::new();
        bars_by_tf.insert(Timeframe::M15, vec![bad]);

        let report = checker(start, end).run(&by_series, &bars_by_tf);
        assert!(!report.passed);
        assert_eq!(report.sanity_issues.len(), 1);
        assert_eq!(report.sanity_issues[0].issue_type, "ohlc_range");
        // Sanity alone does not mark repair_required; there is nothing to sync.
        assert!(!report.repair_required);
    }
}
