//! Run artifact writers and readers.
//!
//! Layout per run:
//!
//! ```text
//! <root>/<timestamp>/<run_id>/
//!     run_manifest.json      (written once)
//!     events.jsonl           (append-only, one JSON object per line)
//!     trades.parquet         (or .csv in smoke mode)
//!     equity.parquet         (or .csv)
//!     result.json            (summary metrics)
//! ```
//!
//! The event log is the lossless record; the tables are the analysis
//! surface. Writers own their file handles for the run's lifetime and are
//! finalized on every exit path, including drops mid-unwind.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use perplab_core::error::{PerpLabError, Result};
use perplab_core::health::HealthReport;
use perplab_core::metrics::Summary;
use perplab_core::play::Play;
use perplab_core::trade::{EquityPoint, ExitReason, Side, StopClassification, Trade};

/// Semver of the artifact schema. Readers refuse manifests whose major
/// version is ahead of this.
pub const ARTIFACT_VERSION: &str = "1.0.0";

/// Funding bookkeeping convention recorded in the manifest: the trade row
/// is authoritative.
pub const FUNDING_CONVENTION: &str = "trade_row";

const TRADE_COLUMNS: [&str; 18] = [
    "id",
    "symbol",
    "side",
    "entry_ts",
    "entry_bar_index",
    "entry_price",
    "entry_size_usdt",
    "entry_size",
    "exit_ts",
    "exit_bar_index",
    "exit_price",
    "exit_reason",
    "realized_pnl",
    "funding_pnl",
    "fees_paid",
    "net_pnl",
    "stop_loss",
    "take_profit",
];

const EQUITY_COLUMNS: [&str; 4] = ["ts", "equity", "drawdown_abs", "drawdown_pct"];

/// Resolved artifact directory for one run.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub run_dir: PathBuf,
    /// Smoke mode writes CSV tables instead of Parquet.
    pub smoke_mode: bool,
}

impl ArtifactPaths {
    /// Create `<root>/<UTC timestamp>/<run_id>/`.
    pub fn create(root: &Path, run_id: &str, smoke_mode: bool) -> Result<Self> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let run_dir = root.join(stamp).join(run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self { run_dir, smoke_mode })
    }

    /// Use an existing directory directly (tests, verify).
    pub fn at(run_dir: PathBuf, smoke_mode: bool) -> Self {
        Self { run_dir, smoke_mode }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join("run_manifest.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.run_dir.join("events.jsonl")
    }

    pub fn result_path(&self) -> PathBuf {
        self.run_dir.join("result.json")
    }

    pub fn trades_path(&self) -> PathBuf {
        let ext = if self.smoke_mode { "csv" } else { "parquet" };
        self.run_dir.join(format!("trades.{ext}"))
    }

    pub fn equity_path(&self) -> PathBuf {
        let ext = if self.smoke_mode { "csv" } else { "parquet" };
        self.run_dir.join(format!("equity.{ext}"))
    }
}

/// The requested and warmup-extended data windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataWindow {
    pub requested_start: DateTime<Utc>,
    pub requested_end: DateTime<Utc>,
    pub load_start: DateTime<Utc>,
    pub load_end: DateTime<Utc>,
}

/// Health gate summary embedded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub passed: bool,
    pub coverage_issues: Vec<String>,
    pub total_missing_bars: usize,
    pub sanity_issues_count: usize,
}

impl From<&HealthReport> for HealthSummary {
    fn from(report: &HealthReport) -> Self {
        Self {
            passed: report.passed,
            coverage_issues: report.coverage_issues.clone(),
            total_missing_bars: report.total_missing_bars,
            sanity_issues_count: report.sanity_issues.len(),
        }
    }
}

/// Immutable run metadata, written once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub artifact_version: String,
    pub run_id: String,
    pub play_id: String,
    pub symbol: String,
    pub tf_mapping: BTreeMap<String, String>,
    pub config_hash: String,
    /// The full play, embedded so the math audit can re-derive per-trade
    /// expectations without external inputs.
    pub config: Play,
    pub git_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub data_window: DataWindow,
    pub health: HealthSummary,
    pub funding_convention: String,
}

impl RunManifest {
    pub fn new(
        run_id: &str,
        play: &Play,
        data_window: DataWindow,
        health: &HealthReport,
        git_commit: Option<String>,
    ) -> Self {
        let mut tf_mapping = BTreeMap::new();
        tf_mapping.insert("exec".to_string(), play.timeframes.exec.to_string());
        tf_mapping.insert("mtf".to_string(), play.timeframes.mtf.to_string());
        tf_mapping.insert("htf".to_string(), play.timeframes.htf.to_string());

        Self {
            artifact_version: ARTIFACT_VERSION.to_string(),
            run_id: run_id.to_string(),
            play_id: play.id.clone(),
            symbol: play.symbol.clone(),
            tf_mapping,
            config_hash: play.config_hash(),
            config: play.clone(),
            git_commit,
            created_at: Utc::now(),
            data_window,
            health: HealthSummary::from(health),
            funding_convention: FUNDING_CONVENTION.to_string(),
        }
    }

    pub fn write(&self, paths: &ArtifactPaths) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.manifest_path(), json)?;
        Ok(())
    }

    /// Read and version-check a manifest. A major version ahead of this
    /// reader is refused.
    pub fn read(run_dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(run_dir.join("run_manifest.json"))?;
        let manifest: RunManifest = serde_json::from_str(&raw)?;

        let found_major = semver_major(&manifest.artifact_version);
        let supported_major = semver_major(ARTIFACT_VERSION);
        match (found_major, supported_major) {
            (Some(found), Some(supported)) if found <= supported => Ok(manifest),
            _ => Err(PerpLabError::VersionMismatch {
                found: manifest.artifact_version.clone(),
                supported: ARTIFACT_VERSION.to_string(),
            }),
        }
    }
}

fn semver_major(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

/// Append-only JSONL event log with monotonic event ids.
///
/// Finalized with a `log_finished` record carrying `total_events`; the
/// `Drop` impl guarantees finalization on unwind paths.
#[derive(Debug)]
pub struct EventLogWriter {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    event_count: u64,
}

impl EventLogWriter {
    /// Create the log and write the `log_started` header (wall-clock
    /// timestamp; every other event carries simulation time).
    pub fn create(paths: &ArtifactPaths) -> Result<Self> {
        let path = paths.events_path();
        let file = File::create(&path)?;
        let mut log = Self {
            writer: Some(BufWriter::new(file)),
            path,
            event_count: 0,
        };
        log.log("log_started", Utc::now(), serde_json::json!({}))?;
        Ok(log)
    }

    /// Append one event. `data` must be a JSON object; the envelope keys
    /// (`event_type`, `event_id`, `timestamp`) are merged in.
    pub fn log(
        &mut self,
        event_type: &str,
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            PerpLabError::InternalInvariantViolated("event log already finished".to_string())
        })?;

        let mut event = match data {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(PerpLabError::InternalInvariantViolated(format!(
                    "event payload must be an object, got {other}"
                )))
            }
        };
        event.insert("event_type".to_string(), event_type.into());
        event.insert("event_id".to_string(), self.event_count.into());
        event.insert(
            "timestamp".to_string(),
            timestamp.to_rfc3339_opts(SecondsFormat::Secs, true).into(),
        );

        serde_json::to_writer(&mut *writer, &serde_json::Value::Object(event))?;
        writer.write_all(b"\n")?;
        self.event_count += 1;
        Ok(())
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the trailing `log_finished` record and close the file.
    pub fn finish(&mut self) -> Result<()> {
        if self.writer.is_some() {
            let total = self.event_count;
            self.log(
                "log_finished",
                Utc::now(),
                serde_json::json!({ "total_events": total }),
            )?;
            if let Some(mut writer) = self.writer.take() {
                writer.flush()?;
            }
        }
        Ok(())
    }
}

impl Drop for EventLogWriter {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.finish() {
                tracing::warn!(path = %self.path.display(), error = %e, "event log finalization failed on drop");
            }
        }
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn datetime_series(name: &str, values: Vec<i64>) -> Result<Series> {
    Series::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into())))
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))
}

/// Convert the trade ledger to its fixed-schema DataFrame.
pub fn trades_to_dataframe(trades: &[Trade], smoke_mode: bool) -> Result<DataFrame> {
    let id: Vec<String> = trades.iter().map(|t| t.id.clone()).collect();
    let symbol: Vec<String> = trades.iter().map(|t| t.symbol.clone()).collect();
    let side: Vec<&str> = trades.iter().map(|t| t.side.as_str()).collect();
    let entry_ts: Vec<i64> = trades.iter().map(|t| millis(t.entry_ts)).collect();
    let entry_bar_index: Vec<u64> = trades.iter().map(|t| t.entry_bar_index).collect();
    let entry_price: Vec<f64> = trades.iter().map(|t| t.entry_price).collect();
    let entry_size_usdt: Vec<f64> = trades.iter().map(|t| t.entry_size_usdt).collect();
    let entry_size: Vec<f64> = trades.iter().map(|t| t.entry_size).collect();
    let exit_ts: Vec<i64> = trades.iter().map(|t| millis(t.exit_ts)).collect();
    let exit_bar_index: Vec<u64> = trades.iter().map(|t| t.exit_bar_index).collect();
    let exit_price: Vec<f64> = trades.iter().map(|t| t.exit_price).collect();
    let exit_reason: Vec<&str> = trades.iter().map(|t| t.exit_reason.as_str()).collect();
    let realized_pnl: Vec<f64> = trades.iter().map(|t| t.realized_pnl).collect();
    let funding_pnl: Vec<f64> = trades.iter().map(|t| t.funding_pnl).collect();
    let fees_paid: Vec<f64> = trades.iter().map(|t| t.fees_paid).collect();
    let net_pnl: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    let stop_loss: Vec<Option<f64>> = trades.iter().map(|t| t.stop_loss).collect();
    let take_profit: Vec<Option<f64>> = trades.iter().map(|t| t.take_profit).collect();

    let entry_ts_series = if smoke_mode {
        Series::new("entry_ts".into(), entry_ts)
    } else {
        datetime_series("entry_ts", entry_ts)?
    };
    let exit_ts_series = if smoke_mode {
        Series::new("exit_ts".into(), exit_ts)
    } else {
        datetime_series("exit_ts", exit_ts)?
    };

    DataFrame::new(vec![
        Series::new("id".into(), id).into(),
        Series::new("symbol".into(), symbol).into(),
        Series::new("side".into(), side).into(),
        entry_ts_series.into(),
        Series::new("entry_bar_index".into(), entry_bar_index).into(),
        Series::new("entry_price".into(), entry_price).into(),
        Series::new("entry_size_usdt".into(), entry_size_usdt).into(),
        Series::new("entry_size".into(), entry_size).into(),
        exit_ts_series.into(),
        Series::new("exit_bar_index".into(), exit_bar_index).into(),
        Series::new("exit_price".into(), exit_price).into(),
        Series::new("exit_reason".into(), exit_reason).into(),
        Series::new("realized_pnl".into(), realized_pnl).into(),
        Series::new("funding_pnl".into(), funding_pnl).into(),
        Series::new("fees_paid".into(), fees_paid).into(),
        Series::new("net_pnl".into(), net_pnl).into(),
        Series::new("stop_loss".into(), stop_loss).into(),
        Series::new("take_profit".into(), take_profit).into(),
    ])
    .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))
}

/// Convert the equity curve to its fixed-schema DataFrame.
pub fn equity_to_dataframe(equity: &[EquityPoint], smoke_mode: bool) -> Result<DataFrame> {
    let ts: Vec<i64> = equity.iter().map(|p| millis(p.ts)).collect();
    let values: Vec<f64> = equity.iter().map(|p| p.equity).collect();
    let dd_abs: Vec<f64> = equity.iter().map(|p| p.drawdown_abs).collect();
    let dd_pct: Vec<f64> = equity.iter().map(|p| p.drawdown_pct).collect();

    let ts_series = if smoke_mode {
        Series::new("ts".into(), ts)
    } else {
        datetime_series("ts", ts)?
    };

    DataFrame::new(vec![
        ts_series.into(),
        Series::new("equity".into(), values).into(),
        Series::new("drawdown_abs".into(), dd_abs).into(),
        Series::new("drawdown_pct".into(), dd_pct).into(),
    ])
    .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))
}

fn write_dataframe(df: &mut DataFrame, path: &Path, smoke_mode: bool) -> Result<()> {
    let file = File::create(path)?;
    if smoke_mode {
        CsvWriter::new(file)
            .finish(df)
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    } else {
        ParquetWriter::new(file)
            .finish(df)
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    }
    Ok(())
}

fn read_dataframe(path: &Path, smoke_mode: bool) -> Result<DataFrame> {
    let df = if smoke_mode {
        CsvReadOptions::default()
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
            .finish()
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
    } else {
        let file = File::open(path)?;
        ParquetReader::new(file)
            .finish()
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
    };
    Ok(df)
}

/// Strict schema check: the column set must match exactly; extra columns
/// are forbidden.
fn check_schema(df: &DataFrame, expected: &[&str], table: &str) -> Result<()> {
    let mut found: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    found.sort();
    let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    want.sort();
    if found != want {
        return Err(PerpLabError::SchemaMismatch(format!(
            "{table} columns {found:?} do not match required schema {want:?}"
        )));
    }
    Ok(())
}

/// Write the trade table.
pub fn write_trades(trades: &[Trade], paths: &ArtifactPaths) -> Result<()> {
    let mut df = trades_to_dataframe(trades, paths.smoke_mode)?;
    write_dataframe(&mut df, &paths.trades_path(), paths.smoke_mode)
}

/// Write the equity table.
pub fn write_equity(equity: &[EquityPoint], paths: &ArtifactPaths) -> Result<()> {
    let mut df = equity_to_dataframe(equity, paths.smoke_mode)?;
    write_dataframe(&mut df, &paths.equity_path(), paths.smoke_mode)
}

fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let col = df
        .column(name)
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    let col = col
        .cast(&DataType::Float64)
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    Ok(col
        .f64()
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
        .into_iter()
        .collect())
}

fn column_u64(df: &DataFrame, name: &str) -> Result<Vec<u64>> {
    let col = df
        .column(name)
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
        .cast(&DataType::UInt64)
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    Ok(col
        .u64()
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
        .into_iter()
        .map(|v| v.unwrap_or(0))
        .collect())
}

fn column_str(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let col = df
        .column(name)
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    Ok(col
        .str()
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
        .into_iter()
        .map(|v| v.unwrap_or("").to_string())
        .collect())
}

fn column_ts(df: &DataFrame, name: &str) -> Result<Vec<DateTime<Utc>>> {
    let col = df
        .column(name)
        .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?;
    let ms: Vec<i64> = match col.dtype() {
        DataType::Datetime(_, _) => col
            .datetime()
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
            .into_iter()
            .map(|v| v.unwrap_or(0))
            .collect(),
        _ => col
            .cast(&DataType::Int64)
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
            .i64()
            .map_err(|e| PerpLabError::SchemaMismatch(e.to_string()))?
            .into_iter()
            .map(|v| v.unwrap_or(0))
            .collect(),
    };
    ms.into_iter()
        .map(|m| {
            Utc.timestamp_millis_opt(m).single().ok_or_else(|| {
                PerpLabError::SchemaMismatch(format!("invalid timestamp {m} in column {name}"))
            })
        })
        .collect()
}

fn parse_side(s: &str) -> Result<Side> {
    match s {
        "long" => Ok(Side::Long),
        "short" => Ok(Side::Short),
        other => Err(PerpLabError::SchemaMismatch(format!(
            "unknown side '{other}'"
        ))),
    }
}

fn parse_exit_reason(s: &str) -> Result<ExitReason> {
    match s {
        "tp" => Ok(ExitReason::TakeProfit),
        "sl" => Ok(ExitReason::StopLoss),
        "signal" => Ok(ExitReason::Signal),
        "end_of_data" => Ok(ExitReason::EndOfData),
        "liquidated" => Ok(ExitReason::Liquidated),
        "max_drawdown_hit" => Ok(ExitReason::MaxDrawdownHit),
        other => Err(PerpLabError::SchemaMismatch(format!(
            "unknown exit_reason '{other}'"
        ))),
    }
}

/// Read the trade table back into trade records (math audit path).
pub fn read_trades(paths: &ArtifactPaths) -> Result<Vec<Trade>> {
    let df = read_dataframe(&paths.trades_path(), paths.smoke_mode)?;
    check_schema(&df, &TRADE_COLUMNS, "trades")?;

    let n = df.height();
    let id = column_str(&df, "id")?;
    let symbol = column_str(&df, "symbol")?;
    let side = column_str(&df, "side")?;
    let entry_ts = column_ts(&df, "entry_ts")?;
    let entry_bar_index = column_u64(&df, "entry_bar_index")?;
    let entry_price = column_f64(&df, "entry_price")?;
    let entry_size_usdt = column_f64(&df, "entry_size_usdt")?;
    let entry_size = column_f64(&df, "entry_size")?;
    let exit_ts = column_ts(&df, "exit_ts")?;
    let exit_bar_index = column_u64(&df, "exit_bar_index")?;
    let exit_price = column_f64(&df, "exit_price")?;
    let exit_reason = column_str(&df, "exit_reason")?;
    let realized_pnl = column_f64(&df, "realized_pnl")?;
    let funding_pnl = column_f64(&df, "funding_pnl")?;
    let fees_paid = column_f64(&df, "fees_paid")?;
    let net_pnl = column_f64(&df, "net_pnl")?;
    let stop_loss = column_f64(&df, "stop_loss")?;
    let take_profit = column_f64(&df, "take_profit")?;

    let mut trades = Vec::with_capacity(n);
    for i in 0..n {
        trades.push(Trade {
            id: id[i].clone(),
            symbol: symbol[i].clone(),
            side: parse_side(&side[i])?,
            entry_ts: entry_ts[i],
            entry_bar_index: entry_bar_index[i],
            entry_price: entry_price[i].unwrap_or(f64::NAN),
            entry_size_usdt: entry_size_usdt[i].unwrap_or(f64::NAN),
            entry_size: entry_size[i].unwrap_or(f64::NAN),
            exit_ts: exit_ts[i],
            exit_bar_index: exit_bar_index[i],
            exit_price: exit_price[i].unwrap_or(f64::NAN),
            exit_reason: parse_exit_reason(&exit_reason[i])?,
            realized_pnl: realized_pnl[i].unwrap_or(f64::NAN),
            funding_pnl: funding_pnl[i].unwrap_or(f64::NAN),
            fees_paid: fees_paid[i].unwrap_or(f64::NAN),
            net_pnl: net_pnl[i].unwrap_or(f64::NAN),
            stop_loss: stop_loss[i],
            take_profit: take_profit[i],
        });
    }
    Ok(trades)
}

/// Read the equity table back into points (math audit path).
pub fn read_equity(paths: &ArtifactPaths) -> Result<Vec<EquityPoint>> {
    let df = read_dataframe(&paths.equity_path(), paths.smoke_mode)?;
    check_schema(&df, &EQUITY_COLUMNS, "equity")?;

    let ts = column_ts(&df, "ts")?;
    let equity = column_f64(&df, "equity")?;
    let dd_abs = column_f64(&df, "drawdown_abs")?;
    let dd_pct = column_f64(&df, "drawdown_pct")?;

    Ok((0..df.height())
        .map(|i| EquityPoint {
            ts: ts[i],
            equity: equity[i].unwrap_or(f64::NAN),
            drawdown_abs: dd_abs[i].unwrap_or(f64::NAN),
            drawdown_pct: dd_pct[i].unwrap_or(f64::NAN),
        })
        .collect())
}

/// The run outcome, serialized to `result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub symbol: String,
    pub strategy_id: String,
    pub strategy_version: String,

    #[serde(flatten)]
    pub summary: Summary,

    pub stopped_early: bool,
    pub stop_classification: Option<StopClassification>,
    pub warmup_bars: u64,

    pub data_window_requested_start: DateTime<Utc>,
    pub data_window_requested_end: DateTime<Utc>,
    pub data_window_loaded_start: DateTime<Utc>,
    pub data_window_loaded_end: DateTime<Utc>,
    /// First exec-bar close at which the strategy could have been called.
    pub simulation_start_ts: Option<DateTime<Utc>>,
}

impl RunResult {
    pub fn write(&self, paths: &ArtifactPaths) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.result_path(), json)?;
        Ok(())
    }

    pub fn read(run_dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(run_dir.join("result.json"))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Detect whether a run directory was written in smoke (CSV) mode.
pub fn detect_smoke_mode(run_dir: &Path) -> bool {
    run_dir.join("trades.csv").exists()
}
