//! Play configuration: the immutable per-run description of what to trade,
//! how to size it, and which strategy drives it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PerpLabError, Result};
use crate::sizing::SizingMode;
use crate::timeframe::{Role, Timeframe};

/// Role-to-timeframe mapping for a multi-TF strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfMapping {
    pub exec: Timeframe,
    pub mtf: Timeframe,
    pub htf: Timeframe,
}

impl TfMapping {
    pub fn tf_for(&self, role: Role) -> Timeframe {
        match role {
            Role::Exec => self.exec,
            Role::Mtf => self.mtf,
            Role::Htf => self.htf,
        }
    }

    /// All distinct timeframes in the mapping, ascending.
    pub fn distinct_tfs(&self) -> Vec<Timeframe> {
        let mut tfs = vec![self.exec, self.mtf, self.htf];
        tfs.sort();
        tfs.dedup();
        tfs
    }
}

/// Fee model in basis points per fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeModel {
    pub taker_bps: f64,
    pub maker_bps: f64,
}

impl FeeModel {
    /// Taker fee as a fractional rate.
    pub fn taker_rate(&self) -> f64 {
        self.taker_bps / 10_000.0
    }
}

impl Default for FeeModel {
    fn default() -> Self {
        // Bybit USDT-perp defaults.
        Self {
            taker_bps: 5.5,
            maker_bps: 2.0,
        }
    }
}

/// Account-level simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub starting_equity_usdt: f64,
    #[serde(default)]
    pub fee_model: FeeModel,
    #[serde(default)]
    pub slippage_bps: f64,
    pub max_leverage: f64,
    #[serde(default = "default_true")]
    pub funding_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Risk and sizing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    #[serde(default)]
    pub sizing_model: SizingMode,
    #[serde(default = "default_risk_pct")]
    pub risk_per_trade_pct: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    #[serde(default = "default_min_liq_distance_pct")]
    pub min_liq_distance_pct: f64,
    #[serde(default = "default_max_position_equity_pct")]
    pub max_position_equity_pct: f64,
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: f64,
    #[serde(default = "default_min_trade_usdt")]
    pub min_trade_usdt: f64,
}

fn default_risk_pct() -> f64 {
    1.0
}

fn default_min_liq_distance_pct() -> f64 {
    10.0
}

fn default_max_position_equity_pct() -> f64 {
    95.0
}

fn default_maintenance_margin_rate() -> f64 {
    0.005
}

fn default_min_trade_usdt() -> f64 {
    1.0
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            sizing_model: SizingMode::default(),
            risk_per_trade_pct: default_risk_pct(),
            stop_loss_pct: None,
            take_profit_pct: None,
            max_drawdown_pct: None,
            min_liq_distance_pct: default_min_liq_distance_pct(),
            max_position_equity_pct: default_max_position_equity_pct(),
            maintenance_margin_rate: default_maintenance_margin_rate(),
            min_trade_usdt: default_min_trade_usdt(),
        }
    }
}

/// Position policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPolicy {
    #[serde(default = "default_max_positions")]
    pub max_positions_per_symbol: u32,
}

fn default_max_positions() -> u32 {
    1
}

impl Default for PositionPolicy {
    fn default() -> Self {
        Self {
            max_positions_per_symbol: default_max_positions(),
        }
    }
}

/// Reference to a registered strategy plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRef {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The immutable configuration for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Play {
    pub id: String,
    pub symbol: String,
    pub timeframes: TfMapping,
    pub strategy: StrategyRef,
    pub account: AccountConfig,
    #[serde(default)]
    pub risk: RiskProfile,
    #[serde(default)]
    pub policy: PositionPolicy,
    /// Base-currency quantity step for the symbol (Bybit lot filter).
    #[serde(default = "default_qty_step")]
    pub qty_step: f64,
}

fn default_qty_step() -> f64 {
    0.001
}

impl Play {
    /// Parse a play from its TOML form.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let play: Play = toml::from_str(s)?;
        play.validate()?;
        Ok(play)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.account.starting_equity_usdt <= 0.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "starting_equity_usdt must be > 0, got {}",
                self.account.starting_equity_usdt
            )));
        }
        if self.account.max_leverage <= 0.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "max_leverage must be > 0, got {}",
                self.account.max_leverage
            )));
        }
        if self.account.slippage_bps < 0.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "slippage_bps must be >= 0, got {}",
                self.account.slippage_bps
            )));
        }
        if self.risk.risk_per_trade_pct <= 0.0 || self.risk.risk_per_trade_pct > 100.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "risk_per_trade_pct must be in (0, 100], got {}",
                self.risk.risk_per_trade_pct
            )));
        }
        if self.risk.max_position_equity_pct <= 0.0 || self.risk.max_position_equity_pct > 100.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "max_position_equity_pct must be in (0, 100], got {}",
                self.risk.max_position_equity_pct
            )));
        }
        if self.risk.min_liq_distance_pct < 0.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "min_liq_distance_pct must be >= 0, got {}",
                self.risk.min_liq_distance_pct
            )));
        }
        if let Some(dd) = self.risk.max_drawdown_pct {
            if dd <= 0.0 || dd > 100.0 {
                return Err(PerpLabError::InvalidRiskConfig(format!(
                    "max_drawdown_pct must be in (0, 100], got {dd}"
                )));
            }
        }
        if self.policy.max_positions_per_symbol == 0 {
            return Err(PerpLabError::InvalidPolicy(
                "max_positions_per_symbol must be >= 1".to_string(),
            ));
        }
        let tfs = &self.timeframes;
        if tfs.exec > tfs.mtf || tfs.mtf > tfs.htf {
            return Err(PerpLabError::InvalidPolicy(format!(
                "timeframes must satisfy exec <= mtf <= htf, got exec={} mtf={} htf={}",
                tfs.exec, tfs.mtf, tfs.htf
            )));
        }
        if self.qty_step <= 0.0 {
            return Err(PerpLabError::InvalidRiskConfig(format!(
                "qty_step must be > 0, got {}",
                self.qty_step
            )));
        }
        Ok(())
    }

    /// Stable 16-hex-char hash of the full config, recorded in the run
    /// manifest.
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).expect("play serializes");
        let digest = Sha256::digest(json.as_bytes());
        let hex = format!("{digest:x}");
        hex[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_play() -> Play {
        Play {
            id: "ema-rsi-15m".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframes: TfMapping {
                exec: Timeframe::M15,
                mtf: Timeframe::H1,
                htf: Timeframe::H4,
            },
            strategy: StrategyRef {
                id: "ema_rsi_atr".to_string(),
                version: "1.0.0".to_string(),
                params: serde_json::json!({}),
            },
            account: AccountConfig {
                starting_equity_usdt: 10_000.0,
                fee_model: FeeModel::default(),
                slippage_bps: 1.0,
                max_leverage: 2.0,
                funding_enabled: true,
            },
            risk: RiskProfile {
                stop_loss_pct: Some(1.0),
                take_profit_pct: Some(2.0),
                ..RiskProfile::default()
            },
            policy: PositionPolicy::default(),
            qty_step: 0.001,
        }
    }

    #[test]
    fn sample_play_validates() {
        sample_play().validate().unwrap();
    }

    #[test]
    fn zero_leverage_rejected() {
        let mut play = sample_play();
        play.account.max_leverage = 0.0;
        let err = play.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_risk_config");
    }

    #[test]
    fn zero_positions_rejected() {
        let mut play = sample_play();
        play.policy.max_positions_per_symbol = 0;
        let err = play.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_policy");
    }

    #[test]
    fn misordered_timeframes_rejected() {
        let mut play = sample_play();
        play.timeframes.htf = Timeframe::M5;
        let err = play.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_policy");
    }

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let play = sample_play();
        assert_eq!(play.config_hash(), play.config_hash());
        assert_eq!(play.config_hash().len(), 16);

        let mut changed = sample_play();
        changed.account.max_leverage = 3.0;
        assert_ne!(play.config_hash(), changed.config_hash());
    }

    #[test]
    fn toml_roundtrip() {
        let toml_src = r#"
            id = "donchian-1h"
            symbol = "BTCUSDT"
            qty_step = 0.001

            [timeframes]
            exec = "1h"
            mtf = "4h"
            htf = "D"

            [strategy]
            id = "always_long"
            version = "1.0.0"

            [account]
            starting_equity_usdt = 10000.0
            slippage_bps = 1.0
            max_leverage = 2.0

            [risk]
            stop_loss_pct = 1.0
            take_profit_pct = 2.0
        "#;
        let play = Play::from_toml_str(toml_src).unwrap();
        assert_eq!(play.timeframes.exec, Timeframe::H1);
        assert_eq!(play.timeframes.htf, Timeframe::D1);
        assert_eq!(play.risk.min_liq_distance_pct, 10.0);
        assert_eq!(play.policy.max_positions_per_symbol, 1);
        assert!(play.account.funding_enabled);
    }

    #[test]
    fn toml_unknown_timeframe_is_config_error() {
        let toml_src = r#"
            id = "x"
            symbol = "BTCUSDT"

            [timeframes]
            exec = "7m"
            mtf = "1h"
            htf = "4h"

            [strategy]
            id = "always_long"
            version = "1.0.0"

            [account]
            starting_equity_usdt = 10000.0
            max_leverage = 2.0
        "#;
        assert!(Play::from_toml_str(toml_src).is_err());
    }
}
