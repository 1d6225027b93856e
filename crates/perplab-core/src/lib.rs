//! PerpLab Core - Domain types, features, sizing, and metrics for the
//! deterministic crypto-perp backtester.
//!
//! This crate provides:
//! - Timeframe algebra and OHLCV/funding data types
//! - The market data provider contract and a seeded synthetic source
//! - The data health gate and warmup resolver
//! - Incremental feature evaluators and the runtime snapshot builder
//! - Position sizing, liquidation math, and summary metrics
//! - The strategy contract and registry

pub mod bar;
pub mod data;
pub mod error;
pub mod features;
pub mod health;
pub mod metrics;
pub mod play;
pub mod risk;
pub mod sizing;
pub mod strategy;
pub mod timeframe;
pub mod trade;
pub mod warmup;

pub use bar::{Bar, BarSeries, FundingRecord};
pub use error::{PerpLabError, Result};
pub use timeframe::{Role, Timeframe};
pub use trade::{EquityPoint, ExitReason, Side, Trade};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bar::{Bar, BarSeries, FundingRecord};
    pub use crate::data::{MarketDataProvider, SyntheticConfig, SyntheticProvider};
    pub use crate::error::{PerpLabError, Result};
    pub use crate::features::{RuntimeSnapshot, SnapshotBuilder};
    pub use crate::play::Play;
    pub use crate::strategy::{Signal, Strategy, StrategyRegistry};
    pub use crate::timeframe::{Role, Timeframe};
    pub use crate::trade::{EquityPoint, ExitReason, Side, Trade};
}
