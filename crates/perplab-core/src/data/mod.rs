//! Data access: provider contract and the deterministic synthetic source.

pub mod provider;
pub mod synthetic;

pub use provider::MarketDataProvider;
pub use synthetic::{Pattern, SyntheticCandles, SyntheticConfig, SyntheticProvider};
