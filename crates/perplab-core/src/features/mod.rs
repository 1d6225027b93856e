//! Feature computation: key registry, incremental indicators, structure
//! detection, and the per-role snapshot builder.

pub mod indicators;
pub mod registry;
pub mod snapshot;
pub mod structure;

pub use indicators::{BoundIndicator, IndicatorKind, IndicatorSpec};
pub use registry::{FeatureId, FeatureMap, FeatureRegistry};
pub use snapshot::{ExchangeStateView, RoleContext, RuntimeSnapshot, SnapshotBuilder};
