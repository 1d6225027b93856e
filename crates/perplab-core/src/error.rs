//! Error types for PerpLab.

use thiserror::Error;

use crate::health::HealthReport;

/// Sub-reason attached to a rejected order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Liquidation price sits closer to entry than the configured minimum.
    LiquidationTooClose,
    /// Computed size fell below the minimum trade notional.
    BelowMinSize,
    /// The cap stack reduced the size to zero.
    CappedToZero,
}

/// Core error type for PerpLab operations.
#[derive(Error, Debug)]
pub enum PerpLabError {
    // Configuration
    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Unknown feature key: {0}")]
    UnknownFeature(String),

    #[error("Invalid position policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid risk configuration: {0}")]
    InvalidRiskConfig(String),

    #[error("Strategy '{id}' v{version} not registered")]
    UnknownStrategy { id: String, version: String },

    // Data
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No data in range for {symbol}/{tf}: {detail}")]
    NoDataInRange {
        symbol: String,
        tf: String,
        detail: String,
    },

    #[error("Coverage insufficient: {0}")]
    CoverageInsufficient(String),

    #[error("Gaps detected: {0} missing bars")]
    GapsDetected(usize),

    #[error("Data sanity violation: {0}")]
    SanityViolation(String),

    #[error("Backend unavailable: {0}")]
    Backend(String),

    // Runtime
    #[error("Preflight failed: {issues} issues in health report")]
    PreflightFailed {
        issues: usize,
        report: Box<HealthReport>,
    },

    #[error("Run aborted by caller")]
    Aborted,

    #[error("Order rejected ({reason:?}): {detail}")]
    OrderRejected {
        reason: RejectReason,
        detail: String,
    },

    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolated(String),

    // Artifacts
    #[error("Artifact version mismatch: found {found}, reader supports {supported}")]
    VersionMismatch { found: String, supported: String },

    #[error("Artifact schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PerpLabError {
    /// Stable machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PerpLabError::UnknownTimeframe(_) => "unknown_timeframe",
            PerpLabError::UnknownFeature(_) => "unknown_feature",
            PerpLabError::InvalidPolicy(_) => "invalid_policy",
            PerpLabError::InvalidRiskConfig(_) => "invalid_risk_config",
            PerpLabError::UnknownStrategy { .. } => "unknown_strategy",
            PerpLabError::NotFound(_) => "not_found",
            PerpLabError::NoDataInRange { .. } => "no_data_in_range",
            PerpLabError::CoverageInsufficient(_) => "coverage_insufficient",
            PerpLabError::GapsDetected(_) => "gaps_detected",
            PerpLabError::SanityViolation(_) => "sanity_violation",
            PerpLabError::Backend(_) => "backend_unavailable",
            PerpLabError::PreflightFailed { .. } => "preflight_failed",
            PerpLabError::Aborted => "aborted",
            PerpLabError::OrderRejected { .. } => "order_rejected",
            PerpLabError::InternalInvariantViolated(_) => "internal_invariant_violated",
            PerpLabError::VersionMismatch { .. } => "version_mismatch",
            PerpLabError::SchemaMismatch(_) => "schema_mismatch",
            PerpLabError::Io(_) => "write_failed",
            PerpLabError::Json(_) => "json_error",
            PerpLabError::Toml(_) => "config_parse_error",
        }
    }

    /// True when the error is a pre-trade rejection the engine may log and
    /// continue past.
    pub fn is_order_rejection(&self) -> bool {
        matches!(self, PerpLabError::OrderRejected { .. })
    }
}

/// Result type alias for PerpLab operations.
pub type Result<T> = std::result::Result<T, PerpLabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = PerpLabError::UnknownTimeframe("7m".to_string());
        assert_eq!(err.kind(), "unknown_timeframe");

        let err = PerpLabError::OrderRejected {
            reason: RejectReason::LiquidationTooClose,
            detail: "liq 2.1% from entry".to_string(),
        };
        assert_eq!(err.kind(), "order_rejected");
        assert!(err.is_order_rejection());
    }

    #[test]
    fn rejection_reason_serializes_snake_case() {
        let json = serde_json::to_string(&RejectReason::BelowMinSize).unwrap();
        assert_eq!(json, "\"below_min_size\"");
    }
}
