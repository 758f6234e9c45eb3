use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::db::SystemId;
use crate::store::GraphHealth;

/// Convenient result alias for infrastructure operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure error type: storage, transport, and configuration failures.
///
/// Policy and routing outcomes are reported through [`RoutingFailure`]
/// instead; this type only covers things that went wrong underneath them.
#[derive(Debug, Error)]
pub enum Error {
    /// Database could not be located at the resolved path.
    #[error("database not found at {path}")]
    DatabaseNotFound { path: PathBuf },

    /// No suitable project directories could be resolved for this platform.
    #[error("failed to resolve project directories for the default database path")]
    ProjectDirsUnavailable,

    /// Raised when the backing store is missing a required table or column.
    #[error("unsupported schema: missing {what}")]
    UnsupportedSchema { what: String },

    /// A persisted configuration document could not be decoded.
    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },

    /// The routing oracle answered with a non-success status.
    #[error("routing oracle returned HTTP {status}")]
    OracleStatus { status: u16 },

    /// The routing oracle answered successfully but without a usable path.
    #[error("routing oracle returned an empty path")]
    OracleEmptyPath,

    /// Wrapper for SQLite errors.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Wrapper for IO errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapper for HTTP client errors.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Wrapper for JSON decoding errors.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Machine-readable reason attached to every routing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InvalidName,
    AmbiguousName,
    UnknownName,
    EndpointNotHighSec,
    EndpointNotAllowed,
    SecurityClassDisallowed,
    EndpointHardBlocked,
    GraphNotLoaded,
    GraphMissingEndpoint,
    BlockedByAvoidanceRules,
    NoRoute,
    OracleFailed,
    OracleNoPath,
    OraclePathRejected,
    StoreUnavailable,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::InvalidName => "invalid_name",
            ReasonCode::AmbiguousName => "ambiguous_name",
            ReasonCode::UnknownName => "unknown_name",
            ReasonCode::EndpointNotHighSec => "endpoint_not_high_sec",
            ReasonCode::EndpointNotAllowed => "endpoint_not_allowed",
            ReasonCode::SecurityClassDisallowed => "security_class_disallowed",
            ReasonCode::EndpointHardBlocked => "endpoint_hard_blocked",
            ReasonCode::GraphNotLoaded => "graph_not_loaded",
            ReasonCode::GraphMissingEndpoint => "graph_missing_endpoint",
            ReasonCode::BlockedByAvoidanceRules => "blocked_by_avoidance_rules",
            ReasonCode::NoRoute => "no_route",
            ReasonCode::OracleFailed => "oracle_failed",
            ReasonCode::OracleNoPath => "oracle_no_path",
            ReasonCode::OraclePathRejected => "oracle_path_rejected",
            ReasonCode::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic context carried alongside a [`RoutingFailure`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<SystemId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<SystemId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_rule_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_rule_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_health: Option<GraphHealth>,
}

/// Typed routing failure returned by the engine.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{reason}: {message}")]
pub struct RoutingFailure {
    pub reason: ReasonCode,
    pub message: String,
    pub context: FailureContext,
}

impl RoutingFailure {
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            context: FailureContext::default(),
        }
    }

    pub fn with_endpoints(mut self, origin: Option<SystemId>, destination: Option<SystemId>) -> Self {
        self.context.origin = origin.or(self.context.origin);
        self.context.destination = destination.or(self.context.destination);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.context.candidates = candidates;
        self
    }

    pub fn with_rule_counts(mut self, hard: usize, soft: usize) -> Self {
        self.context.hard_rule_count = Some(hard);
        self.context.soft_rule_count = Some(soft);
        self
    }

    pub fn with_health(mut self, health: GraphHealth) -> Self {
        self.context.graph_health = Some(health);
        self
    }
}

impl From<Error> for RoutingFailure {
    fn from(err: Error) -> Self {
        let reason = match err {
            Error::OracleStatus { .. } | Error::Http(_) => ReasonCode::OracleFailed,
            Error::OracleEmptyPath => ReasonCode::OracleNoPath,
            _ => ReasonCode::StoreUnavailable,
        };
        RoutingFailure::new(reason, err.to_string())
    }
}

impl From<rusqlite::Error> for RoutingFailure {
    fn from(err: rusqlite::Error) -> Self {
        Error::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_as_snake_case() {
        let json = serde_json::to_string(&ReasonCode::EndpointNotHighSec).unwrap();
        assert_eq!(json, "\"endpoint_not_high_sec\"");
        assert_eq!(ReasonCode::EndpointNotHighSec.to_string(), "endpoint_not_high_sec");
    }

    #[test]
    fn oracle_errors_map_to_oracle_reasons() {
        let failure: RoutingFailure = Error::OracleStatus { status: 502 }.into();
        assert_eq!(failure.reason, ReasonCode::OracleFailed);
        let failure: RoutingFailure = Error::OracleEmptyPath.into();
        assert_eq!(failure.reason, ReasonCode::OracleNoPath);
    }

    #[test]
    fn display_includes_reason_and_message() {
        let failure = RoutingFailure::new(ReasonCode::NoRoute, "nothing connects 1 and 2");
        assert_eq!(failure.to_string(), "no_route: nothing connects 1 and 2");
    }
}
