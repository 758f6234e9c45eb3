//! Haulroute library entry points.
//!
//! This crate plans courier routes across the New Eden stargate network. It
//! keeps a cached adjacency graph loaded from SQLite, resolves customer-typed
//! location names, applies avoidance rules and a security policy, and falls
//! back to an external routing oracle when the local graph is not usable.
//! Consumers (the CLI, services) should go through [`RouteEngine`] rather than
//! wiring the individual modules together.
//!

#![deny(warnings)]

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod oracle;
pub mod resolver;
pub mod rules;
pub mod search;
pub mod security;
pub mod store;

pub use config::{default_database_path, EngineConfig, OracleConfig};
pub use db::{create_database, initialize_schema, open_database, System, SystemId};
pub use engine::{
    AccessAllowlist, AccessScope, RouteEngine, RouteRequest, RouteResult, RouteSource, RouteStep,
};
pub use error::{Error, FailureContext, ReasonCode, Result, RoutingFailure};
pub use fallback::{BackfillMode, BackfillReport};
pub use oracle::{EsiRouteOracle, RouteOracle, DEFAULT_ORACLE_URL};
pub use resolver::{LocationKind, LocationQuery, ResolvedLocation};
pub use rules::{AvoidRule, Phase, RuleScope, RuleSet};
pub use search::{find_route, RouteProfile};
pub use security::{SecurityClass, SecurityPolicy, SecurityPolicyConfig};
pub use store::{GraphHealth, GraphSnapshot, GraphStore, GraphStoreConfig, HealthReason};
