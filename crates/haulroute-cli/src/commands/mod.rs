// Module exports for CLI subcommands.
//
// Each module handles one subcommand; main.rs only parses arguments and dispatches.

pub mod health;
pub mod init;
pub mod resolve;
pub mod route;

use std::sync::Arc;

use anyhow::Result;
use haulroute_lib::{EngineConfig, GraphStore, RouteEngine};

/// Build an engine for one CLI invocation.
pub(crate) fn build_engine(config: &EngineConfig) -> Result<RouteEngine> {
    Ok(RouteEngine::from_config(config)?)
}

/// Build a bare store when no routing is needed.
pub(crate) fn build_store(config: &EngineConfig) -> Arc<GraphStore> {
    Arc::new(GraphStore::new(
        config.database_path.clone(),
        config.graph.clone(),
    ))
}
