//! Health command handler.

use std::process::ExitCode;

use anyhow::{Context, Result};

use haulroute_lib::EngineConfig;

use crate::commands::build_store;
use haulroute_cli::output::{write_health, OutputFormat};

/// Print graph health; the exit code mirrors readiness.
pub fn handle_health_command(config: &EngineConfig, format: OutputFormat) -> Result<ExitCode> {
    let store = build_store(config);
    let health = store.health().with_context(|| {
        format!(
            "failed to load route graph from {}",
            config.database_path.display()
        )
    })?;
    write_health(&mut std::io::stdout().lock(), &health, format)?;
    Ok(if health.ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
