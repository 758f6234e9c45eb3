//! Init command handler.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use haulroute_lib::db::write_setting;
use haulroute_lib::fallback::BACKFILL_SETTING;
use haulroute_lib::security::SECURITY_POLICY_SETTING;
use haulroute_lib::{create_database, EngineConfig, SecurityPolicyConfig};

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// JSON security policy document to store (missing fields take defaults).
    #[arg(long)]
    pub security_policy: Option<PathBuf>,
    /// Persist the backfill flag consulted in production-like environments.
    #[arg(long)]
    pub backfill_enabled: Option<bool>,
}

/// Handle the init subcommand.
pub fn handle_init_command(config: &EngineConfig, args: &InitArgs) -> Result<ExitCode> {
    let path = &config.database_path;
    let connection = create_database(path)
        .with_context(|| format!("failed to initialise database at {}", path.display()))?;

    if let Some(policy_path) = &args.security_policy {
        let raw = fs::read_to_string(policy_path)
            .with_context(|| format!("failed to read {}", policy_path.display()))?;
        let policy: SecurityPolicyConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid security policy in {}", policy_path.display()))?;
        write_setting(&connection, SECURITY_POLICY_SETTING, &policy)?;
        info!(path = %policy_path.display(), "stored security policy");
    }
    if let Some(enabled) = args.backfill_enabled {
        write_setting(&connection, BACKFILL_SETTING, &enabled)?;
        info!(enabled, "stored backfill setting");
    }

    println!("Database ready at {}", path.display());
    Ok(ExitCode::SUCCESS)
}
