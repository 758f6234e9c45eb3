//! Resolve command handler.

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args;

use haulroute_lib::{EngineConfig, LocationQuery};

use crate::commands::build_engine;
use crate::commands::route::KindArg;
use haulroute_cli::output::{write_resolved, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Location name to resolve.
    pub name: Option<String>,
    /// Explicit id to resolve instead of a name.
    #[arg(long)]
    pub id: Option<i64>,
    #[arg(long, value_enum, default_value_t = KindArg::System)]
    pub kind: KindArg,
}

/// Handle the resolve subcommand.
pub fn handle_resolve_command(
    config: &EngineConfig,
    args: &ResolveArgs,
    format: OutputFormat,
) -> Result<ExitCode> {
    let query = match (&args.name, args.id) {
        (Some(_), Some(_)) => bail!("give either a name or --id, not both"),
        (Some(name), None) => LocationQuery::name(name.as_str()),
        (None, Some(id)) => LocationQuery::id(id, args.kind.into()),
        (None, None) => bail!("a location name or --id is required"),
    };
    let engine = build_engine(config)?;
    let resolved = engine.resolve(&query)?;
    write_resolved(&mut std::io::stdout().lock(), &resolved, format)?;
    Ok(ExitCode::SUCCESS)
}
