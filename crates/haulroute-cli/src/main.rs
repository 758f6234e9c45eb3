use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use haulroute_cli::logging::{init_logging, LoggingConfig};
use haulroute_cli::output::{self, OutputFormat};
use haulroute_lib::{BackfillMode, EngineConfig, RoutingFailure};

mod commands;

#[derive(Parser, Debug)]
#[command(author, version, about = "Freight route planning over the stargate network")]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    /// How results are printed.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `HAULROUTE_*` environment configuration.
#[derive(Args, Debug, Clone, Default)]
struct EngineArgs {
    /// Path to the SQLite database (overrides HAULROUTE_DB).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Minimum node count for the graph to be considered ready.
    #[arg(long, global = true)]
    min_nodes: Option<usize>,

    /// Comma-separated canary system ids that must be present and connected.
    #[arg(long, global = true)]
    critical_systems: Option<String>,

    /// Deployment environment name; production-like names restrict backfill.
    #[arg(long = "env", global = true)]
    environment: Option<String>,

    /// Backfill mode: auto, on, or off.
    #[arg(long, global = true)]
    backfill: Option<BackfillMode>,

    /// Base URL of the ESI-compatible routing oracle; enables fallback.
    #[arg(long, global = true)]
    oracle_url: Option<String>,

    /// Oracle request timeout in seconds.
    #[arg(long, global = true)]
    oracle_timeout_secs: Option<u64>,
}

impl EngineArgs {
    fn to_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env().context("failed to read engine configuration")?;
        if let Some(db) = &self.db {
            config.database_path = db.clone();
        }
        if let Some(min_nodes) = self.min_nodes {
            config.graph.min_nodes = min_nodes;
        }
        if let Some(raw) = &self.critical_systems {
            config.graph.critical_systems = haulroute_lib::config::parse_id_list(raw)
                .map_err(|token| anyhow::anyhow!("invalid system id '{token}' in --critical-systems"))?;
        }
        if let Some(environment) = &self.environment {
            config.environment = environment.clone();
        }
        if let Some(mode) = self.backfill {
            config.backfill = mode;
        }
        if let Some(url) = &self.oracle_url {
            let timeout = self
                .oracle_timeout_secs
                .map(Duration::from_secs)
                .or_else(|| config.oracle.as_ref().map(|oracle| oracle.timeout));
            config = config.with_oracle(url.clone(), timeout);
        } else if let (Some(oracle), Some(secs)) = (config.oracle.as_mut(), self.oracle_timeout_secs) {
            oracle.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan a route between two locations.
    Route(commands::route::RouteArgs),
    /// Resolve a location name or id to its system.
    Resolve(commands::resolve::ResolveArgs),
    /// Report graph readiness. Exits non-zero when the graph is not ready.
    Health,
    /// Create the database schema and optionally seed settings.
    Init(commands::init::InitArgs),
}

fn main() -> ExitCode {
    init_logging(&LoggingConfig::from_env());
    let cli = Cli::parse();
    let format = cli.format;

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            if let Some(failure) = err.downcast_ref::<RoutingFailure>() {
                let mut stdout = std::io::stdout().lock();
                if output::write_failure(&mut stdout, failure, format).is_err() {
                    eprintln!("error[{}]: {}", failure.reason, failure.message);
                }
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.engine.to_config()?;
    match cli.command {
        Command::Route(args) => commands::route::handle_route_command(&config, &args, cli.format),
        Command::Resolve(args) => {
            commands::resolve::handle_resolve_command(&config, &args, cli.format)
        }
        Command::Health => commands::health::handle_health_command(&config, cli.format),
        Command::Init(args) => commands::init::handle_init_command(&config, &args),
    }
}
