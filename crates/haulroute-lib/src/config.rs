//! Engine configuration sourced from environment variables.
//!
//! # Environment Variables
//!
//! - `HAULROUTE_DB`: path to the SQLite backing store
//! - `HAULROUTE_CACHE_TTL_SECS`: graph cache lifetime (default 600)
//! - `HAULROUTE_MIN_NODES`: minimum node count for a ready graph (default 5000)
//! - `HAULROUTE_CRITICAL_SYSTEMS`: comma-separated canary system ids
//! - `HAULROUTE_ENV`: deployment environment name (default `development`)
//! - `HAULROUTE_BACKFILL`: `auto` (default), `on`, or `off`
//! - `HAULROUTE_ORACLE_URL`: enables the ESI routing oracle at this base URL
//! - `HAULROUTE_ORACLE_TIMEOUT_SECS`: oracle request timeout (default 10)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use tracing::warn;

use crate::error::{Error, Result};
use crate::fallback::BackfillMode;
use crate::store::GraphStoreConfig;

pub const DB_ENV: &str = "HAULROUTE_DB";
pub const CACHE_TTL_ENV: &str = "HAULROUTE_CACHE_TTL_SECS";
pub const MIN_NODES_ENV: &str = "HAULROUTE_MIN_NODES";
pub const CRITICAL_SYSTEMS_ENV: &str = "HAULROUTE_CRITICAL_SYSTEMS";
pub const ENVIRONMENT_ENV: &str = "HAULROUTE_ENV";
pub const BACKFILL_ENV: &str = "HAULROUTE_BACKFILL";
pub const ORACLE_URL_ENV: &str = "HAULROUTE_ORACLE_URL";
pub const ORACLE_TIMEOUT_ENV: &str = "HAULROUTE_ORACLE_TIMEOUT_SECS";

const DATABASE_FILE_NAME: &str = "haulroute.db";
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Oracle connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Everything needed to stand up a [`crate::RouteEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub graph: GraphStoreConfig,
    pub environment: String,
    pub backfill: BackfillMode,
    pub oracle: Option<OracleConfig>,
}

impl EngineConfig {
    /// Configuration with defaults for everything except the database path.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            graph: GraphStoreConfig::default(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            backfill: BackfillMode::default(),
            oracle: None,
        }
    }

    /// Build configuration from `HAULROUTE_*` environment variables.
    ///
    /// Malformed numeric values are reported with `warn!` and replaced by
    /// their defaults rather than aborting startup.
    pub fn from_env() -> Result<Self> {
        let database_path = match env::var_os(DB_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_database_path()?,
        };
        let mut config = Self::new(database_path);

        if let Some(secs) = parse_env::<u64>(CACHE_TTL_ENV) {
            config.graph.ttl = Duration::from_secs(secs);
        }
        if let Some(min_nodes) = parse_env::<usize>(MIN_NODES_ENV) {
            config.graph.min_nodes = min_nodes;
        }
        if let Ok(raw) = env::var(CRITICAL_SYSTEMS_ENV) {
            match parse_id_list(&raw) {
                Ok(ids) => config.graph.critical_systems = ids,
                Err(token) => warn!(
                    variable = CRITICAL_SYSTEMS_ENV,
                    token = %token,
                    "ignoring malformed system id list"
                ),
            }
        }
        if let Ok(environment) = env::var(ENVIRONMENT_ENV) {
            if !environment.trim().is_empty() {
                config.environment = environment.trim().to_string();
            }
        }
        if let Some(mode) = parse_env::<BackfillMode>(BACKFILL_ENV) {
            config.backfill = mode;
        }
        if let Ok(url) = env::var(ORACLE_URL_ENV) {
            if !url.trim().is_empty() {
                let timeout = parse_env::<u64>(ORACLE_TIMEOUT_ENV)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_ORACLE_TIMEOUT);
                config.oracle = Some(OracleConfig {
                    base_url: url.trim().to_string(),
                    timeout,
                });
            }
        }

        Ok(config)
    }

    pub fn with_oracle(mut self, base_url: impl Into<String>, timeout: Option<Duration>) -> Self {
        self.oracle = Some(OracleConfig {
            base_url: base_url.into(),
            timeout: timeout.unwrap_or(DEFAULT_ORACLE_TIMEOUT),
        });
        self
    }
}

/// Default database location under the platform data directory.
pub fn default_database_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "haulroute").ok_or(Error::ProjectDirsUnavailable)?;
    Ok(dirs.data_dir().join(DATABASE_FILE_NAME))
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}

/// Parse `"1, 2,3"` into ids; returns the offending token on failure.
pub fn parse_id_list(raw: &str) -> std::result::Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<i64>().map_err(|_| token.to_string()))
        .collect()
}
