//! External routing oracle client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::db::SystemId;
use crate::error::{Error, Result};

/// Public ESI base URL; the route endpoint lives under it.
pub const DEFAULT_ORACLE_URL: &str = "https://esi.evetech.net/latest";

/// Opaque service that can answer "how do I get from A to B".
pub trait RouteOracle: Send + Sync {
    /// Ordered system ids from `origin` to `destination`, inclusive.
    ///
    /// Implementations fail on transport errors, non-success responses, and
    /// empty answers.
    fn fetch_path(
        &self,
        origin: SystemId,
        destination: SystemId,
        mode_flag: &str,
        avoid: &[SystemId],
    ) -> Result<Vec<SystemId>>;
}

/// ESI `/route/{origin}/{destination}/` client.
#[derive(Debug, Clone)]
pub struct EsiRouteOracle {
    client: Client,
    base_url: String,
}

impl EsiRouteOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("haulroute/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn route_url(&self, origin: SystemId, destination: SystemId) -> String {
        format!("{}/route/{origin}/{destination}/", self.base_url)
    }
}

impl RouteOracle for EsiRouteOracle {
    fn fetch_path(
        &self,
        origin: SystemId,
        destination: SystemId,
        mode_flag: &str,
        avoid: &[SystemId],
    ) -> Result<Vec<SystemId>> {
        let url = self.route_url(origin, destination);
        let mut query: Vec<(&str, String)> = vec![("flag", mode_flag.to_string())];
        if !avoid.is_empty() {
            query.push(("avoid", join_ids(avoid)));
        }
        debug!(%url, mode_flag, avoid = avoid.len(), "querying routing oracle");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(&query)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OracleStatus {
                status: status.as_u16(),
            });
        }

        let path: Vec<SystemId> = response.json()?;
        if path.is_empty() {
            return Err(Error::OracleEmptyPath);
        }
        Ok(path)
    }
}

fn join_ids(ids: &[SystemId]) -> String {
    ids.iter()
        .map(SystemId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
