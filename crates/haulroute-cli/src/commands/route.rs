//! Route command handler.

use std::collections::BTreeSet;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use tracing::debug;

use haulroute_lib::{
    AccessAllowlist, AccessScope, EngineConfig, LocationKind, LocationQuery, RouteProfile,
    RouteRequest,
};

use crate::commands::build_engine;
use haulroute_cli::output::{write_route, OutputFormat};

/// Table an explicit `--from-id` / `--to-id` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KindArg {
    #[default]
    System,
    Station,
    Structure,
}

impl From<KindArg> for LocationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::System => LocationKind::System,
            KindArg::Station => LocationKind::Station,
            KindArg::Structure => LocationKind::Structure,
        }
    }
}

/// Build a query from free text or an explicit id; exactly one must be given.
pub fn location_query(
    flag: &str,
    text: Option<&str>,
    id: Option<i64>,
    kind: KindArg,
) -> Result<LocationQuery> {
    match (text, id) {
        (Some(_), Some(_)) => bail!("--{flag} and --{flag}-id are mutually exclusive"),
        (Some(text), None) => Ok(LocationQuery::name(text)),
        (None, Some(id)) => Ok(LocationQuery::id(id, kind.into())),
        (None, None) => bail!("one of --{flag} or --{flag}-id is required"),
    }
}

#[derive(Args, Debug, Clone)]
pub struct RouteArgs {
    /// Pickup location name (system, station, or "System — Location").
    #[arg(long)]
    pub from: Option<String>,
    /// Pickup location id, interpreted according to --from-kind.
    #[arg(long)]
    pub from_id: Option<i64>,
    #[arg(long, value_enum, default_value_t = KindArg::System)]
    pub from_kind: KindArg,

    /// Delivery location name.
    #[arg(long)]
    pub to: Option<String>,
    /// Delivery location id, interpreted according to --to-kind.
    #[arg(long)]
    pub to_id: Option<i64>,
    #[arg(long, value_enum, default_value_t = KindArg::System)]
    pub to_kind: KindArg,

    /// Routing profile: shortest, balanced, or safest.
    #[arg(long, default_value_t = RouteProfile::Balanced)]
    pub profile: RouteProfile,

    /// Allowed pickup system ids (repeatable). Empty allows all.
    #[arg(long = "pickup-system")]
    pub pickup_systems: Vec<i64>,
    #[arg(long = "pickup-region")]
    pub pickup_regions: Vec<i64>,
    #[arg(long = "pickup-location")]
    pub pickup_locations: Vec<i64>,

    /// Allowed delivery system ids (repeatable). Empty allows all.
    #[arg(long = "delivery-system")]
    pub delivery_systems: Vec<i64>,
    #[arg(long = "delivery-region")]
    pub delivery_regions: Vec<i64>,
    #[arg(long = "delivery-location")]
    pub delivery_locations: Vec<i64>,
}

impl RouteArgs {
    /// Convert CLI args to a library request.
    pub fn to_request(&self) -> Result<RouteRequest> {
        Ok(RouteRequest {
            origin: location_query("from", self.from.as_deref(), self.from_id, self.from_kind)?,
            destination: location_query("to", self.to.as_deref(), self.to_id, self.to_kind)?,
            profile: self.profile,
            access: AccessAllowlist {
                pickup: scope(&self.pickup_systems, &self.pickup_regions, &self.pickup_locations),
                delivery: scope(
                    &self.delivery_systems,
                    &self.delivery_regions,
                    &self.delivery_locations,
                ),
            },
        })
    }
}

fn scope(systems: &[i64], regions: &[i64], locations: &[i64]) -> AccessScope {
    AccessScope {
        system_ids: systems.iter().copied().collect::<BTreeSet<_>>(),
        region_ids: regions.iter().copied().collect(),
        location_ids: locations.iter().copied().collect(),
    }
}

/// Handle the route subcommand.
pub fn handle_route_command(
    config: &EngineConfig,
    args: &RouteArgs,
    format: OutputFormat,
) -> Result<ExitCode> {
    let request = args.to_request()?;
    let engine = build_engine(config)?;
    debug!(profile = %request.profile, "planning route");

    let route = engine.plan_route(&request)?;
    write_route(&mut std::io::stdout().lock(), &route, format)?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_query_requires_exactly_one_form() {
        assert_eq!(
            location_query("from", Some("Jita"), None, KindArg::System).unwrap(),
            LocationQuery::name("Jita")
        );
        assert_eq!(
            location_query("from", None, Some(60003760), KindArg::Station).unwrap(),
            LocationQuery::id(60003760, LocationKind::Station)
        );
        assert!(location_query("from", Some("Jita"), Some(1), KindArg::System).is_err());
        assert!(location_query("to", None, None, KindArg::System).is_err());
    }

    #[test]
    fn empty_allowlists_produce_open_scopes() {
        let scope = scope(&[], &[], &[]);
        assert!(scope.is_empty());
    }
}
