//! Oracle path validation and graph backfill.
//!
//! Paths returned by the routing oracle are checked against the same hard
//! rules and security policy the local search enforces. Accepted paths can be
//! written back into the graph tables so later calls route locally.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{self, System, SystemId};
use crate::error::{ReasonCode, Result, RoutingFailure};
use crate::rules::{Phase, RuleSet};
use crate::search::RouteProfile;
use crate::security::{SecurityClass, SecurityPolicy};
use crate::store::GraphSnapshot;

/// Settings key consulted when backfill is left on `auto` in production.
pub const BACKFILL_SETTING: &str = "graph_backfill_enabled";

/// Source tag written to the audit table for oracle-derived rows.
pub const ORACLE_SOURCE: &str = "oracle";

const PRODUCTION_ENVIRONMENTS: &[&str] = &["production", "prod", "live"];

/// Whether accepted oracle paths are persisted into the graph tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillMode {
    /// On outside production; in production, governed by the persisted setting.
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl FromStr for BackfillMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackfillMode::Auto),
            "on" | "true" | "enabled" | "1" => Ok(BackfillMode::Enabled),
            "off" | "false" | "disabled" | "0" => Ok(BackfillMode::Disabled),
            other => Err(format!("unknown backfill mode '{other}'")),
        }
    }
}

impl fmt::Display for BackfillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            BackfillMode::Auto => "auto",
            BackfillMode::Enabled => "on",
            BackfillMode::Disabled => "off",
        };
        f.write_str(value)
    }
}

pub fn is_production_like(environment: &str) -> bool {
    let environment = environment.trim().to_ascii_lowercase();
    PRODUCTION_ENVIRONMENTS.contains(&environment.as_str())
}

/// Decide whether backfill runs for this call.
pub fn backfill_enabled(mode: BackfillMode, environment: &str, connection: &Connection) -> bool {
    match mode {
        BackfillMode::Enabled => true,
        BackfillMode::Disabled => false,
        BackfillMode::Auto if !is_production_like(environment) => true,
        BackfillMode::Auto => match db::read_setting::<bool>(connection, BACKFILL_SETTING) {
            Ok(value) => value.unwrap_or(false),
            Err(err) => {
                warn!(error = %err, "could not read backfill setting; leaving backfill off");
                false
            }
        },
    }
}

/// Inputs needed to judge an oracle path.
pub struct PathValidator<'a> {
    pub connection: &'a Connection,
    pub snapshot: &'a GraphSnapshot,
    pub rules: &'a RuleSet,
    pub policy: &'a SecurityPolicy,
    pub profile: RouteProfile,
}

impl PathValidator<'_> {
    /// Check an oracle path end to end, returning the systems it visits.
    pub fn validate(
        &self,
        origin: SystemId,
        destination: SystemId,
        path: &[SystemId],
    ) -> std::result::Result<Vec<System>, RoutingFailure> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(RoutingFailure::new(
                ReasonCode::OracleNoPath,
                "routing oracle returned an empty path",
            ));
        };
        if first != origin || last != destination {
            return Err(rejected(format!(
                "oracle path runs {first} -> {last}, expected {origin} -> {destination}"
            )));
        }
        if path.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(rejected("oracle path repeats a system consecutively"));
        }

        let mut systems = Vec::with_capacity(path.len());
        for &id in path {
            let system = match self.snapshot.system(id) {
                Some(system) => system.clone(),
                None => db::lookup_system(self.connection, id)?.ok_or_else(|| {
                    rejected(format!("oracle path visits unknown system {id}"))
                })?,
            };
            systems.push(system);
        }

        let require_high_sec = self.profile == RouteProfile::Safest
            || (self.policy.classify(&systems[0]) == SecurityClass::HighSec
                && self.policy.classify(&systems[systems.len() - 1]) == SecurityClass::HighSec);

        let last_index = systems.len() - 1;
        for (index, system) in systems.iter().enumerate() {
            let phase = if index == 0 {
                Phase::Pickup
            } else if index == last_index {
                Phase::Delivery
            } else {
                Phase::Transit
            };

            if !self.policy.is_allowed(system, phase) {
                return Err(rejected(format!(
                    "oracle path enters {} ({}) during {phase}, which policy forbids",
                    system.name,
                    self.policy.classify(system)
                )));
            }
            if require_high_sec && self.policy.classify(system) != SecurityClass::HighSec {
                return Err(rejected(format!(
                    "oracle path leaves high-sec at {}",
                    system.name
                )));
            }
            if let Some(rule) = self.rules.hard_block_for(system, phase) {
                return Err(rejected(format!(
                    "oracle path enters {} during {phase}, blocked by avoidance rule {}",
                    system.name, rule.id
                )));
            }
            if index > 0 && self.rules.is_edge_hard_blocked(systems[index - 1].id, system.id, phase)
            {
                return Err(rejected(format!(
                    "oracle path uses blocked connection {} -> {}",
                    systems[index - 1].name,
                    system.name
                )));
            }
        }

        Ok(systems)
    }
}

fn rejected(message: impl Into<String>) -> RoutingFailure {
    RoutingFailure::new(ReasonCode::OraclePathRejected, message)
}

/// What a backfill pass wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub nodes_inserted: usize,
    pub edges_inserted: usize,
    /// Systems missing from the reference table; their edges are not written.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_systems: Vec<SystemId>,
}

impl BackfillReport {
    pub fn is_empty(&self) -> bool {
        self.nodes_inserted == 0 && self.edges_inserted == 0
    }
}

/// Insert unseen systems and every consecutive edge of `path` in one
/// transaction, auditing each row actually written.
pub fn backfill_path(
    connection: &mut Connection,
    path: &[SystemId],
    source: &str,
) -> Result<BackfillReport> {
    let tx = connection.transaction()?;
    let mut report = BackfillReport::default();

    for &id in path {
        if system_in_graph(&tx, id)? {
            continue;
        }
        let Some(system) = db::lookup_reference_system(&tx, id)? else {
            report.skipped_systems.push(id);
            continue;
        };
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO map_systems
                 (system_id, name, security, constellation_id, region_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                system.id,
                system.name,
                system.security,
                system.constellation_id,
                system.region_id
            ],
        )?;
        if inserted > 0 {
            report.nodes_inserted += 1;
            audit(&tx, "system", &id.to_string(), source, Some(&system.name))?;
        }
    }

    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if report.skipped_systems.contains(&a) || report.skipped_systems.contains(&b) {
            continue;
        }
        let mut inserted = 0;
        for (from, to) in [(a, b), (b, a)] {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO map_system_gates (from_system_id, to_system_id)
                 VALUES (?1, ?2)",
                params![from, to],
            )?;
        }
        if inserted > 0 {
            report.edges_inserted += 1;
            let key = format!("{}-{}", a.min(b), a.max(b));
            audit(&tx, "gate", &key, source, None)?;
        }
    }

    tx.commit()?;
    if report.is_empty() {
        debug!(hops = path.len().saturating_sub(1), "backfill found nothing new");
    } else {
        info!(
            nodes = report.nodes_inserted,
            edges = report.edges_inserted,
            skipped = report.skipped_systems.len(),
            "backfilled graph from oracle path"
        );
    }
    Ok(report)
}

fn system_in_graph(tx: &Transaction<'_>, id: SystemId) -> Result<bool> {
    let mut stmt = tx.prepare_cached("SELECT 1 FROM map_systems WHERE system_id = ?1")?;
    Ok(stmt.exists([id])?)
}

fn audit(
    tx: &Transaction<'_>,
    entity_type: &str,
    entity_key: &str,
    source: &str,
    detail: Option<&str>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO graph_backfill_audit (entity_type, entity_key, source, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entity_type, entity_key, source, detail, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
