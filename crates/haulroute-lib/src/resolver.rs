//! Free-text location name resolution.

use std::fmt;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{self, SystemId};
use crate::error::{ReasonCode, RoutingFailure};
use crate::store::GraphSnapshot;

/// Maximum number of substring candidates pulled from each table.
const SUBSTRING_CANDIDATE_LIMIT: usize = 10;

/// Separator of composite `System — Location` labels.
const COMPOSITE_SEPARATOR: char = '—';

const SUGGESTION_LIMIT: usize = 3;

/// System tables searched by name, graph table first.
const SYSTEM_TABLES: [&str; 2] = ["map_systems", "reference_systems"];

/// Table an explicit identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    System,
    Station,
    Structure,
}

impl LocationKind {
    fn as_str(self) -> &'static str {
        match self {
            LocationKind::System => "system",
            LocationKind::Station => "station",
            LocationKind::Structure => "structure",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location as supplied by a caller: free text, optionally pinned to an id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationQuery {
    pub text: String,
    pub explicit: Option<(i64, LocationKind)>,
}

impl LocationQuery {
    pub fn name(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            explicit: None,
        }
    }

    pub fn id(id: i64, kind: LocationKind) -> Self {
        Self {
            text: String::new(),
            explicit: Some((id, kind)),
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLocation {
    pub system_id: SystemId,
    /// Station or structure id when the caller named one explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<i64>,
    pub matched_name: String,
}

impl ResolvedLocation {
    fn system(system_id: SystemId, name: String) -> Self {
        Self {
            system_id,
            location_id: None,
            matched_name: name,
        }
    }
}

/// Trim, collapse internal whitespace, and lowercase a location name.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Resolves names against the graph table, the reference table, and the
/// station/structure table, in that order.
pub struct LocationResolver<'a> {
    connection: &'a Connection,
    snapshot: &'a GraphSnapshot,
}

impl<'a> LocationResolver<'a> {
    pub fn new(connection: &'a Connection, snapshot: &'a GraphSnapshot) -> Self {
        Self {
            connection,
            snapshot,
        }
    }

    pub fn resolve(&self, query: &LocationQuery) -> Result<ResolvedLocation, RoutingFailure> {
        if let Some((id, kind)) = query.explicit {
            return self.resolve_explicit(id, kind);
        }

        let normalized = normalize_name(&query.text);
        if normalized.is_empty() {
            return Err(RoutingFailure::new(
                ReasonCode::InvalidName,
                "location name is empty",
            ));
        }

        if let Some((prefix, _)) = normalized.split_once(COMPOSITE_SEPARATOR) {
            let prefix = prefix.trim();
            if !prefix.is_empty() {
                if let Some(found) = self.exact_system(prefix)? {
                    return Ok(found);
                }
            }
        }

        if let Some(found) = self.exact_system(&normalized)? {
            return Ok(found);
        }
        if let Some(found) = self.exact_location(&normalized)? {
            return Ok(found);
        }

        for table in SYSTEM_TABLES {
            let mut matches = self.substring_matches(table, &normalized)?;
            if matches.len() > 1 {
                return Err(ambiguous(&query.text, matches));
            }
            if let Some((id, name)) = matches.pop() {
                debug!(query = %query.text, system_id = id, table, "resolved by substring");
                return Ok(ResolvedLocation::system(id, name));
            }
        }

        let suggestions = self
            .snapshot
            .fuzzy_system_matches(&query.text, SUGGESTION_LIMIT);
        Err(RoutingFailure::new(
            ReasonCode::UnknownName,
            format!("unknown location name: {}", query.text.trim()),
        )
        .with_candidates(suggestions))
    }

    fn resolve_explicit(
        &self,
        id: i64,
        kind: LocationKind,
    ) -> Result<ResolvedLocation, RoutingFailure> {
        match kind {
            LocationKind::System => {
                if let Some(system) = self.snapshot.system(id) {
                    return Ok(ResolvedLocation::system(id, system.name.clone()));
                }
                db::lookup_system(self.connection, id)?
                    .map(|system| ResolvedLocation::system(system.id, system.name))
                    .ok_or_else(|| unknown_id(id, kind))
            }
            LocationKind::Station | LocationKind::Structure => {
                let row: Option<(SystemId, String)> = self
                    .connection
                    .query_row(
                        "SELECT system_id, name FROM reference_locations
                         WHERE location_id = ?1 AND location_type = ?2",
                        rusqlite::params![id, kind.as_str()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                row.map(|(system_id, name)| ResolvedLocation {
                    system_id,
                    location_id: Some(id),
                    matched_name: name,
                })
                .ok_or_else(|| unknown_id(id, kind))
            }
        }
    }

    fn exact_system(&self, normalized: &str) -> Result<Option<ResolvedLocation>, RoutingFailure> {
        if let Some(id) = self.snapshot.system_id_by_name(normalized) {
            if let Some(name) = self.snapshot.system_name(id) {
                return Ok(Some(ResolvedLocation::system(id, name.to_string())));
            }
        }

        let mut matches: Vec<(SystemId, String)> = Vec::new();
        for table in SYSTEM_TABLES {
            let sql = format!("SELECT system_id, name FROM {table} ORDER BY system_id");
            for (id, name) in self.scan_names(&sql, |candidate| candidate == normalized)? {
                if !matches.iter().any(|(existing, _)| *existing == id) {
                    matches.push((id, name));
                }
            }
        }
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches
                .pop()
                .map(|(id, name)| ResolvedLocation::system(id, name))),
            _ => Err(ambiguous(normalized, matches)),
        }
    }

    fn exact_location(&self, normalized: &str) -> Result<Option<ResolvedLocation>, RoutingFailure> {
        let mut matches = self.scan_names(
            "SELECT system_id, name FROM reference_locations ORDER BY location_id",
            |candidate| candidate == normalized,
        )?;
        matches.truncate(SUBSTRING_CANDIDATE_LIMIT);
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches
                .pop()
                .map(|(id, name)| ResolvedLocation::system(id, name))),
            _ => Err(ambiguous(normalized, matches)),
        }
    }

    fn substring_matches(
        &self,
        table: &str,
        normalized: &str,
    ) -> Result<Vec<(SystemId, String)>, RoutingFailure> {
        let sql = format!("SELECT system_id, name FROM {table} ORDER BY name");
        let mut matches = self.scan_names(&sql, |candidate| candidate.contains(normalized))?;
        matches.truncate(SUBSTRING_CANDIDATE_LIMIT);
        Ok(matches)
    }

    /// Rows of `(system_id, name)` whose normalized name satisfies `keep`.
    ///
    /// Names are compared in Rust: SQLite's `lower()` folds ASCII only and
    /// cannot collapse internal whitespace.
    fn scan_names(
        &self,
        sql: &str,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Vec<(SystemId, String)>, RoutingFailure> {
        let mut stmt = self.connection.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, SystemId>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut matches = Vec::new();
        for row in rows {
            let (id, name) = row?;
            if keep(&normalize_name(&name)) {
                matches.push((id, name));
            }
        }
        Ok(matches)
    }
}

fn ambiguous(query: &str, matches: Vec<(SystemId, String)>) -> RoutingFailure {
    let candidates: Vec<String> = matches.into_iter().map(|(_, name)| name).collect();
    RoutingFailure::new(
        ReasonCode::AmbiguousName,
        format!(
            "location name '{}' is ambiguous: {}",
            query.trim(),
            candidates.join(", ")
        ),
    )
    .with_candidates(candidates)
}

fn unknown_id(id: i64, kind: LocationKind) -> RoutingFailure {
    RoutingFailure::new(ReasonCode::UnknownName, format!("unknown {kind} id {id}"))
}
