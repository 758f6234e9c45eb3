use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Numeric identifier for a solar system (graph node).
pub type SystemId = i64;
/// Identifier of a constellation, the region-group a system belongs to.
pub type ConstellationId = i64;
/// Identifier of a region, the super-region-group a constellation belongs to.
pub type RegionId = i64;

/// A routable solar system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct System {
    pub id: SystemId,
    pub name: String,
    pub security: f64,
    pub constellation_id: ConstellationId,
    pub region_id: RegionId,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS map_systems (
    system_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    security REAL NOT NULL,
    constellation_id INTEGER NOT NULL,
    region_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS map_system_gates (
    from_system_id INTEGER NOT NULL,
    to_system_id INTEGER NOT NULL,
    PRIMARY KEY (from_system_id, to_system_id)
);
CREATE TABLE IF NOT EXISTS reference_systems (
    system_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    security REAL NOT NULL,
    constellation_id INTEGER NOT NULL,
    region_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS reference_constellations (
    constellation_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    region_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS reference_regions (
    region_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reference_locations (
    location_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    system_id INTEGER NOT NULL,
    location_type TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS avoid_rules (
    id INTEGER PRIMARY KEY,
    scope_type TEXT NOT NULL,
    id_a INTEGER,
    id_b INTEGER,
    severity INTEGER DEFAULT 1,
    hard_block INTEGER NOT NULL DEFAULT 0,
    apply_pickup INTEGER,
    apply_delivery INTEGER,
    apply_transit INTEGER,
    reason TEXT,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS engine_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS graph_backfill_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    source TEXT NOT NULL,
    detail TEXT,
    created_at TEXT NOT NULL
);
";

/// Tables (and their columns) the graph loader cannot work without.
const REQUIRED_GRAPH_TABLES: &[(&str, &[&str])] = &[
    (
        "map_systems",
        &["system_id", "name", "security", "constellation_id", "region_id"],
    ),
    ("map_system_gates", &["from_system_id", "to_system_id"]),
];

/// Open the backing store, refusing to silently create a fresh database.
pub fn open_database(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(Error::DatabaseNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(Connection::open(path)?)
}

/// Open or create the database at `path` (and its parent directory), then
/// make sure the schema exists.
pub fn create_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    initialize_schema(&connection)?;
    debug!(path = %path.display(), "database schema ready");
    Ok(connection)
}

/// Create every table the engine reads or writes. Safe to run repeatedly.
pub fn initialize_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(SCHEMA)?;
    Ok(())
}

/// Load graph nodes and symmetric, deduplicated adjacency lists.
///
/// Gate rows referencing systems that are not present in `map_systems` are
/// skipped so a corrupt edge never reaches the in-memory graph.
pub fn load_graph(
    connection: &Connection,
) -> Result<(HashMap<SystemId, System>, HashMap<SystemId, Vec<SystemId>>)> {
    verify_graph_schema(connection)?;

    let systems = load_systems(connection)?;
    let adjacency = load_adjacency(connection, &systems)?;
    debug!(
        systems = systems.len(),
        connected = adjacency.len(),
        "loaded graph tables"
    );
    Ok((systems, adjacency))
}

fn verify_graph_schema(connection: &Connection) -> Result<()> {
    for (table, columns) in REQUIRED_GRAPH_TABLES {
        if !table_exists(connection, table)? {
            return Err(Error::UnsupportedSchema {
                what: format!("table {table}"),
            });
        }
        if !table_has_columns(connection, table, columns)? {
            return Err(Error::UnsupportedSchema {
                what: format!("columns {} on {table}", columns.join(", ")),
            });
        }
    }
    Ok(())
}

fn load_systems(connection: &Connection) -> Result<HashMap<SystemId, System>> {
    let mut stmt = connection.prepare(
        "SELECT system_id, name, security, constellation_id, region_id FROM map_systems",
    )?;
    let rows = stmt.query_map([], row_to_system)?;

    let mut systems = HashMap::new();
    for entry in rows {
        let system = entry?;
        systems.insert(system.id, system);
    }
    Ok(systems)
}

fn load_adjacency(
    connection: &Connection,
    systems: &HashMap<SystemId, System>,
) -> Result<HashMap<SystemId, Vec<SystemId>>> {
    let mut stmt = connection.prepare("SELECT from_system_id, to_system_id FROM map_system_gates")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut adjacency: HashMap<SystemId, Vec<SystemId>> = HashMap::new();
    let mut skipped_edges = 0usize;
    for row in rows {
        let (from, to): (SystemId, SystemId) = row?;
        if from == to || !systems.contains_key(&from) || !systems.contains_key(&to) {
            skipped_edges += 1;
            continue;
        }
        adjacency.entry(from).or_default().push(to);
        adjacency.entry(to).or_default().push(from);
    }

    for neighbours in adjacency.values_mut() {
        neighbours.sort_unstable();
        neighbours.dedup();
    }

    if skipped_edges > 0 {
        warn!(
            skipped_edges,
            "ignored gate edges referencing unknown or identical systems"
        );
    }

    Ok(adjacency)
}

pub(crate) fn row_to_system(row: &Row<'_>) -> rusqlite::Result<System> {
    Ok(System {
        id: row.get(0)?,
        name: row.get(1)?,
        security: row.get(2)?,
        constellation_id: row.get(3)?,
        region_id: row.get(4)?,
    })
}

/// Look a system up in the graph table first, then the reference table.
pub fn lookup_system(connection: &Connection, id: SystemId) -> Result<Option<System>> {
    let graph = connection
        .query_row(
            "SELECT system_id, name, security, constellation_id, region_id
             FROM map_systems WHERE system_id = ?1",
            [id],
            row_to_system,
        )
        .optional()?;
    if graph.is_some() {
        return Ok(graph);
    }
    lookup_reference_system(connection, id)
}

/// Look a system up in the reference table only.
pub fn lookup_reference_system(connection: &Connection, id: SystemId) -> Result<Option<System>> {
    Ok(connection
        .query_row(
            "SELECT system_id, name, security, constellation_id, region_id
             FROM reference_systems WHERE system_id = ?1",
            [id],
            row_to_system,
        )
        .optional()?)
}

/// Resolve system names (case-insensitive) to ids across both system tables.
pub fn system_ids_by_names(connection: &Connection, names: &[String]) -> Result<BTreeSet<SystemId>> {
    let mut ids = BTreeSet::new();
    let mut stmt = connection.prepare(
        "SELECT system_id FROM map_systems WHERE lower(name) = lower(?1)
         UNION SELECT system_id FROM reference_systems WHERE lower(name) = lower(?1)",
    )?;
    for name in names {
        let rows = stmt.query_map([name.trim()], |row| row.get::<_, SystemId>(0))?;
        for row in rows {
            ids.insert(row?);
        }
    }
    Ok(ids)
}

/// Resolve region names (case-insensitive) to ids.
pub fn region_ids_by_names(connection: &Connection, names: &[String]) -> Result<BTreeSet<RegionId>> {
    let mut ids = BTreeSet::new();
    let mut stmt =
        connection.prepare("SELECT region_id FROM reference_regions WHERE lower(name) = lower(?1)")?;
    for name in names {
        let rows = stmt.query_map([name.trim()], |row| row.get::<_, RegionId>(0))?;
        for row in rows {
            ids.insert(row?);
        }
    }
    Ok(ids)
}

/// Every known system id whose `column` (constellation or region) is in `ids`.
pub(crate) fn system_ids_in_groups(
    connection: &Connection,
    column: GroupColumn,
    ids: &[i64],
) -> Result<BTreeSet<SystemId>> {
    let column = column.as_str();
    let sql = format!(
        "SELECT system_id FROM map_systems WHERE {column} = ?1
         UNION SELECT system_id FROM reference_systems WHERE {column} = ?1"
    );
    let mut stmt = connection.prepare(&sql)?;
    let mut systems = BTreeSet::new();
    for id in ids {
        let rows = stmt.query_map([id], |row| row.get::<_, SystemId>(0))?;
        for row in rows {
            systems.insert(row?);
        }
    }
    Ok(systems)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupColumn {
    Constellation,
    Region,
}

impl GroupColumn {
    fn as_str(self) -> &'static str {
        match self {
            GroupColumn::Constellation => "constellation_id",
            GroupColumn::Region => "region_id",
        }
    }
}

/// Read a JSON document from `engine_settings`.
pub fn read_setting<T: DeserializeOwned>(connection: &Connection, key: &str) -> Result<Option<T>> {
    if !table_exists(connection, "engine_settings")? {
        return Ok(None);
    }
    let raw: Option<String> = connection
        .query_row(
            "SELECT value FROM engine_settings WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| Error::InvalidSetting {
                key: key.to_string(),
                message: err.to_string(),
            }),
        None => Ok(None),
    }
}

/// Upsert a JSON document into `engine_settings`.
pub fn write_setting<T: Serialize>(connection: &Connection, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    connection.execute(
        "INSERT INTO engine_settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, raw],
    )?;
    Ok(())
}

pub(crate) fn table_exists(connection: &Connection, table: &str) -> Result<bool> {
    let mut stmt = connection
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1")?;
    let mut rows = stmt.query([table])?;
    Ok(rows.next()?.is_some())
}

fn table_has_columns(connection: &Connection, table: &str, required: &[&str]) -> Result<bool> {
    let pragma = format!("PRAGMA table_info('{table}')");
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;

    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        columns.push(name);
    }

    Ok(required.iter().all(|required| {
        columns
            .iter()
            .any(|column| column.eq_ignore_ascii_case(required))
    }))
}
