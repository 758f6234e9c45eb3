//! Common test utilities and fixture helpers.
//!
//! Builds a small SQLite universe in a temp directory:
//!
//! ```text
//!            Perimeter(2) --- Urlen(3)
//!           /      |              \
//!   Jita(1)      Tama(8, low)      Amarr(7)
//!           \      |              /
//!   Sobaseki(4) - Niyabainen(5) - Jitterbug(6)
//!                  Nullsville(9, null) hangs off Tama
//!                  Island(10) has no gates
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use haulroute_lib::{
    initialize_schema, GraphStore, GraphStoreConfig, RouteEngine, RouteOracle, SystemId,
};
use rusqlite::Connection;
use tempfile::TempDir;

pub const JITA: SystemId = 1;
pub const PERIMETER: SystemId = 2;
pub const URLEN: SystemId = 3;
pub const SOBASEKI: SystemId = 4;
#[allow(dead_code)]
pub const NIYABAINEN: SystemId = 5;
#[allow(dead_code)]
pub const JITTERBUG: SystemId = 6;
pub const AMARR: SystemId = 7;
#[allow(dead_code)]
pub const TAMA: SystemId = 8;
#[allow(dead_code)]
pub const NULLSVILLE: SystemId = 9;
#[allow(dead_code)]
pub const ISLAND: SystemId = 10;

const SYSTEMS: &str = "
    (1, 'Jita', 0.95, 10, 100),
    (2, 'Perimeter', 0.92, 10, 100),
    (3, 'Urlen', 0.84, 10, 100),
    (4, 'Sobaseki', 0.74, 11, 100),
    (5, 'Niyabainen', 0.91, 11, 100),
    (6, 'Jitterbug', 0.62, 11, 100),
    (7, 'Amarr', 1.0, 12, 101),
    (8, 'Tama', 0.31, 13, 102),
    (9, 'Nullsville', -0.42, 14, 103),
    (10, 'Island', 0.9, 15, 104)";

const GATES: &[(SystemId, SystemId)] = &[
    (1, 2),
    (2, 3),
    (3, 7),
    (1, 4),
    (4, 5),
    (5, 6),
    (6, 7),
    (2, 8),
    (8, 9),
];

/// Temp database plus helpers to populate it.
#[allow(dead_code)]
pub struct TestUniverse {
    /// Temp directory (dropped on struct drop)
    _temp_dir: TempDir,
    pub db_path: PathBuf,
}

#[allow(dead_code)]
impl TestUniverse {
    /// Full universe: graph tables, reference tables, and a station.
    pub fn new() -> Self {
        let universe = Self::empty();
        let conn = universe.connect();
        conn.execute_batch(&format!(
            "INSERT INTO map_systems VALUES {SYSTEMS};
             INSERT INTO reference_systems VALUES {SYSTEMS};
             INSERT INTO reference_regions VALUES
                 (100, 'The Forge'), (101, 'Domain'), (102, 'The Citadel'),
                 (103, 'Venal'), (104, 'Outer Ring');
             INSERT INTO reference_locations VALUES
                 (60003760, 'Jita IV - Moon 4 - Caldari Navy Assembly Plant', 1, 'station'),
                 (1022734985679, 'Amarr Freeport Keepstar', 7, 'structure');"
        ))
        .expect("seed systems");
        universe.add_gates(GATES);
        universe
    }

    /// Reference data only; the graph tables exist but hold no gates.
    pub fn without_gates() -> Self {
        let universe = Self::empty();
        universe
            .connect()
            .execute_batch(&format!(
                "INSERT INTO reference_systems VALUES {SYSTEMS};
                 INSERT INTO map_systems VALUES (1, 'Jita', 0.95, 10, 100);"
            ))
            .expect("seed reference systems");
        universe
    }

    fn empty() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let db_path = temp_dir.path().join("haulroute.db");
        let conn = Connection::open(&db_path).expect("create database");
        initialize_schema(&conn).expect("initialize schema");
        Self {
            _temp_dir: temp_dir,
            db_path,
        }
    }

    pub fn connect(&self) -> Connection {
        Connection::open(&self.db_path).expect("open test database")
    }

    pub fn add_gates(&self, gates: &[(SystemId, SystemId)]) {
        let conn = self.connect();
        for (a, b) in gates {
            conn.execute(
                "INSERT OR IGNORE INTO map_system_gates VALUES (?1, ?2), (?2, ?1)",
                [a, b],
            )
            .expect("insert gate");
        }
    }

    /// Insert an active avoidance rule; returns its id.
    pub fn add_rule(
        &self,
        scope_type: &str,
        id_a: i64,
        id_b: Option<i64>,
        severity: i64,
        hard_block: bool,
    ) -> i64 {
        let conn = self.connect();
        conn.execute(
            "INSERT INTO avoid_rules (scope_type, id_a, id_b, severity, hard_block, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, 'test rule')",
            rusqlite::params![scope_type, id_a, id_b, severity, hard_block],
        )
        .expect("insert rule");
        conn.last_insert_rowid()
    }

    pub fn deactivate_rule(&self, id: i64) {
        self.connect()
            .execute("UPDATE avoid_rules SET active = 0 WHERE id = ?1", [id])
            .expect("deactivate rule");
    }

    /// Store config that treats this tiny universe as healthy.
    pub fn store_config(&self) -> GraphStoreConfig {
        GraphStoreConfig {
            min_nodes: 1,
            critical_systems: Vec::new(),
            ..GraphStoreConfig::default()
        }
    }

    pub fn store(&self) -> Arc<GraphStore> {
        Arc::new(GraphStore::new(self.db_path.clone(), self.store_config()))
    }

    pub fn engine(&self) -> RouteEngine {
        RouteEngine::new(self.store())
    }
}

/// Oracle double returning a canned path and recording each call.
#[allow(dead_code)]
#[derive(Default)]
pub struct StubOracle {
    pub path: Vec<SystemId>,
    pub calls: Mutex<Vec<(SystemId, SystemId, String, Vec<SystemId>)>>,
}

#[allow(dead_code)]
impl StubOracle {
    pub fn returning(path: Vec<SystemId>) -> Arc<Self> {
        Arc::new(Self {
            path,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

impl RouteOracle for StubOracle {
    fn fetch_path(
        &self,
        origin: SystemId,
        destination: SystemId,
        mode_flag: &str,
        avoid: &[SystemId],
    ) -> haulroute_lib::Result<Vec<SystemId>> {
        self.calls.lock().expect("calls lock").push((
            origin,
            destination,
            mode_flag.to_string(),
            avoid.to_vec(),
        ));
        if self.path.is_empty() {
            return Err(haulroute_lib::Error::OracleEmptyPath);
        }
        Ok(self.path.clone())
    }
}
