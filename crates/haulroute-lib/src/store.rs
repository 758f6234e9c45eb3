//! Process-wide graph cache.
//!
//! [`GraphStore`] owns the current [`GraphSnapshot`] behind an `Arc`. Readers
//! clone the `Arc` and work on an immutable generation; a refresh builds a new
//! snapshot off to the side and swaps the pointer, so an in-flight search never
//! sees a half-loaded graph.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::db::{self, System, SystemId};
use crate::error::Result;
use crate::resolver::normalize_name;

/// Jita and Amarr: trade hubs with enough gates that a missing or isolated
/// entry reliably signals an incomplete import.
pub const DEFAULT_CRITICAL_SYSTEMS: [SystemId; 2] = [30000142, 30002187];

/// Smallest node count considered a usable universe.
pub const DEFAULT_MIN_NODES: usize = 5000;

/// Default cache lifetime before a snapshot is reloaded.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Why a graph snapshot cannot be trusted for local routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthReason {
    GraphEmpty,
    GraphTooSmall,
    GraphMissingEdges,
}

impl HealthReason {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthReason::GraphEmpty => "graph_empty",
            HealthReason::GraphTooSmall => "graph_too_small",
            HealthReason::GraphMissingEdges => "graph_missing_edges",
        }
    }
}

/// Readiness assessment of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphHealth {
    pub node_count: usize,
    pub edge_count: usize,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<HealthReason>,
}

/// Tunables for [`GraphStore`].
#[derive(Debug, Clone)]
pub struct GraphStoreConfig {
    pub ttl: Duration,
    pub min_nodes: usize,
    pub critical_systems: Vec<SystemId>,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            min_nodes: DEFAULT_MIN_NODES,
            critical_systems: DEFAULT_CRITICAL_SYSTEMS.to_vec(),
        }
    }
}

/// Immutable in-memory view of the graph tables.
#[derive(Debug)]
pub struct GraphSnapshot {
    systems: HashMap<SystemId, System>,
    adjacency: HashMap<SystemId, Vec<SystemId>>,
    name_to_id: HashMap<String, SystemId>,
    health: GraphHealth,
    generation: u64,
    loaded_at: Instant,
}

impl GraphSnapshot {
    /// Build a snapshot from loaded tables and assess its health.
    ///
    /// Neighbour lists are sorted and deduplicated here; [`Self::connected`]
    /// relies on that ordering.
    pub fn from_parts(
        systems: HashMap<SystemId, System>,
        mut adjacency: HashMap<SystemId, Vec<SystemId>>,
        config: &GraphStoreConfig,
        generation: u64,
    ) -> Self {
        for neighbours in adjacency.values_mut() {
            neighbours.sort_unstable();
            neighbours.dedup();
        }
        let mut name_to_id = HashMap::with_capacity(systems.len());
        for system in systems.values() {
            name_to_id.insert(normalize_name(&system.name), system.id);
        }
        let health = assess_health(&systems, &adjacency, config);
        Self {
            systems,
            adjacency,
            name_to_id,
            health,
            generation,
            loaded_at: Instant::now(),
        }
    }

    pub fn system(&self, id: SystemId) -> Option<&System> {
        self.systems.get(&id)
    }

    pub fn contains(&self, id: SystemId) -> bool {
        self.systems.contains_key(&id)
    }

    pub fn systems(&self) -> impl Iterator<Item = &System> {
        self.systems.values()
    }

    /// Return the neighbours for a given system identifier.
    pub fn neighbours(&self, id: SystemId) -> &[SystemId] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn degree(&self, id: SystemId) -> usize {
        self.neighbours(id).len()
    }

    /// Whether `a` and `b` share a direct connection.
    pub fn connected(&self, a: SystemId, b: SystemId) -> bool {
        self.neighbours(a).binary_search(&b).is_ok()
    }

    /// Lookup by case-insensitive, whitespace-normalized name.
    pub fn system_id_by_name(&self, name: &str) -> Option<SystemId> {
        self.name_to_id.get(&normalize_name(name)).copied()
    }

    pub fn system_name(&self, id: SystemId) -> Option<&str> {
        self.systems.get(&id).map(|system| system.name.as_str())
    }

    /// Closest system names by Jaro-Winkler similarity, best first.
    pub fn fuzzy_system_matches(&self, name: &str, limit: usize) -> Vec<String> {
        let needle = normalize_name(name);
        let mut scored: Vec<(f64, &str)> = self
            .systems
            .values()
            .map(|system| {
                let score = strsim::jaro_winkler(&needle, &normalize_name(&system.name));
                (score, system.name.as_str())
            })
            .filter(|(score, _)| *score >= 0.8)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    pub fn health(&self) -> &GraphHealth {
        &self.health
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() >= ttl
    }
}

fn assess_health(
    systems: &HashMap<SystemId, System>,
    adjacency: &HashMap<SystemId, Vec<SystemId>>,
    config: &GraphStoreConfig,
) -> GraphHealth {
    let node_count = systems.len();
    let edge_count = adjacency.values().map(Vec::len).sum::<usize>() / 2;

    let reason = if node_count == 0 || edge_count == 0 {
        Some(HealthReason::GraphEmpty)
    } else if node_count < config.min_nodes {
        Some(HealthReason::GraphTooSmall)
    } else if config.critical_systems.iter().any(|id| {
        !systems.contains_key(id) || adjacency.get(id).map_or(true, Vec::is_empty)
    }) {
        Some(HealthReason::GraphMissingEdges)
    } else {
        None
    };

    GraphHealth {
        node_count,
        edge_count,
        ready: reason.is_none(),
        reason,
    }
}

/// Lazily loaded, TTL-refreshed graph cache over a SQLite database.
///
/// Share one instance per process (behind an `Arc`) and hand it to every
/// [`crate::RouteEngine`].
#[derive(Debug)]
pub struct GraphStore {
    db_path: PathBuf,
    config: GraphStoreConfig,
    current: RwLock<Option<Arc<GraphSnapshot>>>,
    generation: AtomicU64,
    /// Bumped by [`Self::invalidate`]; a load that straddles a bump is not cached.
    invalidations: AtomicU64,
}

impl GraphStore {
    pub fn new(db_path: impl Into<PathBuf>, config: GraphStoreConfig) -> Self {
        Self {
            db_path: db_path.into(),
            config,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn config(&self) -> &GraphStoreConfig {
        &self.config
    }

    /// Open a fresh connection to the backing store.
    pub fn connect(&self) -> Result<rusqlite::Connection> {
        db::open_database(&self.db_path)
    }

    /// Current snapshot, loading or refreshing it when missing or stale.
    pub fn snapshot(&self) -> Result<Arc<GraphSnapshot>> {
        if let Some(snapshot) = self.cached() {
            if !snapshot.is_stale(self.config.ttl) {
                return Ok(snapshot);
            }
            debug!(generation = snapshot.generation(), "graph snapshot expired");
        }
        self.load()
    }

    /// Force a reload from the backing store and swap it in.
    ///
    /// If [`Self::invalidate`] runs while the tables are being read, the
    /// result is returned to this caller but not cached, so the next reader
    /// reloads and sees the newer data.
    pub fn load(&self) -> Result<Arc<GraphSnapshot>> {
        let epoch = self.invalidations.load(Ordering::SeqCst);
        let snapshot = self.read_snapshot()?;
        self.install(&snapshot, epoch);
        Ok(snapshot)
    }

    fn read_snapshot(&self) -> Result<Arc<GraphSnapshot>> {
        let connection = self.connect()?;
        let (systems, adjacency) = db::load_graph(&connection)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(GraphSnapshot::from_parts(
            systems,
            adjacency,
            &self.config,
            generation,
        ));

        let health = snapshot.health();
        info!(
            generation,
            nodes = health.node_count,
            edges = health.edge_count,
            ready = health.ready,
            reason = health.reason.map(HealthReason::as_str),
            "graph snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Cache `snapshot` unless an invalidation happened after `epoch` was read.
    fn install(&self, snapshot: &Arc<GraphSnapshot>, epoch: u64) -> bool {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.invalidations.load(Ordering::SeqCst) != epoch {
            debug!(
                generation = snapshot.generation(),
                "graph snapshot superseded by invalidation; not cached"
            );
            return false;
        }
        *slot = Some(Arc::clone(snapshot));
        true
    }

    /// Health of the current snapshot (loading it if needed).
    pub fn health(&self) -> Result<GraphHealth> {
        Ok(self.snapshot()?.health().clone())
    }

    /// Drop the cached snapshot; the next reader reloads.
    pub fn invalidate(&self) {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        if slot.take().is_some() {
            debug!("graph snapshot invalidated");
        }
    }

    /// Generation number of the most recent successful load (0 before any).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn cached(&self) -> Option<Arc<GraphSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(id: SystemId, name: &str) -> System {
        System {
            id,
            name: name.to_string(),
            security: 0.9,
            constellation_id: 1,
            region_id: 1,
        }
    }

    fn config(min_nodes: usize, critical: Vec<SystemId>) -> GraphStoreConfig {
        GraphStoreConfig {
            ttl: Duration::from_secs(60),
            min_nodes,
            critical_systems: critical,
        }
    }

    fn line(ids: &[SystemId]) -> (HashMap<SystemId, System>, HashMap<SystemId, Vec<SystemId>>) {
        let systems = ids
            .iter()
            .map(|&id| (id, system(id, &format!("S{id}"))))
            .collect();
        let mut adjacency: HashMap<SystemId, Vec<SystemId>> = HashMap::new();
        for pair in ids.windows(2) {
            adjacency.entry(pair[0]).or_default().push(pair[1]);
            adjacency.entry(pair[1]).or_default().push(pair[0]);
        }
        (systems, adjacency)
    }

    #[test]
    fn empty_graph_is_not_ready() {
        let (systems, _) = line(&[1, 2]);
        let snapshot = GraphSnapshot::from_parts(systems, HashMap::new(), &config(1, vec![]), 1);
        assert!(!snapshot.health().ready);
        assert_eq!(snapshot.health().reason, Some(HealthReason::GraphEmpty));
    }

    #[test]
    fn small_graph_is_not_ready() {
        let (systems, adjacency) = line(&[1, 2, 3]);
        let snapshot = GraphSnapshot::from_parts(systems, adjacency, &config(10, vec![]), 1);
        assert_eq!(snapshot.health().reason, Some(HealthReason::GraphTooSmall));
        assert_eq!(snapshot.health().edge_count, 2);
    }

    #[test]
    fn isolated_critical_system_is_flagged() {
        let (mut systems, adjacency) = line(&[1, 2, 3]);
        systems.insert(4, system(4, "Hub"));
        let snapshot = GraphSnapshot::from_parts(systems, adjacency, &config(1, vec![2, 4]), 1);
        assert_eq!(
            snapshot.health().reason,
            Some(HealthReason::GraphMissingEdges)
        );
    }

    #[test]
    fn healthy_graph_is_ready() {
        let (systems, adjacency) = line(&[1, 2, 3]);
        let snapshot = GraphSnapshot::from_parts(systems, adjacency, &config(3, vec![2]), 1);
        assert!(snapshot.health().ready);
        assert!(snapshot.health().reason.is_none());
        assert!(snapshot.connected(1, 2));
        assert!(!snapshot.connected(1, 3));
        assert_eq!(snapshot.degree(2), 2);
    }

    #[test]
    fn name_lookup_is_case_and_whitespace_insensitive() {
        let (mut systems, adjacency) = line(&[1, 2]);
        systems.insert(3, system(3, "New  Caldari"));
        let snapshot = GraphSnapshot::from_parts(systems, adjacency, &config(1, vec![]), 1);
        assert_eq!(snapshot.system_id_by_name("  new caldari "), Some(3));
        assert_eq!(snapshot.fuzzy_system_matches("New Caldary", 3), vec!["New  Caldari"]);
    }

    #[test]
    fn unsorted_neighbours_are_normalized() {
        let (systems, _) = line(&[1, 2, 3, 4]);
        let adjacency = HashMap::from([
            (1, vec![4, 3, 2, 3]),
            (2, vec![1]),
            (3, vec![1]),
            (4, vec![1]),
        ]);
        let snapshot = GraphSnapshot::from_parts(systems, adjacency, &config(1, vec![]), 1);
        assert_eq!(snapshot.neighbours(1), &[2, 3, 4]);
        assert!(snapshot.connected(1, 4));
        assert!(snapshot.connected(1, 2));
        assert_eq!(snapshot.health().edge_count, 3);
    }

    fn seeded_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haulroute.db");
        let conn = db::create_database(&path).unwrap();
        conn.execute_batch(
            "INSERT INTO map_systems VALUES (1, 'Alpha', 0.9, 1, 1), (2, 'Beta', 0.9, 1, 1);
             INSERT INTO map_system_gates VALUES (1, 2), (2, 1);",
        )
        .unwrap();
        (dir, GraphStore::new(path, config(1, vec![])))
    }

    #[test]
    fn load_racing_an_invalidation_is_not_cached() {
        let (_dir, store) = seeded_store();

        let epoch = store.invalidations.load(Ordering::SeqCst);
        let stale = store.read_snapshot().unwrap();
        store.invalidate();
        assert!(!store.install(&stale, epoch));
        assert!(store.cached().is_none());

        let fresh = store.snapshot().unwrap();
        assert!(fresh.generation() > stale.generation());
        assert!(Arc::ptr_eq(&fresh, &store.cached().unwrap()));
    }

    #[test]
    fn load_caches_when_undisturbed() {
        let (_dir, store) = seeded_store();
        let loaded = store.load().unwrap();
        assert!(Arc::ptr_eq(&loaded, &store.snapshot().unwrap()));
        assert_eq!(loaded.health().edge_count, 1);
    }
}
