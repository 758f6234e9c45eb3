//! Route planning entry point.
//!
//! [`RouteEngine::plan_route`] ties the pieces together:
//! 1. Resolve both location names to systems
//! 2. Load avoidance rules and the security policy for this call
//! 3. Reject endpoints that fail the profile, allowlist, policy, or hard rules
//! 4. Search the cached graph locally when it is healthy and has both endpoints
//! 5. Otherwise ask the routing oracle, validate its answer, and backfill

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::{self, RegionId, System, SystemId};
use crate::error::{ReasonCode, Result, RoutingFailure};
use crate::fallback::{self, BackfillMode, BackfillReport, PathValidator, ORACLE_SOURCE};
use crate::oracle::{EsiRouteOracle, RouteOracle};
use crate::resolver::{LocationQuery, LocationResolver, ResolvedLocation};
use crate::rules::{AvoidRule, Phase, RuleSet};
use crate::search::{self, RouteProfile, SearchContext};
use crate::security::{SecurityClass, SecurityPolicy};
use crate::store::{GraphHealth, GraphSnapshot, GraphStore};

/// Where callers may pick up from or deliver to. An empty scope allows all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessScope {
    pub system_ids: BTreeSet<SystemId>,
    pub region_ids: BTreeSet<RegionId>,
    /// Station or structure ids; only match endpoints resolved from one.
    pub location_ids: BTreeSet<i64>,
}

impl AccessScope {
    pub fn is_empty(&self) -> bool {
        self.system_ids.is_empty() && self.region_ids.is_empty() && self.location_ids.is_empty()
    }

    pub fn permits(&self, system: &System, location_id: Option<i64>) -> bool {
        self.is_empty()
            || self.system_ids.contains(&system.id)
            || self.region_ids.contains(&system.region_id)
            || location_id.is_some_and(|id| self.location_ids.contains(&id))
    }
}

/// Caller-supplied pickup/delivery allowlists, checked before any search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessAllowlist {
    pub pickup: AccessScope,
    pub delivery: AccessScope,
}

/// High-level route planning request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub origin: LocationQuery,
    pub destination: LocationQuery,
    pub profile: RouteProfile,
    pub access: AccessAllowlist,
}

impl RouteRequest {
    /// Convenience constructor for a balanced route between two names.
    pub fn new(origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            origin: LocationQuery::name(origin),
            destination: LocationQuery::name(destination),
            profile: RouteProfile::default(),
            access: AccessAllowlist::default(),
        }
    }

    pub fn with_profile(mut self, profile: RouteProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_access(mut self, access: AccessAllowlist) -> Self {
        self.access = access;
        self
    }
}

/// Which engine produced the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Local,
    Oracle,
}

/// One system on a computed route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStep {
    pub system_id: SystemId,
    pub name: String,
    pub security: f64,
    pub class: SecurityClass,
}

/// Normalized route record handed back to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub origin: SystemId,
    pub destination: SystemId,
    pub path: Vec<RouteStep>,
    pub hop_count: usize,
    /// Systems per security class, excluding the origin.
    pub class_counts: BTreeMap<SecurityClass, usize>,
    pub soft_rules_hit: Vec<AvoidRule>,
    pub hard_rule_count: usize,
    pub soft_rule_count: usize,
    pub profile: RouteProfile,
    pub source: RouteSource,
    pub security_excluded: usize,
    /// Classes on the route whose policy asks the customer to acknowledge risk.
    pub acknowledgements_required: Vec<SecurityClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backfill: Option<BackfillReport>,
}

impl RouteResult {
    pub fn system_ids(&self) -> Vec<SystemId> {
        self.path.iter().map(|step| step.system_id).collect()
    }
}

/// Per-call state shared by the local and oracle paths.
struct Prepared {
    connection: Connection,
    snapshot: Arc<GraphSnapshot>,
    rules: RuleSet,
    policy: SecurityPolicy,
    origin: System,
    destination: System,
}

impl Prepared {
    fn failure(&self, reason: ReasonCode, message: impl Into<String>) -> RoutingFailure {
        RoutingFailure::new(reason, message)
            .with_endpoints(Some(self.origin.id), Some(self.destination.id))
            .with_rule_counts(self.rules.hard_count(), self.rules.soft_count())
    }
}

/// Routing service. Build one per process around a shared [`GraphStore`].
pub struct RouteEngine {
    store: Arc<GraphStore>,
    oracle: Option<Arc<dyn RouteOracle>>,
    backfill: BackfillMode,
    environment: String,
}

impl RouteEngine {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self {
            store,
            oracle: None,
            backfill: BackfillMode::default(),
            environment: "development".to_string(),
        }
    }

    /// Build the store and (when configured) the ESI oracle from config.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = Arc::new(GraphStore::new(
            config.database_path.clone(),
            config.graph.clone(),
        ));
        let mut engine = Self::new(store).with_backfill(config.backfill, &config.environment);
        if let Some(oracle) = &config.oracle {
            let client = EsiRouteOracle::new(oracle.base_url.clone(), oracle.timeout)?;
            engine = engine.with_oracle(Arc::new(client));
        }
        Ok(engine)
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn RouteOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_backfill(mut self, mode: BackfillMode, environment: &str) -> Self {
        self.backfill = mode;
        self.environment = environment.to_string();
        self
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Health of the current graph snapshot.
    pub fn health(&self) -> Result<GraphHealth> {
        self.store.health()
    }

    /// Resolve a single location against the current snapshot.
    pub fn resolve(&self, query: &LocationQuery) -> std::result::Result<ResolvedLocation, RoutingFailure> {
        let snapshot = self.store.snapshot()?;
        let connection = self.store.connect()?;
        LocationResolver::new(&connection, &snapshot).resolve(query)
    }

    /// Compute a route for `request`.
    pub fn plan_route(&self, request: &RouteRequest) -> std::result::Result<RouteResult, RoutingFailure> {
        let prepared = self.prepare(request)?;
        let health = prepared.snapshot.health().clone();
        let local_ready = health.ready
            && prepared.snapshot.contains(prepared.origin.id)
            && prepared.snapshot.contains(prepared.destination.id);

        if local_ready {
            return self.route_locally(&prepared, request.profile);
        }

        match &self.oracle {
            Some(oracle) => {
                info!(
                    origin = prepared.origin.id,
                    destination = prepared.destination.id,
                    ready = health.ready,
                    reason = health.reason.map(|r| r.as_str()),
                    "local graph unusable; falling back to routing oracle"
                );
                self.route_with_oracle(prepared, oracle.as_ref(), request.profile)
            }
            None if !health.ready => Err(prepared
                .failure(
                    ReasonCode::GraphNotLoaded,
                    "route graph is not loaded; try again shortly",
                )
                .with_health(health)),
            None => Err(prepared
                .failure(
                    ReasonCode::GraphMissingEndpoint,
                    "route graph does not contain one or both endpoints",
                )
                .with_health(health)),
        }
    }

    fn prepare(&self, request: &RouteRequest) -> std::result::Result<Prepared, RoutingFailure> {
        let snapshot = self.store.snapshot()?;
        let connection = self.store.connect()?;

        let resolver = LocationResolver::new(&connection, &snapshot);
        let origin = resolver.resolve(&request.origin)?;
        let destination = resolver
            .resolve(&request.destination)
            .map_err(|err| err.with_endpoints(Some(origin.system_id), None))?;

        let rules = RuleSet::load(&connection)?;
        let policy = SecurityPolicy::load(&connection)?;

        let origin_system = endpoint_system(&connection, &snapshot, &origin)?;
        let destination_system = endpoint_system(&connection, &snapshot, &destination)?;

        let prepared = Prepared {
            connection,
            snapshot,
            rules,
            policy,
            origin: origin_system,
            destination: destination_system,
        };
        preflight(&prepared, request, &origin, &destination)?;
        Ok(prepared)
    }

    fn route_locally(
        &self,
        prepared: &Prepared,
        profile: RouteProfile,
    ) -> std::result::Result<RouteResult, RoutingFailure> {
        let ctx = SearchContext {
            snapshot: &prepared.snapshot,
            rules: &prepared.rules,
            policy: &prepared.policy,
            profile,
        };

        let Some(outcome) = search::find_route(&ctx, prepared.origin.id, prepared.destination.id)
        else {
            return Err(diagnose_failure(prepared, profile));
        };
        debug!(
            hops = outcome.path.len().saturating_sub(1),
            cost = outcome.cost,
            excluded = outcome.security_excluded,
            "local search found route"
        );

        let systems: Vec<System> = outcome
            .path
            .iter()
            .filter_map(|id| prepared.snapshot.system(*id).cloned())
            .collect();
        Ok(build_result(
            prepared,
            systems,
            profile,
            RouteSource::Local,
            outcome.security_excluded,
            None,
        ))
    }

    fn route_with_oracle(
        &self,
        mut prepared: Prepared,
        oracle: &dyn RouteOracle,
        profile: RouteProfile,
    ) -> std::result::Result<RouteResult, RoutingFailure> {
        let (origin, destination) = (prepared.origin.id, prepared.destination.id);
        let mut avoid = prepared.rules.hard_avoid_systems(&prepared.connection)?;
        avoid.remove(&origin);
        avoid.remove(&destination);
        let avoid: Vec<SystemId> = avoid.into_iter().collect();

        let path = oracle
            .fetch_path(origin, destination, profile.oracle_flag(), &avoid)
            .map_err(|err| {
                let reason = RoutingFailure::from(err);
                prepared.failure(reason.reason, reason.message)
            })?;

        let systems = PathValidator {
            connection: &prepared.connection,
            snapshot: &prepared.snapshot,
            rules: &prepared.rules,
            policy: &prepared.policy,
            profile,
        }
        .validate(origin, destination, &path)
        .map_err(|err| prepared.failure(err.reason, err.message))?;

        let backfill = if fallback::backfill_enabled(
            self.backfill,
            &self.environment,
            &prepared.connection,
        ) {
            match fallback::backfill_path(&mut prepared.connection, &path, ORACLE_SOURCE) {
                Ok(report) => {
                    if !report.is_empty() {
                        self.store.invalidate();
                    }
                    Some(report)
                }
                Err(err) => {
                    warn!(error = %err, origin, destination, "graph backfill failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(build_result(
            &prepared,
            systems,
            profile,
            RouteSource::Oracle,
            0,
            backfill,
        ))
    }
}

fn endpoint_system(
    connection: &Connection,
    snapshot: &GraphSnapshot,
    resolved: &ResolvedLocation,
) -> std::result::Result<System, RoutingFailure> {
    if let Some(system) = snapshot.system(resolved.system_id) {
        return Ok(system.clone());
    }
    db::lookup_system(connection, resolved.system_id)?.ok_or_else(|| {
        RoutingFailure::new(
            ReasonCode::GraphMissingEndpoint,
            format!(
                "'{}' resolves to system {} which has no graph or reference data",
                resolved.matched_name, resolved.system_id
            ),
        )
    })
}

fn preflight(
    prepared: &Prepared,
    request: &RouteRequest,
    origin: &ResolvedLocation,
    destination: &ResolvedLocation,
) -> std::result::Result<(), RoutingFailure> {
    let policy = &prepared.policy;
    let endpoints = [
        (Phase::Pickup, &prepared.origin, origin, &request.access.pickup),
        (
            Phase::Delivery,
            &prepared.destination,
            destination,
            &request.access.delivery,
        ),
    ];

    if request.profile == RouteProfile::Safest {
        for (phase, system, _, _) in &endpoints {
            if policy.classify(system) != SecurityClass::HighSec {
                return Err(prepared.failure(
                    ReasonCode::EndpointNotHighSec,
                    format!(
                        "{phase} system {} is {}; the safest profile requires high-sec endpoints",
                        system.name,
                        policy.classify(system)
                    ),
                ));
            }
        }
    }

    for (phase, system, resolved, scope) in &endpoints {
        if !scope.permits(system, resolved.location_id) {
            return Err(prepared.failure(
                ReasonCode::EndpointNotAllowed,
                format!("{phase} at {} is outside the allowed locations", system.name),
            ));
        }
    }

    for (phase, system, _, _) in &endpoints {
        if !policy.is_allowed(system, *phase) {
            return Err(prepared.failure(
                ReasonCode::SecurityClassDisallowed,
                format!(
                    "{phase} in {} space ({}) is not allowed",
                    policy.classify(system),
                    system.name
                ),
            ));
        }
    }

    for (phase, system, _, _) in &endpoints {
        if let Some(rule) = prepared.rules.hard_block_for(system, *phase) {
            let reason = rule.reason.as_deref().unwrap_or("no reason given");
            return Err(prepared.failure(
                ReasonCode::EndpointHardBlocked,
                format!(
                    "{phase} at {} is blocked by avoidance rule {} ({reason})",
                    system.name, rule.id
                ),
            ));
        }
    }

    Ok(())
}

/// Repeat the search without hard rules to tell policy blocks from genuine
/// disconnection. Only the refined reason code escapes.
fn diagnose_failure(prepared: &Prepared, profile: RouteProfile) -> RoutingFailure {
    let relaxed = prepared.rules.without_hard_rules();
    let ctx = SearchContext {
        snapshot: &prepared.snapshot,
        rules: &relaxed,
        policy: &prepared.policy,
        profile,
    };
    let blocked_by_rules = prepared.rules.hard_count() > 0
        && search::find_route(&ctx, prepared.origin.id, prepared.destination.id).is_some();

    let health = prepared.snapshot.health().clone();
    if blocked_by_rules {
        prepared
            .failure(
                ReasonCode::BlockedByAvoidanceRules,
                format!(
                    "every route from {} to {} is blocked by avoidance rules",
                    prepared.origin.name, prepared.destination.name
                ),
            )
            .with_health(health)
    } else {
        prepared
            .failure(
                ReasonCode::NoRoute,
                format!(
                    "no viable route from {} to {}",
                    prepared.origin.name, prepared.destination.name
                ),
            )
            .with_health(health)
    }
}

fn build_result(
    prepared: &Prepared,
    systems: Vec<System>,
    profile: RouteProfile,
    source: RouteSource,
    security_excluded: usize,
    backfill: Option<BackfillReport>,
) -> RouteResult {
    let policy = &prepared.policy;
    let soft_rules_hit = search::soft_rules_on_path(&prepared.rules, &systems);

    let mut class_counts = BTreeMap::new();
    let mut acknowledgements = BTreeSet::new();
    for (index, system) in systems.iter().enumerate() {
        let class = policy.classify(system);
        if policy.rule(class).requires_acknowledgement {
            acknowledgements.insert(class);
        }
        if index > 0 {
            *class_counts.entry(class).or_insert(0) += 1;
        }
    }

    let path: Vec<RouteStep> = systems
        .into_iter()
        .map(|system| RouteStep {
            class: policy.classify(&system),
            security: crate::security::rounded_security(system.security),
            system_id: system.id,
            name: system.name,
        })
        .collect();

    RouteResult {
        origin: prepared.origin.id,
        destination: prepared.destination.id,
        hop_count: path.len().saturating_sub(1),
        path,
        class_counts,
        soft_rules_hit,
        hard_rule_count: prepared.rules.hard_count(),
        soft_rule_count: prepared.rules.soft_count(),
        profile,
        source,
        security_excluded,
        acknowledgements_required: acknowledgements.into_iter().collect(),
        backfill,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(id: SystemId, region_id: RegionId) -> System {
        System {
            id,
            name: format!("S{id}"),
            security: 1.0,
            constellation_id: 1,
            region_id,
        }
    }

    #[test]
    fn empty_access_scope_permits_everything() {
        let scope = AccessScope::default();
        assert!(scope.permits(&system(1, 1), None));
    }

    #[test]
    fn access_scope_matches_system_region_or_location() {
        let scope = AccessScope {
            system_ids: [1].into(),
            region_ids: [20].into(),
            location_ids: [600].into(),
        };
        assert!(scope.permits(&system(1, 9), None));
        assert!(scope.permits(&system(2, 20), None));
        assert!(scope.permits(&system(3, 9), Some(600)));
        assert!(!scope.permits(&system(3, 9), Some(601)));
        assert!(!scope.permits(&system(3, 9), None));
    }

    #[test]
    fn request_builder_defaults_to_balanced() {
        let request = RouteRequest::new("Jita", "Amarr");
        assert_eq!(request.profile, RouteProfile::Balanced);
        assert_eq!(request.origin, LocationQuery::name("Jita"));
        let safest = request.with_profile(RouteProfile::Safest);
        assert_eq!(safest.profile, RouteProfile::Safest);
    }
}
