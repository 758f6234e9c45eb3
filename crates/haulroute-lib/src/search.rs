//! Weighted shortest-path search over a graph snapshot.
//!
//! Each hop costs `1.0 + security penalty + soft-rule penalty`. Systems the
//! security policy forbids, systems and edges under a hard avoidance rule, and
//! (for the safest profile) anything outside high-sec are never expanded.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::{System, SystemId};
use crate::rules::{AvoidRule, Phase, RuleSet};
use crate::security::{SecurityClass, SecurityPolicy};
use crate::store::GraphSnapshot;

/// Cost of a single gate jump before penalties.
pub const BASE_HOP_COST: f64 = 1.0;
/// Balanced-profile surcharge for entering low-sec.
pub const LOW_SEC_PENALTY: f64 = 2.0;
/// Balanced-profile surcharge for entering null-sec or a special zone.
pub const NULL_SEC_PENALTY: f64 = 5.0;

/// How the search trades jumps against exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteProfile {
    /// Fewest jumps; security only matters through policy and rules.
    Shortest,
    /// Fewest jumps, discouraging low-sec and null-sec.
    #[default]
    Balanced,
    /// High-sec only, endpoints included.
    Safest,
}

impl RouteProfile {
    /// Mode flag understood by the routing oracle.
    pub fn oracle_flag(self) -> &'static str {
        match self {
            RouteProfile::Shortest | RouteProfile::Balanced => "shortest",
            RouteProfile::Safest => "secure",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RouteProfile::Shortest => "shortest",
            RouteProfile::Balanced => "balanced",
            RouteProfile::Safest => "safest",
        }
    }
}

impl fmt::Display for RouteProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteProfile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shortest" => Ok(RouteProfile::Shortest),
            "balanced" => Ok(RouteProfile::Balanced),
            "safest" | "secure" => Ok(RouteProfile::Safest),
            other => Err(format!(
                "unknown route profile '{other}' (expected shortest, balanced, or safest)"
            )),
        }
    }
}

/// Profile-dependent surcharge for entering a system of `class`.
pub fn security_penalty(class: SecurityClass, profile: RouteProfile) -> f64 {
    match profile {
        RouteProfile::Balanced => match class {
            SecurityClass::HighSec => 0.0,
            SecurityClass::LowSec => LOW_SEC_PENALTY,
            _ => NULL_SEC_PENALTY,
        },
        // Safest never expands non-high-sec systems, so no surcharge is needed.
        RouteProfile::Shortest | RouteProfile::Safest => 0.0,
    }
}

/// Everything a search consults while expanding the frontier.
#[derive(Clone, Copy)]
pub struct SearchContext<'a> {
    pub snapshot: &'a GraphSnapshot,
    pub rules: &'a RuleSet,
    pub policy: &'a SecurityPolicy,
    pub profile: RouteProfile,
}

/// A found path and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub path: Vec<SystemId>,
    pub cost: f64,
    /// Distinct systems skipped because the security policy or profile
    /// forbade entering them.
    pub security_excluded: usize,
}

impl<'a> SearchContext<'a> {
    /// Whether entering `next` from `current` during `phase` is permitted.
    fn admits(
        &self,
        current: SystemId,
        next: &System,
        phase: Phase,
        excluded: &mut HashSet<SystemId>,
    ) -> bool {
        let class = self.policy.classify(next);
        if !self.policy.is_allowed(next, phase)
            || (self.profile == RouteProfile::Safest && class != SecurityClass::HighSec)
        {
            excluded.insert(next.id);
            return false;
        }
        !self.rules.is_hard_blocked(next, phase)
            && !self.rules.is_edge_hard_blocked(current, next.id, phase)
    }

    /// Cost of moving from `current` into `next` during `phase`.
    pub fn step_cost(&self, current: SystemId, next: &System, phase: Phase) -> f64 {
        BASE_HOP_COST
            + security_penalty(self.policy.classify(next), self.profile)
            + self.rules.soft_penalty(current, next, phase)
    }
}

/// Run Dijkstra's algorithm from `start` to `goal`.
///
/// Endpoint admissibility (pickup/delivery policy on the endpoints
/// themselves) is the caller's job; the goal is still checked as a delivery
/// target when it is reached.
pub fn find_route(ctx: &SearchContext<'_>, start: SystemId, goal: SystemId) -> Option<SearchOutcome> {
    if start == goal {
        return ctx.snapshot.contains(start).then(|| SearchOutcome {
            path: vec![start],
            cost: 0.0,
            security_excluded: 0,
        });
    }

    let mut distances: HashMap<SystemId, f64> = HashMap::new();
    let mut parents: HashMap<SystemId, Option<SystemId>> = HashMap::new();
    let mut excluded: HashSet<SystemId> = HashSet::new();
    let mut queue = BinaryHeap::new();
    let mut sequence = 0u64;

    distances.insert(start, 0.0);
    parents.insert(start, None);
    queue.push(QueueEntry::new(start, 0.0, sequence));

    while let Some(entry) = queue.pop() {
        let current_distance = match distances.get(&entry.node) {
            Some(distance) if *distance < entry.cost.0 => continue,
            Some(distance) => *distance,
            None => continue,
        };

        if entry.node == goal {
            return Some(SearchOutcome {
                path: reconstruct_path(&parents, start, goal),
                cost: current_distance,
                security_excluded: excluded.len(),
            });
        }

        for &next in ctx.snapshot.neighbours(entry.node) {
            if next == start {
                continue;
            }
            let Some(system) = ctx.snapshot.system(next) else {
                continue;
            };
            let phase = if next == goal {
                Phase::Delivery
            } else {
                Phase::Transit
            };
            if !ctx.admits(entry.node, system, phase, &mut excluded) {
                continue;
            }

            let next_cost = current_distance + ctx.step_cost(entry.node, system, phase);
            if next_cost < *distances.get(&next).unwrap_or(&f64::INFINITY) {
                distances.insert(next, next_cost);
                parents.insert(next, Some(entry.node));
                sequence += 1;
                queue.push(QueueEntry::new(next, next_cost, sequence));
            }
        }
    }

    None
}

/// Soft rules encountered along a path of systems, in first-hit order, each
/// listed once.
pub fn soft_rules_on_path(rules: &RuleSet, systems: &[System]) -> Vec<AvoidRule> {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    let last = systems.len().saturating_sub(1);
    for (index, pair) in systems.windows(2).enumerate() {
        let phase = if index + 1 == last {
            Phase::Delivery
        } else {
            Phase::Transit
        };
        for rule in rules.soft_hits(pair[0].id, &pair[1], phase) {
            if seen.insert(rule.id) {
                hits.push(rule.clone());
            }
        }
    }
    hits
}

fn reconstruct_path(
    parents: &HashMap<SystemId, Option<SystemId>>,
    start: SystemId,
    goal: SystemId,
) -> Vec<SystemId> {
    let mut path = Vec::new();
    let mut current = Some(goal);
    while let Some(node) = current {
        path.push(node);
        if node == start {
            break;
        }
        current = parents.get(&node).copied().flatten();
    }
    path.reverse();
    path
}

#[derive(Copy, Clone, Debug, Default)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct QueueEntry {
    node: SystemId,
    cost: FloatOrd,
    sequence: u64,
}

impl QueueEntry {
    fn new(node: SystemId, cost: f64, sequence: u64) -> Self {
        Self {
            node,
            cost: FloatOrd(cost),
            sequence,
        }
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering so BinaryHeap becomes a min-heap by cost; equal
        // costs pop in insertion order.
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PhaseFlags, RuleScope};
    use crate::store::GraphStoreConfig;

    fn snapshot(systems: &[(SystemId, f64)], edges: &[(SystemId, SystemId)]) -> GraphSnapshot {
        let systems = systems
            .iter()
            .map(|&(id, security)| {
                (
                    id,
                    System {
                        id,
                        name: format!("S{id}"),
                        security,
                        constellation_id: id * 10,
                        region_id: 1,
                    },
                )
            })
            .collect();
        let mut adjacency: HashMap<SystemId, Vec<SystemId>> = HashMap::new();
        for &(a, b) in edges {
            adjacency.entry(a).or_default().push(b);
            adjacency.entry(b).or_default().push(a);
        }
        for neighbours in adjacency.values_mut() {
            neighbours.sort_unstable();
        }
        GraphSnapshot::from_parts(systems, adjacency, &GraphStoreConfig::default(), 1)
    }

    fn systems_of(graph: &GraphSnapshot, path: &[SystemId]) -> Vec<System> {
        path.iter()
            .filter_map(|id| graph.system(*id).cloned())
            .collect()
    }

    // 1 - 2 - 3 - 4 (all high-sec, three jumps)
    // 1 - 5 - 4     (5 is low-sec, two jumps)
    fn diamond() -> GraphSnapshot {
        snapshot(
            &[(1, 1.0), (2, 0.9), (3, 0.8), (4, 1.0), (5, 0.3)],
            &[(1, 2), (2, 3), (3, 4), (1, 5), (5, 4)],
        )
    }

    fn ctx<'a>(
        snapshot: &'a GraphSnapshot,
        rules: &'a RuleSet,
        policy: &'a SecurityPolicy,
        profile: RouteProfile,
    ) -> SearchContext<'a> {
        SearchContext {
            snapshot,
            rules,
            policy,
            profile,
        }
    }

    #[test]
    fn shortest_profile_takes_fewest_jumps() {
        let graph = diamond();
        let (rules, policy) = (RuleSet::default(), SecurityPolicy::default());
        let outcome = find_route(&ctx(&graph, &rules, &policy, RouteProfile::Shortest), 1, 4)
            .expect("route exists");
        assert_eq!(outcome.path, vec![1, 5, 4]);
        assert_eq!(outcome.cost, 2.0);
    }

    #[test]
    fn balanced_profile_detours_around_low_sec() {
        let graph = diamond();
        let (rules, policy) = (RuleSet::default(), SecurityPolicy::default());
        let outcome = find_route(&ctx(&graph, &rules, &policy, RouteProfile::Balanced), 1, 4)
            .expect("route exists");
        assert_eq!(outcome.path, vec![1, 2, 3, 4]);
        assert_eq!(outcome.cost, 3.0);
    }

    #[test]
    fn safest_profile_excludes_low_sec_and_counts_it() {
        let graph = snapshot(&[(1, 1.0), (5, 0.3), (4, 1.0)], &[(1, 5), (5, 4)]);
        let (rules, policy) = (RuleSet::default(), SecurityPolicy::default());
        let context = ctx(&graph, &rules, &policy, RouteProfile::Safest);
        assert!(find_route(&context, 1, 4).is_none());

        let graph = diamond();
        let context = ctx(&graph, &rules, &policy, RouteProfile::Safest);
        let outcome = find_route(&context, 1, 4).expect("high-sec route exists");
        assert_eq!(outcome.path, vec![1, 2, 3, 4]);
        assert_eq!(outcome.security_excluded, 1);
    }

    #[test]
    fn hard_rules_on_interior_nodes_force_a_detour() {
        let graph = diamond();
        let rules = RuleSet::from_rules([AvoidRule {
            id: 1,
            scope: RuleScope::System { id: 5 },
            severity: 1,
            hard_block: true,
            applies: PhaseFlags::default(),
            reason: None,
        }]);
        let policy = SecurityPolicy::default();
        let outcome = find_route(&ctx(&graph, &rules, &policy, RouteProfile::Shortest), 1, 4)
            .expect("detour exists");
        assert_eq!(outcome.path, vec![1, 2, 3, 4]);
    }

    #[test]
    fn soft_rules_add_cost_and_are_reported() {
        let graph = diamond();
        let rules = RuleSet::from_rules([AvoidRule {
            id: 9,
            scope: RuleScope::Constellation { id: 50 },
            severity: 1,
            hard_block: false,
            applies: PhaseFlags::default(),
            reason: Some("gate camp".into()),
        }]);
        let policy = SecurityPolicy::default();
        let context = ctx(&graph, &rules, &policy, RouteProfile::Shortest);
        let outcome = find_route(&context, 1, 4).expect("route exists");
        // 1-5-4 would cost 2 + 3 = 5; 1-2-3-4 costs 3.
        assert_eq!(outcome.path, vec![1, 2, 3, 4]);
        assert!(soft_rules_on_path(&rules, &systems_of(&graph, &outcome.path)).is_empty());

        let forced = soft_rules_on_path(&rules, &systems_of(&graph, &[1, 5, 4]));
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].id, 9);
    }

    #[test]
    fn identical_endpoints_yield_single_node_path() {
        let graph = diamond();
        let (rules, policy) = (RuleSet::default(), SecurityPolicy::default());
        let outcome = find_route(&ctx(&graph, &rules, &policy, RouteProfile::Balanced), 3, 3)
            .expect("trivial route");
        assert_eq!(outcome.path, vec![3]);
        assert_eq!(outcome.cost, 0.0);
    }

    #[test]
    fn disconnected_graph_has_no_route() {
        let graph = snapshot(&[(1, 1.0), (2, 1.0), (3, 1.0)], &[(1, 2)]);
        let (rules, policy) = (RuleSet::default(), SecurityPolicy::default());
        assert!(find_route(&ctx(&graph, &rules, &policy, RouteProfile::Balanced), 1, 3).is_none());
    }

    #[test]
    fn profile_parses_from_text() {
        assert_eq!("Safest".parse::<RouteProfile>(), Ok(RouteProfile::Safest));
        assert_eq!("secure".parse::<RouteProfile>(), Ok(RouteProfile::Safest));
        assert!("fastest".parse::<RouteProfile>().is_err());
        assert_eq!(RouteProfile::Balanced.oracle_flag(), "shortest");
    }
}
