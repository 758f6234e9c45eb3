//! Hard and soft "do-not-fly" avoidance rules.
//!
//! Rules are read fresh from `avoid_rules` for every routing call so admin
//! changes apply immediately. Each rule targets a single system, a
//! constellation (region-group), a region (super-region-group), or one gate
//! edge, and may be limited to the pickup, delivery, or transit phase.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{self, ConstellationId, GroupColumn, RegionId, System, SystemId};
use crate::error::Result;

/// Cost added per point of severity when a soft rule is traversed.
pub const SOFT_PENALTY_PER_SEVERITY: f64 = 3.0;

/// Leg of the journey a system is visited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pickup,
    Delivery,
    Transit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Phase::Pickup => "pickup",
            Phase::Delivery => "delivery",
            Phase::Transit => "transit",
        };
        f.write_str(value)
    }
}

/// Per-phase applicability of a rule. Unset flags default to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseFlags {
    pub pickup: bool,
    pub delivery: bool,
    pub transit: bool,
}

impl Default for PhaseFlags {
    fn default() -> Self {
        Self {
            pickup: true,
            delivery: true,
            transit: true,
        }
    }
}

impl PhaseFlags {
    pub fn applies(&self, phase: Phase) -> bool {
        match phase {
            Phase::Pickup => self.pickup,
            Phase::Delivery => self.delivery,
            Phase::Transit => self.transit,
        }
    }
}

/// Unordered pair of system ids identifying a gate edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeKey(SystemId, SystemId);

impl EdgeKey {
    pub fn new(a: SystemId, b: SystemId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn endpoints(&self) -> (SystemId, SystemId) {
        (self.0, self.1)
    }
}

/// What a rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleScope {
    System { id: SystemId },
    Constellation { id: ConstellationId },
    Region { id: RegionId },
    Edge { edge: EdgeKey },
}

/// A validated row from `avoid_rules`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvoidRule {
    pub id: i64,
    pub scope: RuleScope,
    pub severity: u32,
    pub hard_block: bool,
    pub applies: PhaseFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AvoidRule {
    fn penalty(&self) -> f64 {
        SOFT_PENALTY_PER_SEVERITY * f64::from(self.severity)
    }
}

#[derive(Debug, Clone, Default)]
struct ScopeIndex {
    systems: HashMap<SystemId, Vec<AvoidRule>>,
    constellations: HashMap<ConstellationId, Vec<AvoidRule>>,
    regions: HashMap<RegionId, Vec<AvoidRule>>,
    edges: HashMap<EdgeKey, Vec<AvoidRule>>,
    len: usize,
}

impl ScopeIndex {
    fn insert(&mut self, rule: AvoidRule) {
        let bucket = match rule.scope {
            RuleScope::System { id } => self.systems.entry(id).or_default(),
            RuleScope::Constellation { id } => self.constellations.entry(id).or_default(),
            RuleScope::Region { id } => self.regions.entry(id).or_default(),
            RuleScope::Edge { edge } => self.edges.entry(edge).or_default(),
        };
        bucket.push(rule);
        self.len += 1;
    }

    /// System, constellation, then region rules matching `system`.
    fn for_system<'a>(&'a self, system: &System) -> impl Iterator<Item = &'a AvoidRule> + 'a {
        let by_system = self.systems.get(&system.id);
        let by_constellation = self.constellations.get(&system.constellation_id);
        let by_region = self.regions.get(&system.region_id);
        by_system
            .into_iter()
            .chain(by_constellation)
            .chain(by_region)
            .flatten()
    }

    fn for_edge(&self, a: SystemId, b: SystemId) -> impl Iterator<Item = &AvoidRule> {
        self.edges.get(&EdgeKey::new(a, b)).into_iter().flatten()
    }
}

/// Active avoidance rules partitioned into hard and soft buckets.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    hard: ScopeIndex,
    soft: ScopeIndex,
}

impl RuleSet {
    /// Load active rules from the backing store, skipping invalid rows.
    pub fn load(connection: &Connection) -> Result<Self> {
        if !db::table_exists(connection, "avoid_rules")? {
            return Ok(Self::default());
        }

        let mut stmt = connection.prepare(
            "SELECT id, scope_type, id_a, id_b, severity, hard_block,
                    apply_pickup, apply_delivery, apply_transit, reason
             FROM avoid_rules WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRule {
                id: row.get(0)?,
                scope_type: row.get(1)?,
                id_a: row.get(2)?,
                id_b: row.get(3)?,
                severity: row.get(4)?,
                hard_block: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
                apply_pickup: row.get(6)?,
                apply_delivery: row.get(7)?,
                apply_transit: row.get(8)?,
                reason: row.get(9)?,
            })
        })?;

        let mut rules = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let raw = row?;
            match raw.validate() {
                Ok(rule) => rules.push(rule),
                Err(problem) => {
                    skipped += 1;
                    warn!(rule_id = raw.id, problem, "skipping invalid avoidance rule");
                }
            }
        }

        let set = Self::from_rules(rules);
        debug!(
            hard = set.hard_count(),
            soft = set.soft_count(),
            skipped,
            "loaded avoidance rules"
        );
        Ok(set)
    }

    pub fn from_rules(rules: impl IntoIterator<Item = AvoidRule>) -> Self {
        let mut set = Self::default();
        for rule in rules {
            if rule.hard_block {
                set.hard.insert(rule);
            } else {
                set.soft.insert(rule);
            }
        }
        set
    }

    pub fn hard_count(&self) -> usize {
        self.hard.len
    }

    pub fn soft_count(&self) -> usize {
        self.soft.len
    }

    /// First hard rule forbidding `system` in `phase`, if any.
    pub fn hard_block_for(&self, system: &System, phase: Phase) -> Option<&AvoidRule> {
        self.hard
            .for_system(system)
            .find(|rule| rule.applies.applies(phase))
    }

    pub fn is_hard_blocked(&self, system: &System, phase: Phase) -> bool {
        self.hard_block_for(system, phase).is_some()
    }

    pub fn is_edge_hard_blocked(&self, a: SystemId, b: SystemId, phase: Phase) -> bool {
        self.hard
            .for_edge(a, b)
            .any(|rule| rule.applies.applies(phase))
    }

    /// Soft rules touched by moving from `from` into `to` during `phase`.
    pub fn soft_hits<'a>(
        &'a self,
        from: SystemId,
        to: &System,
        phase: Phase,
    ) -> impl Iterator<Item = &'a AvoidRule> + 'a {
        let edge_rules = self.soft.for_edge(from, to.id);
        self.soft
            .for_system(to)
            .chain(edge_rules)
            .filter(move |rule| rule.applies.applies(phase))
    }

    /// Sum of `3 × severity` over the soft rules hit by this step.
    pub fn soft_penalty(&self, from: SystemId, to: &System, phase: Phase) -> f64 {
        self.soft_hits(from, to, phase).map(AvoidRule::penalty).sum()
    }

    /// Copy of this set with every hard rule removed.
    pub(crate) fn without_hard_rules(&self) -> Self {
        Self {
            hard: ScopeIndex::default(),
            soft: self.soft.clone(),
        }
    }

    /// Concrete system ids covered by transit-applicable hard rules, with
    /// constellation and region rules expanded through the backing store.
    pub fn hard_avoid_systems(&self, connection: &Connection) -> Result<BTreeSet<SystemId>> {
        let transit = |rules: &Vec<AvoidRule>| rules.iter().any(|r| r.applies.transit);

        let mut avoided: BTreeSet<SystemId> = self
            .hard
            .systems
            .iter()
            .filter(|(_, rules)| transit(rules))
            .map(|(id, _)| *id)
            .collect();

        let constellations: Vec<i64> = self
            .hard
            .constellations
            .iter()
            .filter(|(_, rules)| transit(rules))
            .map(|(id, _)| *id)
            .collect();
        let regions: Vec<i64> = self
            .hard
            .regions
            .iter()
            .filter(|(_, rules)| transit(rules))
            .map(|(id, _)| *id)
            .collect();

        avoided.extend(db::system_ids_in_groups(
            connection,
            GroupColumn::Constellation,
            &constellations,
        )?);
        avoided.extend(db::system_ids_in_groups(
            connection,
            GroupColumn::Region,
            &regions,
        )?);
        Ok(avoided)
    }
}

struct RawRule {
    id: i64,
    scope_type: String,
    id_a: Option<i64>,
    id_b: Option<i64>,
    severity: Option<i64>,
    hard_block: bool,
    apply_pickup: Option<bool>,
    apply_delivery: Option<bool>,
    apply_transit: Option<bool>,
    reason: Option<String>,
}

impl RawRule {
    fn validate(&self) -> std::result::Result<AvoidRule, &'static str> {
        let scope = match self.scope_type.trim().to_ascii_lowercase().as_str() {
            "system" => RuleScope::System {
                id: self.id_a.ok_or("system rule without target id")?,
            },
            "constellation" => RuleScope::Constellation {
                id: self.id_a.ok_or("constellation rule without target id")?,
            },
            "region" => RuleScope::Region {
                id: self.id_a.ok_or("region rule without target id")?,
            },
            "edge" => {
                let a = self.id_a.ok_or("edge rule without first endpoint")?;
                let b = self.id_b.ok_or("edge rule without second endpoint")?;
                if a == b {
                    return Err("edge rule endpoints are identical");
                }
                RuleScope::Edge {
                    edge: EdgeKey::new(a, b),
                }
            }
            _ => return Err("unknown scope type"),
        };

        let severity = match self.severity {
            None => 1,
            Some(value) if value > 0 => u32::try_from(value).map_err(|_| "severity too large")?,
            Some(_) => return Err("severity must be positive"),
        };

        Ok(AvoidRule {
            id: self.id,
            scope,
            severity,
            hard_block: self.hard_block,
            applies: PhaseFlags {
                pickup: self.apply_pickup.unwrap_or(true),
                delivery: self.apply_delivery.unwrap_or(true),
                transit: self.apply_transit.unwrap_or(true),
            },
            reason: self.reason.clone().filter(|r| !r.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(id: SystemId, constellation_id: i64, region_id: i64) -> System {
        System {
            id,
            name: format!("S{id}"),
            security: 0.5,
            constellation_id,
            region_id,
        }
    }

    fn rule(id: i64, scope: RuleScope, hard: bool, applies: PhaseFlags) -> AvoidRule {
        AvoidRule {
            id,
            scope,
            severity: 2,
            hard_block: hard,
            applies,
            reason: None,
        }
    }

    #[test]
    fn region_hard_rule_blocks_member_systems_for_applicable_phases() {
        let set = RuleSet::from_rules([rule(
            1,
            RuleScope::Region { id: 9 },
            true,
            PhaseFlags {
                pickup: false,
                ..PhaseFlags::default()
            },
        )]);
        let inside = system(1, 5, 9);
        let outside = system(2, 5, 8);

        assert!(set.is_hard_blocked(&inside, Phase::Transit));
        assert!(set.is_hard_blocked(&inside, Phase::Delivery));
        assert!(!set.is_hard_blocked(&inside, Phase::Pickup));
        assert!(!set.is_hard_blocked(&outside, Phase::Transit));
    }

    #[test]
    fn edge_rules_are_unordered() {
        let set = RuleSet::from_rules([rule(
            1,
            RuleScope::Edge {
                edge: EdgeKey::new(4, 3),
            },
            true,
            PhaseFlags::default(),
        )]);
        assert!(set.is_edge_hard_blocked(3, 4, Phase::Transit));
        assert!(set.is_edge_hard_blocked(4, 3, Phase::Delivery));
        assert!(!set.is_edge_hard_blocked(3, 5, Phase::Transit));
    }

    #[test]
    fn soft_penalty_sums_node_group_and_edge_rules() {
        let set = RuleSet::from_rules([
            rule(1, RuleScope::System { id: 2 }, false, PhaseFlags::default()),
            rule(2, RuleScope::Constellation { id: 5 }, false, PhaseFlags::default()),
            rule(
                3,
                RuleScope::Edge {
                    edge: EdgeKey::new(1, 2),
                },
                false,
                PhaseFlags::default(),
            ),
            rule(
                4,
                RuleScope::Region { id: 9 },
                false,
                PhaseFlags {
                    transit: false,
                    ..PhaseFlags::default()
                },
            ),
        ]);
        let target = system(2, 5, 9);

        // three applicable rules of severity 2 each
        assert_eq!(set.soft_penalty(1, &target, Phase::Transit), 18.0);
        assert_eq!(set.soft_penalty(1, &target, Phase::Delivery), 24.0);
        assert_eq!(set.soft_penalty(7, &target, Phase::Transit), 12.0);
        assert_eq!(set.hard_count(), 0);
        assert_eq!(set.soft_count(), 4);
    }

    #[test]
    fn without_hard_rules_keeps_soft_rules() {
        let set = RuleSet::from_rules([
            rule(1, RuleScope::System { id: 2 }, true, PhaseFlags::default()),
            rule(2, RuleScope::System { id: 3 }, false, PhaseFlags::default()),
        ]);
        let relaxed = set.without_hard_rules();
        assert_eq!(relaxed.hard_count(), 0);
        assert_eq!(relaxed.soft_count(), 1);
        assert!(!relaxed.is_hard_blocked(&system(2, 1, 1), Phase::Transit));
    }

    #[test]
    fn load_skips_invalid_rows_and_defaults_flags() {
        let conn = Connection::open_in_memory().unwrap();
        db::initialize_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO avoid_rules (id, scope_type, id_a, id_b, severity, hard_block, reason, active)
             VALUES (1, 'system', 10, NULL, NULL, 1, 'camp', 1),
                    (2, 'edge', 10, NULL, 1, 0, NULL, 1),
                    (3, 'galaxy', 10, NULL, 1, 0, NULL, 1),
                    (4, 'region', 20, NULL, 0, 0, NULL, 1),
                    (5, 'system', 11, NULL, 3, 0, NULL, 0),
                    (6, 'Edge', 10, 11, 2, 0, NULL, 1);
             INSERT INTO avoid_rules (id, scope_type, id_a) VALUES (7, 'constellation', 30);",
        )
        .unwrap();

        let set = RuleSet::load(&conn).unwrap();
        assert_eq!(set.hard_count(), 1);
        assert_eq!(set.soft_count(), 2);

        let hard = set
            .hard_block_for(&system(10, 1, 1), Phase::Pickup)
            .expect("hard rule applies to pickup by default");
        assert_eq!(hard.severity, 1);
        assert_eq!(hard.reason.as_deref(), Some("camp"));
    }
}
