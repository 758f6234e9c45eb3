//! Security classification and per-class travel policy.
//!
//! Classification checks special-zone membership (by system or region) first
//! and only then falls back to the rounded security value, so small anomalous
//! areas are handled as their own class whatever their nominal number says.

use std::collections::HashSet;
use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{self, RegionId, System, SystemId};
use crate::error::Result;
use crate::rules::Phase;

/// Settings key holding the [`SecurityPolicyConfig`] document.
pub const SECURITY_POLICY_SETTING: &str = "security_policy";

/// Security bucket used to gate and price travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityClass {
    #[serde(rename = "highsec")]
    HighSec,
    #[serde(rename = "lowsec")]
    LowSec,
    #[serde(rename = "nullsec")]
    NullSec,
    Pochven,
    Zarzakh,
    Thera,
}

impl SecurityClass {
    pub const ALL: [SecurityClass; 6] = [
        SecurityClass::HighSec,
        SecurityClass::LowSec,
        SecurityClass::NullSec,
        SecurityClass::Pochven,
        SecurityClass::Zarzakh,
        SecurityClass::Thera,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityClass::HighSec => "highsec",
            SecurityClass::LowSec => "lowsec",
            SecurityClass::NullSec => "nullsec",
            SecurityClass::Pochven => "pochven",
            SecurityClass::Zarzakh => "zarzakh",
            SecurityClass::Thera => "thera",
        }
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round a raw security value to one decimal the way the game displays it.
pub fn rounded_security(security: f64) -> f64 {
    (security * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityThresholds {
    pub highsec_min: f64,
    pub lowsec_min: f64,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        Self {
            highsec_min: 0.5,
            lowsec_min: 0.1,
        }
    }
}

/// Membership lists for one special zone, given by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ZoneConfig {
    pub enabled: bool,
    pub system_names: Vec<String>,
    pub region_names: Vec<String>,
}

impl ZoneConfig {
    fn regions(names: &[&str]) -> Self {
        Self {
            enabled: true,
            system_names: Vec::new(),
            region_names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn systems(names: &[&str]) -> Self {
        Self {
            enabled: true,
            system_names: names.iter().map(|n| n.to_string()).collect(),
            region_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialZones {
    pub pochven: ZoneConfig,
    pub zarzakh: ZoneConfig,
    pub thera: ZoneConfig,
}

impl Default for SpecialZones {
    fn default() -> Self {
        Self {
            pochven: ZoneConfig::regions(&["Pochven"]),
            zarzakh: ZoneConfig::systems(&["Zarzakh"]),
            thera: ZoneConfig::systems(&["Thera"]),
        }
    }
}

/// What operators allow for one security class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassRule {
    pub enabled: bool,
    pub allow_pickup: bool,
    pub allow_delivery: bool,
    pub requires_acknowledgement: bool,
}

impl Default for ClassRule {
    fn default() -> Self {
        Self::open()
    }
}

impl ClassRule {
    const fn open() -> Self {
        Self {
            enabled: true,
            allow_pickup: true,
            allow_delivery: true,
            requires_acknowledgement: false,
        }
    }

    const fn transit_only() -> Self {
        Self {
            enabled: true,
            allow_pickup: false,
            allow_delivery: false,
            requires_acknowledgement: true,
        }
    }

    const fn closed() -> Self {
        Self {
            enabled: false,
            allow_pickup: false,
            allow_delivery: false,
            requires_acknowledgement: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassRules {
    pub highsec: ClassRule,
    pub lowsec: ClassRule,
    pub nullsec: ClassRule,
    pub pochven: ClassRule,
    pub zarzakh: ClassRule,
    pub thera: ClassRule,
}

impl Default for ClassRules {
    fn default() -> Self {
        Self {
            highsec: ClassRule::open(),
            lowsec: ClassRule::open(),
            nullsec: ClassRule::open(),
            pochven: ClassRule {
                requires_acknowledgement: true,
                ..ClassRule::open()
            },
            zarzakh: ClassRule::transit_only(),
            thera: ClassRule::closed(),
        }
    }
}

impl ClassRules {
    pub fn get(&self, class: SecurityClass) -> &ClassRule {
        match class {
            SecurityClass::HighSec => &self.highsec,
            SecurityClass::LowSec => &self.lowsec,
            SecurityClass::NullSec => &self.nullsec,
            SecurityClass::Pochven => &self.pochven,
            SecurityClass::Zarzakh => &self.zarzakh,
            SecurityClass::Thera => &self.thera,
        }
    }
}

/// Persisted security policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityPolicyConfig {
    pub thresholds: SecurityThresholds,
    pub zones: SpecialZones,
    pub classes: ClassRules,
}

#[derive(Debug, Clone)]
struct ResolvedZone {
    class: SecurityClass,
    systems: HashSet<SystemId>,
    regions: HashSet<RegionId>,
}

impl ResolvedZone {
    fn contains(&self, system_id: SystemId, region_id: RegionId) -> bool {
        self.systems.contains(&system_id) || self.regions.contains(&region_id)
    }
}

/// Security policy with zone names resolved to concrete ids.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    thresholds: SecurityThresholds,
    zones: Vec<ResolvedZone>,
    rules: ClassRules,
}

impl SecurityPolicy {
    /// Read the persisted policy (or defaults) and resolve zone names.
    pub fn load(connection: &Connection) -> Result<Self> {
        let config: SecurityPolicyConfig =
            db::read_setting(connection, SECURITY_POLICY_SETTING)?.unwrap_or_default();
        Self::resolve(&config, connection)
    }

    pub fn resolve(config: &SecurityPolicyConfig, connection: &Connection) -> Result<Self> {
        let mut zones = Vec::new();
        for (class, zone) in [
            (SecurityClass::Pochven, &config.zones.pochven),
            (SecurityClass::Zarzakh, &config.zones.zarzakh),
            (SecurityClass::Thera, &config.zones.thera),
        ] {
            if !zone.enabled {
                continue;
            }
            let systems = db::system_ids_by_names(connection, &zone.system_names)?;
            let regions = db::region_ids_by_names(connection, &zone.region_names)?;
            debug!(
                zone = %class,
                systems = systems.len(),
                regions = regions.len(),
                "resolved special zone"
            );
            zones.push(ResolvedZone {
                class,
                systems: systems.into_iter().collect(),
                regions: regions.into_iter().collect(),
            });
        }

        Ok(Self {
            thresholds: config.thresholds.clone(),
            zones,
            rules: config.classes.clone(),
        })
    }

    /// Build a policy from already-resolved zone membership.
    pub fn from_parts(
        thresholds: SecurityThresholds,
        rules: ClassRules,
        zones: impl IntoIterator<Item = (SecurityClass, Vec<SystemId>, Vec<RegionId>)>,
    ) -> Self {
        Self {
            thresholds,
            zones: zones
                .into_iter()
                .map(|(class, systems, regions)| ResolvedZone {
                    class,
                    systems: systems.into_iter().collect(),
                    regions: regions.into_iter().collect(),
                })
                .collect(),
            rules,
        }
    }

    pub fn classify(&self, system: &System) -> SecurityClass {
        if let Some(zone) = self
            .zones
            .iter()
            .find(|zone| zone.contains(system.id, system.region_id))
        {
            return zone.class;
        }

        let security = rounded_security(system.security);
        if security < self.thresholds.lowsec_min {
            SecurityClass::NullSec
        } else if security < self.thresholds.highsec_min {
            SecurityClass::LowSec
        } else {
            SecurityClass::HighSec
        }
    }

    pub fn rule(&self, class: SecurityClass) -> &ClassRule {
        self.rules.get(class)
    }

    /// Whether a system may be entered in `phase`. Disabled classes may not be
    /// entered at all; transit only needs the class to be enabled.
    pub fn is_allowed(&self, system: &System, phase: Phase) -> bool {
        let rule = self.rule(self.classify(system));
        if !rule.enabled {
            return false;
        }
        match phase {
            Phase::Pickup => rule.allow_pickup,
            Phase::Delivery => rule.allow_delivery,
            Phase::Transit => true,
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::from_parts(
            SecurityThresholds::default(),
            ClassRules::default(),
            Vec::new(),
        )
    }
}
