use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PolicyError;

// ─── Snapshot ─────────────────────────────────────────────────────

/// Which metrics-source document a snapshot came from.
///
/// The kind decides the unit of `EntityRecord::cpu_time`: scheduler ticks
/// for host processes, nanoseconds for workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Host,
    Workload,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Workload => "workload",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host memory totals reported alongside the entity list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryTotals {
    pub memory_total_kb: u64,
    pub memory_free_kb: u64,
    pub memory_used_kb: u64,
    /// `MemAvailable`, host snapshots only.
    pub memory_available_kb: Option<u64>,
    /// Total process count as reported by the source (may exceed `entities.len()`).
    pub process_count: Option<u64>,
    /// Host-wide CPU usage computed by the source itself.
    pub cpu_usage_pct: Option<f64>,
}

/// One process or workload observed in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Stable identity: decimal PID for processes, container id for workloads.
    pub identity: String,
    pub display_name: String,
    pub resident_memory_kb: u64,
    /// Monotonically increasing CPU counter. Unit depends on `SnapshotKind`.
    pub cpu_time: u64,
    pub state_code: String,
}

/// Timestamped capture of host totals and entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub kind: SnapshotKind,
    pub captured_at_ms: i64,
    pub totals: MemoryTotals,
    pub entities: Vec<EntityRecord>,
}

impl Snapshot {
    pub fn new(kind: SnapshotKind, captured_at_ms: i64) -> Self {
        Self {
            kind,
            captured_at_ms,
            totals: MemoryTotals::default(),
            entities: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_entity(mut self, entity: EntityRecord) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.identity.as_str())
    }

    pub fn entity(&self, identity: &str) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| e.identity == identity)
    }
}

// ─── Tier ─────────────────────────────────────────────────────────

/// Classification bucket used for population capping.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    HighA,
    HighB,
    Low,
    #[default]
    Unclassified,
}

impl Tier {
    pub const ALL: [Self; 4] = [Self::HighA, Self::HighB, Self::Low, Self::Unclassified];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighA => "high_a",
            Self::HighB => "high_b",
            Self::Low => "low",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high_a" => Ok(Self::HighA),
            "high_b" => Ok(Self::HighB),
            "low" => Ok(Self::Low),
            "unclassified" => Ok(Self::Unclassified),
            _ => Err(PolicyError::UnknownTier(s.to_string())),
        }
    }
}

// ─── Lifecycle ────────────────────────────────────────────────────

/// Durable birth / last-seen / removal record for one workload lifetime.
///
/// `(identity, first_seen_ms)` identifies the record: an identity that
/// reappears after removal gets a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub identity: String,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub removed_ms: Option<i64>,
    pub tier: Tier,
}

impl LifecycleRecord {
    pub fn is_open(&self) -> bool {
        self.removed_ms.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_roundtrips_through_str() {
        for tier in Tier::ALL {
            assert_eq!(tier.as_str().parse::<Tier>().expect("parse"), tier);
        }
    }

    #[test]
    fn tier_parse_is_case_insensitive() {
        assert_eq!("HIGH_A".parse::<Tier>().expect("parse"), Tier::HighA);
    }

    #[test]
    fn tier_parse_rejects_unknown() {
        assert!(matches!(
            "medium".parse::<Tier>(),
            Err(PolicyError::UnknownTier(ref s)) if s == "medium"
        ));
    }

    #[test]
    fn tier_serde_uses_snake_case() {
        let json = serde_json::to_string(&Tier::HighB).expect("serialize");
        assert_eq!(json, "\"high_b\"");
    }

    #[test]
    fn snapshot_entity_lookup() {
        let snap = Snapshot::new(SnapshotKind::Host, 1_000).with_entity(EntityRecord {
            identity: "42".to_string(),
            display_name: "bash".to_string(),
            ..Default::default()
        });
        assert_eq!(snap.entity("42").map(|e| e.display_name.as_str()), Some("bash"));
        assert!(snap.entity("7").is_none());
        assert_eq!(snap.identities().collect::<Vec<_>>(), vec!["42"]);
    }
}
