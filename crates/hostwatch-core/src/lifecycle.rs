//! Workload lifecycle tracking: birth, last-seen and removal per identity.
//!
//! Each identity moves `absent → active → removed`. Removal is terminal for
//! that record; an identity that shows up again starts a fresh record.

use std::collections::BTreeMap;

use crate::classify::Classifier;
use crate::population::ActiveByTier;
use crate::types::{EntityRecord, LifecycleRecord};

/// All transitions produced by one workload snapshot.
///
/// Applied in memory by [`LifecycleLedger`] and persisted as one unit by the
/// store, so created/touched/removed always agree for a given `ts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleUpdate {
    pub ts: i64,
    /// New open records (`first_seen_ms = last_seen_ms = ts`).
    pub created: Vec<LifecycleRecord>,
    /// Open records still present, with `last_seen_ms = ts`.
    pub touched: Vec<LifecycleRecord>,
    /// Records closed by this snapshot, with `removed_ms = Some(ts)`.
    pub removed: Vec<LifecycleRecord>,
    /// The snapshot was older than one already applied and was ignored.
    pub stale: bool,
}

impl LifecycleUpdate {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.touched.is_empty() && self.removed.is_empty()
    }
}

/// Compute the transitions for one snapshot against the current open records.
///
/// Pure: `open` is not modified. Entities with duplicate identities count once.
pub fn plan_update(
    entities: &[EntityRecord],
    ts: i64,
    open: &BTreeMap<String, LifecycleRecord>,
    classifier: &Classifier,
) -> LifecycleUpdate {
    let mut current: BTreeMap<&str, &str> = BTreeMap::new();
    for entity in entities {
        current
            .entry(entity.identity.as_str())
            .or_insert(entity.display_name.as_str());
    }

    let mut update = LifecycleUpdate {
        ts,
        ..Default::default()
    };

    for (&identity, &name) in &current {
        match open.get(identity) {
            Some(record) => update.touched.push(LifecycleRecord {
                last_seen_ms: ts,
                ..record.clone()
            }),
            None => update.created.push(LifecycleRecord {
                identity: identity.to_string(),
                first_seen_ms: ts,
                last_seen_ms: ts,
                removed_ms: None,
                tier: classifier.classify(identity, name),
            }),
        }
    }

    for (identity, record) in open {
        if record.is_open() && !current.contains_key(identity.as_str()) {
            update.removed.push(LifecycleRecord {
                removed_ms: Some(ts),
                ..record.clone()
            });
        }
    }

    update
}

/// In-memory mirror of the open lifecycle records, owned by the control loop.
#[derive(Debug, Clone, Default)]
pub struct LifecycleLedger {
    open: BTreeMap<String, LifecycleRecord>,
    /// Newest snapshot timestamp applied so far.
    watermark_ms: Option<i64>,
    removed_total: u64,
}

impl LifecycleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from durable open records (daemon restart). Closed records are ignored.
    pub fn seed(records: impl IntoIterator<Item = LifecycleRecord>) -> Self {
        let mut ledger = Self::new();
        for record in records.into_iter().filter(LifecycleRecord::is_open) {
            ledger.watermark_ms = Some(
                ledger
                    .watermark_ms
                    .map_or(record.last_seen_ms, |w| w.max(record.last_seen_ms)),
            );
            ledger.open.insert(record.identity.clone(), record);
        }
        ledger
    }

    /// Plan and apply the transitions for one snapshot.
    ///
    /// A snapshot older than the watermark yields an empty update flagged `stale`.
    pub fn update(
        &mut self,
        entities: &[EntityRecord],
        ts: i64,
        classifier: &Classifier,
    ) -> LifecycleUpdate {
        if self.watermark_ms.is_some_and(|w| ts < w) {
            tracing::warn!(ts, watermark = ?self.watermark_ms, "stale workload snapshot ignored");
            return LifecycleUpdate {
                ts,
                stale: true,
                ..Default::default()
            };
        }
        let update = plan_update(entities, ts, &self.open, classifier);
        self.apply(&update);
        update
    }

    fn apply(&mut self, update: &LifecycleUpdate) {
        for record in update.created.iter().chain(&update.touched) {
            self.open.insert(record.identity.clone(), record.clone());
        }
        for record in &update.removed {
            self.open.remove(&record.identity);
        }
        self.removed_total += update.removed.len() as u64;
        self.watermark_ms = Some(self.watermark_ms.map_or(update.ts, |w| w.max(update.ts)));
    }

    pub fn open_records(&self) -> impl Iterator<Item = &LifecycleRecord> {
        self.open.values()
    }

    pub fn get(&self, identity: &str) -> Option<&LifecycleRecord> {
        self.open.get(identity)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Removals applied by this ledger since it was created or seeded.
    pub fn removed_since_start(&self) -> u64 {
        self.removed_total
    }

    /// Group open records by tier, newest first (`first_seen_ms` descending),
    /// ties broken by identity ascending.
    pub fn active_by_tier(&self) -> ActiveByTier {
        let mut records: Vec<&LifecycleRecord> = self.open.values().collect();
        records.sort_by(|a, b| {
            b.first_seen_ms
                .cmp(&a.first_seen_ms)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        let mut by_tier = ActiveByTier::new();
        for record in records {
            by_tier
                .entry(record.tier)
                .or_default()
                .push(record.identity.clone());
        }
        by_tier
    }
}
