//! Per-snapshot aggregates derived alongside the rates: process state
//! histogram and top CPU consumers.

use std::collections::BTreeMap;

use crate::types::{EntityRecord, Snapshot};

/// Count entities per state code, keyed by the first character of the code
/// (`"?"` when the code is empty).
pub fn state_summary(snapshot: &Snapshot) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for entity in &snapshot.entities {
        let key = entity
            .state_code
            .chars()
            .next()
            .map_or_else(|| "?".to_string(), |c| c.to_string());
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// The `n` entities with the highest CPU percentage, descending. Entities
/// without a rate are not ranked.
pub fn top_by_cpu<'a>(
    snapshot: &'a Snapshot,
    rates: &BTreeMap<String, f64>,
    n: usize,
) -> Vec<(&'a EntityRecord, f64)> {
    let mut ranked: Vec<(&EntityRecord, f64)> = snapshot
        .entities
        .iter()
        .filter_map(|e| rates.get(&e.identity).map(|&pct| (e, pct)))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.0.identity.cmp(&b.0.identity))
    });
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotKind;

    fn proc(id: &str, state: &str) -> EntityRecord {
        EntityRecord {
            identity: id.to_string(),
            state_code: state.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn summary_counts_first_char() {
        let snap = Snapshot::new(SnapshotKind::Host, 0)
            .with_entity(proc("1", "S"))
            .with_entity(proc("2", "Sleeping"))
            .with_entity(proc("3", "R"))
            .with_entity(proc("4", ""));
        let summary = state_summary(&snap);
        assert_eq!(summary["S"], 2);
        assert_eq!(summary["R"], 1);
        assert_eq!(summary["?"], 1);
    }

    #[test]
    fn top_ranks_by_rate_and_skips_unrated() {
        let snap = Snapshot::new(SnapshotKind::Host, 0)
            .with_entity(proc("1", "S"))
            .with_entity(proc("2", "S"))
            .with_entity(proc("3", "S"));
        let rates = BTreeMap::from([("1".to_string(), 3.0), ("3".to_string(), 9.5)]);
        let top = top_by_cpu(&snap, &rates, 5);
        let ids: Vec<&str> = top.iter().map(|(e, _)| e.identity.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[test]
    fn top_truncates() {
        let snap = Snapshot::new(SnapshotKind::Host, 0)
            .with_entity(proc("1", "S"))
            .with_entity(proc("2", "S"));
        let rates = BTreeMap::from([("1".to_string(), 1.0), ("2".to_string(), 2.0)]);
        assert_eq!(top_by_cpu(&snap, &rates, 1).len(), 1);
    }
}
