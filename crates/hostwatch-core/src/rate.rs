//! CPU rate engine: turns two counter snapshots into utilization percentages.

use std::collections::{BTreeMap, HashMap};

use crate::types::Snapshot;

/// Nanoseconds per second, the normalization factor for workload cpu counters.
pub const NANOS_PER_SEC: f64 = 1e9;

/// Default kernel scheduler frequency (USER_HZ) for process tick counters.
pub const DEFAULT_TICKS_PER_SEC: f64 = 100.0;

/// Compute per-identity CPU percentage between two snapshots of one kind.
///
/// `norm_factor` converts `cpu_time` units into seconds (ticks per second or
/// nanoseconds per second); `parallel_units` is the number of logical CPUs
/// the percentage is spread across.
///
/// Returns an empty map when the pair is not strictly ordered in time. An
/// identity is only reported when it appears in both snapshots and its
/// counter advanced; a counter that stalled or went backwards (restart) is
/// omitted rather than reported as zero.
pub fn compute(
    prev: &Snapshot,
    curr: &Snapshot,
    norm_factor: f64,
    parallel_units: u32,
) -> BTreeMap<String, f64> {
    let mut result = BTreeMap::new();

    if curr.captured_at_ms <= prev.captured_at_ms {
        return result;
    }
    if parallel_units == 0 || norm_factor.is_nan() || norm_factor <= 0.0 {
        return result;
    }

    let delta_wall_sec = (curr.captured_at_ms - prev.captured_at_ms) as f64 / 1000.0;
    if delta_wall_sec <= 0.0 {
        return result;
    }

    let prev_cpu: HashMap<&str, u64> = prev
        .entities
        .iter()
        .map(|e| (e.identity.as_str(), e.cpu_time))
        .collect();

    for entity in &curr.entities {
        let Some(&old) = prev_cpu.get(entity.identity.as_str()) else {
            continue;
        };
        if entity.cpu_time <= old {
            continue;
        }
        let delta_cpu = (entity.cpu_time - old) as f64;
        let pct = (delta_cpu / norm_factor) / delta_wall_sec * 100.0 / f64::from(parallel_units);
        result.insert(entity.identity.clone(), pct);
    }

    result
}
