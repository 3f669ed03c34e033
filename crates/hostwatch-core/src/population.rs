//! Tiered population control: cap workload counts by selective termination.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::error::{PolicyError, TerminationError};
use crate::types::Tier;

/// Active identities per tier, each sequence in eviction order.
pub type ActiveByTier = BTreeMap<Tier, Vec<String>>;

/// Capability that stops one workload. Enables mock injection for testing.
pub trait Terminator: Send + Sync {
    fn terminate(&self, identity: &str, timeout: Duration) -> Result<(), TerminationError>;
}

impl<T: Terminator + ?Sized> Terminator for &T {
    fn terminate(&self, identity: &str, timeout: Duration) -> Result<(), TerminationError> {
        (**self).terminate(identity, timeout)
    }
}

// ─── Policy ───────────────────────────────────────────────────────

/// Tiers sharing one cap. Member tiers are drained in listed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapPool {
    pub name: String,
    pub tiers: Vec<Tier>,
    pub cap: usize,
}

/// Ordered cap pools; pool order is the eviction priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulationPolicy {
    pools: Vec<CapPool>,
}

impl PopulationPolicy {
    /// Build a policy, rejecting empty pools and tiers listed in two pools.
    pub fn new(pools: Vec<CapPool>) -> Result<Self, PolicyError> {
        let mut seen = HashSet::new();
        for pool in &pools {
            if pool.tiers.is_empty() {
                return Err(PolicyError::EmptyPool(pool.name.clone()));
            }
            for tier in &pool.tiers {
                if !seen.insert(*tier) {
                    return Err(PolicyError::DuplicateTier(tier.to_string()));
                }
            }
        }
        Ok(Self { pools })
    }

    /// One single-tier pool per tier, in `eviction_priority` order. Tiers in
    /// the priority list without a cap entry are skipped.
    pub fn from_tier_caps(
        cap_per_tier: &BTreeMap<Tier, usize>,
        eviction_priority: &[Tier],
    ) -> Result<Self, PolicyError> {
        let pools = eviction_priority
            .iter()
            .filter_map(|tier| {
                cap_per_tier.get(tier).map(|&cap| CapPool {
                    name: tier.to_string(),
                    tiers: vec![*tier],
                    cap,
                })
            })
            .collect();
        Self::new(pools)
    }

    pub fn pools(&self) -> &[CapPool] {
        &self.pools
    }
}

impl Default for PopulationPolicy {
    /// Combined high pool (HighA then HighB) capped at 2, then Low capped at 3.
    fn default() -> Self {
        Self {
            pools: vec![
                CapPool {
                    name: "high".to_string(),
                    tiers: vec![Tier::HighA, Tier::HighB],
                    cap: 2,
                },
                CapPool {
                    name: "low".to_string(),
                    tiers: vec![Tier::Low],
                    cap: 3,
                },
            ],
        }
    }
}

// ─── Enforcement ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EvictionOutcome {
    Terminated,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub pool: String,
    pub identity: String,
    pub tier: Tier,
    pub outcome: EvictionOutcome,
}

impl Eviction {
    pub fn succeeded(&self) -> bool {
        self.outcome == EvictionOutcome::Terminated
    }
}

/// Bring every pool within its cap, pools strictly in policy order.
///
/// Within a pool, candidates are taken in tier order and, inside a tier, in
/// the order given by `active_by_tier`. A failed termination is recorded and
/// the next candidate is tried; only successes count toward the excess.
pub fn enforce<T: Terminator + ?Sized>(
    active_by_tier: &ActiveByTier,
    policy: &PopulationPolicy,
    terminator: &T,
    timeout: Duration,
) -> Vec<Eviction> {
    let mut evictions = Vec::new();

    for pool in policy.pools() {
        let candidates: Vec<(Tier, &str)> = pool
            .tiers
            .iter()
            .flat_map(|tier| {
                active_by_tier
                    .get(tier)
                    .into_iter()
                    .flatten()
                    .map(move |id| (*tier, id.as_str()))
            })
            .collect();

        let count = candidates.len();
        if count <= pool.cap {
            tracing::debug!(pool = %pool.name, count, cap = pool.cap, "pool within cap");
            continue;
        }

        let excess = count - pool.cap;
        tracing::info!(pool = %pool.name, count, cap = pool.cap, excess, "pool over cap, evicting");

        let mut terminated = 0;
        for (tier, identity) in candidates {
            if terminated == excess {
                break;
            }
            let outcome = match terminator.terminate(identity, timeout) {
                Ok(()) => {
                    terminated += 1;
                    tracing::info!(pool = %pool.name, identity, %tier, "workload terminated");
                    EvictionOutcome::Terminated
                }
                Err(e) => {
                    tracing::warn!(pool = %pool.name, identity, %tier, "termination failed: {e}");
                    EvictionOutcome::Failed(e.to_string())
                }
            };
            evictions.push(Eviction {
                pool: pool.name.clone(),
                identity: identity.to_string(),
                tier,
                outcome,
            });
        }

        if terminated < excess {
            tracing::warn!(
                pool = %pool.name,
                remaining = excess - terminated,
                "pool still over cap after exhausting candidates"
            );
        }
    }

    evictions
}
