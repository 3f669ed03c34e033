//! hostwatch-core: pure snapshot-diffing and population-control logic.
//! Snapshot model, CPU rate engine, workload lifecycle tracking, tier
//! classification and tiered eviction. No IO, no async runtime.

pub mod classify;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod population;
pub mod rate;
pub mod summary;
pub mod types;

pub use classify::{ClassificationRule, Classifier};
pub use error::{PolicyError, TerminationError};
pub use lifecycle::{LifecycleLedger, LifecycleUpdate, plan_update};
pub use policy::{PolicyFile, ResolvedPolicy};
pub use population::{
    ActiveByTier, CapPool, Eviction, EvictionOutcome, PopulationPolicy, Terminator, enforce,
};
pub use types::{EntityRecord, LifecycleRecord, MemoryTotals, Snapshot, SnapshotKind, Tier};
