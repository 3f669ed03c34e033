//! Persistence seam used by the control loop.

use std::collections::BTreeMap;

use hostwatch_core::{LifecycleRecord, LifecycleUpdate, Snapshot};

use crate::error::StoreError;

/// Everything written for one host snapshot.
#[derive(Debug, Clone, Copy)]
pub struct HostCycle<'a> {
    pub snapshot: &'a Snapshot,
    /// Per-process CPU percentage; processes without a rate are stored with NULL.
    pub rates: &'a BTreeMap<String, f64>,
    /// Process count per one-character state code.
    pub state_summary: &'a BTreeMap<String, u64>,
}

/// Everything written for one workload snapshot.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadCycle<'a> {
    pub snapshot: &'a Snapshot,
    pub update: &'a LifecycleUpdate,
    pub rates: &'a BTreeMap<String, f64>,
}

/// Counts recorded in the workload host row, read back inside the same transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadTotals {
    pub active: u64,
    pub removed_total: u64,
}

/// Durable sink for cycle results. Append/update only.
pub trait MetricsSink {
    fn record_host_cycle(&mut self, cycle: HostCycle<'_>) -> Result<(), StoreError>;

    fn record_workload_cycle(&mut self, cycle: WorkloadCycle<'_>)
    -> Result<WorkloadTotals, StoreError>;

    /// Lifecycle records with no removal time, used to seed the ledger at startup.
    fn load_open_lifecycles(&self) -> Result<Vec<LifecycleRecord>, StoreError>;
}

impl<T: MetricsSink + ?Sized> MetricsSink for &mut T {
    fn record_host_cycle(&mut self, cycle: HostCycle<'_>) -> Result<(), StoreError> {
        (**self).record_host_cycle(cycle)
    }

    fn record_workload_cycle(
        &mut self,
        cycle: WorkloadCycle<'_>,
    ) -> Result<WorkloadTotals, StoreError> {
        (**self).record_workload_cycle(cycle)
    }

    fn load_open_lifecycles(&self) -> Result<Vec<LifecycleRecord>, StoreError> {
        (**self).load_open_lifecycles()
    }
}
