//! Control loop: wires metrics source → rates/lifecycle → store → eviction.
//! Runs as one tokio task; every cycle is sequential and runs to completion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use hostwatch_core::rate::{self, NANOS_PER_SEC};
use hostwatch_core::summary::{state_summary, top_by_cpu};
use hostwatch_core::{
    ActiveByTier, Eviction, LifecycleLedger, ResolvedPolicy, Snapshot, SnapshotKind, Terminator, enforce,
};
use hostwatch_probe::{ShutdownAction, SnapshotSource};
use hostwatch_store::{HostCycle, MetricsSink, WorkloadCycle};

/// Fixed loop parameters, resolved from the CLI once at startup.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub interval: Duration,
    pub ticks_per_second: f64,
    pub parallel_units: u32,
    pub read_timeout: Duration,
    pub terminate_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Run the population controller at the end of each cycle.
    pub enforce: bool,
    /// Number of processes listed in the per-cycle summary.
    pub top_n: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            ticks_per_second: rate::DEFAULT_TICKS_PER_SEC,
            parallel_units: 1,
            read_timeout: Duration::from_secs(5),
            terminate_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            enforce: true,
            top_n: 5,
        }
    }
}

/// Cross-cycle state: the last snapshot of each kind and the lifecycle ledger.
#[derive(Debug, Default)]
pub struct LoopState {
    pub prev_host: Option<Snapshot>,
    pub prev_workload: Option<Snapshot>,
    pub ledger: LifecycleLedger,
}

/// What one cycle observed and did. `None` rates mean the read failed.
#[derive(Debug, Default, Serialize)]
pub struct CycleReport {
    pub host_ts: Option<i64>,
    pub host_rates: Option<BTreeMap<String, f64>>,
    pub workload_ts: Option<i64>,
    pub workload_rates: Option<BTreeMap<String, f64>>,
    pub created: usize,
    pub removed: usize,
    pub active_workloads: usize,
    /// `name[pid]=pct%` for the busiest processes, highest first.
    pub top_processes: Vec<String>,
    pub evictions: Vec<Eviction>,
}

pub struct ControlLoop<S: ?Sized, T: ?Sized, K> {
    source: Arc<S>,
    terminator: Arc<T>,
    sink: K,
    policy: Arc<ResolvedPolicy>,
    config: LoopConfig,
    state: LoopState,
}

impl<S, T, K> ControlLoop<S, T, K>
where
    S: SnapshotSource + ?Sized + 'static,
    T: Terminator + ?Sized + 'static,
    K: MetricsSink,
{
    pub fn new(
        source: Arc<S>,
        terminator: Arc<T>,
        sink: K,
        policy: ResolvedPolicy,
        config: LoopConfig,
    ) -> Self {
        Self {
            source,
            terminator,
            sink,
            policy: Arc::new(policy),
            config,
            state: LoopState::default(),
        }
    }

    /// Start from an existing ledger (open records loaded from the store).
    #[must_use]
    pub fn with_ledger(mut self, ledger: LifecycleLedger) -> Self {
        self.state.ledger = ledger;
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    #[cfg(test)]
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run cycles until `cancel` fires, then run `shutdown` once.
    ///
    /// Cancellation is observed between cycles only.
    pub async fn run<A>(mut self, cancel: CancellationToken, shutdown: Arc<A>)
    where
        A: ShutdownAction + ?Sized + 'static,
    {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            units = self.config.parallel_units,
            enforce = self.config.enforce,
            "control loop started"
        );

        while !cancel.is_cancelled() {
            self.run_cycle().await;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!(
            open = self.state().ledger.open_count(),
            removed = self.state().ledger.removed_since_start(),
            "control loop stopping, running shutdown action"
        );
        let timeout = self.config.shutdown_timeout;
        let task = tokio::task::spawn_blocking(move || shutdown.run(timeout));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => tracing::info!("shutdown action finished"),
            Ok(Ok(Err(e))) => tracing::warn!("shutdown action failed: {e}"),
            Ok(Err(e)) => tracing::warn!("shutdown task failed: {e}"),
            Err(_) => tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "shutdown action timed out"
            ),
        }
    }

    /// One full cycle. Failures are logged and never abort the cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        // 1-2. Host snapshot → process rates → persistence.
        let read_timeout = self.config.read_timeout;
        match read_snapshot(Arc::clone(&self.source), SnapshotKind::Host, read_timeout).await {
            Ok(host) => self.apply_host(host, &mut report),
            Err(e) => tracing::warn!("host snapshot unavailable, keeping previous: {e}"),
        }

        // 3-4. Workload snapshot → lifecycle + rates → persistence.
        match read_snapshot(Arc::clone(&self.source), SnapshotKind::Workload, read_timeout).await {
            Ok(workloads) => self.apply_workloads(workloads, &mut report),
            Err(e) => tracing::warn!("workload snapshot unavailable, keeping previous: {e}"),
        }

        // 5. Population control over the ledger's view.
        report.active_workloads = self.state.ledger.open_count();
        if self.config.enforce {
            report.evictions = evict(
                self.state.ledger.active_by_tier(),
                Arc::clone(&self.policy),
                Arc::clone(&self.terminator),
                self.config.terminate_timeout,
            )
            .await;
        }

        self.log_summary(&report);
        report
    }

    fn apply_host(&mut self, host: Snapshot, report: &mut CycleReport) {
        let rates = self
            .state
            .prev_host
            .as_ref()
            .map(|prev| {
                rate::compute(
                    prev,
                    &host,
                    self.config.ticks_per_second,
                    self.config.parallel_units,
                )
            })
            .unwrap_or_default();
        let summary = state_summary(&host);

        if let Err(e) = self.sink.record_host_cycle(HostCycle {
            snapshot: &host,
            rates: &rates,
            state_summary: &summary,
        }) {
            tracing::error!(ts = host.captured_at_ms, "failed to persist host cycle: {e}");
        }

        report.top_processes = top_by_cpu(&host, &rates, self.config.top_n)
            .into_iter()
            .map(|(entity, pct)| format!("{}[{}]={pct:.2}%", entity.display_name, entity.identity))
            .collect();

        report.host_ts = Some(host.captured_at_ms);
        report.host_rates = Some(rates);
        self.state.prev_host = Some(host);
    }

    fn apply_workloads(&mut self, workloads: Snapshot, report: &mut CycleReport) {
        let ts = workloads.captured_at_ms;
        let update = self
            .state
            .ledger
            .update(&workloads.entities, ts, &self.policy.classifier);
        if update.stale {
            // Older than what was already applied: nothing to persist or diff against.
            return;
        }

        let rates = self
            .state
            .prev_workload
            .as_ref()
            .map(|prev| rate::compute(prev, &workloads, NANOS_PER_SEC, self.config.parallel_units))
            .unwrap_or_default();

        for record in &update.created {
            tracing::info!(identity = %record.identity, tier = %record.tier, "workload appeared");
        }
        for record in &update.removed {
            tracing::info!(identity = %record.identity, tier = %record.tier, "workload removed");
        }

        match self.sink.record_workload_cycle(WorkloadCycle {
            snapshot: &workloads,
            update: &update,
            rates: &rates,
        }) {
            Ok(totals) => tracing::debug!(
                active = totals.active,
                removed_total = totals.removed_total,
                "workload cycle persisted"
            ),
            // The ledger keeps the applied update; the next write repairs the rows.
            Err(e) => tracing::error!(ts, "failed to persist workload cycle: {e}"),
        }

        report.workload_ts = Some(ts);
        report.workload_rates = Some(rates);
        report.created = update.created.len();
        report.removed = update.removed.len();
        self.state.prev_workload = Some(workloads);
    }

    fn log_summary(&self, report: &CycleReport) {
        let terminated = report.evictions.iter().filter(|e| e.succeeded()).count();
        tracing::info!(
            processes = self
                .state
                .prev_host
                .as_ref()
                .map_or(0, |h| h.entities.len()),
            workloads = report.active_workloads,
            created = report.created,
            removed = report.removed,
            terminated,
            failed = report.evictions.len() - terminated,
            top = %report.top_processes.join(" "),
            "cycle complete"
        );
    }
}

/// Read one snapshot on the blocking pool, bounded by `timeout`.
async fn read_snapshot<S>(
    source: Arc<S>,
    kind: SnapshotKind,
    timeout: Duration,
) -> anyhow::Result<Snapshot>
where
    S: SnapshotSource + ?Sized + 'static,
{
    let task = tokio::task::spawn_blocking(move || source.read(kind, timeout));
    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => Ok(joined??),
        Err(_) => anyhow::bail!("{kind} read timed out after {}ms", timeout.as_millis()),
    }
}

/// Run the population controller on the blocking pool. Each termination is
/// bounded by the terminator's own deadline.
async fn evict<T>(
    active: ActiveByTier,
    policy: Arc<ResolvedPolicy>,
    terminator: Arc<T>,
    timeout: Duration,
) -> Vec<Eviction>
where
    T: Terminator + ?Sized + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        enforce(&active, &policy.population, &*terminator, timeout)
    });
    match task.await {
        Ok(evictions) => evictions,
        Err(e) => {
            tracing::error!("eviction task failed: {e}");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
