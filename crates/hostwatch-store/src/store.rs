//! SQLite persistence for the metrics time series and workload lifecycles.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use hostwatch_core::{LifecycleRecord, LifecycleUpdate, Tier};

use crate::error::StoreError;
use crate::sink::{HostCycle, MetricsSink, WorkloadCycle, WorkloadTotals};

/// SQLite-backed metrics store.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database file, switch it to WAL and run migrations.
    ///
    /// `busy_timeout` bounds how long a write waits on a lock held by a reader.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "store opened");
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS system_metrics (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ms          INTEGER NOT NULL,
                total_ram_kb   INTEGER NOT NULL,
                free_ram_kb    INTEGER NOT NULL,
                available_kb   INTEGER,
                ram_used_kb    INTEGER NOT NULL,
                total_procs    INTEGER NOT NULL,
                cpu_usage_pct  REAL,
                recorded_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_system_ts ON system_metrics(ts_ms);

            CREATE TABLE IF NOT EXISTS process_metrics (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ms      INTEGER NOT NULL,
                pid        TEXT NOT NULL,
                comm       TEXT NOT NULL,
                state      TEXT NOT NULL,
                rss_kb     INTEGER NOT NULL,
                cpu_ticks  INTEGER NOT NULL,
                cpu_pct    REAL
            );
            CREATE INDEX IF NOT EXISTS idx_process_ts ON process_metrics(ts_ms);

            CREATE TABLE IF NOT EXISTS process_state_summary (
                ts_ms  INTEGER NOT NULL,
                state  TEXT NOT NULL,
                count  INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_state_ts ON process_state_summary(ts_ms);

            CREATE TABLE IF NOT EXISTS container_host_metrics (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ms             INTEGER NOT NULL,
                total_ram_kb      INTEGER NOT NULL,
                free_ram_kb       INTEGER NOT NULL,
                used_ram_kb       INTEGER NOT NULL,
                total_containers  INTEGER NOT NULL,
                total_deleted_acc INTEGER NOT NULL,
                recorded_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chost_ts ON container_host_metrics(ts_ms);

            CREATE TABLE IF NOT EXISTS containers (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                container_id     TEXT NOT NULL,
                first_seen_ts_ms INTEGER NOT NULL,
                last_seen_ts_ms  INTEGER NOT NULL,
                removed_at_ts_ms INTEGER,
                tier             TEXT NOT NULL,
                UNIQUE (container_id, first_seen_ts_ms)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_containers_open
                ON containers(container_id) WHERE removed_at_ts_ms IS NULL;

            CREATE TABLE IF NOT EXISTS container_metrics (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ms         INTEGER NOT NULL,
                container_id  TEXT NOT NULL,
                name          TEXT NOT NULL,
                rss_kb        INTEGER NOT NULL,
                cpu_time_ns   INTEGER NOT NULL,
                cpu_pct       REAL
            );
            CREATE INDEX IF NOT EXISTS idx_cmetrics_ts ON container_metrics(ts_ms);
            CREATE INDEX IF NOT EXISTS idx_cmetrics_cid ON container_metrics(container_id);",
        )?;
        Ok(())
    }

    /// Every lifecycle record of one identity, oldest first.
    pub fn lifecycle_history(&self, identity: &str) -> Result<Vec<LifecycleRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT container_id, first_seen_ts_ms, last_seen_ts_ms, removed_at_ts_ms, tier
             FROM containers
             WHERE container_id = ?1
             ORDER BY first_seen_ts_ms",
        )?;
        let rows = stmt.query_map(params![identity], raw_lifecycle)?;
        collect_lifecycles(rows)
    }

    /// Number of lifecycle records closed so far.
    pub fn removed_count(&self) -> Result<u64, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM containers WHERE removed_at_ts_ms IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Timestamp of the newest host row, if any.
    pub fn latest_host_ts(&self) -> Result<Option<i64>, StoreError> {
        let ts = self
            .conn
            .query_row("SELECT MAX(ts_ms) FROM system_metrics", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?;
        Ok(ts.flatten())
    }
}

type RawLifecycle = (String, i64, i64, Option<i64>, String);

fn raw_lifecycle(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLifecycle> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn collect_lifecycles(
    rows: impl Iterator<Item = rusqlite::Result<RawLifecycle>>,
) -> Result<Vec<LifecycleRecord>, StoreError> {
    let mut result = Vec::new();
    for row in rows {
        let (identity, first_seen_ms, last_seen_ms, removed_ms, tier) = row?;
        let tier: Tier = tier.parse().map_err(|e| StoreError::Corrupt {
            table: "containers",
            reason: format!("{identity}: {e}"),
        })?;
        result.push(LifecycleRecord {
            identity,
            first_seen_ms,
            last_seen_ms,
            removed_ms,
            tier,
        });
    }
    Ok(result)
}

/// Insert or advance one lifecycle record inside `tx`.
///
/// `last_seen` only moves forward and a removal time, once set, is kept.
fn upsert_lifecycle(tx: &Transaction<'_>, record: &LifecycleRecord) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO containers
            (container_id, first_seen_ts_ms, last_seen_ts_ms, removed_at_ts_ms, tier)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (container_id, first_seen_ts_ms) DO UPDATE SET
            last_seen_ts_ms  = MAX(last_seen_ts_ms, excluded.last_seen_ts_ms),
            removed_at_ts_ms = COALESCE(removed_at_ts_ms, excluded.removed_at_ts_ms)",
        params![
            record.identity,
            record.first_seen_ms,
            record.last_seen_ms,
            record.removed_ms,
            record.tier.as_str(),
        ],
    )?;
    Ok(())
}

/// Close every open row whose identity is not open after `update`.
///
/// Catches removals that were applied in memory while a write failed.
fn close_absent(tx: &Transaction<'_>, update: &LifecycleUpdate) -> rusqlite::Result<()> {
    if update.stale {
        return Ok(());
    }
    let present: HashSet<&str> = update
        .created
        .iter()
        .chain(&update.touched)
        .map(|r| r.identity.as_str())
        .collect();

    let open: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT container_id FROM containers WHERE removed_at_ts_ms IS NULL")?;
        stmt.query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?
    };

    let mut stmt = tx.prepare(
        "UPDATE containers SET removed_at_ts_ms = ?2
         WHERE container_id = ?1 AND removed_at_ts_ms IS NULL",
    )?;
    for identity in open.iter().filter(|id| !present.contains(id.as_str())) {
        stmt.execute(params![identity, update.ts])?;
        tracing::warn!(%identity, ts = update.ts, "closed lifecycle row missed by an earlier write");
    }
    Ok(())
}

impl MetricsSink for Store {
    fn record_host_cycle(&mut self, cycle: HostCycle<'_>) -> Result<(), StoreError> {
        let snap = cycle.snapshot;
        let totals = &snap.totals;
        let total_procs = totals
            .process_count
            .unwrap_or(snap.entities.len() as u64);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO system_metrics
                (ts_ms, total_ram_kb, free_ram_kb, available_kb, ram_used_kb,
                 total_procs, cpu_usage_pct, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snap.captured_at_ms,
                totals.memory_total_kb as i64,
                totals.memory_free_kb as i64,
                totals.memory_available_kb.map(|v| v as i64),
                totals.memory_used_kb as i64,
                total_procs as i64,
                totals.cpu_usage_pct,
                Utc::now().to_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO process_metrics
                    (ts_ms, pid, comm, state, rss_kb, cpu_ticks, cpu_pct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entity in &snap.entities {
                stmt.execute(params![
                    snap.captured_at_ms,
                    entity.identity,
                    entity.display_name,
                    entity.state_code,
                    entity.resident_memory_kb as i64,
                    entity.cpu_time as i64,
                    cycle.rates.get(&entity.identity),
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO process_state_summary (ts_ms, state, count) VALUES (?1, ?2, ?3)",
            )?;
            for (state, count) in cycle.state_summary {
                stmt.execute(params![snap.captured_at_ms, state, *count as i64])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn record_workload_cycle(
        &mut self,
        cycle: WorkloadCycle<'_>,
    ) -> Result<WorkloadTotals, StoreError> {
        let snap = cycle.snapshot;
        let update = cycle.update;

        let tx = self.conn.transaction()?;

        for record in &update.created {
            // An open row left behind by an earlier failed write would block the new record.
            let repaired = tx.execute(
                "UPDATE containers SET removed_at_ts_ms = ?2
                 WHERE container_id = ?1 AND removed_at_ts_ms IS NULL
                   AND first_seen_ts_ms < ?3",
                params![record.identity, update.ts, record.first_seen_ms],
            )?;
            if repaired > 0 {
                tracing::warn!(identity = %record.identity, "closed orphaned open lifecycle row");
            }
            upsert_lifecycle(&tx, record)?;
        }
        for record in update.touched.iter().chain(&update.removed) {
            upsert_lifecycle(&tx, record)?;
        }
        close_absent(&tx, update)?;

        let (active, removed_total): (i64, i64) = tx.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN removed_at_ts_ms IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN removed_at_ts_ms IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM containers",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute(
            "INSERT INTO container_host_metrics
                (ts_ms, total_ram_kb, free_ram_kb, used_ram_kb,
                 total_containers, total_deleted_acc, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snap.captured_at_ms,
                snap.totals.memory_total_kb as i64,
                snap.totals.memory_free_kb as i64,
                snap.totals.memory_used_kb as i64,
                active,
                removed_total,
                Utc::now().to_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO container_metrics
                    (ts_ms, container_id, name, rss_kb, cpu_time_ns, cpu_pct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entity in &snap.entities {
                stmt.execute(params![
                    snap.captured_at_ms,
                    entity.identity,
                    entity.display_name,
                    entity.resident_memory_kb as i64,
                    entity.cpu_time as i64,
                    cycle.rates.get(&entity.identity),
                ])?;
            }
        }

        tx.commit()?;
        Ok(WorkloadTotals {
            active: active as u64,
            removed_total: removed_total as u64,
        })
    }

    fn load_open_lifecycles(&self) -> Result<Vec<LifecycleRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT container_id, first_seen_ts_ms, last_seen_ts_ms, removed_at_ts_ms, tier
             FROM containers
             WHERE removed_at_ts_ms IS NULL
             ORDER BY container_id",
        )?;
        let rows = stmt.query_map([], raw_lifecycle)?;
        collect_lifecycles(rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
