//! Metrics-source JSON documents and their conversion into snapshots.
//!
//! Host document (`/proc/sysinfo_*`): host memory totals plus one entry per
//! process with `utime`/`stime` scheduler ticks.
//! Workload document (`/proc/continfo_*`): host memory totals plus one entry
//! per process, tagged with the container it belongs to and its cpu time in
//! nanoseconds.

use serde::Deserialize;

use hostwatch_core::{EntityRecord, MemoryTotals, Snapshot, SnapshotKind};

use crate::error::ProbeError;

/// Marker value of `container_related` for processes that belong to a workload.
const CONTAINER_RELATED: &str = "yes";

#[derive(Debug, Deserialize)]
struct SysInfoDoc {
    #[serde(default)]
    total_ram_kb: u64,
    #[serde(default)]
    free_ram_kb: u64,
    #[serde(default)]
    available_kb: u64,
    #[serde(default)]
    ram_used_kb: u64,
    #[serde(default)]
    total_procs: u64,
    #[serde(default)]
    cpu_usage_pct: Option<f64>,
    ts_ms: i64,
    #[serde(default)]
    procesos: Vec<ProcessDoc>,
}

#[derive(Debug, Deserialize)]
struct ProcessDoc {
    pid: i64,
    #[serde(default)]
    comm: String,
    #[serde(default)]
    rss_kb: u64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    utime: u64,
    #[serde(default)]
    stime: u64,
}

#[derive(Debug, Deserialize)]
struct ContInfoDoc {
    #[serde(default)]
    total_ram_kb: u64,
    #[serde(default)]
    free_ram_kb: u64,
    #[serde(default)]
    used_ram_kb: u64,
    ts_ms: i64,
    #[serde(default)]
    procesos: Vec<ContProcessDoc>,
}

#[derive(Debug, Deserialize)]
struct ContProcessDoc {
    #[serde(default)]
    nombre: String,
    #[serde(default)]
    cmdline_or_container_id: String,
    #[serde(default)]
    rss_kb: u64,
    #[serde(default)]
    cpu_time_ns: u64,
    #[serde(default)]
    estado: String,
    #[serde(default)]
    container_related: String,
}

/// Parse a host document. Process cpu time is `utime + stime` ticks.
///
/// When the source reports `ram_used_kb = 0` with a known total, used memory
/// is derived as `total - free`.
pub fn parse_sysinfo(json: &str) -> Result<Snapshot, ProbeError> {
    let doc: SysInfoDoc = serde_json::from_str(json).map_err(|source| ProbeError::Parse {
        kind: SnapshotKind::Host,
        source,
    })?;

    let memory_used_kb = if doc.ram_used_kb == 0 && doc.total_ram_kb > 0 {
        doc.total_ram_kb.saturating_sub(doc.free_ram_kb)
    } else {
        doc.ram_used_kb
    };

    let entities = doc
        .procesos
        .into_iter()
        .map(|p| EntityRecord {
            identity: p.pid.to_string(),
            display_name: p.comm,
            resident_memory_kb: p.rss_kb,
            cpu_time: p.utime.saturating_add(p.stime),
            state_code: p.state,
        })
        .collect();

    Ok(Snapshot {
        kind: SnapshotKind::Host,
        captured_at_ms: doc.ts_ms,
        totals: MemoryTotals {
            memory_total_kb: doc.total_ram_kb,
            memory_free_kb: doc.free_ram_kb,
            memory_used_kb,
            memory_available_kb: (doc.available_kb > 0).then_some(doc.available_kb),
            process_count: Some(doc.total_procs),
            cpu_usage_pct: doc.cpu_usage_pct,
        },
        entities,
    })
}

/// Parse a workload document into one entity per container.
///
/// Only processes marked container-related with a non-empty container id
/// count. Processes of the same container are folded together: resident
/// memory and cpu time are summed, name and state come from the first one.
/// Entities keep the order in which their container first appeared.
pub fn parse_continfo(json: &str) -> Result<Snapshot, ProbeError> {
    let doc: ContInfoDoc = serde_json::from_str(json).map_err(|source| ProbeError::Parse {
        kind: SnapshotKind::Workload,
        source,
    })?;

    let mut entities: Vec<EntityRecord> = Vec::new();
    for p in doc.procesos {
        if p.container_related != CONTAINER_RELATED || p.cmdline_or_container_id.is_empty() {
            continue;
        }
        match entities
            .iter_mut()
            .find(|e| e.identity == p.cmdline_or_container_id)
        {
            Some(entity) => {
                entity.resident_memory_kb = entity.resident_memory_kb.saturating_add(p.rss_kb);
                entity.cpu_time = entity.cpu_time.saturating_add(p.cpu_time_ns);
            }
            None => entities.push(EntityRecord {
                identity: p.cmdline_or_container_id,
                display_name: p.nombre,
                resident_memory_kb: p.rss_kb,
                cpu_time: p.cpu_time_ns,
                state_code: p.estado,
            }),
        }
    }

    Ok(Snapshot {
        kind: SnapshotKind::Workload,
        captured_at_ms: doc.ts_ms,
        totals: MemoryTotals {
            memory_total_kb: doc.total_ram_kb,
            memory_free_kb: doc.free_ram_kb,
            memory_used_kb: doc.used_ram_kb,
            ..Default::default()
        },
        entities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSINFO: &str = r#"{
        "total_ram_kb": 16000000,
        "free_ram_kb": 4000000,
        "available_kb": 9000000,
        "ram_used_kb": 12000000,
        "total_procs": 312,
        "cpu_usage_pct": 17,
        "ts_ms": 1700000000000,
        "procesos": [
            {"pid": 1, "comm": "systemd", "rss_kb": 12000, "vmsize_kb": 170000,
             "state": "S", "utime": 120, "stime": 80, "ts_ms": 1700000000000},
            {"pid": 4242, "comm": "stress-ng", "rss_kb": 800, "vmsize_kb": 9000,
             "state": "R", "utime": 5000, "stime": 3, "ts_ms": 1700000000000}
        ]
    }"#;

    const CONTINFO: &str = r#"{
        "total_ram_kb": 16000000,
        "free_ram_kb": 4000000,
        "used_ram_kb": 12000000,
        "ts_ms": 1700000005000,
        "procesos": [
            {"pid": 10, "nombre": "stress-ng", "cmdline_or_container_id": "stress-high-cpu-1",
             "vsz_kb": 1, "rss_kb": 100, "mem_percent": 0, "cpu_time_ns": 1000,
             "estado": "R", "container_related": "yes"},
            {"pid": 11, "nombre": "stress-ng-cpu", "cmdline_or_container_id": "stress-high-cpu-1",
             "vsz_kb": 1, "rss_kb": 50, "mem_percent": 0, "cpu_time_ns": 500,
             "estado": "R", "container_related": "yes"},
            {"pid": 12, "nombre": "containerd-shim", "cmdline_or_container_id": "stress-low-1",
             "vsz_kb": 1, "rss_kb": 7, "mem_percent": 0, "cpu_time_ns": 9,
             "estado": "S", "container_related": "yes"},
            {"pid": 13, "nombre": "bash", "cmdline_or_container_id": "",
             "vsz_kb": 1, "rss_kb": 7, "mem_percent": 0, "cpu_time_ns": 9,
             "estado": "S", "container_related": "yes"},
            {"pid": 14, "nombre": "sshd", "cmdline_or_container_id": "/usr/sbin/sshd",
             "vsz_kb": 1, "rss_kb": 7, "mem_percent": 0, "cpu_time_ns": 9,
             "estado": "S", "container_related": "no"}
        ]
    }"#;

    #[test]
    fn sysinfo_maps_processes() {
        let snap = parse_sysinfo(SYSINFO).expect("parse");
        assert_eq!(snap.kind, SnapshotKind::Host);
        assert_eq!(snap.captured_at_ms, 1_700_000_000_000);
        assert_eq!(snap.totals.memory_used_kb, 12_000_000);
        assert_eq!(snap.totals.memory_available_kb, Some(9_000_000));
        assert_eq!(snap.totals.process_count, Some(312));
        assert_eq!(snap.totals.cpu_usage_pct, Some(17.0));
        assert_eq!(snap.entities.len(), 2);
        let stress = snap.entity("4242").expect("present");
        assert_eq!(stress.cpu_time, 5003);
        assert_eq!(stress.display_name, "stress-ng");
        assert_eq!(stress.state_code, "R");
    }

    #[test]
    fn sysinfo_derives_used_memory() {
        let json = r#"{"total_ram_kb": 1000, "free_ram_kb": 300, "ram_used_kb": 0, "ts_ms": 1}"#;
        let snap = parse_sysinfo(json).expect("parse");
        assert_eq!(snap.totals.memory_used_kb, 700);
        assert!(snap.totals.memory_available_kb.is_none());
        assert!(snap.entities.is_empty());
    }

    #[test]
    fn sysinfo_without_timestamp_is_malformed() {
        let err = parse_sysinfo(r#"{"total_ram_kb": 1}"#).expect_err("missing ts_ms");
        assert!(matches!(err, ProbeError::Parse { kind: SnapshotKind::Host, .. }));
    }

    #[test]
    fn sysinfo_garbage_is_malformed() {
        assert!(parse_sysinfo("not json").is_err());
    }

    #[test]
    fn continfo_folds_processes_per_container() {
        let snap = parse_continfo(CONTINFO).expect("parse");
        assert_eq!(snap.kind, SnapshotKind::Workload);
        let ids: Vec<&str> = snap.identities().collect();
        assert_eq!(ids, vec!["stress-high-cpu-1", "stress-low-1"]);

        let cpu = snap.entity("stress-high-cpu-1").expect("present");
        assert_eq!(cpu.cpu_time, 1500);
        assert_eq!(cpu.resident_memory_kb, 150);
        assert_eq!(cpu.display_name, "stress-ng");
    }

    #[test]
    fn continfo_empty_list() {
        let snap = parse_continfo(r#"{"ts_ms": 5, "procesos": []}"#).expect("parse");
        assert!(snap.entities.is_empty());
        assert_eq!(snap.captured_at_ms, 5);
    }

    #[test]
    fn continfo_truncated_is_malformed() {
        let err = parse_continfo(r#"{"ts_ms": 5, "procesos": [{"#).expect_err("truncated");
        assert!(matches!(err, ProbeError::Parse { kind: SnapshotKind::Workload, .. }));
    }
}
