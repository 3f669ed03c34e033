//! SnapshotSource trait and the file-backed implementation.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use hostwatch_core::{Snapshot, SnapshotKind};

use crate::document::{parse_continfo, parse_sysinfo};
use crate::error::ProbeError;

/// Producer of host and workload snapshots. Enables mock injection for testing.
pub trait SnapshotSource: Send + Sync {
    fn read_host(&self, timeout: Duration) -> Result<Snapshot, ProbeError>;

    fn read_workloads(&self, timeout: Duration) -> Result<Snapshot, ProbeError>;

    fn read(&self, kind: SnapshotKind, timeout: Duration) -> Result<Snapshot, ProbeError> {
        match kind {
            SnapshotKind::Host => self.read_host(timeout),
            SnapshotKind::Workload => self.read_workloads(timeout),
        }
    }
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for &T {
    fn read_host(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        (**self).read_host(timeout)
    }

    fn read_workloads(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        (**self).read_workloads(timeout)
    }
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for std::sync::Arc<T> {
    fn read_host(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        (**self).read_host(timeout)
    }

    fn read_workloads(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        (**self).read_workloads(timeout)
    }
}

/// Reads the two documents the metrics source exposes (normally under `/proc`).
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    sysinfo_path: PathBuf,
    continfo_path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(sysinfo_path: impl Into<PathBuf>, continfo_path: impl Into<PathBuf>) -> Self {
        Self {
            sysinfo_path: sysinfo_path.into(),
            continfo_path: continfo_path.into(),
        }
    }

    pub fn sysinfo_path(&self) -> &Path {
        &self.sysinfo_path
    }

    pub fn continfo_path(&self) -> &Path {
        &self.continfo_path
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn read_host(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        let content = read_with_deadline(&self.sysinfo_path, timeout)?;
        parse_sysinfo(&content)
    }

    fn read_workloads(&self, timeout: Duration) -> Result<Snapshot, ProbeError> {
        let content = read_with_deadline(&self.continfo_path, timeout)?;
        parse_continfo(&content)
    }
}

/// Read a file on a helper thread, giving up once `timeout` elapses.
///
/// A procfs read can block inside the producing module; the helper thread is
/// left behind in that case and its result discarded.
fn read_with_deadline(path: &Path, timeout: Duration) -> Result<String, ProbeError> {
    let (tx, rx) = mpsc::channel();
    let owned = path.to_path_buf();
    std::thread::Builder::new()
        .name("hostwatch-read".to_string())
        .spawn(move || {
            let _ = tx.send(std::fs::read_to_string(&owned));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(content)) => Ok(content),
        Ok(Err(source)) => Err(ProbeError::Read {
            path: path.display().to_string(),
            source,
        }),
        Err(_) => Err(ProbeError::TimedOut {
            what: format!("read {}", path.display()),
            ms: timeout.as_millis() as u64,
        }),
    }
}
