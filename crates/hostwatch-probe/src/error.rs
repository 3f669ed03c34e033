//! Error types for the probe IO boundary.

use hostwatch_core::SnapshotKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {kind} document: {source}")]
    Parse {
        kind: SnapshotKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("{what} timed out after {ms}ms")]
    TimedOut { what: String, ms: u64 },

    #[error("probe io error: {0}")]
    Io(#[from] std::io::Error),
}
