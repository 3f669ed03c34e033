//! hostwatch-probe: IO boundary for the control loop.
//! Reads metrics-source documents into snapshots, runs external commands
//! with deadlines, and provides the termination and shutdown capabilities.
//! No business logic here.

pub mod document;
pub mod error;
pub mod executor;
pub mod shutdown;
pub mod source;
pub mod terminate;

pub use document::{parse_continfo, parse_sysinfo};
pub use error::ProbeError;
pub use executor::{CommandRunner, ProcessExecutor};
pub use shutdown::{NoopShutdown, ScriptShutdown, ShutdownAction};
pub use source::{FileSnapshotSource, SnapshotSource};
pub use terminate::{DockerTerminator, DryRunTerminator};
