//! Terminator implementations backed by the container runtime CLI.

use std::time::Duration;

use hostwatch_core::{TerminationError, Terminator};

use crate::error::ProbeError;
use crate::executor::{CommandRunner, ProcessExecutor};

/// Stops containers with `docker stop --time <grace> <id>`.
///
/// The grace period handed to docker is half the call timeout, so the
/// runtime's own SIGKILL fallback fires before our deadline does.
#[derive(Debug, Clone)]
pub struct DockerTerminator<R: CommandRunner = ProcessExecutor> {
    runner: R,
    docker_bin: String,
}

impl DockerTerminator<ProcessExecutor> {
    pub fn new() -> Self {
        Self::with_runner(ProcessExecutor::new())
    }
}

impl Default for DockerTerminator<ProcessExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> DockerTerminator<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            docker_bin: "docker".to_string(),
        }
    }

    #[must_use]
    pub fn with_docker_bin(mut self, bin: impl Into<String>) -> Self {
        self.docker_bin = bin.into();
        self
    }

    pub fn docker_bin(&self) -> &str {
        &self.docker_bin
    }
}

impl<R: CommandRunner> Terminator for DockerTerminator<R> {
    fn terminate(&self, identity: &str, timeout: Duration) -> Result<(), TerminationError> {
        let grace = (timeout.as_secs() / 2).to_string();
        self.runner
            .run(
                &self.docker_bin,
                &["stop", "--time", &grace, identity],
                timeout,
            )
            .map(|_| ())
            .map_err(|e| match e {
                ProbeError::TimedOut { ms, .. } => TerminationError::TimedOut(ms),
                other => TerminationError::Failed(other.to_string()),
            })
    }
}

/// Logs the selection and reports success without touching any workload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunTerminator;

impl Terminator for DryRunTerminator {
    fn terminate(&self, identity: &str, timeout: Duration) -> Result<(), TerminationError> {
        tracing::info!(identity, timeout_ms = timeout.as_millis() as u64, "dry run: would stop workload");
        Ok(())
    }
}
