//! Exit-time cleanup action.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ProbeError;
use crate::executor::{CommandRunner, ProcessExecutor};

/// Action executed once when the control loop stops.
pub trait ShutdownAction: Send + Sync {
    fn run(&self, timeout: Duration) -> Result<(), ProbeError>;
}

impl<T: ShutdownAction + ?Sized> ShutdownAction for &T {
    fn run(&self, timeout: Duration) -> Result<(), ProbeError> {
        (**self).run(timeout)
    }
}

impl<T: ShutdownAction + ?Sized> ShutdownAction for std::sync::Arc<T> {
    fn run(&self, timeout: Duration) -> Result<(), ProbeError> {
        (**self).run(timeout)
    }
}

/// Nothing to do at exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShutdown;

impl ShutdownAction for NoopShutdown {
    fn run(&self, _timeout: Duration) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Runs `bash <script>` (e.g. a script that unloads the metrics source).
#[derive(Debug, Clone)]
pub struct ScriptShutdown<R: CommandRunner = ProcessExecutor> {
    script: PathBuf,
    runner: R,
}

impl ScriptShutdown<ProcessExecutor> {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self::with_runner(script, ProcessExecutor::new())
    }
}

impl<R: CommandRunner> ScriptShutdown<R> {
    pub fn with_runner(script: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            script: script.into(),
            runner,
        }
    }
}

impl<R: CommandRunner> ShutdownAction for ScriptShutdown<R> {
    fn run(&self, timeout: Duration) -> Result<(), ProbeError> {
        let script = self.script.to_string_lossy();
        let output = self.runner.run("bash", &[script.as_ref()], timeout)?;
        if !output.trim().is_empty() {
            tracing::info!(script = %script, output = %output.trim(), "shutdown script finished");
        }
        Ok(())
    }
}
