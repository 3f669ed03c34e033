//! CommandRunner trait and ProcessExecutor (sync subprocess wrapper with a deadline).

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::ProbeError;

const POLL_STEP: Duration = Duration::from_millis(20);

/// Trait for executing external commands. Enables mock injection for testing.
pub trait CommandRunner: Send + Sync {
    /// Run `program args…`, returning stdout. The child is killed once
    /// `timeout` elapses.
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
        (**self).run(program, args, timeout)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
        (**self).run(program, args, timeout)
    }
}

/// Real executor using `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    working_dir: Option<String>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl CommandRunner for ProcessExecutor {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn()?;

        // Drain both pipes while waiting so a chatty child never blocks on a full pipe.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // Best effort: the child may have exited in between. Readers are
                // left detached since grandchildren may still hold the pipes.
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::TimedOut {
                    what: format!("{program} {}", args.join(" ")),
                    ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(POLL_STEP);
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            return Err(ProbeError::CommandFailed(format!(
                "{program} exit code {}: {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

type Drain = JoinHandle<std::io::Result<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Drain {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<Drain>) -> Result<String, ProbeError> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let buf = reader
        .join()
        .map_err(|_| ProbeError::CommandFailed("output reader panicked".to_string()))??;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_executor() {
        let exec = ProcessExecutor::default();
        assert!(exec.working_dir.is_none());
    }

    #[test]
    fn with_working_dir() {
        let exec = ProcessExecutor::new().with_working_dir("/tmp");
        assert_eq!(exec.working_dir, Some("/tmp".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout() {
        let out = ProcessExecutor::new()
            .run("sh", &["-c", "echo hello"], Duration::from_secs(5))
            .expect("ok");
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_command_failed() {
        let err = ProcessExecutor::new()
            .run("sh", &["-c", "echo boom >&2; exit 3"], Duration::from_secs(5))
            .expect_err("should fail");
        match err {
            ProbeError::CommandFailed(msg) => {
                assert!(msg.contains("exit code 3"), "{msg}");
                assert!(msg.contains("boom"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn large_output_does_not_stall() {
        let out = ProcessExecutor::new()
            .run(
                "sh",
                &["-c", "head -c 200000 /dev/zero | tr '\\0' x; echo; echo done >&2"],
                Duration::from_secs(5),
            )
            .expect("ok");
        assert_eq!(out.trim_end().len(), 200_000);
    }

    #[cfg(unix)]
    #[test]
    fn large_stderr_does_not_stall() {
        let err = ProcessExecutor::new()
            .run(
                "sh",
                &["-c", "head -c 200000 /dev/zero | tr '\\0' e >&2; exit 1"],
                Duration::from_secs(5),
            )
            .expect_err("should fail");
        match err {
            ProbeError::CommandFailed(msg) => assert!(msg.contains("exit code 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let started = Instant::now();
        let err = ProcessExecutor::new()
            .run("sleep", &["5"], Duration::from_millis(100))
            .expect_err("should time out");
        assert!(matches!(err, ProbeError::TimedOut { ms: 100, .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_binary_is_io_error() {
        let err = ProcessExecutor::new()
            .run("hostwatch-no-such-binary", &[], Duration::from_secs(1))
            .expect_err("should fail");
        assert!(matches!(err, ProbeError::Io(_)));
    }

    #[test]
    fn blanket_ref_impl() {
        struct Mock;
        impl CommandRunner for Mock {
            fn run(&self, _p: &str, _a: &[&str], _t: Duration) -> Result<String, ProbeError> {
                Ok("ok".to_string())
            }
        }
        let mock = Mock;
        let r: &Mock = &mock;
        assert_eq!(r.run("x", &[], Duration::ZERO).expect("ok"), "ok");
    }
}
