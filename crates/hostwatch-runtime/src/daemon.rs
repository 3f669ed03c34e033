//! Startup wiring: policy, store, source and terminator → ControlLoop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use hostwatch_core::{LifecycleLedger, PolicyFile, ResolvedPolicy, Terminator};
use hostwatch_probe::{
    DockerTerminator, DryRunTerminator, FileSnapshotSource, NoopShutdown, ScriptShutdown,
    ShutdownAction,
};
use hostwatch_store::{MetricsSink, Store};

use crate::cli::{DaemonOpts, LoopOpts, OnceOpts};
use crate::control_loop::{ControlLoop, CycleReport, LoopConfig};

/// Built-in policy unless a file is given. An invalid file is fatal.
pub fn load_policy(path: Option<&Path>) -> anyhow::Result<ResolvedPolicy> {
    let Some(path) = path else {
        return Ok(ResolvedPolicy::default());
    };
    let policy = PolicyFile::load(path)
        .and_then(PolicyFile::resolve)
        .with_context(|| format!("invalid policy file {}", path.display()))?;
    tracing::info!(path = %path.display(), "policy loaded");
    Ok(policy)
}

fn build_terminator(opts: &LoopOpts) -> Arc<dyn Terminator> {
    if opts.dry_run {
        Arc::new(DryRunTerminator)
    } else {
        Arc::new(DockerTerminator::new().with_docker_bin(opts.docker_bin.clone()))
    }
}

/// Open the store and build a loop seeded with the open lifecycle records.
fn build_loop(
    opts: &LoopOpts,
    policy: ResolvedPolicy,
    config: LoopConfig,
) -> anyhow::Result<ControlLoop<FileSnapshotSource, dyn Terminator, Store>> {
    let store = Store::open(&opts.db_path, opts.store_timeout())
        .with_context(|| format!("failed to open store {}", opts.db_path.display()))?;
    let open = store
        .load_open_lifecycles()
        .context("failed to load open lifecycle records")?;
    tracing::info!(
        open = open.len(),
        removed = store.removed_count()?,
        last_host_ts = ?store.latest_host_ts()?,
        db = %opts.db_path.display(),
        "store ready"
    );

    let source = Arc::new(FileSnapshotSource::new(
        &opts.sysinfo_path,
        &opts.continfo_path,
    ));
    Ok(
        ControlLoop::new(source, build_terminator(opts), store, policy, config)
            .with_ledger(LifecycleLedger::seed(open)),
    )
}

/// Run the daemon: control loop until ctrl-c or SIGTERM, then the shutdown action.
pub async fn run_daemon(opts: DaemonOpts, policy: ResolvedPolicy) -> anyhow::Result<()> {
    let config = LoopConfig {
        shutdown_timeout: Duration::from_millis(opts.shutdown_timeout_ms),
        ..opts.loop_opts.loop_config(true)
    };
    let control = build_loop(&opts.loop_opts, policy, config)?;

    let shutdown: Arc<dyn ShutdownAction> = match opts.shutdown_script {
        Some(script) => Arc::new(ScriptShutdown::new(script)),
        None => Arc::new(NoopShutdown),
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::error!("signal handler failed: {e}");
        }
        signal_cancel.cancel();
    });

    control.run(cancel, shutdown).await;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Run one cycle without the shutdown action.
pub async fn run_once(opts: OnceOpts, policy: ResolvedPolicy) -> anyhow::Result<CycleReport> {
    let config = opts.loop_opts.loop_config(opts.enforce);
    let mut control = build_loop(&opts.loop_opts, policy, config)?;
    Ok(control.run_cycle().await)
}

/// Wait for ctrl-c or SIGTERM.
async fn wait_for_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => {
                res?;
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use hostwatch_core::Tier;

    use crate::cli::{Cli, Command};

    #[test]
    fn no_policy_path_is_default() {
        assert_eq!(load_policy(None).expect("default"), ResolvedPolicy::default());
    }

    #[test]
    fn policy_file_is_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policy.toml");
        std::fs::write(
            &path,
            "[[rules]]\npattern = \"batch\"\ntier = \"low\"\n\n[[pools]]\nname = \"batch\"\ntiers = [\"low\"]\ncap = 1\n",
        )
        .expect("write");

        let policy = load_policy(Some(&path)).expect("load");
        assert_eq!(policy.classifier.classify("nightly-batch", ""), Tier::Low);
        assert_eq!(policy.population.pools()[0].cap, 1);
    }

    #[test]
    fn broken_policy_file_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "[[pools]]\nname = \"x\"\ntiers = []\ncap = 1\n").expect("write");

        let err = load_policy(Some(&path)).expect_err("empty pool");
        assert!(err.to_string().contains("invalid policy file"));
    }

    #[tokio::test]
    async fn once_reads_files_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sys = dir.path().join("sysinfo");
        let cont = dir.path().join("continfo");
        let db = dir.path().join("monitoring.db");
        std::fs::write(
            &sys,
            r#"{"total_ram_kb": 100, "free_ram_kb": 40, "ram_used_kb": 60, "ts_ms": 1000,
                "procesos": [{"pid": 1, "comm": "init", "state": "S", "utime": 1, "stime": 1}]}"#,
        )
        .expect("write sysinfo");
        std::fs::write(
            &cont,
            r#"{"ts_ms": 1000, "procesos": [{"nombre": "stress-ng",
                "cmdline_or_container_id": "stress-high-ram-1", "rss_kb": 9,
                "cpu_time_ns": 5, "estado": "R", "container_related": "yes"}]}"#,
        )
        .expect("write continfo");

        let cli = Cli::try_parse_from([
            "hostwatch",
            "once",
            "--sysinfo-path",
            sys.to_str().expect("utf8"),
            "--continfo-path",
            cont.to_str().expect("utf8"),
            "--db-path",
            db.to_str().expect("utf8"),
        ])
        .expect("parse");
        let Command::Once(opts) = cli.command else {
            panic!("expected once");
        };

        let report = run_once(opts, ResolvedPolicy::default()).await.expect("cycle");
        assert_eq!(report.host_ts, Some(1000));
        assert_eq!(report.created, 1);
        assert!(report.evictions.is_empty());

        let store = Store::open(&db, Duration::from_secs(1)).expect("reopen");
        let open = store.load_open_lifecycles().expect("load");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].tier, Tier::HighB);
    }
}
