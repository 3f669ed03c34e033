//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::control_loop::LoopConfig;

#[derive(Parser)]
#[command(
    name = "hostwatch",
    about = "Host and container telemetry with workload population control"
)]
pub struct Cli {
    /// Policy file (TOML) with classification rules and cap pools
    #[arg(long, global = true, env = "HOSTWATCH_POLICY")]
    pub policy: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the control loop until ctrl-c or SIGTERM
    Daemon(DaemonOpts),
    /// Run a single cycle and print its report as JSON
    Once(OnceOpts),
    /// Print the resolved policy as JSON
    Policy,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    #[command(flatten)]
    pub loop_opts: LoopOpts,

    /// Script run with bash when the daemon stops
    #[arg(long, env = "HOSTWATCH_SHUTDOWN_SCRIPT")]
    pub shutdown_script: Option<PathBuf>,

    /// Shutdown script timeout in milliseconds
    #[arg(long, default_value = "30000")]
    pub shutdown_timeout_ms: u64,
}

#[derive(clap::Args)]
pub struct OnceOpts {
    #[command(flatten)]
    pub loop_opts: LoopOpts,

    /// Also run the population controller
    #[arg(long)]
    pub enforce: bool,
}

/// Options shared by every subcommand that runs cycles.
#[derive(clap::Args, Debug, Clone)]
pub struct LoopOpts {
    /// Host metrics document
    #[arg(long, env = "HOSTWATCH_SYSINFO_PATH", default_value = "/proc/sysinfo_so1_201801521")]
    pub sysinfo_path: PathBuf,

    /// Container metrics document
    #[arg(long, env = "HOSTWATCH_CONTINFO_PATH", default_value = "/proc/continfo_so1_201801521")]
    pub continfo_path: PathBuf,

    /// SQLite database file
    #[arg(long, env = "HOSTWATCH_DB_PATH", default_value = "monitoring.db")]
    pub db_path: PathBuf,

    /// Cycle interval in seconds
    #[arg(long, default_value = "20")]
    pub interval_secs: u64,

    /// Scheduler ticks per second of process cpu counters (USER_HZ)
    #[arg(long, default_value = "100")]
    pub ticks_per_second: f64,

    /// Logical CPUs to spread percentages over (default: all available)
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Snapshot read timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub read_timeout_ms: u64,

    /// Per-container termination timeout in milliseconds
    #[arg(long, default_value = "10000")]
    pub terminate_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Container runtime binary used to stop workloads
    #[arg(long, default_value = "docker")]
    pub docker_bin: String,

    /// Log eviction selections without stopping anything
    #[arg(long)]
    pub dry_run: bool,

    /// Processes listed in the per-cycle summary
    #[arg(long, default_value = "5")]
    pub top: usize,
}

impl LoopOpts {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn loop_config(&self, enforce: bool) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_secs(self.interval_secs),
            ticks_per_second: self.ticks_per_second,
            parallel_units: self.cpus.unwrap_or_else(available_cpus),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            terminate_timeout: Duration::from_millis(self.terminate_timeout_ms),
            enforce,
            top_n: self.top,
            ..LoopConfig::default()
        }
    }
}

/// Logical CPUs of this host, 1 when unknown.
pub fn available_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}
