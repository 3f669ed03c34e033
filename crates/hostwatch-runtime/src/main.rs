//! hostwatch: host and container telemetry daemon.
//! Samples the metrics-source documents every interval, stores the series in
//! SQLite and keeps the container population within its caps.

use clap::Parser;

mod cli;
mod control_loop;
mod daemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("HOSTWATCH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let policy = daemon::load_policy(args.policy.as_deref())?;

    match args.command {
        cli::Command::Daemon(opts) => {
            tracing::info!("hostwatch daemon starting");
            daemon::run_daemon(opts, policy).await?;
        }
        cli::Command::Once(opts) => {
            let report = daemon::run_once(opts, policy).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        cli::Command::Policy => {
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
    }

    Ok(())
}
