use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use matrix_lite::config::{ClusterConfig, CommCosts, PeerSettings};
use matrix_lite::sim::Cluster;
use matrix_lite::workload;

#[derive(Parser, Debug)]
#[command(name = "matrix-lite")]
#[command(version)]
#[command(about = "Simulated compute cluster with distributed job scheduling")]
struct Args {
    /// Workload file: one job description per line
    workload: PathBuf,

    /// Total number of peers in the cluster
    #[arg(long, default_value = "8")]
    peers: u64,

    /// Peers per partition; every partition's first peer is a controller
    #[arg(long, default_value = "4")]
    partition_size: u64,

    /// RNG seed; the same seed replays the same history
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Cooldown before a failed job is rescheduled (virtual ticks)
    #[arg(long, default_value = "5000")]
    sleep_before_retry: u64,

    /// Interval between callback re-checks (virtual ticks)
    #[arg(long, default_value = "1000")]
    callback_poll_interval: u64,

    /// Callback re-checks before a waiter is failed
    #[arg(long, default_value = "1000")]
    callback_retry_limit: u32,

    /// Exhausted-pool lookups before a job releases and reschedules
    #[arg(long, default_value = "64")]
    allocation_retry_limit: u32,

    /// Safety cap on delivered events
    #[arg(long, default_value = "10000000")]
    max_events: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let specs = match workload::load_file(&args.workload) {
        Ok(specs) => specs,
        Err(e) => {
            tracing::error!(path = %args.workload.display(), error = %e, "Failed to load workload");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(jobs = specs.len(), "Workload loaded");

    let config = match ClusterConfig::new(args.peers, args.partition_size) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid cluster topology");
            return ExitCode::FAILURE;
        }
    };
    let settings = PeerSettings {
        sleep_before_retry: args.sleep_before_retry,
        callback_poll_interval: args.callback_poll_interval,
        callback_retry_limit: args.callback_retry_limit,
        allocation_retry_limit: args.allocation_retry_limit,
    };
    let mut cluster = Cluster::new(config, settings, CommCosts::default(), args.seed);
    cluster.assign_workload(specs);
    cluster.bootstrap();
    let delivered = cluster.run_to_completion(args.max_events);
    if delivered == args.max_events {
        tracing::warn!(max_events = args.max_events, "Event budget exhausted before completion");
    }
    cluster.report();
    ExitCode::SUCCESS
}
