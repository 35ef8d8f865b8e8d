use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use synodsim::constants;
use synodsim::driver::{self, DriverConfig, SweepGrid};
use synodsim::types::TimeoutConfig;

#[derive(Parser)]
#[command(name = "synodsim")]
#[command(about = "Measures how fast a crash-tolerant consensus round decides")]
struct Cli {
    /// Participant counts to sweep
    #[arg(short = 'n', long, value_delimiter = ',', default_values_t = [16usize])]
    processes: Vec<usize>,

    /// Per-message crash probability of the faulty minority
    #[arg(short, long, value_delimiter = ',', default_values_t = [0.0f64])]
    crash_chance: Vec<f64>,

    /// Leader rotation timeouts, in milliseconds
    #[arg(short, long, value_delimiter = ',', default_values_t = [constants::LEADER_TIMEOUT_MILLIS])]
    leader_timeout_ms: Vec<u64>,

    /// Iterations averaged per point
    #[arg(short, long, default_value_t = 10)]
    iterations: usize,

    /// Pause between two round requests, in milliseconds
    #[arg(long, default_value_t = constants::POLL_INTERVAL_MILLIS)]
    poll_interval_ms: u64,

    /// Bound on one request to the aggregator, in seconds
    #[arg(long, default_value_t = constants::ASK_TIMEOUT_SECS)]
    ask_timeout_secs: u64,

    /// Run seed; iterations are reproducible when set
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let base = DriverConfig {
        iterations: cli.iterations,
        seed: cli.seed,
        timeout_config: TimeoutConfig {
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            ask_timeout: Duration::from_secs(cli.ask_timeout_secs),
            ..TimeoutConfig::default()
        },
        ..DriverConfig::default()
    };
    let grid = SweepGrid {
        process_counts: cli.processes,
        crash_chances: cli.crash_chance,
        leader_timeouts: cli
            .leader_timeout_ms
            .into_iter()
            .map(Duration::from_millis)
            .collect(),
    };

    for report in driver::sweep(&base, &grid).await? {
        println!(
            "processes={} crash_chance={} leader_timeout={}ms mean_latency={}ms",
            report.process_count,
            report.chance_to_crash,
            report.leader_timeout.as_millis(),
            report.mean_latency().as_millis()
        );
    }
    Ok(())
}
