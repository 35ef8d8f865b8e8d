use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::errors::ConsensusError;
use crate::nodes::clock::{Clock, ClockAction, SystemClock};
use crate::runtime::Cluster;
use crate::types;

/// Parameters of one benchmark point.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverConfig {
    pub process_count: usize,
    pub chance_to_crash: f64,
    pub iterations: usize,
    pub seed: Option<u64>,
    pub timeout_config: types::TimeoutConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            process_count: 16,
            chance_to_crash: 0.0,
            iterations: 10,
            seed: None,
            timeout_config: types::TimeoutConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Configuration of a single iteration; seeded runs shift the seed per
    /// iteration so iterations do not replay each other.
    pub fn run_config(&self, iteration: usize) -> types::Config {
        types::Config::new(
            self.process_count,
            self.seed.map(|seed| seed.wrapping_add(iteration as u64)),
            Some(self.timeout_config.clone()),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IterationOutcome {
    pub decision: types::Value,
    pub latency: Duration,
    pub leader_rotations: usize,
    pub requests: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BenchmarkReport {
    pub process_count: usize,
    pub chance_to_crash: f64,
    pub leader_timeout: Duration,
    pub outcomes: Vec<IterationOutcome>,
}

impl BenchmarkReport {
    /// Mean time from the first round request to the first decision.
    pub fn mean_latency(&self) -> Duration {
        if self.outcomes.is_empty() {
            return Duration::ZERO;
        }
        let total: u128 = self.outcomes.iter().map(|o| o.latency.as_nanos()).sum();
        let mean = total / self.outcomes.len() as u128;
        Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX))
    }
}

/// Benchmark points to run; an empty dimension keeps the base value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepGrid {
    pub process_counts: Vec<usize>,
    pub crash_chances: Vec<f64>,
    pub leader_timeouts: Vec<Duration>,
}

fn pick_leader(rng: &mut ChaCha8Rng, process_count: usize) -> types::ParticipantId {
    types::ParticipantId::new(rng.gen_range(0..process_count))
}

/// Runs one iteration: spawns a fresh cluster, keeps asking the aggregator to
/// trigger rounds through the current leader, rotates the leader every
/// `leader_timeout` and stops at the first decision.
pub async fn run_iteration(
    config: &DriverConfig,
    iteration: usize,
) -> anyhow::Result<IterationOutcome> {
    let run_config = config.run_config(iteration);
    let timeouts = run_config.timeout_config.clone();
    let process_count = run_config.process_count;
    let mut rng = run_config.rng_for(&types::Address::Driver);
    let mut cluster = Cluster::launch(run_config, config.chance_to_crash)?;

    let mut clock = Clock::new(Box::new(SystemClock::new()));
    let started = clock.now();
    let mut leader = pick_leader(&mut rng, process_count);
    let mut leader_rotations = 0;
    let mut requests = 0;
    clock.schedule(ClockAction::RotateLeader, timeouts.leader_timeout);
    clock.schedule(ClockAction::PollDecision, Duration::ZERO);

    let outcome = 'poll: loop {
        if clock.now().duration_since(started) > timeouts.decision_deadline {
            break Err(anyhow::anyhow!(
                "no decision after {:?} with {} participants",
                timeouts.decision_deadline,
                process_count
            ));
        }
        for action in clock.check_timers() {
            match action {
                ClockAction::RotateLeader => {
                    leader = pick_leader(&mut rng, process_count);
                    leader_rotations += 1;
                    debug!("Driver: rotating leader to {}", leader);
                    clock.schedule(ClockAction::RotateLeader, timeouts.leader_timeout);
                }
                ClockAction::PollDecision => {
                    requests += 1;
                    match cluster.request_round(leader).await {
                        Ok(status) => {
                            if let Some(decision) = status.decision {
                                break 'poll Ok(IterationOutcome {
                                    decision,
                                    latency: status.latency().unwrap_or_default(),
                                    leader_rotations,
                                    requests,
                                });
                            }
                        }
                        Err(e) => {
                            let retryable = e
                                .downcast_ref::<ConsensusError>()
                                .map_or(false, ConsensusError::is_retryable);
                            if !retryable {
                                break 'poll Err(e);
                            }
                            warn!("Driver: {}, asking again", e);
                        }
                    }
                    clock.schedule(ClockAction::PollDecision, timeouts.poll_interval);
                }
            }
        }
        let wait = clock.next_timeout().unwrap_or(timeouts.poll_interval);
        tokio::time::sleep(wait).await;
    };

    clock.cancel(&ClockAction::RotateLeader);
    clock.cancel(&ClockAction::PollDecision);
    cluster.shutdown().await?;
    outcome
}

/// Runs `config.iterations` iterations and collects their latencies.
pub async fn run_benchmark(config: &DriverConfig) -> anyhow::Result<BenchmarkReport> {
    if config.process_count == 0 {
        anyhow::bail!("a benchmark needs at least one participant");
    }
    let mut outcomes = Vec::with_capacity(config.iterations);
    for iteration in 0..config.iterations {
        let outcome = run_iteration(config, iteration).await?;
        debug!(
            "Driver: iteration {} decided {} in {:?}",
            iteration, outcome.decision, outcome.latency
        );
        outcomes.push(outcome);
    }
    let report = BenchmarkReport {
        process_count: config.process_count,
        chance_to_crash: config.chance_to_crash,
        leader_timeout: config.timeout_config.leader_timeout,
        outcomes,
    };
    info!(
        "Driver: N={} crash={} timeout={:?} mean latency {:?}",
        report.process_count,
        report.chance_to_crash,
        report.leader_timeout,
        report.mean_latency()
    );
    Ok(report)
}

fn or_base<T: Clone>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

/// Runs a benchmark for every point of `grid`, participant count varying slowest.
pub async fn sweep(base: &DriverConfig, grid: &SweepGrid) -> anyhow::Result<Vec<BenchmarkReport>> {
    let mut reports = Vec::new();
    for process_count in or_base(&grid.process_counts, base.process_count) {
        for chance_to_crash in or_base(&grid.crash_chances, base.chance_to_crash) {
            for leader_timeout in
                or_base(&grid.leader_timeouts, base.timeout_config.leader_timeout)
            {
                let mut config = base.clone();
                config.process_count = process_count;
                config.chance_to_crash = chance_to_crash;
                config.timeout_config.leader_timeout = leader_timeout;
                reports.push(run_benchmark(&config).await?);
            }
        }
    }
    Ok(reports)
}
