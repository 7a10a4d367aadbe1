//! The experiment driver: runs transfers to completion and aggregates
//! metrics across repeated seeded runs.

use anyhow::ensure;
use rdt_abstract::{LinkConfig, ProtocolKind, TransferConfig, METRIC_RETRANSMISSIONS};
use rdt_protocols::{make_pair, ProtocolConfig};
use rdt_simulator::Simulator;
use serde::Serialize;
use tracing::{info, warn};

/// One protocol × channel × transfer combination, repeated `runs` times.
#[derive(Debug, Clone)]
pub struct ExperimentSpec {
    pub protocol: ProtocolKind,
    pub link: LinkConfig,
    pub transfer: TransferConfig,
    pub runs: u32,
    pub enable_cwnd: bool,
}

impl ExperimentSpec {
    pub fn validate(&self) -> Result<(), rdt_abstract::ConfigError> {
        self.link.validate()?;
        self.transfer.validate()
    }

    fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            enable_cwnd: self.enable_cwnd,
            ..ProtocolConfig::for_rtt(self.transfer.window, self.transfer.mss, self.link.rtt_ms)
        }
    }
}

/// Metrics sampled from one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub sim_ms: u64,
    pub throughput_bps: f64,
    pub retransmissions: u64,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunStats),
    /// The safety bound tripped before the receiver saw the whole payload.
    TimedOut { sim_ms: u64 },
}

/// One aggregated result row, mirroring the machine-readable output format.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub protocol: ProtocolKind,
    pub mean_time_s: f64,
    pub mean_throughput_bps: f64,
    pub mean_retransmissions: f64,
    pub completed_runs: u32,
    pub failed_runs: u32,
}

/// Deterministic payload: a repeating byte ramp, so any reordering or
/// duplication shows up as a content mismatch.
pub fn make_payload(bytes: usize) -> Vec<u8> {
    (0..bytes).map(|i| (i % 251) as u8).collect()
}

/// Abort threshold: 100× the loss-free completion estimate, within
/// [10 s, 10 min] of simulated time.
fn safety_bound_ms(spec: &ExperimentSpec) -> u64 {
    let segments = spec.transfer.total_segments() as u64;
    let rounds = segments.div_ceil(spec.transfer.window as u64);
    let estimate = (rounds + 2) * spec.link.rtt_ms;
    (estimate * 100).clamp(10_000, 600_000)
}

/// Drive a single transfer to completion or abort.
pub fn run_once(spec: &ExperimentSpec, seed: u64) -> anyhow::Result<RunOutcome> {
    let link = LinkConfig { seed, ..spec.link.clone() };
    let (sender, receiver) = make_pair(spec.protocol, &spec.protocol_config());
    let mut sim = Simulator::new(link, sender, receiver);

    let payload = make_payload(spec.transfer.payload_bytes);
    sim.schedule_app_send(0, payload.clone());

    let safety_ms = safety_bound_ms(spec);
    sim.init();
    let mut completed = false;
    while sim.step() {
        if sim.delivered_data().len() >= payload.len() {
            completed = true;
            break;
        }
        if sim.current_time() > safety_ms {
            break;
        }
    }

    if !completed {
        return Ok(RunOutcome::TimedOut {
            sim_ms: sim.current_time(),
        });
    }

    ensure!(
        sim.delivered_data() == payload,
        "delivered bytes differ from the payload ({} protocol, seed {seed})",
        spec.protocol
    );

    let sim_ms = sim.current_time();
    let sim_seconds = sim_ms as f64 / 1_000.0;
    Ok(RunOutcome::Completed(RunStats {
        sim_ms,
        throughput_bps: (payload.len() * 8) as f64 / sim_seconds,
        retransmissions: sim.metric_last(METRIC_RETRANSMISSIONS).unwrap_or(0.0) as u64,
    }))
}

/// Run all repetitions and average the completed ones.
pub fn run_experiment(spec: &ExperimentSpec) -> anyhow::Result<ResultRow> {
    spec.validate()?;

    let mut samples: Vec<RunStats> = Vec::new();
    let mut failed = 0u32;

    for run in 0..spec.runs {
        // Each repetition re-seeds the channel so runs are independent but
        // the whole experiment stays reproducible.
        let seed = spec.link.seed.wrapping_add(run as u64);
        match run_once(spec, seed)? {
            RunOutcome::Completed(stats) => {
                info!(
                    protocol = %spec.protocol,
                    run,
                    sim_ms = stats.sim_ms,
                    retransmissions = stats.retransmissions,
                    "run complete"
                );
                samples.push(stats);
            }
            RunOutcome::TimedOut { sim_ms } => {
                warn!(protocol = %spec.protocol, run, sim_ms, "run hit the safety bound");
                failed += 1;
            }
        }
    }

    let n = samples.len().max(1) as f64;
    Ok(ResultRow {
        protocol: spec.protocol,
        mean_time_s: samples.iter().map(|s| s.sim_ms as f64 / 1_000.0).sum::<f64>() / n,
        mean_throughput_bps: samples.iter().map(|s| s.throughput_bps).sum::<f64>() / n,
        mean_retransmissions: samples.iter().map(|s| s.retransmissions as f64).sum::<f64>() / n,
        completed_runs: samples.len() as u32,
        failed_runs: failed,
    })
}
