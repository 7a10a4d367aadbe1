//! Headless runner for scripted TOML scenarios with assertions.

use anyhow::{anyhow, Context};
use std::fs;
use std::path::Path;

use rdt_abstract::{
    LinkConfig, TestAction, TestAssertion, TestScenario, TransferConfig, METRIC_RETRANSMISSIONS,
};
use rdt_protocols::{make_pair, ProtocolConfig};
use rdt_simulator::Simulator;
use tracing::info;

pub fn run_scenario_file(path: &Path) -> anyhow::Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario = toml::from_str(&content).context("failed to parse scenario")?;
    run_scenario(&scenario)
}

pub fn run_scenario(scenario: &TestScenario) -> anyhow::Result<()> {
    info!("running scenario: {}", scenario.name);
    info!("{}", scenario.description);

    let mut link = LinkConfig::default();
    scenario.config.apply_to(&mut link);
    link.validate()?;

    let mut transfer = TransferConfig::default();
    scenario.transfer.apply_to(&mut transfer);

    let cfg = ProtocolConfig::for_rtt(transfer.window, transfer.mss, link.rtt_ms);
    let (sender, receiver) = make_pair(scenario.protocol, &cfg);
    let mut sim = Simulator::new(link, sender, receiver);

    for action in &scenario.actions {
        match action {
            TestAction::AppSend { time, data } => {
                sim.schedule_app_send(*time, data.as_bytes().to_vec());
            }
            TestAction::DropNextDataSeq { seq } => sim.add_drop_data_seq_once(*seq),
            TestAction::DropNextAckNum { ack } => sim.add_drop_ack_num_once(*ack),
        }
    }

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| match a {
            TestAssertion::MaxDuration { ms } => Some(*ms),
            _ => None,
        })
        .unwrap_or(10_000);

    sim.init();
    while sim.step() {
        if sim.current_time() > max_duration {
            return Err(anyhow!("scenario timed out after {max_duration} ms"));
        }
    }

    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::DataDelivered { data } => {
                if sim.delivered_data() != data.as_bytes() {
                    return Err(anyhow!(
                        "assertion failed: delivered {} bytes do not match the expected payload",
                        sim.delivered_data().len()
                    ));
                }
            }
            TestAssertion::SenderSegmentCount { min, max } => {
                let count = sim.sender_segment_count;
                if count < *min {
                    return Err(anyhow!(
                        "assertion failed: sender sent {count} frames, expected at least {min}"
                    ));
                }
                if let Some(max) = max {
                    if count > *max {
                        return Err(anyhow!(
                            "assertion failed: sender sent {count} frames, expected at most {max}"
                        ));
                    }
                }
            }
            TestAssertion::RetransmissionsAtMost { max } => {
                let retx = sim.metric_last(METRIC_RETRANSMISSIONS).unwrap_or(0.0) as u64;
                if retx > *max {
                    return Err(anyhow!(
                        "assertion failed: {retx} retransmissions, expected at most {max}"
                    ));
                }
            }
            TestAssertion::MaxDuration { .. } => {} // enforced in the loop
        }
    }

    let report = sim.export_report();
    info!(
        duration_ms = report.duration_ms,
        delivered_bytes = report.delivered_bytes,
        segments_sent = report.sender_segment_count,
        retransmissions = report.retransmissions,
        dropped = report.a_to_b.dropped + report.b_to_a.dropped,
        "scenario passed"
    );
    Ok(())
}
