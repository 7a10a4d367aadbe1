pub mod grader;
pub mod runner;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;

use rdt_abstract::{LinkConfig, ProtocolKind, TransferConfig};
use runner::{run_experiment, ExperimentSpec, ResultRow};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Comparative testbed for GBN, SR and TCP-like transfers")]
pub struct Args {
    /// Scenario preset; `custom` uses only the explicit flags below.
    #[arg(long, value_enum, default_value_t = Preset::Custom)]
    pub scenario: Preset,

    /// Loss probability per frame, 0.0..=1.0.
    #[arg(long)]
    pub loss: Option<f64>,

    /// Corruption probability per frame, 0.0..=1.0.
    #[arg(long)]
    pub corrupt: Option<f64>,

    /// Reordering probability per frame, 0.0..=1.0.
    #[arg(long)]
    pub reorder: Option<f64>,

    /// Round-trip time in milliseconds.
    #[arg(long)]
    pub rtt: Option<u64>,

    /// Uniform one-way jitter in milliseconds.
    #[arg(long)]
    pub jitter: Option<u64>,

    /// Sender window in segments.
    #[arg(long)]
    pub window: Option<u32>,

    /// Payload size in bytes.
    #[arg(long)]
    pub bytes: Option<usize>,

    /// Maximum segment size in bytes.
    #[arg(long)]
    pub mss: Option<usize>,

    /// Repetitions per protocol; means are taken over completed runs.
    #[arg(long, default_value_t = 1)]
    pub runs: u32,

    #[arg(long, value_enum, default_value_t = ProtoArg::All)]
    pub protocol: ProtoArg,

    /// Base PRNG seed; run `i` uses `seed + i`.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Directory for machine-readable results (JSON) and the text report.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Enable the TCP-like congestion window.
    #[arg(long, default_value_t = false)]
    pub cwnd: bool,

    /// Exit 1 when any row records more than this many failed runs.
    #[arg(long, default_value_t = 0)]
    pub fail_threshold: u32,

    /// Run a scripted TOML scenario with assertions instead of an experiment.
    #[arg(long)]
    pub test_scenario: Option<PathBuf>,
}

/// Canned channel/transfer combinations from the comparison study.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 0 % loss, 50 ms RTT, window 4.
    A,
    /// 10 % loss, 100 ms RTT, window 8.
    B,
    /// 20 % loss, 300 ms RTT, window 4.
    C,
    /// 5 % loss, 500 ms RTT, window 16.
    D,
    Custom,
}

impl Preset {
    /// (loss, rtt_ms, window) for the canned presets.
    fn params(&self) -> Option<(f64, u64, u32)> {
        match self {
            Preset::A => Some((0.0, 50, 4)),
            Preset::B => Some((0.1, 100, 8)),
            Preset::C => Some((0.2, 300, 4)),
            Preset::D => Some((0.05, 500, 16)),
            Preset::Custom => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Preset::A => "A",
            Preset::B => "B",
            Preset::C => "C",
            Preset::D => "D",
            Preset::Custom => "custom",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoArg {
    Gbn,
    Sr,
    Tcp,
    All,
}

impl ProtoArg {
    fn kinds(&self) -> Vec<ProtocolKind> {
        match self {
            ProtoArg::Gbn => vec![ProtocolKind::Gbn],
            ProtoArg::Sr => vec![ProtocolKind::Sr],
            ProtoArg::Tcp => vec![ProtocolKind::TcpLike],
            ProtoArg::All => ProtocolKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub rows: Vec<ResultRow>,
    pub threshold_exceeded: bool,
}

impl RunSummary {
    fn empty() -> Self {
        Self {
            rows: Vec::new(),
            threshold_exceeded: false,
        }
    }
}

/// Resolve preset and flag overrides into the channel + transfer configs.
fn resolve_configs(args: &Args) -> (LinkConfig, TransferConfig) {
    let (preset_loss, preset_rtt, preset_window) = match args.scenario.params() {
        Some((loss, rtt, window)) => (Some(loss), Some(rtt), Some(window)),
        None => (None, None, None),
    };

    let link = LinkConfig {
        loss_rate: args.loss.or(preset_loss).unwrap_or(0.0),
        corrupt_rate: args.corrupt.unwrap_or(0.0),
        reorder_rate: args.reorder.unwrap_or(0.0),
        rtt_ms: args.rtt.or(preset_rtt).unwrap_or(50),
        jitter_ms: args.jitter.unwrap_or(0),
        seed: args.seed,
        blackout_until_ms: None,
    };
    let transfer = TransferConfig {
        payload_bytes: args.bytes.unwrap_or(20_000),
        mss: args.mss.unwrap_or(1024),
        window: args.window.or(preset_window).unwrap_or(4),
    };
    (link, transfer)
}

pub fn run(args: Args) -> anyhow::Result<RunSummary> {
    if let Some(path) = &args.test_scenario {
        grader::run_scenario_file(path)?;
        return Ok(RunSummary::empty());
    }

    let (link, transfer) = resolve_configs(&args);
    // Validation failures bubble up as ConfigError for the exit-2 mapping.
    link.validate()?;
    transfer.validate()?;

    info!(
        scenario = args.scenario.label(),
        loss = link.loss_rate,
        rtt_ms = link.rtt_ms,
        window = transfer.window,
        bytes = transfer.payload_bytes,
        runs = args.runs,
        "starting experiment"
    );

    let mut rows = Vec::new();
    for protocol in args.protocol.kinds() {
        let spec = ExperimentSpec {
            protocol,
            link: link.clone(),
            transfer: transfer.clone(),
            runs: args.runs,
            enable_cwnd: args.cwnd,
        };
        rows.push(run_experiment(&spec)?);
    }

    let table = render_table(&rows);
    println!("{table}");

    if let Some(dir) = &args.output {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;

        let json_path = dir.join(format!("scenario_{}.json", args.scenario.label()));
        let json = serde_json::to_vec_pretty(&rows).context("failed to serialize result rows")?;
        fs::write(&json_path, json)
            .with_context(|| format!("failed to write {}", json_path.display()))?;

        let report_path = dir.join(format!("scenario_{}.txt", args.scenario.label()));
        fs::write(&report_path, &table)
            .with_context(|| format!("failed to write {}", report_path.display()))?;
        info!("results written to {}", dir.display());
    }

    let threshold_exceeded = rows.iter().any(|r| r.failed_runs > args.fail_threshold);
    Ok(RunSummary {
        rows,
        threshold_exceeded,
    })
}

fn render_table(rows: &[ResultRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:>10} {:>18} {:>16} {:>12}\n",
        "Protocol", "Time(s)", "Throughput(bps)", "Retransmissions", "Runs(ok/ko)"
    ));
    for row in rows {
        out.push_str(&format!(
            "{:<10} {:>10.3} {:>18.0} {:>16.1} {:>9}/{}\n",
            row.protocol.to_string(),
            row.mean_time_s,
            row.mean_throughput_bps,
            row.mean_retransmissions,
            row.completed_runs,
            row.failed_runs
        ));
    }
    out
}
