use crate::config::{LinkConfig, TransferConfig};
use crate::protocol::ProtocolKind;
use serde::Deserialize;

/// A scripted simulation loaded from a TOML file: channel overrides, timed
/// actions and end-of-run assertions.
#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    pub protocol: ProtocolKind,
    #[serde(default)]
    pub transfer: TransferOverride,
    #[serde(default)]
    pub config: LinkConfigOverride,
    pub actions: Vec<TestAction>,
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LinkConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub reorder_rate: Option<f64>,
    pub rtt_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub seed: Option<u64>,
    pub blackout_until_ms: Option<u64>,
}

impl LinkConfigOverride {
    pub fn apply_to(&self, config: &mut LinkConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.reorder_rate {
            config.reorder_rate = v;
        }
        if let Some(v) = self.rtt_ms {
            config.rtt_ms = v;
        }
        if let Some(v) = self.jitter_ms {
            config.jitter_ms = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.blackout_until_ms.is_some() {
            config.blackout_until_ms = self.blackout_until_ms;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TransferOverride {
    pub mss: Option<usize>,
    pub window: Option<u32>,
}

impl TransferOverride {
    pub fn apply_to(&self, config: &mut TransferConfig) {
        if let Some(v) = self.mss {
            config.mss = v;
        }
        if let Some(v) = self.window {
            config.window = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application hands bytes to the sender at a specific time.
    AppSend { time: u64, data: String },
    /// Deterministically drop the first DATA frame with the given seq.
    DropNextDataSeq { seq: u32 },
    /// Deterministically drop the first ACK frame with the given ack number.
    DropNextAckNum { ack: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// The application-layer bytes delivered at the receiver equal this string.
    DataDelivered { data: String },
    /// Total DATA frames emitted by the sender lies in `[min, max]`.
    SenderSegmentCount { min: u64, max: Option<u64> },
    /// The sender's final retransmission count is at most `max`.
    RetransmissionsAtMost { max: u64 },
    /// The simulation finishes within this much simulated time.
    MaxDuration { ms: u64 },
}
