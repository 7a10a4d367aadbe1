use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel impairment parameters for one simulated link pair.
///
/// `rtt_ms / 2` is the base one-way delay; `jitter_ms` adds uniform noise to
/// every delivery. A frame survives the Bernoulli loss roll, may have one bit
/// flipped (`corrupt_rate`), and may swap delivery times with a random
/// already-queued frame in the same direction (`reorder_rate`). While
/// `blackout_until_ms` has not elapsed the link drops everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub reorder_rate: f64,
    pub rtt_ms: u64,
    pub jitter_ms: u64,
    pub seed: u64,
    pub blackout_until_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            reorder_rate: 0.0,
            rtt_ms: 50,
            jitter_ms: 0,
            seed: 0,
            blackout_until_ms: None,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("loss_rate", self.loss_rate),
            ("corrupt_rate", self.corrupt_rate),
            ("reorder_rate", self.reorder_rate),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ConfigError::ProbabilityOutOfRange { name, value });
            }
        }
        if self.rtt_ms == 0 {
            return Err(ConfigError::ZeroRtt);
        }
        Ok(())
    }

    /// Base one-way latency in milliseconds.
    pub fn one_way_ms(&self) -> u64 {
        self.rtt_ms / 2
    }
}

/// Transfer shape: how much to send and how the sender may pace it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub payload_bytes: usize,
    pub mss: usize,
    pub window: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            payload_bytes: 20_000,
            mss: 1024,
            window: 4,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.payload_bytes == 0 {
            return Err(ConfigError::EmptyPayload);
        }
        Ok(())
    }

    /// Number of DATA segments the payload splits into.
    pub fn total_segments(&self) -> u32 {
        self.payload_bytes.div_ceil(self.mss) as u32
    }
}

/// Scenario parameters out of range. Surfaced to the CLI as exit code 2.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must lie in [0, 1], got {value}")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },
    #[error("rtt_ms must be positive")]
    ZeroRtt,
    #[error("window must be at least 1 segment")]
    ZeroWindow,
    #[error("mss must be at least 1 byte")]
    ZeroMss,
    #[error("payload must not be empty")]
    EmptyPayload,
}
