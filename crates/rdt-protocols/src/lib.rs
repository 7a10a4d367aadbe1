pub mod common;
pub mod gbn;
pub mod sr;
pub mod tcp_like;

pub use common::METRIC_RETRANSMISSIONS;
pub use gbn::{GbnReceiver, GbnSender};
pub use sr::{SrReceiver, SrSender};
pub use tcp_like::{RttEstimator, TcpLikeSender, DEFAULT_INIT_RTO_MS, RTO_MAX_MS, RTO_MIN_MS};

use rdt_abstract::{ProtocolKind, TransportProtocol};

/// Knobs shared by all three sender/receiver pairs.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Advertised window in segments.
    pub window: u32,
    /// Payload bytes per DATA segment.
    pub mss: usize,
    /// Fixed retransmission timeout for GBN and SR.
    pub retransmit_timeout_ms: u64,
    /// TCP-like RTO before the first sample.
    pub init_rto_ms: u64,
    /// Enable the TCP-like congestion window (off by default).
    pub enable_cwnd: bool,
}

impl ProtocolConfig {
    /// Conventional tuning for a link with the given round-trip time: the
    /// fixed timers get 2×RTT, the adaptive RTO starts at one second.
    pub fn for_rtt(window: u32, mss: usize, rtt_ms: u64) -> Self {
        Self {
            window,
            mss,
            retransmit_timeout_ms: 2 * rtt_ms,
            init_rto_ms: DEFAULT_INIT_RTO_MS,
            enable_cwnd: false,
        }
    }
}

/// Build the sender/receiver pair for one transfer.
pub fn make_pair(
    kind: ProtocolKind,
    cfg: &ProtocolConfig,
) -> (Box<dyn TransportProtocol>, Box<dyn TransportProtocol>) {
    match kind {
        ProtocolKind::Gbn => (
            Box::new(GbnSender::new(cfg.window, cfg.mss, cfg.retransmit_timeout_ms)),
            Box::new(GbnReceiver::new()),
        ),
        ProtocolKind::Sr => (
            Box::new(SrSender::new(cfg.window, cfg.mss, cfg.retransmit_timeout_ms)),
            Box::new(SrReceiver::new(cfg.window)),
        ),
        ProtocolKind::TcpLike => (
            Box::new(TcpLikeSender::new(
                cfg.window,
                cfg.mss,
                cfg.init_rto_ms,
                cfg.enable_cwnd,
            )),
            Box::new(SrReceiver::with_cumulative_field(cfg.window)),
        ),
    }
}
