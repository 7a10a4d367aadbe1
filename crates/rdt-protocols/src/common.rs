//! Bits shared by all three sender state machines.

use rdt_abstract::Segment;

pub use rdt_abstract::METRIC_RETRANSMISSIONS;

/// One in-flight DATA segment occupying a window slot.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    /// Encoded frame, ready to hand to the channel again on retransmit.
    pub frame: Vec<u8>,
    /// Simulated time of the most recent transmission.
    pub sent_at: u64,
    /// How many times this segment has been retransmitted.
    pub retransmissions: u32,
    /// Individually acknowledged (SR/TCP-like bookkeeping; GBN removes
    /// acked slots outright).
    pub acked: bool,
}

impl InFlight {
    pub fn new(seq: u32, payload: Vec<u8>, now: u64) -> Self {
        Self {
            frame: Segment::Data { seq, payload }.encode(),
            sent_at: now,
            retransmissions: 0,
            acked: false,
        }
    }
}

/// Split application bytes into MSS-sized chunks; the last may be short.
pub(crate) fn chunk_payload(mss: usize, data: &[u8]) -> impl Iterator<Item = Vec<u8>> + '_ {
    data.chunks(mss).map(|c| c.to_vec())
}
