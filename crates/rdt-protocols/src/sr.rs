//! Selective Repeat sender and receiver.
//!
//! Every segment has its own retransmission timer (`timer_id == seq`) and is
//! acknowledged individually; the receiver buffers out-of-order arrivals and
//! releases the contiguous prefix to the application.

use std::collections::{BTreeMap, VecDeque};

use rdt_abstract::{Segment, SystemContext, TransportProtocol};
use tracing::debug;

use crate::common::{chunk_payload, InFlight, METRIC_RETRANSMISSIONS};

pub struct SrSender {
    window: u32,
    mss: usize,
    timeout_ms: u64,

    base: u32,
    next_seq: u32,
    queued: VecDeque<Vec<u8>>,
    /// Every seq in `[base, next_seq)`, acked or not; the acked prefix is
    /// popped as `base` advances.
    in_flight: BTreeMap<u32, InFlight>,

    retx_count: u64,
}

impl SrSender {
    pub fn new(window: u32, mss: usize, timeout_ms: u64) -> Self {
        Self {
            window,
            mss,
            timeout_ms,
            base: 0,
            next_seq: 0,
            queued: VecDeque::new(),
            in_flight: BTreeMap::new(),
            retx_count: 0,
        }
    }

    fn pump(&mut self, ctx: &mut dyn SystemContext) {
        while self.next_seq < self.base + self.window {
            let Some(payload) = self.queued.pop_front() else {
                break;
            };
            let slot = InFlight::new(self.next_seq, payload, ctx.now());
            ctx.send_frame(slot.frame.clone());
            self.in_flight.insert(self.next_seq, slot);
            ctx.start_timer(self.timeout_ms, self.next_seq);
            self.next_seq += 1;
        }
    }

    /// Pop the acked prefix and slide `base` past it.
    fn advance_base(&mut self) {
        while let Some(entry) = self.in_flight.first_entry() {
            if !entry.get().acked {
                break;
            }
            self.base = *entry.key() + 1;
            entry.remove();
        }
    }
}

impl TransportProtocol for SrSender {
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.queued.extend(chunk_payload(self.mss, data));
        self.pump(ctx);
    }

    fn on_frame(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) {
        let ack = match Segment::decode(frame) {
            Ok(Segment::Ack { ack, .. }) => ack,
            Ok(Segment::Data { .. }) => {
                debug!("SR sender ignoring DATA frame on the ACK path");
                return;
            }
            Err(err) => {
                debug!(%err, "SR sender dropping undecodable frame");
                return;
            }
        };

        // Individual ACK semantics: `ack` acknowledges exactly that seq.
        let Some(slot) = self.in_flight.get_mut(&ack) else {
            // Below base (already acked and popped) or beyond next_seq;
            // either way a no-op, which keeps duplicate ACKs idempotent.
            return;
        };
        if slot.acked {
            return;
        }
        slot.acked = true;
        ctx.cancel_timer(ack);
        self.advance_base();
        self.pump(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        let Some(slot) = self.in_flight.get_mut(&timer_id) else {
            return;
        };
        if slot.acked {
            return;
        }
        // Selective: resend just this segment, restart just its timer.
        slot.retransmissions += 1;
        slot.sent_at = ctx.now();
        ctx.send_frame(slot.frame.clone());
        ctx.start_timer(self.timeout_ms, timer_id);
        self.retx_count += 1;
        ctx.record_metric(METRIC_RETRANSMISSIONS, self.retx_count as f64);
    }
}

pub struct SrReceiver {
    window: u32,
    /// Lowest seq not yet delivered to the application.
    expected: u32,
    /// Out-of-order payloads waiting for the gap to fill.
    buffer: BTreeMap<u32, Vec<u8>>,
    /// Attach the cumulative-prefix trailer to every ACK (TCP-like mode).
    cumulative_field: bool,
}

impl SrReceiver {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            expected: 0,
            buffer: BTreeMap::new(),
            cumulative_field: false,
        }
    }

    /// A receiver whose ACKs also report the delivered prefix, as the
    /// TCP-like sender's duplicate-ACK tracking requires.
    pub fn with_cumulative_field(window: u32) -> Self {
        Self {
            cumulative_field: true,
            ..Self::new(window)
        }
    }

    fn send_ack(&self, ctx: &mut dyn SystemContext, seq: u32) {
        let cum = self.cumulative_field.then_some(self.expected);
        ctx.send_frame(Segment::Ack { ack: seq, cum }.encode());
    }
}

impl TransportProtocol for SrReceiver {
    fn on_frame(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) {
        let (seq, payload) = match Segment::decode(frame) {
            Ok(Segment::Data { seq, payload }) => (seq, payload),
            Ok(Segment::Ack { .. }) => {
                debug!("SR receiver ignoring ACK frame on the DATA path");
                return;
            }
            Err(err) => {
                // Treated exactly as loss; the sender's timer recovers.
                debug!(%err, "corrupt frame at SR receiver");
                return;
            }
        };

        if seq < self.expected {
            // Already delivered. The original ACK may have been lost, so
            // re-ACK or the sender stalls.
            self.send_ack(ctx, seq);
            return;
        }
        if seq >= self.expected + self.window {
            // Outside the receive window; a well-behaved sender never gets
            // here, so just note it and drop.
            debug!(seq, expected = self.expected, "DATA beyond receive window");
            return;
        }

        self.buffer.entry(seq).or_insert(payload);
        // Release the contiguous prefix before ACKing so the cumulative
        // field (TCP-like mode) reflects this arrival.
        while let Some(p) = self.buffer.remove(&self.expected) {
            ctx.deliver_data(&p);
            self.expected += 1;
        }
        self.send_ack(ctx, seq);
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
}
