//! Go-Back-N sender and receiver.
//!
//! One shared retransmission timer guards the oldest unacked segment. ACKs
//! are cumulative: `ack = n` means everything through `n` arrived. A timeout
//! resends the whole outstanding window, oldest first.

use std::collections::{BTreeMap, VecDeque};

use rdt_abstract::{Segment, SystemContext, TransportProtocol};
use tracing::debug;

use crate::common::{chunk_payload, InFlight, METRIC_RETRANSMISSIONS};

/// Timer id of the single shared retransmission timer.
const RETX_TIMER: u32 = 0;

pub struct GbnSender {
    window: u32,
    mss: usize,
    timeout_ms: u64,

    /// Oldest unacked seq (left window edge).
    base: u32,
    /// Next seq to assign to a fresh segment.
    next_seq: u32,
    /// MSS-sized chunks not yet transmitted for the first time.
    queued: VecDeque<Vec<u8>>,
    /// Outstanding segments, keyed by seq.
    in_flight: BTreeMap<u32, InFlight>,

    retx_count: u64,
    timer_armed: bool,
}

impl GbnSender {
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
            timer_armed: false,
        }
    }

    fn rearm(&mut self, ctx: &mut dyn SystemContext) {
        ctx.cancel_timer(RETX_TIMER);
        ctx.start_timer(self.timeout_ms, RETX_TIMER);
        self.timer_armed = true;
    }

    fn disarm(&mut self, ctx: &mut dyn SystemContext) {
        ctx.cancel_timer(RETX_TIMER);
        self.timer_armed = false;
    }

    /// Transmit queued chunks while the window has room.
    fn pump(&mut self, ctx: &mut dyn SystemContext) {
        while self.next_seq < self.base + self.window {
            let Some(payload) = self.queued.pop_front() else {
                break;
            };
            let slot = InFlight::new(self.next_seq, payload, ctx.now());
            ctx.send_frame(slot.frame.clone());
            self.in_flight.insert(self.next_seq, slot);
            if !self.timer_armed {
                self.rearm(ctx);
            }
            self.next_seq += 1;
        }
    }
}

impl TransportProtocol for GbnSender {
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.queued.extend(chunk_payload(self.mss, data));
        self.pump(ctx);
    }

    fn on_frame(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) {
        let ack = match Segment::decode(frame) {
            Ok(Segment::Ack { ack, .. }) => ack,
            Ok(Segment::Data { .. }) => {
                debug!("GBN sender ignoring DATA frame on the ACK path");
                return;
            }
            // Corrupted ACKs are indistinguishable from lost ones.
            Err(err) => {
                debug!(%err, "GBN sender dropping undecodable frame");
                return;
            }
        };

        if ack < self.base {
            // Stale or duplicate cumulative ACK; everything it covers is
            // already out of the window.
            return;
        }
        if ack >= self.next_seq {
            debug!(ack, next_seq = self.next_seq, "ACK beyond sent range");
            return;
        }

        self.base = ack + 1;
        self.in_flight = self.in_flight.split_off(&self.base);
        if self.base == self.next_seq {
            self.disarm(ctx);
        } else {
            self.rearm(ctx);
        }
        self.pump(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id != RETX_TIMER {
            return;
        }
        self.timer_armed = false;
        if self.base == self.next_seq {
            return;
        }

        // Go back N: resend every outstanding segment, oldest first.
        let now = ctx.now();
        self.retx_count += self.in_flight.len() as u64;
        for slot in self.in_flight.values_mut() {
            slot.retransmissions += 1;
            slot.sent_at = now;
            ctx.send_frame(slot.frame.clone());
        }
        ctx.log(&format!(
            "timeout: resent {} segments from base {}",
            self.in_flight.len(),
            self.base
        ));
        ctx.record_metric(METRIC_RETRANSMISSIONS, self.retx_count as f64);
        self.rearm(ctx);
    }
}

pub struct GbnReceiver {
    /// Next in-order seq the application is waiting for.
    expected: u32,
}

impl GbnReceiver {
    pub fn new() -> Self {
        Self { expected: 0 }
    }

    /// Re-announce the last correctly received seq, if there is one.
    ///
    /// Before segment 0 arrives there is nothing a cumulative ACK field can
    /// express, so the receiver stays silent and leaves recovery to the
    /// sender's timer.
    fn ack_last(&self, ctx: &mut dyn SystemContext) {
        if self.expected == 0 {
            return;
        }
        let ack = Segment::Ack {
            ack: self.expected - 1,
            cum: None,
        };
        ctx.send_frame(ack.encode());
    }
}

impl Default for GbnReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportProtocol for GbnReceiver {
    fn on_frame(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) {
        match Segment::decode(frame) {
            Ok(Segment::Data { seq, payload }) if seq == self.expected => {
                ctx.deliver_data(&payload);
                self.expected += 1;
                self.ack_last(ctx);
            }
            Ok(Segment::Data { seq, .. }) => {
                // Out of order: drop the payload, re-announce the prefix.
                debug!(seq, expected = self.expected, "out-of-order DATA");
                self.ack_last(ctx);
            }
            Ok(Segment::Ack { .. }) => {
                debug!("GBN receiver ignoring ACK frame on the DATA path");
            }
            Err(err) => {
                // Corruption behaves exactly like loss, plus a duplicate ACK.
                debug!(%err, "corrupt frame at GBN receiver");
                self.ack_last(ctx);
            }
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingCtx;

    fn sender_with_payload(window: u32, segments: usize) -> (GbnSender, RecordingCtx) {
        let mut sender = GbnSender::new(window, 4, 100);
        let mut ctx = RecordingCtx::new();
        sender.on_app_data(&mut ctx, &vec![0xAB; segments * 4]);
        (sender, ctx)
    }

    fn ack_frame(ack: u32) -> Vec<u8> {
        Segment::Ack { ack, cum: None }.encode()
    }

    #[test]
    fn initial_burst_fills_window_only() {
        let (sender, ctx) = sender_with_payload(4, 10);
        assert_eq!(ctx.sent_data_seqs(), vec![0, 1, 2, 3]);
        assert_eq!(sender.next_seq - sender.base, 4);
        assert_eq!(ctx.timers_started, vec![(100, RETX_TIMER)]);
    }

    #[test]
    fn cumulative_ack_slides_and_refills() {
        let (mut sender, mut ctx) = sender_with_payload(4, 10);
        ctx.frames.clear();

        sender.on_frame(&mut ctx, &ack_frame(2));
        assert_eq!(sender.base, 3);
        // Window slid by three: seqs 4, 5, 6 go out.
        assert_eq!(ctx.sent_data_seqs(), vec![4, 5, 6]);
        assert!(sender.next_seq - sender.base <= 4);
    }

    #[test]
    fn stale_and_duplicate_acks_are_idempotent() {
        let (mut sender, mut ctx) = sender_with_payload(4, 10);
        sender.on_frame(&mut ctx, &ack_frame(1));
        let (base, next_seq, retx) = (sender.base, sender.next_seq, sender.retx_count);
        ctx.clear();

        // Re-feed the same ACK and an older one.
        sender.on_frame(&mut ctx, &ack_frame(1));
        sender.on_frame(&mut ctx, &ack_frame(0));

        assert_eq!(sender.base, base);
        assert_eq!(sender.next_seq, next_seq);
        assert_eq!(sender.retx_count, retx);
        assert!(ctx.frames.is_empty());
        assert!(ctx.timers_started.is_empty());
    }

    #[test]
    fn ack_beyond_sent_range_ignored() {
        let (mut sender, mut ctx) = sender_with_payload(4, 4);
        ctx.clear();
        sender.on_frame(&mut ctx, &ack_frame(99));
        assert_eq!(sender.base, 0);
        assert!(ctx.frames.is_empty());
    }

    #[test]
    fn timeout_resends_whole_window_in_order() {
        let (mut sender, mut ctx) = sender_with_payload(4, 10);
        ctx.clear();

        sender.on_timer(&mut ctx, RETX_TIMER);
        assert_eq!(ctx.sent_data_seqs(), vec![0, 1, 2, 3]);
        assert_eq!(sender.retx_count, 4);
        // Timer rearmed for the next round.
        assert_eq!(ctx.timers_started, vec![(100, RETX_TIMER)]);
    }

    #[test]
    fn final_ack_stops_the_timer() {
        let (mut sender, mut ctx) = sender_with_payload(4, 2);
        ctx.clear();
        sender.on_frame(&mut ctx, &ack_frame(1));
        assert_eq!(sender.base, sender.next_seq);
        assert_eq!(ctx.timers_cancelled, vec![RETX_TIMER]);
        assert!(ctx.timers_started.is_empty());
    }

    #[test]
    fn corrupted_ack_changes_nothing() {
        let (mut sender, mut ctx) = sender_with_payload(4, 4);
        ctx.clear();
        let mut frame = ack_frame(2);
        frame[3] ^= 0x40;
        sender.on_frame(&mut ctx, &frame);
        assert_eq!(sender.base, 0);
        assert!(ctx.frames.is_empty());
    }

    #[test]
    fn receiver_delivers_in_order_and_acks() {
        let mut rx = GbnReceiver::new();
        let mut ctx = RecordingCtx::new();

        for seq in 0..3u32 {
            let frame = Segment::Data {
                seq,
                payload: vec![seq as u8; 2],
            }
            .encode();
            rx.on_frame(&mut ctx, &frame);
        }

        assert_eq!(ctx.delivered, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(ctx.sent_ack_nums(), vec![0, 1, 2]);
    }

    #[test]
    fn receiver_reacks_on_gap_and_drops_payload() {
        let mut rx = GbnReceiver::new();
        let mut ctx = RecordingCtx::new();

        let seg0 = Segment::Data {
            seq: 0,
            payload: vec![1],
        }
        .encode();
        let seg2 = Segment::Data {
            seq: 2,
            payload: vec![3],
        }
        .encode();
        rx.on_frame(&mut ctx, &seg0);
        rx.on_frame(&mut ctx, &seg2);

        assert_eq!(ctx.delivered, vec![1]);
        // Gap re-announces the last in-order seq.
        assert_eq!(ctx.sent_ack_nums(), vec![0, 0]);
    }

    #[test]
    fn receiver_is_silent_before_first_segment() {
        let mut rx = GbnReceiver::new();
        let mut ctx = RecordingCtx::new();

        let seg1 = Segment::Data {
            seq: 1,
            payload: vec![9],
        }
        .encode();
        rx.on_frame(&mut ctx, &seg1);
        assert!(ctx.frames.is_empty());
        assert!(ctx.delivered.is_empty());
    }

    #[test]
    fn corrupt_data_treated_as_loss() {
        let mut rx = GbnReceiver::new();
        let mut ctx = RecordingCtx::new();

        let good = Segment::Data {
            seq: 0,
            payload: vec![5; 4],
        }
        .encode();
        rx.on_frame(&mut ctx, &good);

        let mut bad = Segment::Data {
            seq: 1,
            payload: vec![6; 4],
        }
        .encode();
        bad[10] ^= 0x01;
        rx.on_frame(&mut ctx, &bad);

        // Payload not delivered, duplicate ACK for seq 0 sent.
        assert_eq!(ctx.delivered, vec![5; 4]);
        assert_eq!(ctx.sent_ack_nums(), vec![0, 0]);
    }
}
