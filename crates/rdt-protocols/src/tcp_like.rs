//! TCP-like sender: Selective Repeat plus an adaptive retransmission
//! timeout (Jacobson estimator under Karn's rule), duplicate-ACK fast
//! retransmit, and an optional AIMD congestion window.
//!
//! The matching receiver is [`SrReceiver::with_cumulative_field`]: it ACKs
//! every DATA individually and reports the delivered prefix in the ACK
//! trailer, which is what the duplicate-ACK counter here consumes.

use std::collections::{BTreeMap, VecDeque};

use rdt_abstract::{Segment, SystemContext, TransportProtocol};
use tracing::debug;

use crate::common::{chunk_payload, InFlight, METRIC_RETRANSMISSIONS};

pub const ALPHA: f64 = 0.125;
pub const BETA: f64 = 0.25;
pub const RTO_MIN_MS: u64 = 100;
pub const RTO_MAX_MS: u64 = 60_000;
/// RTO before the first sample. Common practice; the estimator takes over
/// after one clean round trip.
pub const DEFAULT_INIT_RTO_MS: u64 = 1_000;

/// Smoothed round-trip estimator (RFC 6298 shape).
///
/// `RTO = SRTT + 4·RTTVAR`, clamped to `[RTO_MIN_MS, RTO_MAX_MS]`. The first
/// sample seeds `SRTT` directly and `RTTVAR` with half of it. Timeouts double
/// the RTO (capped) until the next clean sample recomputes it.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt_ms: Option<f64>,
    rttvar_ms: f64,
    rto_ms: u64,
}

impl RttEstimator {
    pub fn new(init_rto_ms: u64) -> Self {
        Self {
            srtt_ms: None,
            rttvar_ms: 0.0,
            rto_ms: init_rto_ms.clamp(RTO_MIN_MS, RTO_MAX_MS),
        }
    }

    pub fn rto_ms(&self) -> u64 {
        self.rto_ms
    }

    pub fn srtt_ms(&self) -> Option<f64> {
        self.srtt_ms
    }

    /// Fold in a sample from a segment that was never retransmitted.
    pub fn on_sample(&mut self, sample_ms: f64) {
        match self.srtt_ms {
            None => {
                self.srtt_ms = Some(sample_ms);
                self.rttvar_ms = sample_ms / 2.0;
            }
            Some(srtt) => {
                // RTTVAR first, against the pre-update SRTT.
                self.rttvar_ms = (1.0 - BETA) * self.rttvar_ms + BETA * (sample_ms - srtt).abs();
                self.srtt_ms = Some((1.0 - ALPHA) * srtt + ALPHA * sample_ms);
            }
        }
        let rto = self.srtt_ms.unwrap() + 4.0 * self.rttvar_ms;
        self.rto_ms = (rto.ceil() as u64).clamp(RTO_MIN_MS, RTO_MAX_MS);
    }

    /// Exponential backoff on timeout.
    pub fn on_timeout(&mut self) {
        self.rto_ms = self.rto_ms.saturating_mul(2).min(RTO_MAX_MS);
    }
}

/// AIMD window in segments: slow start, congestion avoidance, multiplicative
/// decrease on timeout, fast recovery on fast retransmit.
#[derive(Debug, Clone)]
struct CongestionWindow {
    cwnd: f64,
    ssthresh: f64,
}

impl CongestionWindow {
    fn new() -> Self {
        Self {
            cwnd: 1.0,
            ssthresh: 65_535.0,
        }
    }

    fn on_new_ack(&mut self) {
        if self.cwnd < self.ssthresh {
            // Slow start: +1 per ACK doubles the window once per RTT.
            self.cwnd += 1.0;
        } else {
            // Congestion avoidance: +1 per RTT.
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(2.0);
        self.cwnd = 1.0;
    }

    fn on_fast_retransmit(&mut self) {
        // Unlike the timeout path, fast recovery halves without a floor.
        self.ssthresh = self.cwnd / 2.0;
        self.cwnd = self.ssthresh;
    }

    /// Whole segments the window currently admits.
    fn allowance(&self) -> u32 {
        (self.cwnd.floor() as u32).max(1)
    }
}

pub struct TcpLikeSender {
    window: u32,
    mss: usize,

    base: u32,
    next_seq: u32,
    queued: VecDeque<Vec<u8>>,
    in_flight: BTreeMap<u32, InFlight>,

    estimator: RttEstimator,
    cwnd: Option<CongestionWindow>,

    /// Highest delivered-prefix value reported by the receiver.
    last_cum: u32,
    /// Consecutive duplicate reports of `last_cum`.
    dup_count: u32,

    retx_count: u64,
    fast_retx_count: u64,
}

impl TcpLikeSender {
    pub fn new(window: u32, mss: usize, init_rto_ms: u64, enable_cwnd: bool) -> Self {
        Self {
            window,
            mss,
            base: 0,
            next_seq: 0,
            queued: VecDeque::new(),
            in_flight: BTreeMap::new(),
            estimator: RttEstimator::new(init_rto_ms),
            cwnd: enable_cwnd.then(CongestionWindow::new),
            last_cum: 0,
            dup_count: 0,
            retx_count: 0,
            fast_retx_count: 0,
        }
    }

    fn effective_window(&self) -> u32 {
        match &self.cwnd {
            Some(cw) => self.window.min(cw.allowance()),
            None => self.window,
        }
    }

    fn pump(&mut self, ctx: &mut dyn SystemContext) {
        while self.next_seq < self.base + self.effective_window() {
            let Some(payload) = self.queued.pop_front() else {
                break;
            };
            let slot = InFlight::new(self.next_seq, payload, ctx.now());
            ctx.send_frame(slot.frame.clone());
            self.in_flight.insert(self.next_seq, slot);
            ctx.start_timer(self.estimator.rto_ms(), self.next_seq);
            self.next_seq += 1;
        }
    }

    fn advance_base(&mut self) {
        while let Some(entry) = self.in_flight.first_entry() {
            if !entry.get().acked {
                break;
            }
            self.base = *entry.key() + 1;
            entry.remove();
        }
    }

    fn record_estimator(&self, ctx: &mut dyn SystemContext) {
        ctx.record_metric("rto_ms", self.estimator.rto_ms() as f64);
        if let Some(srtt) = self.estimator.srtt_ms() {
            ctx.record_metric("srtt_ms", srtt);
        }
    }

    fn record_cwnd(&self, ctx: &mut dyn SystemContext) {
        if let Some(cw) = &self.cwnd {
            ctx.record_metric("cwnd", cw.cwnd);
            ctx.record_metric("ssthresh", cw.ssthresh);
        }
    }

    /// Resend `seq` immediately because three duplicate prefix reports
    /// signalled its loss.
    fn fast_retransmit(&mut self, ctx: &mut dyn SystemContext, seq: u32) {
        let Some(slot) = self.in_flight.get_mut(&seq) else {
            return;
        };
        if slot.acked {
            return;
        }
        slot.retransmissions += 1;
        slot.sent_at = ctx.now();
        ctx.send_frame(slot.frame.clone());
        ctx.cancel_timer(seq);
        ctx.start_timer(self.estimator.rto_ms(), seq);

        self.retx_count += 1;
        self.fast_retx_count += 1;
        if let Some(cw) = &mut self.cwnd {
            cw.on_fast_retransmit();
        }
        ctx.log(&format!("fast retransmit of seq {seq}"));
        ctx.record_metric(METRIC_RETRANSMISSIONS, self.retx_count as f64);
        ctx.record_metric("fast_retransmits", self.fast_retx_count as f64);
        self.record_cwnd(ctx);
    }

    fn on_ack(&mut self, ctx: &mut dyn SystemContext, ack: u32, cum: Option<u32>) {
        let mut sample_ms = None;
        let mut newly_acked = false;
        if let Some(slot) = self.in_flight.get_mut(&ack) {
            if !slot.acked {
                // Karn: only segments sent exactly once yield RTT samples.
                if slot.retransmissions == 0 {
                    sample_ms = Some(ctx.now().saturating_sub(slot.sent_at) as f64);
                }
                slot.acked = true;
                newly_acked = true;
            }
        }
        if newly_acked {
            ctx.cancel_timer(ack);
            if let Some(sample) = sample_ms {
                self.estimator.on_sample(sample);
                self.record_estimator(ctx);
            }
            if let Some(cw) = &mut self.cwnd {
                cw.on_new_ack();
            }
            self.record_cwnd(ctx);
            self.advance_base();
        }

        if let Some(cum) = cum {
            if cum > self.last_cum {
                self.last_cum = cum;
                self.dup_count = 0;
            } else if cum == self.last_cum {
                self.dup_count += 1;
                if self.dup_count == 3 {
                    self.fast_retransmit(ctx, cum);
                }
            }
            // cum < last_cum: reordered stale report, nothing to learn.
        }

        self.pump(ctx);
    }
}

impl TransportProtocol for TcpLikeSender {
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.queued.extend(chunk_payload(self.mss, data));
        self.pump(ctx);
    }

    fn on_frame(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) {
        match Segment::decode(frame) {
            Ok(Segment::Ack { ack, cum }) => self.on_ack(ctx, ack, cum),
            Ok(Segment::Data { .. }) => {
                debug!("TCP-like sender ignoring DATA frame on the ACK path");
            }
            Err(err) => {
                debug!(%err, "TCP-like sender dropping undecodable frame");
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        let rto_before = self.estimator.rto_ms();
        let Some(slot) = self.in_flight.get_mut(&timer_id) else {
            return;
        };
        if slot.acked {
            return;
        }

        self.estimator.on_timeout();
        slot.retransmissions += 1;
        slot.sent_at = ctx.now();
        ctx.send_frame(slot.frame.clone());
        ctx.start_timer(self.estimator.rto_ms(), timer_id);

        self.retx_count += 1;
        if let Some(cw) = &mut self.cwnd {
            cw.on_timeout();
        }
        ctx.log(&format!(
            "RTO expired for seq {timer_id}, backing off {rto_before} -> {} ms",
            self.estimator.rto_ms()
        ));
        ctx.record_metric(METRIC_RETRANSMISSIONS, self.retx_count as f64);
        self.record_estimator(ctx);
        self.record_cwnd(ctx);
    }
}
