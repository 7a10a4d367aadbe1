//! Deterministic single-threaded event loop.
//!
//! Virtual time advances to whichever comes first: the next timer/app event
//! in the heap, or the channel's next frame delivery. Endpoint callbacks run
//! against a scoped context that buffers their actions; the buffer is applied
//! afterwards so a callback never re-enters the engine. Given one seed the
//! whole run is reproducible.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use rdt_abstract::{LinkConfig, Segment, SystemContext, TransportProtocol, METRIC_RETRANSMISSIONS};
use serde::Serialize;
use tracing::{debug, info};

use crate::channel::{Direction, SendOutcome, UnreliableChannel};
use crate::trace::SimulationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    /// The direction frames travel when this node transmits.
    fn outbound(&self) -> Direction {
        match self {
            NodeId::Sender => Direction::AToB,
            NodeId::Receiver => Direction::BToA,
        }
    }
}

#[derive(Debug)]
enum EventKind {
    TimerExpiry {
        node: NodeId,
        timer_id: u32,
        generation: u64,
    },
    AppSend {
        data: Vec<u8>,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    kind: EventKind,
    id: u64, // unique, breaks ties between events at the same time
}

// Custom Ord for a min-heap: the smallest time pops first.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of one link-layer event, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

/// Actions buffered while an endpoint callback runs.
#[derive(Default)]
struct ActionBuffer {
    outgoing_frames: Vec<Vec<u8>>,
    timers_start: Vec<(u64, u32)>, // (delay, id)
    timers_cancel: Vec<u32>,
    logs: Vec<String>,
    delivered_data: Vec<Vec<u8>>,
    metrics: Vec<(String, f64)>,
}

/// Context implementation handed to the endpoints.
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl SystemContext for ScopedContext<'_> {
    fn send_frame(&mut self, frame: Vec<u8>) {
        self.buffer.outgoing_frames.push(frame);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.buffer.timers_start.push((delay_ms, timer_id));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.buffer.timers_cancel.push(timer_id);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered_data.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

pub struct Simulator {
    time: u64,
    events: BinaryHeap<Event>,
    event_id: u64,

    channel: UnreliableChannel,

    pub sender: Box<dyn TransportProtocol>,
    pub receiver: Box<dyn TransportProtocol>,

    /// In-order application bytes accumulated at the receiver.
    delivered: Vec<u8>,
    /// Frames the sender endpoint has emitted (first sends and retransmits).
    pub sender_segment_count: u64,

    /// Named time series recorded via `SystemContext::record_metric`.
    metrics: HashMap<String, Vec<(u64, f64)>>,

    /// Timer cancellation by generation: a cancel bumps the counter, expiry
    /// events carrying an older generation are skipped on pop.
    timer_generations: HashMap<(NodeId, u32), u64>,

    /// Timeline of channel activity for reports.
    pub link_events: Vec<LinkEventSummary>,
}

impl Simulator {
    pub fn new(
        config: LinkConfig,
        sender: Box<dyn TransportProtocol>,
        receiver: Box<dyn TransportProtocol>,
    ) -> Self {
        Self {
            time: 0,
            events: BinaryHeap::new(),
            event_id: 0,
            channel: UnreliableChannel::new(config),
            sender,
            receiver,
            delivered: Vec::new(),
            sender_segment_count: 0,
            metrics: HashMap::new(),
            timer_generations: HashMap::new(),
            link_events: Vec::new(),
        }
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn delivered_data(&self) -> &[u8] {
        &self.delivered
    }

    pub fn channel(&self) -> &UnreliableChannel {
        &self.channel
    }

    /// Drop the first DATA frame with this seq (scripted fault).
    pub fn add_drop_data_seq_once(&mut self, seq: u32) {
        self.channel.add_drop_data_seq_once(seq);
    }

    /// Drop the first ACK frame with this ack number (scripted fault).
    pub fn add_drop_ack_num_once(&mut self, ack: u32) {
        self.channel.add_drop_ack_num_once(ack);
    }

    pub fn metric_series(&self, name: &str) -> Option<&[(u64, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    /// Final sample of a named metric, if any were recorded.
    pub fn metric_last(&self, name: &str) -> Option<f64> {
        self.metrics
            .get(name)
            .and_then(|v| v.last())
            .map(|(_, value)| *value)
    }

    fn push_event(&mut self, time: u64, kind: EventKind) {
        self.events.push(Event {
            time,
            kind,
            id: self.event_id,
        });
        self.event_id += 1;
    }

    pub fn schedule_app_send(&mut self, time: u64, data: Vec<u8>) {
        self.push_event(time, EventKind::AppSend { data });
    }

    pub fn init(&mut self) {
        for node in [NodeId::Sender, NodeId::Receiver] {
            let mut buffer = ActionBuffer::default();
            {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.time,
                };
                match node {
                    NodeId::Sender => self.sender.init(&mut ctx),
                    NodeId::Receiver => self.receiver.init(&mut ctx),
                }
            }
            self.process_actions(node, buffer);
        }
    }

    /// Advance to the next timer, app event or frame delivery.
    /// Returns false once nothing remains.
    pub fn step(&mut self) -> bool {
        let next_event = self.events.peek().map(|e| e.time);
        let next_delivery = self.channel.next_delivery_at();
        match (next_delivery, next_event) {
            (None, None) => false,
            (Some(d), Some(e)) if d <= e => self.step_delivery(),
            (Some(_), None) => self.step_delivery(),
            _ => self.step_heap_event(),
        }
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    pub fn remaining_work(&self) -> usize {
        self.events.len() + self.channel.pending_len()
    }

    fn step_delivery(&mut self) -> bool {
        let Some((at, dir, frame)) = self.channel.pop_next() else {
            return false;
        };
        self.time = at;
        let to = match dir {
            Direction::AToB => NodeId::Receiver,
            Direction::BToA => NodeId::Sender,
        };
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description: format!("[{}] DELIVER {}", dir.label(), describe_frame(&frame)),
        });

        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
            };
            match to {
                NodeId::Sender => self.sender.on_frame(&mut ctx, &frame),
                NodeId::Receiver => self.receiver.on_frame(&mut ctx, &frame),
            }
        }
        self.process_actions(to, buffer);
        true
    }

    fn step_heap_event(&mut self) -> bool {
        let Some(event) = self.events.pop() else {
            return false;
        };
        self.time = event.time;
        debug!(time = self.time, "processing {:?}", event.kind);

        match event.kind {
            EventKind::TimerExpiry {
                node,
                timer_id,
                generation,
            } => {
                // A cancel after scheduling shows up as a newer generation.
                let current = self
                    .timer_generations
                    .get(&(node, timer_id))
                    .copied()
                    .unwrap_or(0);
                if current != generation {
                    debug!(timer_id, "skipping cancelled timer");
                    return true;
                }

                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    match node {
                        NodeId::Sender => self.sender.on_timer(&mut ctx, timer_id),
                        NodeId::Receiver => self.receiver.on_timer(&mut ctx, timer_id),
                    }
                }
                self.process_actions(node, buffer);
            }
            EventKind::AppSend { data } => {
                let mut buffer = ActionBuffer::default();
                {
                    let mut ctx = ScopedContext {
                        buffer: &mut buffer,
                        now: self.time,
                    };
                    self.sender.on_app_data(&mut ctx, &data);
                }
                self.process_actions(NodeId::Sender, buffer);
            }
        }
        true
    }

    fn process_actions(&mut self, source: NodeId, buffer: ActionBuffer) {
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{source:?}] {log}");
        }

        for data in buffer.delivered_data {
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!("[{source:?}] DELIVERED {} bytes to application", data.len()),
            });
            self.delivered.extend_from_slice(&data);
        }

        for timer_id in buffer.timers_cancel {
            *self.timer_generations.entry((source, timer_id)).or_insert(0) += 1;
        }

        for (delay, timer_id) in buffer.timers_start {
            let generation = *self.timer_generations.entry((source, timer_id)).or_insert(0);
            self.push_event(
                self.time + delay,
                EventKind::TimerExpiry {
                    node: source,
                    timer_id,
                    generation,
                },
            );
        }

        for frame in buffer.outgoing_frames {
            if source == NodeId::Sender {
                self.sender_segment_count += 1;
            }
            let dir = source.outbound();
            let summary = describe_frame(&frame);
            match self.channel.send(dir, frame, self.time) {
                SendOutcome::Dropped => {
                    self.link_events.push(LinkEventSummary {
                        time: self.time,
                        description: format!("[{}] DROP {summary}", dir.label()),
                    });
                }
                SendOutcome::Scheduled {
                    deliver_at,
                    corrupted,
                    reordered,
                } => {
                    let mut flags = String::new();
                    if corrupted {
                        flags.push_str(" CORRUPT");
                    }
                    if reordered {
                        flags.push_str(" REORDER");
                    }
                    self.link_events.push(LinkEventSummary {
                        time: self.time,
                        description: format!(
                            "[{}] SEND {summary} (arrives t={deliver_at}{flags})",
                            dir.label()
                        ),
                    });
                }
            }
        }
    }

    /// Serializable snapshot of the finished (or aborted) run.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            link: self.channel.config().clone(),
            duration_ms: self.time,
            delivered_bytes: self.delivered.len() as u64,
            sender_segment_count: self.sender_segment_count,
            retransmissions: self.metric_last(METRIC_RETRANSMISSIONS).unwrap_or(0.0) as u64,
            a_to_b: self.channel.a_to_b.clone(),
            b_to_a: self.channel.b_to_a.clone(),
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }
}

fn describe_frame(frame: &[u8]) -> String {
    match Segment::decode(frame) {
        Ok(Segment::Data { seq, payload }) => format!("DATA seq={seq} ({} B)", payload.len()),
        Ok(Segment::Ack { ack, cum: None }) => format!("ACK {ack}"),
        Ok(Segment::Ack {
            ack,
            cum: Some(cum),
        }) => format!("ACK {ack} cum={cum}"),
        Err(_) => format!("corrupt frame ({} B)", frame.len()),
    }
}
