//! The unreliable datagram channel.
//!
//! An in-process bidirectional pipe: frames submitted on either side survive
//! a Bernoulli loss roll, may get one bit flipped, are delayed by half the
//! configured RTT plus uniform jitter, and may swap delivery times with a
//! random frame already queued in the same direction (this is where
//! reordering comes from). Pending deliveries sit in a map ordered by
//! `(deliver_at, insertion id)`, so simultaneous deliveries resolve in send
//! order. The channel itself never fails.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdt_abstract::segment::seg_type;
use rdt_abstract::{LinkConfig, Segment};
use serde::Serialize;

/// Stream tweaks so loss, delay, corruption and reordering draw from
/// independent seeded sequences; changing one knob leaves the others' draws
/// untouched.
const LOSS_STREAM: u64 = 0x4c4f5353;
const DELAY_STREAM: u64 = 0x44454c41;
const CORRUPT_STREAM: u64 = 0x434f5252;
const REORDER_STREAM: u64 = 0x52454f52;

/// Which way a frame is travelling. Endpoint A is the sender side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::AToB => "A->B",
            Direction::BToA => "B->A",
        }
    }
}

/// Per-direction channel counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub reordered: u64,
}

impl LinkStats {
    pub fn observed_loss_rate(&self) -> f64 {
        self.dropped as f64 / (self.sent.max(1)) as f64
    }
}

/// What became of one submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Dropped,
    Scheduled {
        deliver_at: u64,
        corrupted: bool,
        reordered: bool,
    },
}

#[derive(Debug)]
struct Pending {
    dir: Direction,
    frame: Vec<u8>,
}

pub struct UnreliableChannel {
    cfg: LinkConfig,

    loss_rng: StdRng,
    delay_rng: StdRng,
    corrupt_rng: StdRng,
    reorder_rng: StdRng,

    /// Scheduled deliveries keyed by `(deliver_at, insertion id)`.
    pending: BTreeMap<(u64, u64), Pending>,
    next_id: u64,

    pub a_to_b: LinkStats,
    pub b_to_a: LinkStats,

    // Deterministic fault injection for scripted tests.
    drop_data_seq_once: Vec<u32>,
    drop_ack_num_once: Vec<u32>,
}

impl UnreliableChannel {
    pub fn new(cfg: LinkConfig) -> Self {
        let seed = cfg.seed;
        Self {
            cfg,
            loss_rng: StdRng::seed_from_u64(seed ^ LOSS_STREAM),
            delay_rng: StdRng::seed_from_u64(seed ^ DELAY_STREAM),
            corrupt_rng: StdRng::seed_from_u64(seed ^ CORRUPT_STREAM),
            reorder_rng: StdRng::seed_from_u64(seed ^ REORDER_STREAM),
            pending: BTreeMap::new(),
            next_id: 0,
            a_to_b: LinkStats::default(),
            b_to_a: LinkStats::default(),
            drop_data_seq_once: Vec::new(),
            drop_ack_num_once: Vec::new(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.cfg
    }

    /// Drop the first DATA frame carrying this seq.
    pub fn add_drop_data_seq_once(&mut self, seq: u32) {
        self.drop_data_seq_once.push(seq);
    }

    /// Drop the first ACK frame carrying this ack number.
    pub fn add_drop_ack_num_once(&mut self, ack: u32) {
        self.drop_ack_num_once.push(ack);
    }

    fn stats_mut(&mut self, dir: Direction) -> &mut LinkStats {
        match dir {
            Direction::AToB => &mut self.a_to_b,
            Direction::BToA => &mut self.b_to_a,
        }
    }

    fn scripted_drop(&mut self, frame: &[u8]) -> bool {
        let (Some(tag), Some(num)) = (Segment::peek_type(frame), Segment::peek_num(frame)) else {
            return false;
        };
        let list = match tag {
            seg_type::DATA => &mut self.drop_data_seq_once,
            seg_type::ACK => &mut self.drop_ack_num_once,
            _ => return false,
        };
        match list.iter().position(|n| *n == num) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    fn loss_rate_at(&self, now: u64) -> f64 {
        match self.cfg.blackout_until_ms {
            Some(until) if now < until => 1.0,
            _ => self.cfg.loss_rate,
        }
    }

    /// Submit a frame for delivery to the other endpoint.
    pub fn send(&mut self, dir: Direction, mut frame: Vec<u8>, now: u64) -> SendOutcome {
        self.stats_mut(dir).sent += 1;

        if self.scripted_drop(&frame) || self.loss_rng.random::<f64>() < self.loss_rate_at(now) {
            self.stats_mut(dir).dropped += 1;
            return SendOutcome::Dropped;
        }

        let corrupted = self.corrupt_rng.random::<f64>() < self.cfg.corrupt_rate;
        if corrupted {
            let bit = self.corrupt_rng.random_range(0..frame.len() * 8);
            frame[bit / 8] ^= 1 << (bit % 8);
            self.stats_mut(dir).corrupted += 1;
        }

        let jitter = match self.cfg.jitter_ms {
            0 => 0,
            j => self.delay_rng.random_range(-(j as i64)..=j as i64),
        };
        let mut deliver_at = now + (self.cfg.one_way_ms() as i64 + jitter).max(0) as u64;

        let mut reordered = false;
        if self.reorder_rng.random::<f64>() < self.cfg.reorder_rate {
            if let Some(victim) = self.pick_pending(dir) {
                // Exchange delivery times with a random in-flight frame.
                if let Some(entry) = self.pending.remove(&victim) {
                    self.pending.insert((deliver_at, victim.1), entry);
                    deliver_at = victim.0;
                    reordered = true;
                    self.stats_mut(dir).reordered += 1;
                }
            }
        }

        self.pending.insert(
            (deliver_at, self.next_id),
            Pending {
                dir,
                frame,
            },
        );
        self.next_id += 1;

        SendOutcome::Scheduled {
            deliver_at,
            corrupted,
            reordered,
        }
    }

    fn pick_pending(&mut self, dir: Direction) -> Option<(u64, u64)> {
        let keys: Vec<(u64, u64)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.dir == dir)
            .map(|(k, _)| *k)
            .collect();
        if keys.is_empty() {
            return None;
        }
        Some(keys[self.reorder_rng.random_range(0..keys.len())])
    }

    /// Timestamp of the earliest pending delivery.
    pub fn next_delivery_at(&self) -> Option<u64> {
        self.pending.first_key_value().map(|((at, _), _)| *at)
    }

    /// Remove and return the earliest pending delivery.
    pub fn pop_next(&mut self) -> Option<(u64, Direction, Vec<u8>)> {
        let ((at, _), pending) = self.pending.pop_first()?;
        Some((at, pending.dir, pending.frame))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
