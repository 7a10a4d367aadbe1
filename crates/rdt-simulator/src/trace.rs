use serde::Serialize;
use std::collections::HashMap;

use rdt_abstract::LinkConfig;

use crate::channel::LinkStats;
use crate::engine::LinkEventSummary;

/// Everything worth keeping from one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub link: LinkConfig,
    pub duration_ms: u64,
    pub delivered_bytes: u64,
    pub sender_segment_count: u64,
    pub retransmissions: u64,
    pub a_to_b: LinkStats,
    pub b_to_a: LinkStats,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}
