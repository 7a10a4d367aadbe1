pub mod channel;
pub mod engine;
pub mod trace;

pub use channel::{Direction, LinkStats, SendOutcome, UnreliableChannel};
pub use engine::{LinkEventSummary, NodeId, Simulator};
pub use trace::SimulationReport;
