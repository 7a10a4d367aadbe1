pub mod config;
pub mod interface;
pub mod protocol;
pub mod scenario;
pub mod segment;

pub use config::{ConfigError, LinkConfig, TransferConfig};
pub use interface::{SystemContext, TransportProtocol, METRIC_RETRANSMISSIONS};
pub use protocol::ProtocolKind;
pub use scenario::{LinkConfigOverride, TestAction, TestAssertion, TestScenario};
pub use segment::{internet_checksum, CodecError, Segment};
