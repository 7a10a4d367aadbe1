/// Metric name under which every sender reports its running retransmission
/// total; the experiment driver reads the final sample.
pub const METRIC_RETRANSMISSIONS: &str = "retransmissions";

/// The capability the simulator hands to a protocol endpoint.
/// Endpoints call these methods to interact with the channel, their timers
/// and the application layer.
pub trait SystemContext {
    /// Hand an encoded frame to the unreliable channel.
    fn send_frame(&mut self, frame: Vec<u8>);

    /// Start a timer.
    /// `timer_id` is endpoint-defined (the sliding-window protocols use the
    /// sequence number; Go-Back-N uses a single well-known id).
    /// A second `start_timer` with a live id queues a second expiry; cancel
    /// before re-arming.
    fn start_timer(&mut self, delay_ms: u64, timer_id: u32);

    /// Cancel a running timer. Safe to call for a timer that never ran.
    fn cancel_timer(&mut self, timer_id: u32);

    /// Deliver in-order bytes to the application layer.
    fn deliver_data(&mut self, data: &[u8]);

    /// Log a message through the simulator's tracing output.
    fn log(&mut self, message: &str);

    /// Current simulated time in milliseconds.
    fn now(&self) -> u64;

    /// Record a numeric sample (e.g. `retransmissions`, `rto_ms`) into the
    /// simulation's named time series.
    fn record_metric(&mut self, _name: &str, _value: f64) {
        // Default no-op so bare test harnesses don't need to care.
    }
}

/// One endpoint of a transfer, advanced purely by events.
///
/// Implementations must not block: every suspension point of the protocol
/// (frame arrival, timer expiry, new application data) is one of these
/// callbacks.
pub trait TransportProtocol {
    /// Called once when the simulation starts.
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    /// Called when a raw frame arrives from the channel. The frame may be
    /// corrupted; decode and checksum-verify before trusting it.
    fn on_frame(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]);

    /// Called when a timer armed via [`SystemContext::start_timer`] expires.
    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32);

    /// Called when the application layer wants bytes moved reliably.
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]);
}
