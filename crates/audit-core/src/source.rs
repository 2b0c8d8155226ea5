use crate::Result;
use async_trait::async_trait;

/// Trait for broker-side event sources.
///
/// A source owns one connection to the broker and at most one in-flight
/// unacknowledged delivery at a time per prefetch slot. `ack` and `nack`
/// apply to the delivery most recently returned by `next_event`.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Connect to the broker and declare topology. Idempotent topology
    /// declarations make this safe to repeat across restarts.
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the broker; a no-op when never connected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the source is connected
    fn is_connected(&self) -> bool;

    /// Receive the next message body, decoded to text.
    /// Returns None if the subscription is closed.
    async fn next_event(&mut self) -> Result<Option<String>>;

    /// Acknowledge the in-flight delivery, removing it permanently.
    async fn ack(&mut self) -> Result<()>;

    /// Negatively acknowledge the in-flight delivery with requeue, making
    /// it eligible for redelivery.
    async fn nack(&mut self) -> Result<()>;

    /// Logical broker name, used as the default record source.
    fn source_name(&self) -> &str;

    /// Get source status information
    fn status(&self) -> SourceStatus;
}

#[derive(Debug, Clone, Default)]
pub struct SourceStatus {
    pub connected: bool,
    pub events_received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
