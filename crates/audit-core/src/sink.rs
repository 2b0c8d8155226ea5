use crate::{AuditRecord, Result};
use async_trait::async_trait;

/// Trait for durable record sinks.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Connect to the store
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the store; a no-op when never connected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the sink is connected
    fn is_connected(&self) -> bool;

    /// Persist a single record. Exactly one write attempt per call:
    /// either the record is durable on return or an error propagates.
    /// Retry policy lives in the caller.
    async fn save(&mut self, record: AuditRecord) -> Result<()>;

    /// Get sink status information
    fn status(&self) -> SinkStatus;
}

#[derive(Debug, Clone, Default)]
pub struct SinkStatus {
    pub connected: bool,
    pub records_written: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
