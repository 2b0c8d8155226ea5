mod error;
mod normalize;
mod record;
mod sink;
mod source;
mod worker;

pub use error::{Error, Result};
pub use normalize::{normalize, UNKNOWN};
pub use record::AuditRecord;
pub use sink::{RecordSink, SinkStatus};
pub use source::{EventSource, SourceStatus};
pub use worker::{Worker, WorkerCommand, WorkerConfig, WorkerState};
