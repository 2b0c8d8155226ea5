mod nats_source;

pub use nats_source::{NatsConfig, NatsEventSource, SOURCE_NAME};
