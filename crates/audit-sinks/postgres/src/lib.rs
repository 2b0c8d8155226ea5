mod postgres_sink;

pub use postgres_sink::{PostgresConfig, PostgresRecordSink};
