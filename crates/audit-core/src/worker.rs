use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::{normalize, Error, EventSource, RecordSink, Result};

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on a single persistence write so a hung store cannot
    /// starve shutdown. A timed-out write counts as a persist failure.
    pub write_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Commands for controlling worker lifecycle
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    Stop,
}

/// Consumer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    TopologyReady,
    Consuming,
    Disconnecting,
}

/// Worker driving one event source into one record sink.
///
/// Both collaborators are injected as narrow trait objects, so tests can
/// substitute in-memory fakes. Each delivered message is normalized,
/// written, and then acked on success or nacked with requeue on failure.
pub struct Worker {
    source: Box<dyn EventSource>,
    sink: Box<dyn RecordSink>,
    config: WorkerConfig,
    control_rx: Option<mpsc::Receiver<WorkerCommand>>,
    state: Arc<RwLock<WorkerState>>,
}

impl Worker {
    pub fn new(source: Box<dyn EventSource>, sink: Box<dyn RecordSink>) -> Self {
        Self {
            source,
            sink,
            config: WorkerConfig::default(),
            control_rx: None,
            state: Arc::new(RwLock::new(WorkerState::Disconnected)),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_control(mut self, control_rx: mpsc::Receiver<WorkerCommand>) -> Self {
        self.control_rx = Some(control_rx);
        self
    }

    /// Shared handle observing lifecycle state transitions.
    pub fn state_handle(&self) -> Arc<RwLock<WorkerState>> {
        self.state.clone()
    }

    /// Run the worker until the subscription closes, a stop command
    /// arrives, or a fatal broker failure occurs.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting audit worker");

        self.set_state(WorkerState::Connecting).await;
        if let Err(e) = self.source.connect().await {
            error!("Failed to connect to broker: {}", e);
            self.teardown().await;
            return Err(e);
        }
        self.set_state(WorkerState::TopologyReady).await;

        if let Err(e) = self.sink.connect().await {
            error!("Failed to connect to store: {}", e);
            self.teardown().await;
            return Err(e);
        }

        self.set_state(WorkerState::Consuming).await;
        info!("Worker is now consuming events");

        let result = self.consume().await;
        self.teardown().await;
        result
    }

    async fn consume(&mut self) -> Result<()> {
        loop {
            let received = match self.control_rx {
                Some(ref mut rx) => {
                    tokio::select! {
                        cmd = rx.recv() => {
                            match cmd {
                                // Channel closure counts as a stop signal.
                                Some(WorkerCommand::Stop) | None => {
                                    info!("Stop requested");
                                    break;
                                }
                            }
                        }
                        received = self.source.next_event() => received,
                    }
                }
                None => self.source.next_event().await,
            };

            match received {
                Ok(Some(body)) => self.handle_message(&body).await?,
                Ok(None) => {
                    warn!("Subscription closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to receive event: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Process one delivery to completion: the returned error is a fatal
    /// acknowledgment transport failure, never a persist failure.
    async fn handle_message(&mut self, body: &str) -> Result<()> {
        let record = normalize(body, self.source.source_name());
        let event_type = record.event_type.clone();

        let saved = match timeout(self.config.write_timeout, self.sink.save(record)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Persist(format!(
                "Write timed out after {:?}",
                self.config.write_timeout
            ))),
        };

        match saved {
            Ok(()) => {
                info!("Event processed successfully: {}", event_type);
                self.source.ack().await
            }
            Err(e) => {
                error!("Failed to persist event, requeueing: {}", e);
                self.source.nack().await
            }
        }
    }

    /// Stop consuming, then release broker and store handles. Tolerates
    /// partial initialization; teardown failures are logged, not raised.
    async fn teardown(&mut self) {
        self.set_state(WorkerState::Disconnecting).await;

        if let Err(e) = self.source.disconnect().await {
            warn!("Failed to disconnect from broker: {}", e);
        }
        if let Err(e) = self.sink.disconnect().await {
            warn!("Failed to disconnect from store: {}", e);
        }

        self.set_state(WorkerState::Disconnected).await;
        info!("Worker stopped");
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuditRecord, SinkStatus, SourceStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct SourceLog {
        acked: usize,
        nacked: usize,
        disconnects: usize,
    }

    struct FakeSource {
        bodies: VecDeque<String>,
        fail_connect: bool,
        fail_ack: bool,
        hang_when_empty: bool,
        in_flight: bool,
        log: Arc<StdMutex<SourceLog>>,
    }

    impl FakeSource {
        fn with_bodies(bodies: &[&str], log: Arc<StdMutex<SourceLog>>) -> Self {
            Self {
                bodies: bodies.iter().map(|b| b.to_string()).collect(),
                fail_connect: false,
                fail_ack: false,
                hang_when_empty: false,
                in_flight: false,
                log,
            }
        }
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                return Err(Error::Connection("broker unreachable".to_string()));
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.log.lock().unwrap().disconnects += 1;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn next_event(&mut self) -> Result<Option<String>> {
            match self.bodies.pop_front() {
                Some(body) => {
                    self.in_flight = true;
                    Ok(Some(body))
                }
                None => {
                    if self.hang_when_empty {
                        std::future::pending::<()>().await;
                    }
                    Ok(None)
                }
            }
        }

        async fn ack(&mut self) -> Result<()> {
            assert!(self.in_flight, "ack without an in-flight delivery");
            if self.fail_ack {
                return Err(Error::Transport("ack failed".to_string()));
            }
            self.in_flight = false;
            self.log.lock().unwrap().acked += 1;
            Ok(())
        }

        async fn nack(&mut self) -> Result<()> {
            assert!(self.in_flight, "nack without an in-flight delivery");
            self.in_flight = false;
            self.log.lock().unwrap().nacked += 1;
            Ok(())
        }

        fn source_name(&self) -> &str {
            "NATS"
        }

        fn status(&self) -> SourceStatus {
            SourceStatus::default()
        }
    }

    #[derive(Default)]
    struct SinkLog {
        saved: Vec<AuditRecord>,
        disconnects: usize,
    }

    struct FakeSink {
        fail_saves: bool,
        hang_saves: bool,
        log: Arc<StdMutex<SinkLog>>,
    }

    impl FakeSink {
        fn new(log: Arc<StdMutex<SinkLog>>) -> Self {
            Self {
                fail_saves: false,
                hang_saves: false,
                log,
            }
        }
    }

    #[async_trait]
    impl RecordSink for FakeSink {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.log.lock().unwrap().disconnects += 1;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn save(&mut self, record: AuditRecord) -> Result<()> {
            if self.hang_saves {
                std::future::pending::<()>().await;
            }
            if self.fail_saves {
                return Err(Error::Persist("store rejected the write".to_string()));
            }
            self.log.lock().unwrap().saved.push(record);
            Ok(())
        }

        fn status(&self) -> SinkStatus {
            SinkStatus::default()
        }
    }

    fn logs() -> (Arc<StdMutex<SourceLog>>, Arc<StdMutex<SinkLog>>) {
        (
            Arc::new(StdMutex::new(SourceLog::default())),
            Arc::new(StdMutex::new(SinkLog::default())),
        )
    }

    #[tokio::test]
    async fn test_successful_write_acks_each_delivery() {
        let (source_log, sink_log) = logs();
        let source = FakeSource::with_bodies(
            &[
                r#"{"EventType":"VehicleCreated","EntityType":"Vehicle"}"#,
                r#"{"EventType":"VehicleDeleted","EntityType":"Vehicle"}"#,
            ],
            source_log.clone(),
        );
        let sink = FakeSink::new(sink_log.clone());

        let worker = Worker::new(Box::new(source), Box::new(sink));
        let state = worker.state_handle();
        worker.run().await.expect("worker should stop cleanly");

        let source_log = source_log.lock().unwrap();
        let sink_log = sink_log.lock().unwrap();
        assert_eq!(source_log.acked, 2);
        assert_eq!(source_log.nacked, 0);
        assert_eq!(sink_log.saved.len(), 2);
        assert_eq!(sink_log.saved[0].event_type, "VehicleCreated");
        assert_eq!(sink_log.saved[1].event_type, "VehicleDeleted");
        assert!(sink_log.saved[1].received_at >= sink_log.saved[0].received_at);
        assert_eq!(*state.read().await, WorkerState::Disconnected);
    }

    #[tokio::test]
    async fn test_persist_failure_nacks_with_requeue() {
        let (source_log, sink_log) = logs();
        let source = FakeSource::with_bodies(&[r#"{"EventType":"X"}"#], source_log.clone());
        let mut sink = FakeSink::new(sink_log.clone());
        sink.fail_saves = true;

        let worker = Worker::new(Box::new(source), Box::new(sink));
        worker.run().await.expect("persist failures are not fatal");

        let source_log = source_log.lock().unwrap();
        assert_eq!(source_log.acked, 0);
        assert_eq!(source_log.nacked, 1);
        // Nothing became visible in the store.
        assert!(sink_log.lock().unwrap().saved.is_empty());
    }

    #[tokio::test]
    async fn test_write_timeout_counts_as_persist_failure() {
        let (source_log, sink_log) = logs();
        let source = FakeSource::with_bodies(&[r#"{"EventType":"X"}"#], source_log.clone());
        let mut sink = FakeSink::new(sink_log.clone());
        sink.hang_saves = true;

        let worker = Worker::new(Box::new(source), Box::new(sink)).with_config(WorkerConfig {
            write_timeout: Duration::from_millis(20),
        });
        worker.run().await.expect("a timed-out write is not fatal");

        assert_eq!(source_log.lock().unwrap().nacked, 1);
        assert!(sink_log.lock().unwrap().saved.is_empty());
    }

    #[tokio::test]
    async fn test_ack_transport_failure_is_fatal() {
        let (source_log, sink_log) = logs();
        let mut source = FakeSource::with_bodies(&[r#"{"EventType":"X"}"#], source_log.clone());
        source.fail_ack = true;
        let sink = FakeSink::new(sink_log.clone());

        let worker = Worker::new(Box::new(source), Box::new(sink));
        let state = worker.state_handle();
        let result = worker.run().await;

        assert!(matches!(result, Err(Error::Transport(_))));
        // Teardown still ran.
        assert_eq!(*state.read().await, WorkerState::Disconnected);
        assert_eq!(source_log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_tears_down_partial_initialization() {
        let (source_log, sink_log) = logs();
        let mut source = FakeSource::with_bodies(&[], source_log.clone());
        source.fail_connect = true;
        let sink = FakeSink::new(sink_log.clone());

        let worker = Worker::new(Box::new(source), Box::new(sink));
        let result = worker.run().await;

        assert!(matches!(result, Err(Error::Connection(_))));
        // Both collaborators saw a disconnect even though startup never
        // completed.
        assert_eq!(source_log.lock().unwrap().disconnects, 1);
        assert_eq!(sink_log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_stop_command_shuts_down_between_deliveries() {
        let (source_log, sink_log) = logs();
        let mut source = FakeSource::with_bodies(&[r#"{"EventType":"X"}"#], source_log.clone());
        source.hang_when_empty = true;
        let sink = FakeSink::new(sink_log.clone());

        let (tx, rx) = mpsc::channel(8);
        let worker = Worker::new(Box::new(source), Box::new(sink)).with_control(rx);
        let state = worker.state_handle();

        let handle = tokio::spawn(worker.run());
        // Let the first delivery finish, then stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(WorkerCommand::Stop).await.expect("worker is alive");

        handle
            .await
            .expect("worker task panicked")
            .expect("stop should be a clean shutdown");

        let source_log = source_log.lock().unwrap();
        assert_eq!(source_log.acked, 1);
        assert_eq!(source_log.disconnects, 1);
        assert_eq!(sink_log.lock().unwrap().saved.len(), 1);
        assert_eq!(*state.read().await, WorkerState::Disconnected);
    }

    #[tokio::test]
    async fn test_non_json_body_is_persisted_with_defaults() {
        let (source_log, sink_log) = logs();
        let source = FakeSource::with_bodies(&["not json at all"], source_log.clone());
        let sink = FakeSink::new(sink_log.clone());

        let worker = Worker::new(Box::new(source), Box::new(sink));
        worker.run().await.expect("normalization never fails");

        let sink_log = sink_log.lock().unwrap();
        assert_eq!(sink_log.saved.len(), 1);
        assert_eq!(sink_log.saved[0].event_type, "Unknown");
        assert_eq!(sink_log.saved[0].entity_type, "Unknown");
        assert_eq!(sink_log.saved[0].data, "not json at all");
        assert_eq!(sink_log.saved[0].source, "NATS");
        assert_eq!(source_log.lock().unwrap().acked, 1);
    }
}
