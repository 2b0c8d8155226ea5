use async_nats::jetstream::consumer::{pull, PullConsumer};
use async_nats::jetstream::{self, stream, AckKind};
use async_nats::Client;
use async_trait::async_trait;
use audit_core::{Error, EventSource, Result, SourceStatus};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Logical broker name, used as the default record source.
pub const SOURCE_NAME: &str = "NATS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL(s)
    pub servers: Vec<String>,

    /// JetStream stream carrying the audit subject space
    pub stream: String,

    /// Subject bound into the stream (catch-all wildcard)
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Durable consumer name
    pub durable_name: String,

    /// Filter over the stream's subjects; empty matches everything
    #[serde(default)]
    pub filter_subject: String,

    /// Cap on in-flight unacknowledged deliveries
    #[serde(default = "default_prefetch")]
    pub prefetch: i64,

    /// Redelivery cap per message; values <= 0 leave redelivery unlimited
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Optional token for authentication
    #[serde(default)]
    pub token: Option<String>,
}

fn default_subject() -> String {
    "audit.>".to_string()
}

fn default_prefetch() -> i64 {
    1
}

fn default_max_deliver() -> i64 {
    -1
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            stream: "audit-events".to_string(),
            subject: default_subject(),
            durable_name: "audit-log-worker".to_string(),
            filter_subject: String::new(),
            prefetch: default_prefetch(),
            max_deliver: default_max_deliver(),
            username: None,
            password: None,
            token: None,
        }
    }
}

/// Live broker handles, acquired together in `connect` and released
/// together in `disconnect`.
struct Subscription {
    client: Client,
    messages: pull::Stream,
    in_flight: Option<jetstream::Message>,
}

pub struct NatsEventSource {
    config: NatsConfig,
    subscription: Option<Subscription>,
    status: SourceStatus,
}

impl NatsEventSource {
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            subscription: None,
            status: SourceStatus::default(),
        }
    }
}

#[async_trait]
impl EventSource for NatsEventSource {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to NATS servers: {:?}", self.config.servers);

        // Build connection options with authentication if provided
        let mut opts = async_nats::ConnectOptions::new();

        if let Some(ref username) = self.config.username {
            if let Some(ref password) = self.config.password {
                info!("Using username/password authentication");
                opts = opts.user_and_password(username.clone(), password.clone());
            }
        } else if let Some(ref token) = self.config.token {
            info!("Using token authentication");
            opts = opts.token(token.clone());
        }

        let client = opts
            .connect(&self.config.servers[0])
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS successfully");

        // Declare topology. Both declarations are idempotent, so restarts
        // converge on the same durable stream and consumer.
        let context = jetstream::new(client.clone());

        let stream_info = context
            .get_or_create_stream(stream::Config {
                name: self.config.stream.clone(),
                subjects: vec![self.config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Connection(format!("Failed to get or create stream: {}", e)))?;

        let mut consumer_config = pull::Config {
            durable_name: Some(self.config.durable_name.clone()),
            filter_subject: self.config.filter_subject.clone(),
            max_ack_pending: self.config.prefetch,
            ..Default::default()
        };
        if self.config.max_deliver > 0 {
            consumer_config.max_deliver = self.config.max_deliver;
        }

        let consumer: PullConsumer = stream_info
            .get_or_create_consumer(&self.config.durable_name, consumer_config)
            .await
            .map_err(|e| Error::Connection(format!("Failed to get or create consumer: {}", e)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Connection(format!("Failed to subscribe: {}", e)))?;

        info!(
            "Consuming from stream '{}' as durable consumer '{}'",
            self.config.stream, self.config.durable_name
        );

        self.subscription = Some(Subscription {
            client,
            messages,
            in_flight: None,
        });
        self.status.connected = true;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from NATS");

        if let Some(subscription) = self.subscription.take() {
            // Stop consuming before releasing the connection.
            drop(subscription.messages);
            subscription
                .client
                .flush()
                .await
                .map_err(|e| Error::Connection(format!("Failed to flush: {}", e)))?;
        }

        self.status.connected = false;
        info!("Disconnected from NATS");

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.status.connected
    }

    async fn next_event(&mut self) -> Result<Option<String>> {
        let subscription = self
            .subscription
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".to_string()))?;

        match subscription.messages.next().await {
            Some(Ok(message)) => {
                debug!("Received message from NATS: {} bytes", message.payload.len());

                // Lossy decode keeps ingestion total even for bodies that
                // are not valid UTF-8.
                let body = String::from_utf8_lossy(&message.payload).into_owned();
                subscription.in_flight = Some(message);
                self.status.events_received += 1;
                Ok(Some(body))
            }
            Some(Err(e)) => {
                self.status.errors += 1;
                let err_msg = format!("Failed to receive message: {}", e);
                self.status.last_error = Some(err_msg.clone());
                Err(Error::Transport(err_msg))
            }
            None => {
                info!("NATS subscription closed");
                Ok(None)
            }
        }
    }

    async fn ack(&mut self) -> Result<()> {
        let subscription = self
            .subscription
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".to_string()))?;

        let message = subscription
            .in_flight
            .take()
            .ok_or_else(|| Error::Transport("No delivery awaiting acknowledgment".to_string()))?;

        match message.ack().await {
            Ok(()) => {
                self.status.acked += 1;
                Ok(())
            }
            Err(e) => {
                self.status.errors += 1;
                let err_msg = format!("Failed to ack message: {}", e);
                self.status.last_error = Some(err_msg.clone());
                Err(Error::Transport(err_msg))
            }
        }
    }

    async fn nack(&mut self) -> Result<()> {
        let subscription = self
            .subscription
            .as_mut()
            .ok_or_else(|| Error::Connection("Not connected".to_string()))?;

        let message = subscription
            .in_flight
            .take()
            .ok_or_else(|| Error::Transport("No delivery awaiting acknowledgment".to_string()))?;

        // NAK makes the message eligible for redelivery.
        match message.ack_with(AckKind::Nak(None)).await {
            Ok(()) => {
                self.status.nacked += 1;
                Ok(())
            }
            Err(e) => {
                self.status.errors += 1;
                let err_msg = format!("Failed to nack message: {}", e);
                self.status.last_error = Some(err_msg.clone());
                Err(Error::Transport(err_msg))
            }
        }
    }

    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn status(&self) -> SourceStatus {
        self.status.clone()
    }
}
