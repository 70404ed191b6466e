//! NATS JetStream broker publisher
//!
//! Implements [`BrokerPublisher`] on JetStream. An exchange maps to one
//! stream capturing `{exchange}.>`; a routing key becomes the subject suffix.
//! Every message carries `Nats-Msg-Id = event_id`, so a retried send inside
//! the stream's duplicate window is acknowledged without being stored twice.
//!
//! The client is connected lazily and owned by the publisher. A failed
//! connect is reported as [`TransportError::Unreachable`] and retried on the
//! next send. Any failure after connecting drops the connection and the
//! ensured-stream cache, so the next send reconnects and ensures its stream
//! again, e.g. after the stream was deleted on the server.

use std::collections::HashSet;
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::context::PublishErrorKind;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use library_server_domain::outbox::{BrokerPublisher, PublishAck, TransportError, WireMessage};
use library_shared::config::BrokerConfig;
use library_shared::event_topics::{exchange_wildcard, stream_name_for, subject_for};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Window in which JetStream drops a repeated `Nats-Msg-Id`
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// NATS connection configuration
#[derive(Debug, Clone)]
pub struct NatsPublisherConfig {
    pub urls: Vec<String>,
    pub connect_timeout: Duration,
    /// Client name reported to the server
    pub connection_name: String,
    pub duplicate_window: Duration,
}

impl Default for NatsPublisherConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            connect_timeout: Duration::from_secs(5),
            connection_name: "library-outbox-relay".to_string(),
            duplicate_window: DUPLICATE_WINDOW,
        }
    }
}

impl From<&BrokerConfig> for NatsPublisherConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            urls: config.urls.clone(),
            connect_timeout: config.connect_timeout(),
            connection_name: config.connection_name.clone(),
            duplicate_window: DUPLICATE_WINDOW,
        }
    }
}

impl NatsPublisherConfig {
    /// Comma-separated server list as accepted by `async_nats`
    pub fn server_list(&self) -> String {
        self.urls.join(",")
    }
}

struct NatsConnection {
    client: Client,
    jetstream: JetStreamContext,
}

/// [`BrokerPublisher`] backed by NATS JetStream
pub struct NatsBrokerPublisher {
    config: NatsPublisherConfig,
    connection: RwLock<Option<NatsConnection>>,
    /// Streams already ensured on this connection
    streams: Mutex<HashSet<String>>,
}

impl NatsBrokerPublisher {
    /// Create a publisher without connecting yet
    pub fn new(config: NatsPublisherConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            streams: Mutex::new(HashSet::new()),
        }
    }

    /// Create a publisher and connect immediately
    pub async fn connect(config: NatsPublisherConfig) -> Result<Self, TransportError> {
        let publisher = Self::new(config);
        publisher.jetstream().await?;
        Ok(publisher)
    }

    pub fn config(&self) -> &NatsPublisherConfig {
        &self.config
    }

    async fn open(&self) -> Result<NatsConnection, TransportError> {
        let options = ConnectOptions::new()
            .connection_timeout(self.config.connect_timeout)
            .name(&self.config.connection_name);

        let client = async_nats::connect_with_options(self.config.server_list(), options)
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        info!(servers = %self.config.server_list(), "Connected to NATS");
        let jetstream = async_nats::jetstream::new(client.clone());
        Ok(NatsConnection { client, jetstream })
    }

    /// JetStream context of the current connection, connecting on first use
    async fn jetstream(&self) -> Result<JetStreamContext, TransportError> {
        if let Some(connection) = self.connection.read().await.as_ref() {
            return Ok(connection.jetstream.clone());
        }

        let mut guard = self.connection.write().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.jetstream.clone());
        }

        let connection = self.open().await?;
        let jetstream = connection.jetstream.clone();
        *guard = Some(connection);
        self.streams.lock().await.clear();
        Ok(jetstream)
    }

    /// Make sure the stream backing `exchange` exists
    async fn ensure_stream(
        &self,
        jetstream: &JetStreamContext,
        exchange: &str,
    ) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().await;
        if streams.contains(exchange) {
            return Ok(());
        }

        let stream_name = stream_name_for(exchange);
        let config = StreamConfig {
            name: stream_name.clone(),
            subjects: vec![exchange_wildcard(exchange)],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            duplicate_window: self.config.duplicate_window,
            num_replicas: 1,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::Unreachable(format!("stream {}: {}", stream_name, e)))?;

        debug!(stream = %stream_name, exchange, "JetStream stream ready");
        streams.insert(exchange.to_string());
        Ok(())
    }

    /// Forget the connection and every ensured stream
    async fn reset(&self) {
        let dropped = self.connection.write().await.take();
        self.streams.lock().await.clear();
        if dropped.is_some() {
            debug!("Dropped NATS connection, next send reconnects");
        }
    }

    async fn publish(
        &self,
        jetstream: &JetStreamContext,
        exchange: &str,
        routing_key: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<PublishAck, TransportError> {
        self.ensure_stream(jetstream, exchange).await?;

        let subject = subject_for(exchange, routing_key);
        let pending = jetstream
            .publish_with_headers(subject.clone(), headers, body)
            .await
            .map_err(|e| publish_error(e.kind(), e.to_string()))?;

        // The send only counts once JetStream has stored the message
        let ack = pending
            .await
            .map_err(|e| publish_error(e.kind(), e.to_string()))?;

        if ack.duplicate {
            debug!(subject = %subject, sequence = ack.sequence, "Broker reported duplicate");
        }

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    fn encode(message: &WireMessage) -> Result<(HeaderMap, Bytes), TransportError> {
        let body =
            serde_json::to_vec(message).map_err(|e| TransportError::Encoding(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            async_nats::header::NATS_MESSAGE_ID,
            message.event_id.to_string().as_str(),
        );
        headers.insert("Library-Event-Type", message.event_type.as_str());

        Ok((headers, Bytes::from(body)))
    }
}

fn publish_error(kind: PublishErrorKind, message: String) -> TransportError {
    match kind {
        PublishErrorKind::BrokenPipe => TransportError::Unreachable(message),
        _ => TransportError::Nack(message),
    }
}

#[async_trait]
impl BrokerPublisher for NatsBrokerPublisher {
    #[instrument(
        skip(self, message),
        fields(event_id = %message.event_id, event_type = %message.event_type)
    )]
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &WireMessage,
    ) -> Result<PublishAck, TransportError> {
        let (headers, body) = Self::encode(message)?;

        let jetstream = self.jetstream().await?;
        let result = self
            .publish(&jetstream, exchange, routing_key, headers, body)
            .await;

        if let Err(err) = &result {
            warn!(error = %err, exchange, "NATS send failed, resetting connection");
            self.reset().await;
        }
        result
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let state = self
            .connection
            .read()
            .await
            .as_ref()
            .map(|connection| connection.client.connection_state());

        match state {
            Some(State::Connected) => Ok(()),
            Some(state) => {
                warn!(?state, "NATS connection not ready, resetting");
                self.reset().await;
                Err(TransportError::Unreachable(format!("connection state {:?}", state)))
            }
            None => self.jetstream().await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use library_server_domain::outbox::{EventId, TransactionId, WIRE_SCHEMA_VERSION};
    use rstest::rstest;
    use serde_json::json;

    fn message() -> WireMessage {
        WireMessage {
            event_id: EventId(42),
            event_type: "BookAssigned".to_string(),
            schema_version: WIRE_SCHEMA_VERSION,
            transaction_id: TransactionId::new(),
            aggregate_id: "book-42".to_string(),
            occurred_at: Utc::now(),
            payload: json!({"reader": "alice", "book": "book-42"}),
        }
    }

    #[test]
    fn test_config_from_broker_config() {
        let broker = BrokerConfig {
            urls: vec![
                "nats://a:4222".to_string(),
                "nats://b:4222".to_string(),
            ],
            connect_timeout_secs: 3,
            connection_name: "relay-1".to_string(),
            exchange: "library.events".to_string(),
        };

        let config = NatsPublisherConfig::from(&broker);
        assert_eq!(config.server_list(), "nats://a:4222,nats://b:4222");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.connection_name, "relay-1");
    }

    #[test]
    fn test_encode_sets_message_id_header() {
        let (headers, body) = NatsBrokerPublisher::encode(&message()).unwrap();

        let id = headers.get(async_nats::header::NATS_MESSAGE_ID).unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(headers.get("Library-Event-Type").unwrap().as_str(), "BookAssigned");

        let decoded: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded["event_id"], 42);
        assert_eq!(decoded["payload"]["reader"], "alice");
    }

    #[rstest]
    #[case(PublishErrorKind::BrokenPipe, true)]
    #[case(PublishErrorKind::TimedOut, false)]
    #[case(PublishErrorKind::StreamNotFound, false)]
    fn test_publish_error_mapping(#[case] kind: PublishErrorKind, #[case] unreachable: bool) {
        let err = publish_error(kind, "broker said no".into());
        assert_eq!(matches!(err, TransportError::Unreachable(_)), unreachable);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_reset_forgets_ensured_streams() {
        let publisher = NatsBrokerPublisher::new(NatsPublisherConfig::default());
        publisher
            .streams
            .lock()
            .await
            .insert("library.events".to_string());

        publisher.reset().await;

        assert!(publisher.streams.lock().await.is_empty());
        assert!(publisher.connection.read().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let publisher = NatsBrokerPublisher::new(NatsPublisherConfig {
            urls: vec!["nats://127.0.0.1:1".to_string()],
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        });

        let err = publisher
            .send("library.events", "book.assigned", &message())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
        assert!(err.is_transient());
        assert!(publisher.health_check().await.is_err());
    }
}
