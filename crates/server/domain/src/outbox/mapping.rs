//! Wire mapping
//!
//! Pure translation from a stored outbox row to the message downstream
//! consumers receive. The wire schema is an external contract: fields are
//! only ever added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use library_shared::event_topics::book_routes;

use super::error::MappingError;
use super::model::{EventId, OutboxEvent, TransactionId};
use crate::events::LibraryEvent;

/// Current wire schema version
pub const WIRE_SCHEMA_VERSION: u32 = 1;

/// Message body published to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Consumers deduplicate on this
    pub event_id: EventId,
    pub event_type: String,
    pub schema_version: u32,
    pub transaction_id: TransactionId,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// A mapped message together with its destination
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: WireMessage,
}

/// Maps stored rows to outbound messages. Must be side-effect free.
pub trait EventMapper: Send + Sync {
    fn map(&self, event: &OutboxEvent) -> Result<OutboundMessage, MappingError>;
}

/// Mapper for [`LibraryEvent`] rows
#[derive(Debug, Clone)]
pub struct LibraryEventMapper {
    exchange: String,
}

impl LibraryEventMapper {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(event: &LibraryEvent) -> &'static str {
        match event {
            LibraryEvent::BookAssigned(_) => book_routes::ASSIGNED,
            LibraryEvent::BookReturned(_) => book_routes::RETURNED,
        }
    }
}

impl Default for LibraryEventMapper {
    fn default() -> Self {
        Self::new(library_shared::event_topics::DEFAULT_EXCHANGE)
    }
}

impl EventMapper for LibraryEventMapper {
    fn map(&self, event: &OutboxEvent) -> Result<OutboundMessage, MappingError> {
        // Validates the payload against the typed event before anything is sent
        let typed = LibraryEvent::from_parts(&event.event_type, &event.payload)?;

        Ok(OutboundMessage {
            exchange: self.exchange.clone(),
            routing_key: Self::routing_key(&typed).to_string(),
            message: WireMessage {
                event_id: event.id,
                event_type: event.event_type.clone(),
                schema_version: WIRE_SCHEMA_VERSION,
                transaction_id: event.transaction_id,
                aggregate_id: event.aggregate_id.clone(),
                occurred_at: event.created_at,
                payload: event.payload.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(event_type: &str, payload: serde_json::Value) -> OutboxEvent {
        let now = Utc::now();
        OutboxEvent {
            id: EventId(5),
            transaction_id: TransactionId::new(),
            event_type: event_type.to_string(),
            aggregate_id: "book-42".to_string(),
            payload,
            metadata: None,
            created_at: now,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            claim: None,
        }
    }

    #[test]
    fn test_maps_assigned_to_routing_key() {
        let mapper = LibraryEventMapper::default();
        let out = mapper
            .map(&row("BookAssigned", json!({"reader": "alice", "book": "book-42"})))
            .unwrap();

        assert_eq!(out.exchange, "library.events");
        assert_eq!(out.routing_key, "book.assigned");
        assert_eq!(out.message.event_id, EventId(5));
        assert_eq!(out.message.schema_version, 1);
        assert_eq!(out.message.payload["reader"], "alice");
    }

    #[test]
    fn test_maps_returned_on_custom_exchange() {
        let mapper = LibraryEventMapper::new("catalog.events");
        let out = mapper
            .map(&row("BookReturned", json!({"reader": "bob", "book": "book-1"})))
            .unwrap();

        assert_eq!(out.exchange, "catalog.events");
        assert_eq!(out.routing_key, "book.returned");
    }

    #[test]
    fn test_unknown_type_is_mapping_error() {
        let mapper = LibraryEventMapper::default();
        let err = mapper.map(&row("ShelfMoved", json!({}))).unwrap_err();
        assert!(matches!(err, MappingError::UnknownEventType(_)));
    }

    #[test]
    fn test_wire_message_json_shape() {
        let mapper = LibraryEventMapper::default();
        let out = mapper
            .map(&row("BookAssigned", json!({"reader": "alice", "book": "book-42"})))
            .unwrap();

        let value = serde_json::to_value(&out.message).unwrap();
        assert_eq!(value["event_id"], 5);
        assert_eq!(value["event_type"], "BookAssigned");
        assert!(value["transaction_id"].is_string());
        assert!(value["occurred_at"].is_string());
    }
}
