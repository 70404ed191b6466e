//! Error taxonomy for the outbox pipeline
//!
//! - [`OutboxError`]: storage failures. Fatal to a staging transaction.
//! - [`MappingError`]: a stored row cannot be translated to the wire schema.
//!   A code defect, never retried.
//! - [`TransportError`]: the broker did not confirm a send. Transient unless
//!   the message could not be encoded.

use std::time::Duration;

use super::model::EventId;

/// Error types for outbox storage operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutboxError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Outbox event not found: {0}")]
    NotFound(EventId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction already completed")]
    TransactionCompleted,
}

impl OutboxError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for OutboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A stored event that cannot be expressed in the wire schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },
}

/// Broker-side failure of a single send
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Broker rejected message: {0}")]
    Nack(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message encoding failed: {0}")]
    Encoding(String),
}

impl TransportError {
    /// Whether a later attempt of the same message can succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Encoding(_))
    }
}

/// Relay-level failure. Send and mapping failures are handled per event and
/// never surface here; only storage failures around claim/delete/release do.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    #[error("Outbox storage failed during relay: {0}")]
    Outbox(#[from] OutboxError),
}
