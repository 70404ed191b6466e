//! Transactional outbox
//!
//! Business operations stage events with the [`OutboxRecorder`] inside their
//! own transaction; the [`CommitGatedRelay`] forwards committed rows to a
//! [`BrokerPublisher`] and deletes them once the broker confirmed.

pub mod backoff;
pub mod dead_letter;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod model;
pub mod publisher;
pub mod recorder;
pub mod relay;
pub mod repository;

pub use backoff::BackoffConfig;
pub use dead_letter::{
    DeadLetterEntry, DeadLetterHandler, DeadLetterKind, DeadLetterRepository, DeadLetterStats,
};
pub use error::{MappingError, OutboxError, RelayError, TransportError};
pub use mapping::{EventMapper, LibraryEventMapper, OutboundMessage, WireMessage, WIRE_SCHEMA_VERSION};
pub use metrics::{RelayMetrics, RelayMetricsSnapshot};
pub use model::{
    Claim, ClaimToken, EventId, OutboxEvent, OutboxEventInsert, OutboxStats, RelayState,
    TransactionId,
};
pub use publisher::{BrokerPublisher, PublishAck};
pub use recorder::OutboxRecorder;
pub use relay::{CommitGatedRelay, RelayConfig, RelayReport};
pub use repository::{ClaimedEvent, OutboxRepository, OutboxRepositoryTx};
