//! Library server infrastructure
//!
//! Adapters behind the domain ports: PostgreSQL storage for the outbox and
//! its dead letters, a NATS JetStream broker publisher, and the long-running
//! relay loop that wakes on commit signals, `NOTIFY` and a polling tick.

pub mod messaging;
pub mod persistence;

pub use messaging::hybrid::{HybridOutboxRelay, HybridRelayConfig, PgNotifyListener};
pub use messaging::nats::{NatsBrokerPublisher, NatsPublisherConfig};
pub use persistence::outbox::{
    PostgresOutboxRepository, PostgresOutboxRepositoryError, CLAIM_LOCK_KEY,
};
pub use persistence::pool::{DatabasePool, PoolError};
pub use persistence::unit_of_work::PostgresUnitOfWork;
