//! PostgreSQL outbox storage
//!
//! One repository type serves all three outbox ports: staging inside the
//! caller's transaction (`postgres_tx`), relay-side claiming and deletion
//! (`postgres`), and the dead-letter table (`postgres_dlq`).

pub mod postgres;
pub mod postgres_dlq;
pub mod postgres_tx;

pub use postgres::{PostgresOutboxRepository, PostgresOutboxRepositoryError, CLAIM_LOCK_KEY};
