//! PostgreSQL unit of work
//!
//! Hands `PgTransaction`s to the [`TransactionManager`] so that business
//! writes and outbox inserts share one transaction.
//!
//! [`TransactionManager`]: library_server_domain::TransactionManager

use library_server_domain::outbox::OutboxError;
use library_server_domain::UnitOfWork;
use sqlx::postgres::{PgPool, PgTransaction};

use super::outbox::PostgresOutboxRepositoryError;

#[derive(Debug, Clone)]
pub struct PostgresUnitOfWork {
    pool: PgPool,
}

impl PostgresUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Tx = PgTransaction<'static>;

    async fn begin(&self) -> Result<Self::Tx, OutboxError> {
        self.pool
            .begin()
            .await
            .map_err(|e| PostgresOutboxRepositoryError::from(e).into())
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), OutboxError> {
        tx.commit()
            .await
            .map_err(|e| PostgresOutboxRepositoryError::from(e).into())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), OutboxError> {
        tx.rollback()
            .await
            .map_err(|e| PostgresOutboxRepositoryError::from(e).into())
    }
}
