//! Transactional Outbox Repository Implementation
//!
//! Stages events inside the caller's `PgTransaction`. The `NOTIFY` is issued
//! in the same transaction, so PostgreSQL only delivers it on commit.

use library_server_domain::outbox::{
    EventId, OutboxError, OutboxEventInsert, OutboxRepositoryTx, TransactionId,
};
use sqlx::postgres::{PgConnection, PgTransaction};
use sqlx::types::Json;
use tracing::trace;
use uuid::Uuid;

use super::postgres::RepoResult;
use super::PostgresOutboxRepository;

/// Insert one outbox row on `conn` and schedule its notification.
///
/// Shared by staging and dead-letter requeue.
pub(crate) async fn insert_outbox_row(
    conn: &mut PgConnection,
    notify_channel: Option<&str>,
    transaction_id: Uuid,
    event: &OutboxEventInsert,
) -> RepoResult<EventId> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO outbox_events (transaction_id, event_type, aggregate_id, payload, metadata)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(transaction_id)
    .bind(&event.event_type)
    .bind(&event.aggregate_id)
    .bind(Json(&event.payload))
    .bind(event.metadata.as_ref().map(Json))
    .fetch_one(&mut *conn)
    .await?;

    if let Some(channel) = notify_channel {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
    }

    trace!(event_id = id, event_type = %event.event_type, "Outbox row inserted");
    Ok(EventId(id))
}

#[async_trait::async_trait]
impl OutboxRepositoryTx for PostgresOutboxRepository {
    type Tx = PgTransaction<'static>;

    async fn insert_event_with_tx(
        &self,
        tx: &mut PgTransaction<'static>,
        transaction_id: TransactionId,
        event: &OutboxEventInsert,
    ) -> Result<EventId, OutboxError> {
        insert_outbox_row(
            &mut **tx,
            self.notify_channel.as_deref(),
            transaction_id.0,
            event,
        )
        .await
        .map_err(OutboxError::from)
    }
}
