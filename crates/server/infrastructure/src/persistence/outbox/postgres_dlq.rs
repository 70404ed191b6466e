//! PostgreSQL Dead Letter Repository
//!
//! Moving a row to `outbox_dead_letters` and deleting it from
//! `outbox_events` happen in one transaction, guarded by the claim token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use library_server_domain::outbox::{
    ClaimToken, DeadLetterEntry, DeadLetterKind, DeadLetterRepository, DeadLetterStats, EventId,
    OutboxError, OutboxEventInsert, TransactionId,
};
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

use super::postgres::{PostgresOutboxRepositoryError, RepoResult};
use super::postgres_tx::insert_outbox_row;
use super::PostgresOutboxRepository;

const DEAD_LETTER_COLUMNS: &str = "id, original_event_id, transaction_id, event_type, \
     aggregate_id, payload, metadata, reason, kind, attempts, original_created_at, moved_at, \
     resolved_at, resolved_by, resolution_notes";

#[derive(Debug, FromRow)]
struct DeadLetterRow {
    id: Uuid,
    original_event_id: i64,
    transaction_id: Uuid,
    event_type: String,
    aggregate_id: String,
    payload: Json<serde_json::Value>,
    metadata: Option<Json<serde_json::Value>>,
    reason: String,
    kind: String,
    attempts: i32,
    original_created_at: DateTime<Utc>,
    moved_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    resolution_notes: Option<String>,
}

impl TryFrom<DeadLetterRow> for DeadLetterEntry {
    type Error = PostgresOutboxRepositoryError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<DeadLetterKind>()
            .map_err(|message| PostgresOutboxRepositoryError::InvalidRow { message })?;

        Ok(DeadLetterEntry {
            id: row.id,
            original_event_id: EventId(row.original_event_id),
            transaction_id: TransactionId(row.transaction_id),
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload.0,
            metadata: row.metadata.map(|m| m.0),
            reason: row.reason,
            kind,
            attempts: row.attempts.max(0) as u32,
            original_created_at: row.original_created_at,
            moved_at: row.moved_at,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
            resolution_notes: row.resolution_notes,
        })
    }
}

impl PostgresOutboxRepository {
    async fn move_entry(&self, entry: &DeadLetterEntry, token: ClaimToken) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM outbox_events WHERE id = $1 AND claim_token = $2")
            .bind(entry.original_event_id.as_i64())
            .bind(token.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            debug!(
                event_id = %entry.original_event_id,
                "Lease lost before dead-lettering, leaving row untouched"
            );
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO outbox_dead_letters (
                id, original_event_id, transaction_id, event_type, aggregate_id, payload,
                metadata, reason, kind, attempts, original_created_at, moved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.original_event_id.as_i64())
        .bind(entry.transaction_id.0)
        .bind(&entry.event_type)
        .bind(&entry.aggregate_id)
        .bind(Json(&entry.payload))
        .bind(entry.metadata.as_ref().map(Json))
        .bind(&entry.reason)
        .bind(entry.kind.as_str())
        .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
        .bind(entry.original_created_at)
        .bind(entry.moved_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fetch_dead_letter(
        &self,
        column: &str,
        value: DeadLetterKey,
    ) -> RepoResult<Option<DeadLetterEntry>> {
        let sql = format!(
            "SELECT {} FROM outbox_dead_letters WHERE {} = $1 ORDER BY moved_at DESC LIMIT 1",
            DEAD_LETTER_COLUMNS, column
        );
        let query = sqlx::query_as::<_, DeadLetterRow>(&sql);
        let row = match value {
            DeadLetterKey::Id(id) => query.bind(id),
            DeadLetterKey::EventId(event_id) => query.bind(event_id),
        }
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeadLetterEntry::try_from).transpose()
    }

    async fn requeue_entry(&self, id: Uuid) -> RepoResult<Option<EventId>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<DeadLetterRow> = sqlx::query_as(&format!(
            "SELECT {} FROM outbox_dead_letters WHERE id = $1 AND resolved_at IS NULL FOR UPDATE",
            DEAD_LETTER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let entry = DeadLetterEntry::try_from(row)?;

        let mut insert =
            OutboxEventInsert::new(entry.event_type, entry.aggregate_id, entry.payload);
        insert.metadata = entry.metadata;

        let new_id = insert_outbox_row(
            &mut *tx,
            self.notify_channel.as_deref(),
            entry.transaction_id.0,
            &insert,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE outbox_dead_letters
            SET resolved_at = NOW(), resolved_by = 'requeue', resolution_notes = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(format!("Requeued as outbox event {}", new_id))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(dead_letter_id = %id, new_event_id = %new_id, "Dead letter requeued");
        Ok(Some(new_id))
    }
}

enum DeadLetterKey {
    Id(Uuid),
    EventId(i64),
}

#[async_trait::async_trait]
impl DeadLetterRepository for PostgresOutboxRepository {
    async fn move_to_dead_letter(
        &self,
        entry: &DeadLetterEntry,
        token: ClaimToken,
    ) -> Result<bool, OutboxError> {
        Ok(self.move_entry(entry, token).await?)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, OutboxError> {
        Ok(self.fetch_dead_letter("id", DeadLetterKey::Id(id)).await?)
    }

    async fn get_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<DeadLetterEntry>, OutboxError> {
        Ok(self
            .fetch_dead_letter("original_event_id", DeadLetterKey::EventId(event_id.as_i64()))
            .await?)
    }

    async fn list_pending(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeadLetterEntry>, OutboxError> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM outbox_dead_letters
            WHERE resolved_at IS NULL
            ORDER BY moved_at ASC
            LIMIT $1 OFFSET $2
            "#,
            DEAD_LETTER_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        rows.into_iter()
            .map(|row| DeadLetterEntry::try_from(row).map_err(OutboxError::from))
            .collect()
    }

    async fn resolve(
        &self,
        id: Uuid,
        notes: &str,
        resolved_by: &str,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_dead_letters
            SET resolved_at = NOW(), resolved_by = $2, resolution_notes = $3
            WHERE id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(id)
        .bind(resolved_by)
        .bind(notes)
        .execute(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue(&self, id: Uuid) -> Result<Option<EventId>, OutboxError> {
        Ok(self.requeue_entry(id).await?)
    }

    async fn get_stats(&self) -> Result<DeadLetterStats, OutboxError> {
        let (pending, resolved, oldest): (i64, i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE resolved_at IS NULL),
                COUNT(*) FILTER (WHERE resolved_at IS NOT NULL),
                EXTRACT(EPOCH FROM (NOW() - MIN(moved_at) FILTER (WHERE resolved_at IS NULL)))::BIGINT
            FROM outbox_dead_letters
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(DeadLetterStats {
            pending_count: pending.max(0) as u64,
            resolved_count: resolved.max(0) as u64,
            oldest_pending_age_seconds: oldest,
        })
    }

    async fn cleanup_resolved(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_dead_letters
            WHERE resolved_at IS NOT NULL
              AND resolved_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(kind: &str) -> DeadLetterRow {
        let now = Utc::now();
        DeadLetterRow {
            id: Uuid::new_v4(),
            original_event_id: 7,
            transaction_id: Uuid::new_v4(),
            event_type: "BookReturned".to_string(),
            aggregate_id: "book-7".to_string(),
            payload: Json(json!({"reader": "bob", "book": "book-7"})),
            metadata: Some(Json(json!({"correlation_id": "req-9"}))),
            reason: "Broker rejected message: stream full".to_string(),
            kind: kind.to_string(),
            attempts: 10,
            original_created_at: now,
            moved_at: now,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    #[test]
    fn test_row_maps_to_entry() {
        let entry = DeadLetterEntry::try_from(row("EXHAUSTED")).unwrap();
        assert_eq!(entry.original_event_id, EventId(7));
        assert_eq!(entry.kind, DeadLetterKind::Exhausted);
        assert_eq!(entry.attempts, 10);
        assert_eq!(entry.metadata.unwrap()["correlation_id"], "req-9");
        assert!(entry.resolved_at.is_none());
    }

    #[test]
    fn test_unknown_kind_is_invalid_row() {
        let err = DeadLetterEntry::try_from(row("MISSING")).unwrap_err();
        assert!(matches!(err, PostgresOutboxRepositoryError::InvalidRow { .. }));
    }
}
