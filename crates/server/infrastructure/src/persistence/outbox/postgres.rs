//! PostgreSQL Outbox Repository
//!
//! SQLx-based implementation of [`OutboxRepository`]. Every relay-side call
//! runs as its own short transaction; leases are enforced with a claim token
//! and an expiry column rather than with long-held row locks.
//!
//! Claims are serialised on a transaction-scoped advisory lock. The sibling
//! guard in the claim query reads earlier rows of a transaction without
//! locking them, so two overlapping claims could otherwise each miss the
//! other's uncommitted lease and split one transaction across two relays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use library_server_domain::outbox::{
    Claim, ClaimToken, ClaimedEvent, EventId, OutboxError, OutboxEvent, OutboxRepository,
    OutboxStats, TransactionId,
};
use library_shared::event_topics::OUTBOX_NOTIFY_CHANNEL;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

/// Error type specific to the PostgreSQL outbox repository
#[derive(Debug, thiserror::Error)]
pub enum PostgresOutboxRepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid row: {message}")]
    InvalidRow { message: String },
}

impl From<PostgresOutboxRepositoryError> for OutboxError {
    fn from(err: PostgresOutboxRepositoryError) -> Self {
        match err {
            PostgresOutboxRepositoryError::Database(e) => OutboxError::storage(e.to_string()),
            PostgresOutboxRepositoryError::Serialization(e) => e.into(),
            PostgresOutboxRepositoryError::InvalidRow { message } => OutboxError::storage(message),
        }
    }
}

pub(crate) type RepoResult<T> = Result<T, PostgresOutboxRepositoryError>;

pub(crate) const EVENT_COLUMNS: &str = "id, transaction_id, event_type, aggregate_id, payload, \
     metadata, created_at, attempts, last_error, next_attempt_at, claim_token, claimed_until";

/// Advisory lock key held while a claim statement runs
pub const CLAIM_LOCK_KEY: i64 = 0x4c49_4252_4f55_5458;

/// Leases claimable rows in one statement.
///
/// A row is skipped when its lease is live, it is backing off, or an earlier
/// row of the same transaction is in either state. `SKIP LOCKED` keeps
/// concurrent relays from blocking on, or double-claiming, the same row.
const CLAIM_SQL: &str = r#"
    WITH claimable AS (
        SELECT e.id
        FROM outbox_events e
        WHERE (e.claimed_until IS NULL OR e.claimed_until <= NOW())
          AND e.next_attempt_at <= NOW()
          AND ($4::BIGINT[] IS NULL OR e.id = ANY($4))
          AND NOT EXISTS (
              SELECT 1
              FROM outbox_events earlier
              WHERE earlier.transaction_id = e.transaction_id
                AND earlier.id < e.id
                AND (earlier.claimed_until > NOW() OR earlier.next_attempt_at > NOW())
          )
        ORDER BY e.id
        LIMIT $3
        FOR UPDATE OF e SKIP LOCKED
    )
    UPDATE outbox_events AS o
    SET claim_token = $1,
        claimed_until = NOW() + make_interval(secs => $2)
    FROM claimable
    WHERE o.id = claimable.id
    RETURNING o.id, o.transaction_id, o.event_type, o.aggregate_id, o.payload, o.metadata,
              o.created_at, o.attempts, o.last_error, o.next_attempt_at, o.claim_token,
              o.claimed_until
"#;

#[derive(Debug, FromRow)]
pub(crate) struct OutboxEventRow {
    id: i64,
    transaction_id: Uuid,
    event_type: String,
    aggregate_id: String,
    payload: Json<serde_json::Value>,
    metadata: Option<Json<serde_json::Value>>,
    created_at: DateTime<Utc>,
    attempts: i32,
    last_error: Option<String>,
    next_attempt_at: DateTime<Utc>,
    claim_token: Option<Uuid>,
    claimed_until: Option<DateTime<Utc>>,
}

impl From<OutboxEventRow> for OutboxEvent {
    fn from(row: OutboxEventRow) -> Self {
        let claim = match (row.claim_token, row.claimed_until) {
            (Some(token), Some(claimed_until)) => Some(Claim {
                token: ClaimToken(token),
                claimed_until,
            }),
            _ => None,
        };

        OutboxEvent {
            id: EventId(row.id),
            transaction_id: TransactionId(row.transaction_id),
            event_type: row.event_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload.0,
            metadata: row.metadata.map(|m| m.0),
            created_at: row.created_at,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            next_attempt_at: row.next_attempt_at,
            claim,
        }
    }
}

/// PostgreSQL implementation of the outbox ports
#[derive(Debug, Clone)]
pub struct PostgresOutboxRepository {
    pub(crate) pool: PgPool,
    pub(crate) notify_channel: Option<String>,
}

impl PostgresOutboxRepository {
    /// Repository that raises `NOTIFY outbox_events` for every staged row
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify_channel: Some(OUTBOX_NOTIFY_CHANNEL.to_string()),
        }
    }

    /// Use a different notification channel, or none at all
    pub fn with_notify_channel(mut self, channel: Option<String>) -> Self {
        self.notify_channel = channel;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn notify_channel(&self) -> Option<&str> {
        self.notify_channel.as_deref()
    }

    /// Create the outbox and dead-letter tables if they do not exist
    pub async fn run_migrations(&self) -> RepoResult<()> {
        // sqlx::query instead of query! to avoid offline requirements
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id BIGSERIAL PRIMARY KEY,
                transaction_id UUID NOT NULL,
                event_type VARCHAR(100) NOT NULL,
                aggregate_id VARCHAR(255) NOT NULL,
                payload JSONB NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                claim_token UUID,
                claimed_until TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_events_next_attempt
            ON outbox_events(next_attempt_at, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_events_transaction
            ON outbox_events(transaction_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_dead_letters (
                id UUID PRIMARY KEY,
                original_event_id BIGINT NOT NULL,
                transaction_id UUID NOT NULL,
                event_type VARCHAR(100) NOT NULL,
                aggregate_id VARCHAR(255) NOT NULL,
                payload JSONB NOT NULL,
                metadata JSONB,
                reason TEXT NOT NULL,
                kind VARCHAR(20) NOT NULL CHECK (kind IN ('MAPPING', 'TRANSPORT', 'EXHAUSTED')),
                attempts INTEGER NOT NULL,
                original_created_at TIMESTAMPTZ NOT NULL,
                moved_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                resolved_at TIMESTAMPTZ,
                resolved_by VARCHAR(255),
                resolution_notes TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_dead_letters_pending
            ON outbox_dead_letters(moved_at)
            WHERE resolved_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_dead_letters_event
            ON outbox_dead_letters(original_event_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim(
        &self,
        ids: Option<Vec<i64>>,
        limit: usize,
        lease: Duration,
    ) -> RepoResult<Vec<ClaimedEvent>> {
        let token = ClaimToken::new();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        // Taken before the claim statement, so its snapshot already includes
        // the leases of every claim that held the lock before us
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CLAIM_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let rows: Vec<OutboxEventRow> = sqlx::query_as(CLAIM_SQL)
            .bind(token.0)
            .bind(lease.as_secs_f64())
            .bind(limit)
            .bind(ids)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut claimed: Vec<ClaimedEvent> = rows
            .into_iter()
            .map(|row| (OutboxEvent::from(row), token))
            .collect();
        // RETURNING carries no order guarantee
        claimed.sort_by_key(|(event, _)| event.id);

        if !claimed.is_empty() {
            debug!(count = claimed.len(), token = %token, "Claimed outbox rows");
        }
        Ok(claimed)
    }

    async fn release(
        &self,
        id: EventId,
        token: ClaimToken,
        failure: Option<(&str, DateTime<Utc>)>,
    ) -> RepoResult<bool> {
        let result = match failure {
            Some((error, next_attempt_at)) => {
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET attempts = attempts + 1,
                        last_error = $3,
                        next_attempt_at = $4,
                        claim_token = NULL,
                        claimed_until = NULL
                    WHERE id = $1 AND claim_token = $2
                    "#,
                )
                .bind(id.as_i64())
                .bind(token.0)
                .bind(error)
                .bind(next_attempt_at)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE outbox_events
                    SET claim_token = NULL, claimed_until = NULL
                    WHERE id = $1 AND claim_token = $2
                    "#,
                )
                .bind(id.as_i64())
                .bind(token.0)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn claim_by_ids(
        &self,
        ids: &[EventId],
        lease: Duration,
    ) -> Result<Vec<ClaimedEvent>, OutboxError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<i64> = ids.iter().map(EventId::as_i64).collect();
        let limit = raw.len();
        Ok(self.claim(Some(raw), limit, lease).await?)
    }

    async fn claim_staged(
        &self,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedEvent>, OutboxError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.claim(None, limit, lease).await?)
    }

    async fn renew_claim(
        &self,
        id: EventId,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_until = NOW() + make_interval(secs => $3)
            WHERE id = $1 AND claim_token = $2 AND claimed_until > NOW()
            "#,
        )
        .bind(id.as_i64())
        .bind(token.0)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_claimed(&self, id: EventId, token: ClaimToken) -> Result<bool, OutboxError> {
        let result = sqlx::query("DELETE FROM outbox_events WHERE id = $1 AND claim_token = $2")
            .bind(id.as_i64())
            .bind(token.0)
            .execute(&self.pool)
            .await
            .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_failed(
        &self,
        id: EventId,
        token: ClaimToken,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        Ok(self
            .release(id, token, Some((error, next_attempt_at)))
            .await?)
    }

    async fn release_claim(&self, id: EventId, token: ClaimToken) -> Result<bool, OutboxError> {
        Ok(self.release(id, token, None).await?)
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<OutboxEvent>, OutboxError> {
        let row: Option<OutboxEventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM outbox_events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(row.map(OutboxEvent::from))
    }

    async fn count_staged(&self) -> Result<u64, OutboxError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events")
            .fetch_one(&self.pool)
            .await
            .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(count.max(0) as u64)
    }

    async fn get_stats(&self) -> Result<OutboxStats, OutboxError> {
        let (staged, claimed, retrying, oldest): (i64, i64, i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE claimed_until IS NULL OR claimed_until <= NOW()),
                COUNT(*) FILTER (WHERE claimed_until > NOW()),
                COUNT(*) FILTER (WHERE attempts > 0),
                EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT
            FROM outbox_events
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(PostgresOutboxRepositoryError::from)?;

        Ok(OutboxStats {
            staged_count: staged.max(0) as u64,
            claimed_count: claimed.max(0) as u64,
            retrying_count: retrying.max(0) as u64,
            oldest_staged_age_seconds: oldest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(claim_token: Option<Uuid>, claimed_until: Option<DateTime<Utc>>) -> OutboxEventRow {
        let now = Utc::now();
        OutboxEventRow {
            id: 42,
            transaction_id: Uuid::new_v4(),
            event_type: "BookAssigned".to_string(),
            aggregate_id: "book-42".to_string(),
            payload: Json(json!({"reader": "alice", "book": "book-42"})),
            metadata: None,
            created_at: now,
            attempts: 2,
            last_error: Some("timeout".to_string()),
            next_attempt_at: now,
            claim_token,
            claimed_until,
        }
    }

    #[test]
    fn test_row_without_lease_maps_to_unclaimed_event() {
        let event = OutboxEvent::from(row(None, None));
        assert_eq!(event.id, EventId(42));
        assert_eq!(event.attempts, 2);
        assert_eq!(event.payload["reader"], "alice");
        assert!(event.claim.is_none());
    }

    #[test]
    fn test_row_with_lease_maps_claim() {
        let token = Uuid::new_v4();
        let until = Utc::now() + chrono::Duration::seconds(30);
        let event = OutboxEvent::from(row(Some(token), Some(until)));

        let claim = event.claim.unwrap();
        assert_eq!(claim.token, ClaimToken(token));
        assert_eq!(claim.claimed_until, until);
    }

    #[test]
    fn test_half_written_lease_is_ignored() {
        let event = OutboxEvent::from(row(Some(Uuid::new_v4()), None));
        assert!(event.claim.is_none());
    }

    #[test]
    fn test_database_error_becomes_storage_error() {
        let err: OutboxError = PostgresOutboxRepositoryError::from(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, OutboxError::Storage { .. }));
    }
}
