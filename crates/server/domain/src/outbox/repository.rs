//! Outbox Repository Traits
//!
//! Ports for staging, claiming and deleting outbox rows. Staging goes
//! through [`OutboxRepositoryTx`] so it shares the caller's transaction;
//! everything the relay does goes through [`OutboxRepository`], each call in
//! its own short transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::OutboxError;
use super::model::{ClaimToken, EventId, OutboxEvent, OutboxEventInsert, OutboxStats, TransactionId};

/// A row leased to the caller together with the token proving the lease
pub type ClaimedEvent = (OutboxEvent, ClaimToken);

/// Transaction-aware staging
///
/// `Tx` is the storage transaction the business operation already holds.
#[async_trait]
pub trait OutboxRepositoryTx: Send + Sync {
    type Tx: Send + 'static;

    /// Insert one event inside `tx`.
    ///
    /// Must not commit or roll back `tx`. Implementations that support
    /// cross-process wake-ups schedule their notification inside `tx` so it
    /// is only delivered on commit.
    async fn insert_event_with_tx(
        &self,
        tx: &mut Self::Tx,
        transaction_id: TransactionId,
        event: &OutboxEventInsert,
    ) -> Result<EventId, OutboxError>;
}

/// Relay-side access to the outbox store
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Lease the given rows if they are claimable.
    ///
    /// A row is claimable when it has no live lease, its `next_attempt_at`
    /// has passed, and no earlier row of the same transaction is leased or
    /// backing off. Returned rows are ordered by id. Unknown ids are ignored.
    async fn claim_by_ids(
        &self,
        ids: &[EventId],
        lease: Duration,
    ) -> Result<Vec<ClaimedEvent>, OutboxError>;

    /// Lease up to `limit` claimable rows, oldest first. Concurrent callers
    /// never receive the same row.
    async fn claim_staged(
        &self,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedEvent>, OutboxError>;

    /// Push the lease of a held row to `now + lease`.
    ///
    /// Returns false when `token` no longer holds the row or the lease has
    /// already expired; an expired lease may belong to another relay by now.
    async fn renew_claim(
        &self,
        id: EventId,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<bool, OutboxError>;

    /// Delete a row after a confirmed send.
    ///
    /// Returns false when the lease was lost (expired and taken by another
    /// relay, or the row is already gone); nothing is deleted in that case.
    async fn delete_claimed(&self, id: EventId, token: ClaimToken) -> Result<bool, OutboxError>;

    /// Record a failed attempt, clear the lease and hold the row back until
    /// `next_attempt_at`.
    async fn release_failed(
        &self,
        id: EventId,
        token: ClaimToken,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError>;

    /// Clear the lease without counting an attempt
    async fn release_claim(&self, id: EventId, token: ClaimToken) -> Result<bool, OutboxError>;

    async fn find_by_id(&self, id: EventId) -> Result<Option<OutboxEvent>, OutboxError>;

    /// Rows still in storage, leased or not
    async fn count_staged(&self) -> Result<u64, OutboxError>;

    async fn get_stats(&self) -> Result<OutboxStats, OutboxError>;
}
