use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::model::{DeadLetterEntry, DeadLetterStats};
use crate::outbox::error::OutboxError;
use crate::outbox::model::{ClaimToken, EventId};

/// Storage for dead-lettered events
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// Insert `entry` and delete its outbox row in one transaction.
    ///
    /// The delete is conditional on `token` still holding the lease; when it
    /// does not, nothing is written and false is returned.
    async fn move_to_dead_letter(
        &self,
        entry: &DeadLetterEntry,
        token: ClaimToken,
    ) -> Result<bool, OutboxError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, OutboxError>;

    async fn get_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<DeadLetterEntry>, OutboxError>;

    /// Unresolved entries, oldest first
    async fn list_pending(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeadLetterEntry>, OutboxError>;

    /// Mark resolved. False when the entry is unknown or already resolved.
    async fn resolve(&self, id: Uuid, notes: &str, resolved_by: &str)
        -> Result<bool, OutboxError>;

    /// Stage the payload again as a new outbox row and mark the entry
    /// resolved. Returns the new event id, or None when the entry is unknown
    /// or already resolved.
    async fn requeue(&self, id: Uuid) -> Result<Option<EventId>, OutboxError>;

    async fn get_stats(&self) -> Result<DeadLetterStats, OutboxError>;

    /// Delete resolved entries older than `older_than`
    async fn cleanup_resolved(&self, older_than: Duration) -> Result<u64, OutboxError>;
}
