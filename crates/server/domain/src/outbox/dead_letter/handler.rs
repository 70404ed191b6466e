use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{DeadLetterEntry, DeadLetterKind, DeadLetterStats};
use super::repository::DeadLetterRepository;
use crate::outbox::error::OutboxError;
use crate::outbox::model::{ClaimToken, EventId, OutboxEvent};

/// Logs and forwards dead-letter operations
#[derive(Clone)]
pub struct DeadLetterHandler {
    repository: Arc<dyn DeadLetterRepository>,
}

impl DeadLetterHandler {
    pub fn new(repository: Arc<dyn DeadLetterRepository>) -> Self {
        Self { repository }
    }

    /// Move a claimed event out of the outbox.
    ///
    /// Returns false when the lease was lost before the move.
    pub async fn dead_letter(
        &self,
        event: &OutboxEvent,
        token: ClaimToken,
        reason: &str,
        kind: DeadLetterKind,
        attempts: u32,
    ) -> Result<bool, OutboxError> {
        let entry = DeadLetterEntry::from_event(event, reason, kind, attempts);
        let moved = self.repository.move_to_dead_letter(&entry, token).await?;

        if moved {
            error!(
                event_id = %event.id,
                transaction_id = %event.transaction_id,
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                kind = %kind,
                attempts,
                reason,
                dead_letter_id = %entry.id,
                "Event moved to dead letter store"
            );
        } else {
            warn!(
                event_id = %event.id,
                kind = %kind,
                "Lease lost before dead-lettering; another relay owns the event"
            );
        }

        Ok(moved)
    }

    pub async fn resolve(
        &self,
        id: Uuid,
        notes: &str,
        resolved_by: &str,
    ) -> Result<bool, OutboxError> {
        let resolved = self.repository.resolve(id, notes, resolved_by).await?;
        if resolved {
            info!(dead_letter_id = %id, resolved_by, "Dead letter resolved");
        }
        Ok(resolved)
    }

    /// Re-stage a dead-lettered payload under a new event id
    pub async fn requeue(&self, id: Uuid) -> Result<Option<EventId>, OutboxError> {
        let event_id = self.repository.requeue(id).await?;
        if let Some(new_id) = &event_id {
            info!(dead_letter_id = %id, event_id = %new_id, "Dead letter requeued");
        }
        Ok(event_id)
    }

    pub async fn pending(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeadLetterEntry>, OutboxError> {
        self.repository.list_pending(limit, offset).await
    }

    pub async fn get_stats(&self) -> Result<DeadLetterStats, OutboxError> {
        self.repository.get_stats().await
    }

    pub async fn cleanup_resolved(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let removed = self.repository.cleanup_resolved(older_than).await?;
        if removed > 0 {
            info!(count = removed, "Cleaned up resolved dead letters");
        }
        Ok(removed)
    }
}
