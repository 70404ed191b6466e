//! Outbox Recorder
//!
//! Called by business services inside their own transaction. Staging is
//! part of the business unit of work: if the insert fails, the error
//! propagates and the caller's transaction aborts.

use std::sync::Arc;

use tracing::{debug, error};

use super::error::OutboxError;
use super::model::{EventId, OutboxEventInsert};
use super::repository::OutboxRepositoryTx;
use crate::events::LibraryEvent;
use crate::transaction::TransactionScope;

pub struct OutboxRecorder<R: OutboxRepositoryTx> {
    repository: Arc<R>,
}

impl<R: OutboxRepositoryTx> OutboxRecorder<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Stage an event in the caller's transaction.
    ///
    /// The returned id is also appended to the scope so the transaction
    /// manager can announce it once the transaction commits. Never commits
    /// or rolls back.
    pub async fn record_event(
        &self,
        scope: &mut TransactionScope<R::Tx>,
        event: OutboxEventInsert,
    ) -> Result<EventId, OutboxError> {
        let transaction_id = scope.transaction_id();

        let id = self
            .repository
            .insert_event_with_tx(scope.tx_mut(), transaction_id, &event)
            .await
            .map_err(|e| {
                error!(
                    transaction_id = %transaction_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to stage outbox event"
                );
                e
            })?;

        scope.push_staged(id);

        debug!(
            event_id = %id,
            transaction_id = %transaction_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "Outbox event staged"
        );

        Ok(id)
    }

    /// Stage a typed library event
    pub async fn record(
        &self,
        scope: &mut TransactionScope<R::Tx>,
        event: &LibraryEvent,
    ) -> Result<EventId, OutboxError> {
        let insert = event.to_outbox_insert()?;
        self.record_event(scope, insert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxRepository;
    use crate::testing::InMemoryOutboxStore;
    use crate::transaction::UnitOfWork;

    #[tokio::test]
    async fn test_record_appends_to_scope_and_is_invisible_until_commit() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let recorder = OutboxRecorder::new(store.clone());

        let tx = store.begin().await.unwrap();
        let mut scope = TransactionScope::new(tx);

        let event = LibraryEvent::book_assigned("alice", "book-42");
        let id = recorder.record(&mut scope, &event).await.unwrap();

        assert_eq!(scope.staged_events(), &[id]);
        // Uncommitted: the relay side cannot see it
        assert!(store.find_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_never_reused_after_rollback() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let recorder = OutboxRecorder::new(store.clone());
        let event = LibraryEvent::book_returned("alice", "book-42");

        let mut rolled_back = TransactionScope::new(store.begin().await.unwrap());
        let first = recorder.record(&mut rolled_back, &event).await.unwrap();
        let (tx, _, _) = rolled_back.into_parts();
        store.rollback(tx).await.unwrap();

        let mut committed = TransactionScope::new(store.begin().await.unwrap());
        let second = recorder.record(&mut committed, &event).await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_insert_failure_propagates() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store.fail_next_insert();
        let recorder = OutboxRecorder::new(store.clone());

        let mut scope = TransactionScope::new(store.begin().await.unwrap());
        let err = recorder
            .record(&mut scope, &LibraryEvent::book_assigned("alice", "book-42"))
            .await
            .unwrap_err();

        assert!(matches!(err, OutboxError::Storage { .. }));
        assert!(scope.staged_events().is_empty());
    }
}
