//! Transaction Manager
//!
//! Runs a business operation and the outbox rows it stages inside one
//! storage transaction, and signals the relay only after that transaction
//! has committed.
//!
//! ```text
//! BEGIN;
//!   UPDATE ...business state...;
//!   INSERT INTO outbox_events (...) RETURNING id;   -- record_event
//! COMMIT;
//! -> CommittedEvents { transaction_id, event_ids }  -- never on ROLLBACK
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::outbox::{EventId, OutboxError, TransactionId};

/// Port over the storage transaction lifecycle
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Tx: Send + 'static;

    async fn begin(&self) -> Result<Self::Tx, OutboxError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), OutboxError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), OutboxError>;
}

/// An open transaction plus the events staged in it so far
pub struct TransactionScope<Tx> {
    transaction_id: TransactionId,
    tx: Tx,
    staged: Vec<EventId>,
}

impl<Tx> TransactionScope<Tx> {
    pub fn new(tx: Tx) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            tx,
            staged: Vec::new(),
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn tx_mut(&mut self) -> &mut Tx {
        &mut self.tx
    }

    /// Events staged in this transaction, in staging order
    pub fn staged_events(&self) -> &[EventId] {
        &self.staged
    }

    pub(crate) fn push_staged(&mut self, id: EventId) {
        self.staged.push(id);
    }

    pub(crate) fn into_parts(self) -> (Tx, TransactionId, Vec<EventId>) {
        (self.tx, self.transaction_id, self.staged)
    }
}

/// Ids staged by one committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEvents {
    pub transaction_id: Option<TransactionId>,
    pub event_ids: Vec<EventId>,
}

impl CommittedEvents {
    pub fn new(transaction_id: TransactionId, event_ids: Vec<EventId>) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            event_ids,
        }
    }

    /// Ids learnt from a channel that does not carry the transaction
    pub fn untracked(event_ids: Vec<EventId>) -> Self {
        Self {
            transaction_id: None,
            event_ids,
        }
    }
}

/// Sending half of the post-commit signal
#[derive(Debug, Clone)]
pub struct CommitNotifier {
    sender: mpsc::UnboundedSender<CommittedEvents>,
}

/// Receiving half, owned by the relay loop
#[derive(Debug)]
pub struct CommitSignals {
    receiver: mpsc::UnboundedReceiver<CommittedEvents>,
}

/// Create a connected notifier/receiver pair
pub fn commit_channel() -> (CommitNotifier, CommitSignals) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (CommitNotifier { sender }, CommitSignals { receiver })
}

impl CommitNotifier {
    /// Signal committed events. Never blocks; a lost signal is recovered by
    /// the relay's sweep.
    pub fn notify(&self, events: CommittedEvents) {
        if events.event_ids.is_empty() {
            return;
        }
        if let Err(err) = self.sender.send(events) {
            debug!(
                event_count = err.0.event_ids.len(),
                "Commit signal receiver dropped, staged events left for sweep"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl CommitSignals {
    pub async fn recv(&mut self) -> Option<CommittedEvents> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CommittedEvents> {
        self.receiver.try_recv().ok()
    }
}

/// Runs operations in a transaction and emits commit signals
pub struct TransactionManager<U: UnitOfWork> {
    unit_of_work: Arc<U>,
    notifier: CommitNotifier,
}

impl<U: UnitOfWork> Clone for TransactionManager<U> {
    fn clone(&self) -> Self {
        Self {
            unit_of_work: self.unit_of_work.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<U: UnitOfWork> TransactionManager<U> {
    pub fn new(unit_of_work: Arc<U>, notifier: CommitNotifier) -> Self {
        Self {
            unit_of_work,
            notifier,
        }
    }

    /// Execute an operation within a transaction.
    ///
    /// - `Ok`: commit, then notify the staged ids (if any).
    /// - `Err`: roll back; nothing is notified and staged rows vanish.
    /// - Commit failure: returned as [`OutboxError::Storage`], nothing notified.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut TransactionScope<U::Tx>) -> BoxFuture<'a, Result<T, E>> + Send,
        T: Send,
        E: From<OutboxError> + Send,
    {
        let tx = self.unit_of_work.begin().await?;
        let mut scope = TransactionScope::new(tx);

        let outcome = operation(&mut scope).await;
        let (tx, transaction_id, staged) = scope.into_parts();

        match outcome {
            Ok(value) => {
                self.unit_of_work.commit(tx).await?;
                if !staged.is_empty() {
                    debug!(
                        transaction_id = %transaction_id,
                        event_count = staged.len(),
                        "Transaction committed with staged events"
                    );
                    self.notifier
                        .notify(CommittedEvents::new(transaction_id, staged));
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.unit_of_work.rollback(tx).await {
                    warn!(
                        transaction_id = %transaction_id,
                        error = %rollback_err,
                        "Rollback failed; storage discards the transaction on disconnect"
                    );
                }
                Err(err)
            }
        }
    }
}
