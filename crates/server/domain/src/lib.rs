//! Library server domain
//!
//! The transactional outbox and commit-gated relay that publish library
//! events if and only if the business transaction that caused them
//! committed.

pub mod events;
pub mod outbox;
pub mod transaction;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use events::{BookMovement, LibraryEvent};
pub use outbox::{
    BrokerPublisher, CommitGatedRelay, EventId, OutboxError, OutboxRecorder, OutboxRepository,
    OutboxRepositoryTx, RelayConfig, RelayReport, TransactionId,
};
pub use transaction::{
    commit_channel, CommitNotifier, CommitSignals, CommittedEvents, TransactionManager,
    TransactionScope, UnitOfWork,
};
