//! Test doubles for the outbox pipeline
//!
//! In-memory implementations of every storage port plus a scripted broker,
//! so relay behaviour can be exercised without PostgreSQL or NATS.

mod broker;
mod outbox_store;

pub use broker::{ScriptedBrokerPublisher, SendScript, SentMessage};
pub use outbox_store::{InMemoryOutboxStore, InMemoryTx};

use std::sync::{Mutex, MutexGuard};

/// A poisoned lock only means another test thread panicked; the data is
/// still usable for assertions.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
