//! Book loans

mod assign;
mod ledger;
mod return_book;

pub use assign::{AssignBookCommand, AssignBookUseCase};
pub use ledger::{BookLedger, LedgerError};
pub use return_book::{ReturnBookCommand, ReturnBookUseCase};

use library_server_domain::outbox::{EventId, OutboxError};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMovementResponse {
    pub book: String,
    pub reader: String,
    /// Outbox id of the staged event
    pub event_id: EventId,
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), BookError> {
    if value.trim().is_empty() {
        return Err(BookError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}
