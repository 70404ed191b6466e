//! Library domain events
//!
//! Immutable facts produced by business operations. Each event is staged in
//! the outbox as an event-type discriminator plus a JSON payload and is
//! reconstructed from those two parts when relayed.

use serde::{Deserialize, Serialize};

use crate::outbox::{MappingError, OutboxError, OutboxEventInsert};

/// Discriminator stored for [`LibraryEvent::BookAssigned`]
pub const BOOK_ASSIGNED: &str = "BookAssigned";
/// Discriminator stored for [`LibraryEvent::BookReturned`]
pub const BOOK_RETURNED: &str = "BookReturned";

/// Who moved which book. Fields may be added, never repurposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMovement {
    pub reader: String,
    pub book: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    /// A book was handed to a reader
    BookAssigned(BookMovement),
    /// A reader gave a book back
    BookReturned(BookMovement),
}

impl LibraryEvent {
    pub fn book_assigned(reader: impl Into<String>, book: impl Into<String>) -> Self {
        Self::BookAssigned(BookMovement {
            reader: reader.into(),
            book: book.into(),
        })
    }

    pub fn book_returned(reader: impl Into<String>, book: impl Into<String>) -> Self {
        Self::BookReturned(BookMovement {
            reader: reader.into(),
            book: book.into(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LibraryEvent::BookAssigned(_) => BOOK_ASSIGNED,
            LibraryEvent::BookReturned(_) => BOOK_RETURNED,
        }
    }

    fn movement(&self) -> &BookMovement {
        match self {
            LibraryEvent::BookAssigned(m) | LibraryEvent::BookReturned(m) => m,
        }
    }

    /// The book is the aggregate every library event is about
    pub fn aggregate_id(&self) -> &str {
        &self.movement().book
    }

    pub fn to_outbox_insert(&self) -> Result<OutboxEventInsert, OutboxError> {
        let payload = serde_json::to_value(self.movement())?;
        Ok(OutboxEventInsert::new(
            self.event_type(),
            self.aggregate_id(),
            payload,
        ))
    }

    /// Rebuild a typed event from its stored discriminator and payload
    pub fn from_parts(
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Self, MappingError> {
        let movement = || {
            serde_json::from_value::<BookMovement>(payload.clone()).map_err(|e| {
                MappingError::InvalidPayload {
                    event_type: event_type.to_string(),
                    reason: e.to_string(),
                }
            })
        };

        match event_type {
            BOOK_ASSIGNED => Ok(LibraryEvent::BookAssigned(movement()?)),
            BOOK_RETURNED => Ok(LibraryEvent::BookReturned(movement()?)),
            other => Err(MappingError::UnknownEventType(other.to_string())),
        }
    }
}
