//! Library application layer
//!
//! Use cases that mutate library state and stage the matching event in the
//! same transaction.

pub mod books;

pub use books::{
    AssignBookCommand, AssignBookUseCase, BookError, BookLedger, BookMovementResponse,
    LedgerError, ReturnBookCommand, ReturnBookUseCase,
};
