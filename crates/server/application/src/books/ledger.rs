use async_trait::async_trait;

/// Persistence of loans, owned elsewhere. Only its transactional contract
/// matters here: every call runs inside the caller's transaction.
#[async_trait]
pub trait BookLedger: Send + Sync {
    type Tx: Send + 'static;

    async fn assign(&self, tx: &mut Self::Tx, book: &str, reader: &str)
        -> Result<(), LedgerError>;

    async fn release(&self, tx: &mut Self::Tx, book: &str, reader: &str)
        -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Book {book} is already assigned to {holder}")]
    BookUnavailable { book: String, holder: String },

    #[error("Book {book} is not assigned to {reader}")]
    NotBorrowed { book: String, reader: String },

    #[error("Ledger storage error: {0}")]
    Storage(String),
}
