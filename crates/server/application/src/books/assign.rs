// UC: Assign a book to a reader

use std::sync::Arc;

use library_server_domain::events::LibraryEvent;
use library_server_domain::outbox::{OutboxRecorder, OutboxRepositoryTx};
use library_server_domain::transaction::{TransactionManager, UnitOfWork};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{require, BookError, BookLedger, BookMovementResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignBookCommand {
    pub book: String,
    pub reader: String,
}

pub struct AssignBookUseCase<U, L, R>
where
    U: UnitOfWork,
    L: BookLedger<Tx = U::Tx>,
    R: OutboxRepositoryTx<Tx = U::Tx>,
{
    transactions: TransactionManager<U>,
    ledger: Arc<L>,
    recorder: Arc<OutboxRecorder<R>>,
}

impl<U, L, R> AssignBookUseCase<U, L, R>
where
    U: UnitOfWork,
    L: BookLedger<Tx = U::Tx> + 'static,
    R: OutboxRepositoryTx<Tx = U::Tx> + 'static,
{
    pub fn new(
        transactions: TransactionManager<U>,
        ledger: Arc<L>,
        recorder: Arc<OutboxRecorder<R>>,
    ) -> Self {
        Self {
            transactions,
            ledger,
            recorder,
        }
    }

    /// Record the loan and stage `BookAssigned` in one transaction. The
    /// outcome never depends on broker availability.
    pub async fn execute(
        &self,
        command: AssignBookCommand,
    ) -> Result<BookMovementResponse, BookError> {
        require("book", &command.book)?;
        require("reader", &command.reader)?;

        let ledger = self.ledger.clone();
        let recorder = self.recorder.clone();

        let response = self
            .transactions
            .execute(move |scope| {
                Box::pin(async move {
                    ledger
                        .assign(scope.tx_mut(), &command.book, &command.reader)
                        .await?;

                    let event = LibraryEvent::book_assigned(&command.reader, &command.book);
                    let event_id = recorder.record(scope, &event).await?;

                    Ok::<_, BookError>(BookMovementResponse {
                        book: command.book,
                        reader: command.reader,
                        event_id,
                    })
                })
            })
            .await?;

        info!(
            book = %response.book,
            reader = %response.reader,
            event_id = %response.event_id,
            "Book assigned"
        );
        Ok(response)
    }
}
