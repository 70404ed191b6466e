// UC: A reader returns a book

use std::sync::Arc;

use library_server_domain::events::LibraryEvent;
use library_server_domain::outbox::{OutboxRecorder, OutboxRepositoryTx};
use library_server_domain::transaction::{TransactionManager, UnitOfWork};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{require, BookError, BookLedger, BookMovementResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnBookCommand {
    pub book: String,
    pub reader: String,
}

pub struct ReturnBookUseCase<U, L, R>
where
    U: UnitOfWork,
    L: BookLedger<Tx = U::Tx>,
    R: OutboxRepositoryTx<Tx = U::Tx>,
{
    transactions: TransactionManager<U>,
    ledger: Arc<L>,
    recorder: Arc<OutboxRecorder<R>>,
}

impl<U, L, R> ReturnBookUseCase<U, L, R>
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

    pub async fn execute(
        &self,
        command: ReturnBookCommand,
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
                        .release(scope.tx_mut(), &command.book, &command.reader)
                        .await?;

                    let event = LibraryEvent::book_returned(&command.reader, &command.book);
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
            "Book returned"
        );
        Ok(response)
    }
}
