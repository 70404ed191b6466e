//! PgNotifyListener - PostgreSQL LISTEN/NOTIFY wrapper
//!
//! Turns `pg_notify('outbox_events', id)` notifications, which PostgreSQL
//! delivers only after the inserting transaction committed, into
//! [`CommittedEvents`] the relay can claim directly.

use library_server_domain::outbox::EventId;
use library_server_domain::CommittedEvents;
use library_shared::event_topics::OUTBOX_NOTIFY_CHANNEL;
use sqlx::postgres::{PgListener, PgNotification};
use sqlx::PgPool;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PgNotifyListener {
    listener: PgListener,
    channel: String,
}

impl PgNotifyListener {
    /// Create a listener for a specific channel
    pub async fn new(pool: &PgPool, channel: &str) -> Result<Self, sqlx::Error> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(channel).await?;
        debug!(channel, "Listening for outbox notifications");

        Ok(Self {
            listener,
            channel: channel.to_string(),
        })
    }

    /// Listener on the channel the outbox repository notifies by default
    pub async fn for_outbox(pool: &PgPool) -> Result<Self, sqlx::Error> {
        Self::new(pool, OUTBOX_NOTIFY_CHANNEL).await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next notification.
    ///
    /// Reconnects transparently; an error means the reconnect itself failed.
    pub async fn recv(&mut self) -> Result<PgNotification, sqlx::Error> {
        self.listener.recv().await
    }

    /// Wait for the next committed outbox row.
    ///
    /// Notifications whose payload is not an event id yield an empty batch.
    pub async fn recv_committed(&mut self) -> Result<CommittedEvents, sqlx::Error> {
        let notification = self.recv().await?;
        Ok(committed_from_payload(notification.payload()))
    }
}

pub(crate) fn committed_from_payload(payload: &str) -> CommittedEvents {
    match payload.parse::<EventId>() {
        Ok(id) => CommittedEvents::untracked(vec![id]),
        Err(e) => {
            warn!(payload, error = %e, "Ignoring outbox notification with invalid payload");
            CommittedEvents::untracked(Vec::new())
        }
    }
}
