//! Commit-Gated Relay
//!
//! Moves committed outbox rows to the broker:
//!
//! ```text
//! STAGED ──claim──> PUBLISHING ──send ok──> delete (PUBLISHED)
//!    ^                   │
//!    └── release_failed ─┘  transient failure, backoff
//!                        └──> dead letter   mapping / encoding / attempts exhausted
//! ```
//!
//! Two triggers feed the same processing path: [`CommitGatedRelay::on_transaction_committed`]
//! for the post-commit fast path, and [`CommitGatedRelay::sweep`] as the durable
//! fallback that finds rows whose notification was lost. A row is deleted only
//! after the broker confirmed it, so delivery is at-least-once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::backoff::BackoffConfig;
use super::dead_letter::{DeadLetterHandler, DeadLetterKind, DeadLetterRepository};
use super::error::{RelayError, TransportError};
use super::mapping::EventMapper;
use super::metrics::RelayMetrics;
use super::model::{ClaimToken, OutboxEvent, TransactionId};
use super::publisher::BrokerPublisher;
use super::repository::{ClaimedEvent, OutboxRepository};
use crate::transaction::CommittedEvents;

/// Relay tuning
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Rows claimed per sweep
    pub batch_size: usize,
    /// Exclusive window of a claim, renewed before every send; must
    /// exceed `send_timeout`
    pub lease_duration: Duration,
    /// A send that has not been confirmed by then counts as failed
    pub send_timeout: Duration,
    /// Failed attempts after which an event is dead-lettered
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            lease_duration: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            max_attempts: 10,
            backoff: BackoffConfig::standard(),
        }
    }
}

/// Outcome counts of one relay invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Confirmed by the broker
    pub published: usize,
    /// Failed transiently, left staged with backoff
    pub retried: usize,
    pub dead_lettered: usize,
    /// Released unattempted because an earlier event of the same transaction failed
    pub deferred: usize,
    /// Lease taken over by another relay before we could finish
    pub claim_lost: usize,
}

impl RelayReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, other: &RelayReport) {
        self.published += other.published;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.deferred += other.deferred;
        self.claim_lost += other.claim_lost;
    }
}

enum Outcome {
    Published,
    PublishedLeaseLost,
    Retried,
    DeadLettered,
    LeaseLost,
}

pub struct CommitGatedRelay {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn BrokerPublisher>,
    mapper: Arc<dyn EventMapper>,
    dead_letters: DeadLetterHandler,
    config: RelayConfig,
    metrics: Arc<RelayMetrics>,
}

impl CommitGatedRelay {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn BrokerPublisher>,
        mapper: Arc<dyn EventMapper>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        config: RelayConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            mapper,
            dead_letters: DeadLetterHandler::new(dead_letters),
            config,
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    pub fn dead_letters(&self) -> &DeadLetterHandler {
        &self.dead_letters
    }

    /// Relay the events staged by one committed transaction.
    ///
    /// Safe to call repeatedly with the same ids: rows already deleted or
    /// leased elsewhere are simply not claimed.
    #[instrument(
        skip(self, committed),
        fields(
            transaction_id = ?committed.transaction_id,
            event_count = committed.event_ids.len()
        )
    )]
    pub async fn on_transaction_committed(
        &self,
        committed: &CommittedEvents,
    ) -> Result<RelayReport, RelayError> {
        self.metrics.record_commit_signal();
        if committed.event_ids.is_empty() {
            return Ok(RelayReport::default());
        }

        let claimed = self
            .repository
            .claim_by_ids(&committed.event_ids, self.config.lease_duration)
            .await?;

        if claimed.len() < committed.event_ids.len() {
            debug!(
                requested = committed.event_ids.len(),
                claimed = claimed.len(),
                "Some committed events were not claimable, leaving them to the sweep"
            );
        }

        self.process_claimed(claimed).await
    }

    /// Claim and relay one batch of staged rows
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<RelayReport, RelayError> {
        self.metrics.record_sweep();

        let claimed = self
            .repository
            .claim_staged(self.config.batch_size, self.config.lease_duration)
            .await?;

        if claimed.is_empty() {
            return Ok(RelayReport::default());
        }

        let report = self.process_claimed(claimed).await?;
        info!(
            published = report.published,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            claim_lost = report.claim_lost,
            "Outbox sweep finished"
        );
        Ok(report)
    }

    /// Sweep until a round claims nothing or `max_rounds` is reached
    pub async fn drain(&self, max_rounds: usize) -> Result<RelayReport, RelayError> {
        let mut total = RelayReport::default();
        for _ in 0..max_rounds {
            let round = self.sweep().await?;
            if round.is_empty() {
                break;
            }
            total.merge(&round);
        }
        Ok(total)
    }

    /// Storage errors abort the batch; leases on the unprocessed rows expire
    /// and the sweep picks them up again.
    async fn process_claimed(
        &self,
        mut claimed: Vec<ClaimedEvent>,
    ) -> Result<RelayReport, RelayError> {
        claimed.sort_by_key(|(event, _)| event.id);

        let mut report = RelayReport::default();
        let mut held_back: HashSet<TransactionId> = HashSet::new();

        for (event, token) in claimed {
            if held_back.contains(&event.transaction_id) {
                self.repository.release_claim(event.id, token).await?;
                report.deferred += 1;
                self.metrics.record_deferred(1);
                continue;
            }

            match self.relay_one(&event, token).await? {
                Outcome::Published => report.published += 1,
                Outcome::PublishedLeaseLost => {
                    report.published += 1;
                    report.claim_lost += 1;
                }
                Outcome::Retried => {
                    report.retried += 1;
                    held_back.insert(event.transaction_id);
                }
                Outcome::DeadLettered => report.dead_lettered += 1,
                Outcome::LeaseLost => {
                    report.claim_lost += 1;
                    held_back.insert(event.transaction_id);
                }
            }
        }

        Ok(report)
    }

    async fn relay_one(&self, event: &OutboxEvent, token: ClaimToken) -> Result<Outcome, RelayError> {
        let outbound = match self.mapper.map(event) {
            Ok(outbound) => outbound,
            Err(err) => {
                return self
                    .dead_letter(event, token, &err.to_string(), DeadLetterKind::Mapping)
                    .await;
            }
        };

        // Rows later in a batch can outlive the lease taken at claim time.
        // Only send while holding a fresh lease that outlasts the send timeout.
        if !self
            .repository
            .renew_claim(event.id, token, self.config.lease_duration)
            .await?
        {
            self.metrics.record_claim_lost();
            warn!(
                event_id = %event.id,
                transaction_id = %event.transaction_id,
                "Lease expired before send, leaving the event to the next claim"
            );
            return Ok(Outcome::LeaseLost);
        }

        let started = Instant::now();
        let sent = tokio::time::timeout(
            self.config.send_timeout,
            self.publisher
                .send(&outbound.exchange, &outbound.routing_key, &outbound.message),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(self.config.send_timeout)));

        match sent {
            Ok(ack) => {
                let send_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_published(send_ms);

                if self.repository.delete_claimed(event.id, token).await? {
                    debug!(
                        event_id = %event.id,
                        transaction_id = %event.transaction_id,
                        routing_key = %outbound.routing_key,
                        stream = %ack.stream,
                        sequence = ack.sequence,
                        duplicate = ack.duplicate,
                        "Outbox event published"
                    );
                    Ok(Outcome::Published)
                } else {
                    // Another relay owns the row now and will publish it again
                    self.metrics.record_claim_lost();
                    warn!(
                        event_id = %event.id,
                        "Published but lease was lost; a duplicate delivery will follow"
                    );
                    Ok(Outcome::PublishedLeaseLost)
                }
            }
            Err(err) if !err.is_transient() => {
                self.dead_letter(event, token, &err.to_string(), DeadLetterKind::Transport)
                    .await
            }
            Err(err) => {
                let attempts = event.attempts + 1;
                if attempts >= self.config.max_attempts {
                    return self
                        .dead_letter(event, token, &err.to_string(), DeadLetterKind::Exhausted)
                        .await;
                }

                let next_attempt_at = self.config.backoff.next_attempt_at(event.attempts);
                let released = self
                    .repository
                    .release_failed(event.id, token, &err.to_string(), next_attempt_at)
                    .await?;

                if released {
                    self.metrics.record_retry();
                    warn!(
                        event_id = %event.id,
                        transaction_id = %event.transaction_id,
                        attempts,
                        max_attempts = self.config.max_attempts,
                        next_attempt_at = %next_attempt_at,
                        error = %err,
                        "Outbox send failed, event stays staged"
                    );
                    Ok(Outcome::Retried)
                } else {
                    self.metrics.record_claim_lost();
                    Ok(Outcome::LeaseLost)
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        event: &OutboxEvent,
        token: ClaimToken,
        reason: &str,
        kind: DeadLetterKind,
    ) -> Result<Outcome, RelayError> {
        let moved = self
            .dead_letters
            .dead_letter(event, token, reason, kind, event.attempts + 1)
            .await?;

        if moved {
            self.metrics.record_dead_letter();
            Ok(Outcome::DeadLettered)
        } else {
            self.metrics.record_claim_lost();
            Ok(Outcome::LeaseLost)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LibraryEvent;
    use crate::outbox::{
        EventId, LibraryEventMapper, OutboxError, OutboxEventInsert, OutboxRecorder, RelayState,
    };
    use crate::testing::{InMemoryOutboxStore, ScriptedBrokerPublisher, SendScript};
    use crate::transaction::{commit_channel, CommitSignals, TransactionManager};
    use chrono::Utc;
    use serde_json::json;

    struct Harness {
        store: Arc<InMemoryOutboxStore>,
        broker: Arc<ScriptedBrokerPublisher>,
        relay: CommitGatedRelay,
        manager: TransactionManager<InMemoryOutboxStore>,
        recorder: Arc<OutboxRecorder<InMemoryOutboxStore>>,
        signals: CommitSignals,
    }

    fn test_config() -> RelayConfig {
        RelayConfig {
            backoff: BackoffConfig::immediate(),
            ..Default::default()
        }
    }

    fn relay_over(
        store: &Arc<InMemoryOutboxStore>,
        broker: &Arc<ScriptedBrokerPublisher>,
        config: RelayConfig,
    ) -> CommitGatedRelay {
        CommitGatedRelay::new(
            store.clone(),
            broker.clone(),
            Arc::new(LibraryEventMapper::default()),
            store.clone(),
            config,
        )
    }

    fn harness(config: RelayConfig) -> Harness {
        let store = Arc::new(InMemoryOutboxStore::new());
        let broker = Arc::new(ScriptedBrokerPublisher::new());
        let (notifier, signals) = commit_channel();

        Harness {
            relay: relay_over(&store, &broker, config),
            manager: TransactionManager::new(store.clone(), notifier),
            recorder: Arc::new(OutboxRecorder::new(store.clone())),
            store,
            broker,
            signals,
        }
    }

    impl Harness {
        async fn stage(&self, events: Vec<LibraryEvent>) -> Vec<EventId> {
            let recorder = self.recorder.clone();
            self.manager
                .execute(move |scope| {
                    Box::pin(async move {
                        let mut ids = Vec::new();
                        for event in &events {
                            ids.push(recorder.record(scope, event).await?);
                        }
                        Ok::<_, OutboxError>(ids)
                    })
                })
                .await
                .unwrap()
        }

        async fn stage_raw(&self, insert: OutboxEventInsert) -> EventId {
            let recorder = self.recorder.clone();
            self.manager
                .execute(move |scope| {
                    Box::pin(async move { recorder.record_event(scope, insert).await })
                })
                .await
                .unwrap()
        }

        fn next_signal(&mut self) -> CommittedEvents {
            self.signals.try_recv().expect("commit signal")
        }
    }

    fn assigned(reader: &str, book: &str) -> LibraryEvent {
        LibraryEvent::book_assigned(reader, book)
    }

    #[tokio::test]
    async fn test_alice_book_42_is_published_and_deleted() {
        let mut h = harness(test_config());
        let ids = h.stage(vec![assigned("alice", "book-42")]).await;
        assert_eq!(h.store.count_staged().await.unwrap(), 1);

        let signal = h.next_signal();
        let report = h.relay.on_transaction_committed(&signal).await.unwrap();

        assert_eq!(report.published, 1);
        let sent = h.broker.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].exchange, "library.events");
        assert_eq!(sent[0].routing_key, "book.assigned");
        assert_eq!(sent[0].message.event_id, ids[0]);
        assert_eq!(
            sent[0].message.payload,
            json!({"reader": "alice", "book": "book-42"})
        );
        assert_eq!(h.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_row_until_next_attempt_succeeds() {
        let mut h = harness(test_config());
        h.broker
            .fail_next(TransportError::Unreachable("connection refused".to_string()));
        let ids = h.stage(vec![assigned("alice", "book-42")]).await;

        let signal = h.next_signal();
        let report = h.relay.on_transaction_committed(&signal).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.published, 0);

        // No confirmed send, so the row must still be there
        let row = h.store.find_by_id(ids[0]).await.unwrap().expect("row kept");
        assert_eq!(row.attempts, 1);
        assert_eq!(row.state(Utc::now()), RelayState::Staged);
        assert!(row.last_error.unwrap().contains("connection refused"));
        assert!(h.broker.sent().is_empty());

        let report = h.relay.sweep().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(h.broker.sent().len(), 1);
        assert_eq!(h.broker.attempt_count(), 2);
        assert_eq!(h.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_send_counts_as_failure() {
        let mut h = harness(RelayConfig {
            send_timeout: Duration::from_secs(5),
            ..test_config()
        });
        h.broker.hang_next();
        let ids = h.stage(vec![assigned("alice", "book-42")]).await;

        let signal = h.next_signal();
        let report = h.relay.on_transaction_committed(&signal).await.unwrap();

        assert_eq!(report.retried, 1);
        let row = h.store.find_by_id(ids[0]).await.unwrap().expect("row kept");
        assert!(row.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_relaying_same_commit_twice_is_harmless() {
        let mut h = harness(test_config());
        h.stage(vec![assigned("alice", "book-42")]).await;
        let signal = h.next_signal();

        let first = h.relay.on_transaction_committed(&signal).await.unwrap();
        let second = h.relay.on_transaction_committed(&signal).await.unwrap();

        assert_eq!(first.published, 1);
        assert!(second.is_empty());
        assert_eq!(h.broker.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_recovers_events_whose_signal_was_lost() {
        let h = harness(test_config());
        // The signal is never consumed: the process "crashed" after commit
        h.stage(vec![assigned("alice", "book-42"), assigned("bob", "book-7")])
            .await;

        let report = h.relay.sweep().await.unwrap();

        assert_eq!(report.published, 2);
        assert!(h.broker.sent().len() >= 2);
        assert_eq!(h.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rows_leased_by_a_crashed_relay_are_republished_after_expiry() {
        let h = harness(test_config());
        h.stage(vec![assigned("alice", "book-42")]).await;

        // A relay claims the row and dies before deleting it
        let crashed = h
            .store
            .claim_staged(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(crashed.len(), 1);

        assert!(h.relay.sweep().await.unwrap().is_empty());

        h.store.expire_all_leases();
        let report = h.relay.sweep().await.unwrap();

        assert_eq!(report.published, 1);
        assert!(h.broker.sent().len() >= 1);
        assert_eq!(h.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_defers_later_events_of_same_transaction() {
        let mut h = harness(test_config());
        h.broker.push(SendScript::Ack);
        h.broker
            .push(SendScript::Fail(TransportError::Nack("stream full".to_string())));
        let ids = h
            .stage(vec![
                assigned("alice", "book-1"),
                assigned("alice", "book-2"),
                assigned("alice", "book-3"),
            ])
            .await;

        let signal = h.next_signal();
        let report = h.relay.on_transaction_committed(&signal).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(report.deferred, 1);

        // The deferred row was never attempted
        let third = h.store.find_by_id(ids[2]).await.unwrap().unwrap();
        assert_eq!(third.attempts, 0);

        let report = h.relay.sweep().await.unwrap();
        assert_eq!(report.published, 2);

        let order: Vec<EventId> = h
            .broker
            .sent()
            .iter()
            .map(|m| m.message.event_id)
            .collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn test_backing_off_event_blocks_its_successors() {
        let mut h = harness(RelayConfig {
            backoff: BackoffConfig::new(60_000, 60_000, 0.0),
            ..Default::default()
        });
        h.broker
            .fail_next(TransportError::Unreachable("down".to_string()));
        let ids = h
            .stage(vec![assigned("alice", "book-1"), assigned("alice", "book-2")])
            .await;

        let signal = h.next_signal();
        h.relay.on_transaction_committed(&signal).await.unwrap();

        // book-1 backs off for a minute; book-2 must wait behind it
        assert!(h.relay.sweep().await.unwrap().is_empty());

        h.store.skip_backoff();
        let report = h.relay.sweep().await.unwrap();
        assert_eq!(report.published, 2);

        let order: Vec<EventId> = h
            .broker
            .sent()
            .iter()
            .map(|m| m.message.event_id)
            .collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn test_unmappable_event_is_dead_lettered_without_sending() {
        let mut h = harness(test_config());
        let id = h
            .stage_raw(OutboxEventInsert::new("ShelfMoved", "shelf-3", json!({})))
            .await;

        let signal = h.next_signal();
        let report = h.relay.on_transaction_committed(&signal).await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(h.broker.attempt_count(), 0);
        assert_eq!(h.store.count_staged().await.unwrap(), 0);

        let dead = h.store.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].original_event_id, id);
        assert_eq!(dead[0].kind, DeadLetterKind::Mapping);
    }

    #[tokio::test]
    async fn test_encoding_failure_is_not_retried() {
        let mut h = harness(test_config());
        h.broker
            .fail_next(TransportError::Encoding("payload too large".to_string()));
        h.stage(vec![assigned("alice", "book-42")]).await;

        let signal = h.next_signal();
        let report = h.relay.on_transaction_committed(&signal).await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(h.store.dead_letters()[0].kind, DeadLetterKind::Transport);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_move_event_to_dead_letter() {
        let mut h = harness(RelayConfig {
            max_attempts: 2,
            ..test_config()
        });
        h.broker.fail_next(TransportError::Nack("no".to_string()));
        h.broker.fail_next(TransportError::Nack("still no".to_string()));
        h.stage(vec![assigned("alice", "book-42")]).await;

        let signal = h.next_signal();
        assert_eq!(
            h.relay.on_transaction_committed(&signal).await.unwrap().retried,
            1
        );
        let report = h.relay.sweep().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        let dead = h.store.dead_letters();
        assert_eq!(dead[0].kind, DeadLetterKind::Exhausted);
        assert_eq!(dead[0].attempts, 2);
        assert!(dead[0].reason.contains("still no"));
        assert_eq!(h.relay.metrics().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_concurrent_relays_never_double_claim() {
        let h = harness(test_config());
        for i in 0..20 {
            h.stage(vec![assigned("reader", &format!("book-{}", i))])
                .await;
        }
        let other = relay_over(
            &h.store,
            &h.broker,
            RelayConfig {
                batch_size: 3,
                ..test_config()
            },
        );

        let (a, b) = tokio::join!(h.relay.drain(50), other.drain(50));
        let total = a.unwrap().published + b.unwrap().published;

        assert_eq!(total, 20);
        let mut seen: Vec<EventId> = h
            .broker
            .sent()
            .iter()
            .map(|m| m.message.event_id)
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 20);
        assert_eq!(h.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_row_whose_lease_expired_is_not_sent() {
        let h = harness(test_config());
        let ids = h.stage(vec![assigned("alice", "book-42")]).await;
        let claimed = h
            .store
            .claim_staged(10, Duration::from_secs(30))
            .await
            .unwrap();
        h.store.expire_all_leases();

        let report = h.relay.process_claimed(claimed).await.unwrap();

        assert_eq!(report.claim_lost, 1);
        assert_eq!(report.published, 0);
        assert_eq!(h.broker.attempt_count(), 0);
        assert!(h.store.find_by_id(ids[0]).await.unwrap().is_some());

        assert_eq!(h.relay.sweep().await.unwrap().published, 1);
        assert_eq!(h.broker.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_batch_does_not_double_publish_rows_reclaimed_by_another_relay() {
        let h = harness(RelayConfig {
            lease_duration: Duration::from_millis(250),
            send_timeout: Duration::from_millis(120),
            ..test_config()
        });
        h.broker.set_latency(Duration::from_millis(100));
        for i in 0..5 {
            h.stage(vec![assigned("reader", &format!("book-{}", i))])
                .await;
        }
        let other = relay_over(&h.store, &h.broker, h.relay.config().clone());

        // The first relay claims all five rows; its claim-time lease runs out
        // before it reaches the fourth one, and the second relay takes over.
        let (first, second) = tokio::join!(h.relay.sweep(), async {
            tokio::time::sleep(Duration::from_millis(260)).await;
            other.sweep().await
        });
        let first = first.unwrap();
        second.unwrap();
        assert!(first.claim_lost >= 2, "{:?}", first);

        h.broker.set_latency(Duration::ZERO);
        h.store.expire_all_leases();
        h.relay.drain(5).await.unwrap();

        let mut seen: Vec<EventId> = h
            .broker
            .sent()
            .iter()
            .map(|m| m.message.event_id)
            .collect();
        let sent = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), sent, "an event was published twice");
        assert_eq!(sent, 5);
        assert_eq!(h.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_metrics_track_signals_and_sweeps() {
        let mut h = harness(test_config());
        h.stage(vec![assigned("alice", "book-42")]).await;
        let signal = h.next_signal();
        h.relay.on_transaction_committed(&signal).await.unwrap();
        h.relay.sweep().await.unwrap();

        let snap = h.relay.metrics().snapshot();
        assert_eq!(snap.commit_signals, 1);
        assert_eq!(snap.sweeps, 1);
        assert_eq!(snap.published, 1);
    }
}
