//! HybridOutboxRelay - commit signals + LISTEN/NOTIFY + polling
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      HybridOutboxRelay                       │
//! │                                                              │
//! │  CommitSignals ──┐                                           │
//! │  (in-process)    │     ┌────────────────────────────┐        │
//! │                  ├────▶│ on_transaction_committed   │        │
//! │  PgNotifyListener┘     └────────────────────────────┘        │
//! │  (other processes)                                           │
//! │                        ┌────────────────────────────┐        │
//! │  polling tick ────────▶│ drain (claim_staged)       │        │
//! │                        └────────────────────────────┘        │
//! │                                                              │
//! │  shutdown ────────────▶ stop after the current batch         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The first tick fires immediately, so rows orphaned by a previous process
//! are swept on startup.

use std::sync::Arc;
use std::time::Duration;

use library_server_domain::outbox::RelayReport;
use library_server_domain::{CommitGatedRelay, CommitSignals, CommittedEvents};
use library_shared::config::RelayConfigDto;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::pg_notify_listener::PgNotifyListener;

/// Runtime settings of the relay loop
#[derive(Debug, Clone)]
pub struct HybridRelayConfig {
    /// Interval between fallback sweeps
    pub poll_interval: Duration,
    /// Sweep rounds per tick, each claiming at most one batch
    pub max_sweep_rounds: usize,
    /// Pause before listening again after the listener failed to reconnect
    pub listener_retry_delay: Duration,
}

impl Default for HybridRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_sweep_rounds: 10,
            listener_retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RelayConfigDto> for HybridRelayConfig {
    fn from(config: &RelayConfigDto) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            ..Default::default()
        }
    }
}

/// Stops a running [`HybridOutboxRelay`]
#[derive(Debug, Clone)]
pub struct RelayShutdown {
    sender: broadcast::Sender<()>,
}

impl RelayShutdown {
    pub fn trigger(&self) {
        // No receiver means the relay already stopped
        let _ = self.sender.send(());
    }
}

pub struct HybridOutboxRelay {
    relay: Arc<CommitGatedRelay>,
    config: HybridRelayConfig,
    commits: Option<CommitSignals>,
    listener: Option<PgNotifyListener>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl HybridOutboxRelay {
    /// A relay that only polls until signal sources are attached
    pub fn new(relay: Arc<CommitGatedRelay>, config: HybridRelayConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            relay,
            config,
            commits: None,
            listener: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Wake on commits of this process's `TransactionManager`
    pub fn with_commit_signals(mut self, commits: CommitSignals) -> Self {
        self.commits = Some(commits);
        self
    }

    /// Wake on `NOTIFY` from any process writing to the same database
    pub fn with_listener(mut self, listener: PgNotifyListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn shutdown_handle(&self) -> RelayShutdown {
        RelayShutdown {
            sender: self.shutdown_tx.clone(),
        }
    }

    pub fn relay(&self) -> Arc<CommitGatedRelay> {
        self.relay.clone()
    }

    /// Run until shut down. Returns the totals of everything relayed.
    pub async fn run(mut self) -> RelayReport {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.relay.config().batch_size,
            commit_signals = self.commits.is_some(),
            listener = self.listener.as_ref().map(PgNotifyListener::channel),
            "Starting hybrid outbox relay"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = RelayReport::default();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Hybrid outbox relay shutting down");
                    break;
                }
                signal = next_commit(&mut self.commits) => match signal {
                    Some(committed) => self.relay_committed(&committed, &mut total).await,
                    None => {
                        debug!("Commit signal channel closed, relying on notifications and polling");
                        self.commits = None;
                    }
                },
                notification = next_notification(&mut self.listener) => match notification {
                    Ok(committed) => self.relay_committed(&committed, &mut total).await,
                    Err(e) => {
                        warn!(error = %e, "Outbox notification listener failed, polling continues");
                        sleep(self.config.listener_retry_delay).await;
                    }
                },
                _ = ticker.tick() => self.sweep(&mut total).await,
            }
        }

        total
    }

    async fn relay_committed(&self, committed: &CommittedEvents, total: &mut RelayReport) {
        if committed.event_ids.is_empty() {
            return;
        }
        match self.relay.on_transaction_committed(committed).await {
            Ok(report) => total.merge(&report),
            // The rows stay staged; the next sweep picks them up
            Err(e) => error!(error = %e, "Relaying committed events failed"),
        }
    }

    async fn sweep(&self, total: &mut RelayReport) {
        match self.relay.drain(self.config.max_sweep_rounds).await {
            Ok(report) => total.merge(&report),
            Err(e) => error!(error = %e, "Outbox sweep failed"),
        }
    }
}

async fn next_commit(commits: &mut Option<CommitSignals>) -> Option<CommittedEvents> {
    match commits {
        Some(commits) => commits.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_notification(
    listener: &mut Option<PgNotifyListener>,
) -> Result<CommittedEvents, sqlx::Error> {
    match listener {
        Some(listener) => listener.recv_committed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use library_server_domain::outbox::{LibraryEventMapper, OutboxRecorder};
    use library_server_domain::testing::{InMemoryOutboxStore, ScriptedBrokerPublisher};
    use library_server_domain::{
        commit_channel, CommitNotifier, LibraryEvent, OutboxRepository, RelayConfig,
        TransactionManager,
    };

    struct Fixture {
        store: Arc<InMemoryOutboxStore>,
        broker: Arc<ScriptedBrokerPublisher>,
        relay: Arc<CommitGatedRelay>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryOutboxStore::new());
        let broker = Arc::new(ScriptedBrokerPublisher::new());
        let relay = Arc::new(CommitGatedRelay::new(
            store.clone(),
            broker.clone(),
            Arc::new(LibraryEventMapper::default()),
            store.clone(),
            RelayConfig::default(),
        ));
        Fixture {
            store,
            broker,
            relay,
        }
    }

    async fn assign(store: &Arc<InMemoryOutboxStore>, notifier: CommitNotifier, book: &str) {
        let manager = TransactionManager::new(store.clone(), notifier);
        let recorder = Arc::new(OutboxRecorder::new(store.clone()));
        let event = LibraryEvent::book_assigned("alice", book);
        manager
            .execute(move |scope| {
                Box::pin(async move { recorder.record(scope, &event).await })
            })
            .await
            .unwrap();
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn slow_polling() -> HybridRelayConfig {
        HybridRelayConfig {
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_commit_signal_publishes_without_waiting_for_poll() {
        let f = fixture();
        let (notifier, signals) = commit_channel();
        let hybrid = HybridOutboxRelay::new(f.relay.clone(), slow_polling())
            .with_commit_signals(signals);
        let shutdown = hybrid.shutdown_handle();
        let handle = tokio::spawn(hybrid.run());

        assign(&f.store, notifier, "book-42").await;

        let broker = f.broker.clone();
        wait_for(move || broker.sent().len() == 1).await;
        assert_eq!(f.broker.sent()[0].routing_key, "book.assigned");

        shutdown.trigger();
        let total = handle.await.unwrap();
        assert_eq!(total.published, 1);
        assert_eq!(f.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_polling_recovers_rows_without_signal() {
        let f = fixture();
        // Signals go nowhere: the receiver is dropped before the commit
        let (notifier, signals) = commit_channel();
        drop(signals);
        assign(&f.store, notifier, "book-7").await;

        let hybrid = HybridOutboxRelay::new(
            f.relay.clone(),
            HybridRelayConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let shutdown = hybrid.shutdown_handle();
        let handle = tokio::spawn(hybrid.run());

        let broker = f.broker.clone();
        wait_for(move || broker.sent().len() == 1).await;

        shutdown.trigger();
        handle.await.unwrap();
        assert_eq!(f.store.count_staged().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_signal_channel_keeps_relay_running() {
        let f = fixture();
        let (notifier, signals) = commit_channel();
        drop(notifier);

        let hybrid = HybridOutboxRelay::new(
            f.relay.clone(),
            HybridRelayConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        )
        .with_commit_signals(signals);
        let shutdown = hybrid.shutdown_handle();
        let handle = tokio::spawn(hybrid.run());

        let (late_notifier, _unused) = commit_channel();
        assign(&f.store, late_notifier, "book-9").await;

        let broker = f.broker.clone();
        wait_for(move || broker.sent().len() == 1).await;

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let f = fixture();
        let hybrid = HybridOutboxRelay::new(f.relay, slow_polling());
        let shutdown = hybrid.shutdown_handle();
        let handle = tokio::spawn(hybrid.run());

        shutdown.trigger();
        let total = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay stopped")
            .unwrap();
        assert!(total.is_empty());
    }

    #[test]
    fn test_config_from_dto() {
        let dto = RelayConfigDto {
            poll_interval_ms: 250,
            ..Default::default()
        };
        let config = HybridRelayConfig::from(&dto);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_sweep_rounds, 10);
    }
}
