//! Startup module - wires the relay from configuration and runs it until a
//! shutdown signal arrives.

mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use library_server_domain::outbox::{BackoffConfig, LibraryEventMapper, OutboxRepository};
use library_server_domain::{BrokerPublisher, CommitGatedRelay, RelayConfig};
use library_server_infrastructure::{
    DatabasePool, HybridOutboxRelay, HybridRelayConfig, NatsBrokerPublisher, NatsPublisherConfig,
    PgNotifyListener, PostgresOutboxRepository,
};
use library_shared::config::{RelayConfigDto, ServerConfigDto};
use tracing::{info, warn};

pub use shutdown::{wait_for_signal, ShutdownConfig};

/// Jitter applied to retry backoff
const BACKOFF_JITTER: f64 = 0.1;

/// Domain relay tuning from the loaded configuration
pub fn relay_config(dto: &RelayConfigDto) -> RelayConfig {
    RelayConfig {
        batch_size: dto.batch_size,
        lease_duration: dto.lease_duration(),
        send_timeout: dto.send_timeout(),
        max_attempts: dto.max_attempts,
        backoff: BackoffConfig::new(dto.backoff_base_ms, dto.backoff_max_ms, BACKOFF_JITTER),
    }
}

/// Run the relay until SIGINT/SIGTERM, then stop it gracefully.
pub async fn run(config: ServerConfigDto) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        exchange = %config.broker.exchange,
        "Starting library outbox relay"
    );

    let pool = DatabasePool::connect(&config.database).await?;
    info!("Database connected");

    let outbox = Arc::new(PostgresOutboxRepository::new(pool.pg_pool()));
    outbox.run_migrations().await?;
    info!("Outbox schema ready");

    let publisher = Arc::new(NatsBrokerPublisher::new(NatsPublisherConfig::from(
        &config.broker,
    )));
    if let Err(e) = publisher.health_check().await {
        // Rows stay staged until the broker is reachable
        warn!(error = %e, "NATS not reachable yet, relay will retry on send");
    }

    let relay = Arc::new(CommitGatedRelay::new(
        outbox.clone(),
        publisher,
        Arc::new(LibraryEventMapper::new(config.broker.exchange.clone())),
        outbox.clone(),
        relay_config(&config.relay),
    ));

    let mut hybrid = HybridOutboxRelay::new(relay.clone(), HybridRelayConfig::from(&config.relay));
    if config.relay.listen_enabled {
        match PgNotifyListener::for_outbox(pool.pool()).await {
            Ok(listener) => hybrid = hybrid.with_listener(listener),
            Err(e) => warn!(error = %e, "LISTEN unavailable, falling back to polling only"),
        }
    }

    let shutdown = hybrid.shutdown_handle();
    let mut handle = tokio::spawn(hybrid.run());

    let shutdown_config = ShutdownConfig::default();
    tokio::select! {
        reason = wait_for_signal() => info!(%reason, "Shutdown requested"),
        result = &mut handle => {
            // The loop only returns on shutdown, so this is a panic
            result?;
            return Ok(());
        }
    }

    shutdown.trigger();
    match tokio::time::timeout(shutdown_config.timeout, &mut handle).await {
        Ok(Ok(total)) => info!(
            published = total.published,
            retried = total.retried,
            dead_lettered = total.dead_lettered,
            "Relay stopped"
        ),
        Ok(Err(e)) => warn!(error = %e, "Relay task failed"),
        Err(_) => {
            warn!(timeout = ?shutdown_config.timeout, "Relay did not stop in time, aborting");
            handle.abort();
        }
    }

    log_final_state(&relay, outbox.as_ref()).await;
    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn log_final_state(relay: &CommitGatedRelay, outbox: &PostgresOutboxRepository) {
    let metrics = relay.metrics().snapshot();
    info!(
        published = metrics.published,
        retried = metrics.retried,
        dead_lettered = metrics.dead_lettered,
        deferred = metrics.deferred,
        claim_lost = metrics.claim_lost,
        sweeps = metrics.sweeps,
        commit_signals = metrics.commit_signals,
        max_send_ms = metrics.max_send_ms,
        "Relay metrics"
    );

    match tokio::time::timeout(Duration::from_secs(2), outbox.get_stats()).await {
        Ok(Ok(stats)) => info!(
            staged = stats.staged_count,
            retrying = stats.retrying_count,
            oldest_staged_age_seconds = ?stats.oldest_staged_age_seconds,
            "Outbox left for the next relay"
        ),
        Ok(Err(e)) => warn!(error = %e, "Could not read outbox stats"),
        Err(_) => warn!("Timed out reading outbox stats"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_from_dto() {
        let dto = RelayConfigDto {
            batch_size: 25,
            lease_secs: 60,
            send_timeout_ms: 2_000,
            max_attempts: 4,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
            ..Default::default()
        };

        let config = relay_config(&dto);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.lease_duration, Duration::from_secs(60));
        assert_eq!(config.send_timeout, Duration::from_secs(2));
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.backoff.base_delay_ms, 500);
        assert_eq!(config.backoff.max_delay_ms, 10_000);
    }
}
