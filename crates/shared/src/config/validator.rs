//! Configuration validation

use super::dto::{DatabaseConfig, RelayConfigDto, ServerConfigDto};
use super::error::{ConfigError, Result};

/// Validate a database URL format
///
/// Accepts `postgres://` and `postgresql://` URLs. Network URLs may omit the
/// port; when present it must be numeric.
pub fn validate_database_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ConfigError::InvalidDatabaseUrl(
            "Database URL cannot be empty".to_string(),
        ));
    }

    let rest = url
        .strip_prefix("postgres://")
        .or_else(|| url.strip_prefix("postgresql://"))
        .ok_or_else(|| {
            ConfigError::InvalidDatabaseUrl(format!(
                "Database URL must start with postgres:// or postgresql://, got: {}",
                url
            ))
        })?;

    // Credentials may contain ':' so only look past the last '@'
    let host_part = rest.rsplit_once('@').map_or(rest, |(_, host)| host);

    // Unix socket
    if host_part.starts_with('/') {
        return Ok(());
    }

    let authority = host_part.split(['/', '?']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ConfigError::InvalidDatabaseUrl(format!(
            "Database URL has no host: {}",
            url
        )));
    }

    if let Some((host, port)) = authority.rsplit_once(':') {
        if host.is_empty() {
            return Err(ConfigError::InvalidDatabaseUrl(format!(
                "Database URL has no host: {}",
                url
            )));
        }
        if port.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidDatabaseUrl(format!(
                "Invalid port in database URL: {}",
                port
            )));
        }
    }

    Ok(())
}

/// Validate NATS URLs
pub fn validate_nats_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Err(ConfigError::Validation(
            "NATS URLs cannot be empty".to_string(),
        ));
    }

    for url in urls {
        if !(url.starts_with("nats://") || url.starts_with("tls://")) {
            return Err(ConfigError::Validation(format!(
                "NATS URL must start with nats:// or tls://, got: {}",
                url
            )));
        }
    }

    Ok(())
}

/// Validate the exchange name used as subject prefix
pub fn validate_exchange(exchange: &str) -> Result<()> {
    if exchange.is_empty() {
        return Err(ConfigError::Validation(
            "Broker exchange cannot be empty".to_string(),
        ));
    }

    if exchange
        .chars()
        .any(|c| c.is_whitespace() || c == '*' || c == '>')
    {
        return Err(ConfigError::Validation(format!(
            "Broker exchange must be a literal subject prefix, got: {}",
            exchange
        )));
    }

    if exchange.starts_with('.') || exchange.ends_with('.') || exchange.contains("..") {
        return Err(ConfigError::Validation(format!(
            "Broker exchange has an empty subject token: {}",
            exchange
        )));
    }

    Ok(())
}

/// Validate connection pool sizing
pub fn validate_pool_config(database: &DatabaseConfig) -> Result<()> {
    if database.pool_size == 0 {
        return Err(ConfigError::Validation(
            "Database pool size must be greater than 0".to_string(),
        ));
    }

    if database.min_idle > database.pool_size {
        return Err(ConfigError::Validation(format!(
            "Minimum idle connections ({}) cannot exceed pool size ({})",
            database.min_idle, database.pool_size
        )));
    }

    Ok(())
}

/// Validate relay tuning
///
/// The relay renews a row's lease right before sending it, so the lease has
/// to cover one send at its full timeout plus the delete that follows it.
/// Twice the send timeout leaves that headroom; a shorter lease lets a second
/// relay re-claim a row whose send is still in flight.
pub fn validate_relay_config(relay: &RelayConfigDto) -> Result<()> {
    if relay.batch_size == 0 {
        return Err(ConfigError::Validation(
            "Outbox batch size must be greater than 0".to_string(),
        ));
    }

    if relay.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "Outbox poll interval must be greater than 0".to_string(),
        ));
    }

    if relay.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "Outbox max attempts must be at least 1".to_string(),
        ));
    }

    if relay.send_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "Outbox send timeout must be greater than 0".to_string(),
        ));
    }

    if relay.lease_duration() < relay.send_timeout() * 2 {
        return Err(ConfigError::Validation(format!(
            "Outbox lease ({}s) must be at least twice the send timeout ({}ms)",
            relay.lease_secs, relay.send_timeout_ms
        )));
    }

    if relay.backoff_base_ms > relay.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "Backoff base ({}ms) cannot exceed backoff max ({}ms)",
            relay.backoff_base_ms, relay.backoff_max_ms
        )));
    }

    Ok(())
}

/// Validate the complete server configuration
pub fn validate_server_config(config: &ServerConfigDto) -> Result<()> {
    validate_database_url(&config.database.url)?;
    validate_pool_config(&config.database)?;
    validate_nats_urls(&config.broker.urls)?;
    validate_exchange(&config.broker.exchange)?;
    validate_relay_config(&config.relay)?;
    Ok(())
}
