//! Configuration module for the library event relay
//!
//! Centralized configuration loading, validation, and Data Transfer Objects
//! for every component of the outbox pipeline.
//!
//! # Architecture
//!
//! 1. **Single Source of Truth**: configuration is loaded once at startup
//! 2. **Fail Fast**: malformed values are reported immediately
//! 3. **DTO Pattern**: configuration is immutable and passed by injection
//! 4. **Env File Priority**: `.env` file is loaded before the process environment is read
//!
//! # Usage
//!
//! ```ignore
//! use library_shared::config::ConfigLoader;
//! use std::path::PathBuf;
//!
//! let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
//! let config = loader.load_server_config()?;
//! println!("Relay batch size: {}", config.relay.batch_size);
//! ```
//!
//! # Environment Variables
//!
//! ## Required Variables
//!
//! - `LIBRARY_DATABASE_URL`: PostgreSQL connection string
//! - `LIBRARY_NATS_URL`: NATS connection URL (comma-separated for clusters)
//!
//! ## Optional Variables
//!
//! - `LIBRARY_DB_POOL_SIZE`: Database pool size (default: 20)
//! - `LIBRARY_DB_MIN_IDLE`: Minimum idle connections (default: 2)
//! - `LIBRARY_DB_CONNECT_TIMEOUT_SECS`: Connect timeout (default: 30)
//! - `LIBRARY_NATS_CONNECT_TIMEOUT_SECS`: Broker connect timeout (default: 5)
//! - `LIBRARY_NATS_NAME`: Client connection name (default: "library-relay")
//! - `LIBRARY_BROKER_EXCHANGE`: Exchange for library events (default: "library.events")
//! - `LIBRARY_OUTBOX_BATCH_SIZE`: Rows claimed per sweep (default: 100)
//! - `LIBRARY_OUTBOX_POLL_INTERVAL_MS`: Sweep interval (default: 5000)
//! - `LIBRARY_OUTBOX_LEASE_SECS`: Claim lease duration (default: 30)
//! - `LIBRARY_OUTBOX_SEND_TIMEOUT_MS`: Broker send timeout (default: 5000)
//! - `LIBRARY_OUTBOX_MAX_ATTEMPTS`: Attempts before dead-lettering (default: 10)
//! - `LIBRARY_OUTBOX_BACKOFF_BASE_MS`: Retry backoff base (default: 1000)
//! - `LIBRARY_OUTBOX_BACKOFF_MAX_MS`: Retry backoff cap (default: 300000)
//! - `LIBRARY_OUTBOX_LISTEN`: "1" enables LISTEN/NOTIFY wake-ups (default: 1)
//! - `RUST_LOG`: Log level (default: "info")

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{BrokerConfig, DatabaseConfig, LoggingConfig, RelayConfigDto, ServerConfigDto};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::{
    validate_database_url, validate_exchange, validate_nats_urls, validate_pool_config,
    validate_relay_config, validate_server_config,
};
