//! Hybrid relay runtime
//!
//! Drives a [`CommitGatedRelay`] from three wake-up sources:
//!
//! - in-process commit signals from the `TransactionManager`
//! - PostgreSQL `NOTIFY` raised by commits in other processes
//! - a polling tick that sweeps whatever the first two missed
//!
//! # Usage
//!
//! ```rust,ignore
//! use library_server_infrastructure::messaging::hybrid::{
//!     HybridOutboxRelay, HybridRelayConfig, PgNotifyListener,
//! };
//!
//! let listener = PgNotifyListener::for_outbox(&pool).await?;
//! let relay = HybridOutboxRelay::new(relay, HybridRelayConfig::default())
//!     .with_listener(listener);
//! let shutdown = relay.shutdown_handle();
//! tokio::spawn(relay.run());
//! ```
//!
//! [`CommitGatedRelay`]: library_server_domain::CommitGatedRelay

pub mod pg_notify_listener;
pub mod relay;

pub use pg_notify_listener::PgNotifyListener;
pub use relay::{HybridOutboxRelay, HybridRelayConfig, RelayShutdown};
