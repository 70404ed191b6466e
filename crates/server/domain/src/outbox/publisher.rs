//! Broker Publisher port
//!
//! A wire-protocol adapter with no knowledge of transactions or storage.
//! Retries are not its concern: it reports a failure and the relay decides
//! whether the row stays staged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::TransportError;
use super::mapping::WireMessage;

/// Broker confirmation of a stored message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// The broker recognised the message id and did not store it again
    pub duplicate: bool,
}

#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Send one message and wait for the broker's confirmation
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &WireMessage,
    ) -> Result<PublishAck, TransportError>;

    /// Whether the broker can currently be reached
    async fn health_check(&self) -> Result<(), TransportError>;
}
