use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use library_shared::event_topics::stream_name_for;

use super::lock;
use crate::outbox::{BrokerPublisher, PublishAck, TransportError, WireMessage};

/// Scripted reaction to one `send` call
#[derive(Debug, Clone)]
pub enum SendScript {
    Ack,
    Fail(TransportError),
    /// Never answer; the caller's timeout has to fire
    Hang,
}

/// A message the broker confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message: WireMessage,
}

/// Broker double that acknowledges everything unless scripted otherwise
#[derive(Debug, Default)]
pub struct ScriptedBrokerPublisher {
    script: Mutex<VecDeque<SendScript>>,
    sent: Mutex<Vec<SentMessage>>,
    attempts: AtomicUsize,
    unhealthy: AtomicBool,
    /// Time every call takes before it answers
    latency: Mutex<Duration>,
}

impl ScriptedBrokerPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reaction for the next unscripted call
    pub fn push(&self, step: SendScript) {
        lock(&self.script).push_back(step);
    }

    pub fn fail_next(&self, error: TransportError) {
        self.push(SendScript::Fail(error));
    }

    pub fn hang_next(&self) {
        self.push(SendScript::Hang);
    }

    /// Make every following `send` take `latency` before answering
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Confirmed messages in send order
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Every `send` call, confirmed or not
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerPublisher for ScriptedBrokerPublisher {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &WireMessage,
    ) -> Result<PublishAck, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let step = lock(&self.script).pop_front().unwrap_or(SendScript::Ack);

        match step {
            SendScript::Ack => {
                let mut sent = lock(&self.sent);
                sent.push(SentMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    message: message.clone(),
                });
                Ok(PublishAck {
                    stream: stream_name_for(exchange),
                    sequence: sent.len() as u64,
                    duplicate: false,
                })
            }
            SendScript::Fail(err) => Err(err),
            SendScript::Hang => futures::future::pending().await,
        }
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(TransportError::Unreachable("scripted outage".to_string()))
        } else {
            Ok(())
        }
    }
}
