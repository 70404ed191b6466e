//! Broker adapters and the relay runtime

pub mod hybrid;
pub mod nats;
