//! Shared building blocks for the library event pipeline.
//!
//! Configuration DTOs and their loader live in [`config`]; the broker
//! exchange and routing-key constants live in [`event_topics`].

pub mod config;
pub mod event_topics;

pub use event_topics::*;
