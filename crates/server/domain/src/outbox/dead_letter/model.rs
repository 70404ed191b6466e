use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::outbox::model::{EventId, OutboxEvent, TransactionId};

/// Why an event was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeadLetterKind {
    /// The row could not be mapped to the wire schema
    Mapping,
    /// The broker can never accept the message as encoded
    Transport,
    /// Transient failures reached the attempt limit
    Exhausted,
}

impl DeadLetterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterKind::Mapping => "MAPPING",
            DeadLetterKind::Transport => "TRANSPORT",
            DeadLetterKind::Exhausted => "EXHAUSTED",
        }
    }
}

impl fmt::Display for DeadLetterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeadLetterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MAPPING" => Ok(DeadLetterKind::Mapping),
            "TRANSPORT" => Ok(DeadLetterKind::Transport),
            "EXHAUSTED" => Ok(DeadLetterKind::Exhausted),
            other => Err(format!("unknown dead letter kind: {}", other)),
        }
    }
}

/// A dead-lettered event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub original_event_id: EventId,
    pub transaction_id: TransactionId,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    /// Error from the final attempt
    pub reason: String,
    pub kind: DeadLetterKind,
    /// Attempts made, including the final one
    pub attempts: u32,
    pub original_created_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl DeadLetterEntry {
    pub fn from_event(
        event: &OutboxEvent,
        reason: impl Into<String>,
        kind: DeadLetterKind,
        attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_event_id: event.id,
            transaction_id: event.transaction_id,
            event_type: event.event_type.clone(),
            aggregate_id: event.aggregate_id.clone(),
            payload: event.payload.clone(),
            metadata: event.metadata.clone(),
            reason: reason.into(),
            kind,
            attempts,
            original_created_at: event.created_at,
            moved_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn time_in_dead_letter(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.moved_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub pending_count: u64,
    pub resolved_count: u64,
    pub oldest_pending_age_seconds: Option<i64>,
}
