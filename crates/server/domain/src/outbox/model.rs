//! Outbox Event Model
//!
//! Domain model for staged events in the transactional outbox. A row exists
//! exactly as long as its event has not been confirmed by the broker; it is
//! written once, leased by a relay, and deleted once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Surrogate identity of a staged event.
///
/// Assigned from a database sequence on insert and never reused, even when
/// the staging transaction rolls back. Ordering of ids is staging order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl EventId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(EventId)
    }
}

/// Identity of the business transaction that staged one or more events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease identity handed out by a claim. Only the holder may delete or
/// release the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(pub Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live or expired lease on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: ClaimToken,
    pub claimed_until: DateTime<Utc>,
}

impl Claim {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until > now
    }
}

/// Observable relay state of a stored row.
///
/// `Published` has no variant: a published row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    /// Waiting for a relay (fresh, or released after a failed attempt)
    Staged,
    /// Leased by a relay that is currently sending it
    Publishing,
}

/// An event ready to be staged inside a business transaction
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEventInsert {
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

impl OutboxEventInsert {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A staged event as read back from the outbox store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub transaction_id: TransactionId,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Failed send attempts so far
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest instant a sweep may claim the row again
    pub next_attempt_at: DateTime<Utc>,
    pub claim: Option<Claim>,
}

impl OutboxEvent {
    pub fn state(&self, now: DateTime<Utc>) -> RelayState {
        match &self.claim {
            Some(claim) if claim.is_live(now) => RelayState::Publishing,
            _ => RelayState::Staged,
        }
    }

    /// True when a claim at `now` may take this row, ignoring siblings
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == RelayState::Staged && self.next_attempt_at <= now
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// Point-in-time outbox statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboxStats {
    /// Rows waiting for a relay (not leased)
    pub staged_count: u64,
    /// Rows currently leased
    pub claimed_count: u64,
    /// Rows that have failed at least once
    pub retrying_count: u64,
    pub oldest_staged_age_seconds: Option<i64>,
}
