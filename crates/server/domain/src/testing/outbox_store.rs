use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::lock;
use crate::outbox::{
    Claim, ClaimToken, ClaimedEvent, DeadLetterEntry, DeadLetterRepository, DeadLetterStats,
    EventId, OutboxError, OutboxEvent, OutboxEventInsert, OutboxRepository, OutboxRepositoryTx,
    OutboxStats, TransactionId,
};
use crate::transaction::UnitOfWork;

/// Buffered writes of one in-memory transaction
#[derive(Default)]
pub struct InMemoryTx {
    pending: Vec<OutboxEvent>,
    on_commit: Vec<Box<dyn FnOnce() + Send>>,
}

impl InMemoryTx {
    /// Run `effect` only if this transaction commits. Lets other in-memory
    /// stores take part in the same unit of work.
    pub fn on_commit(&mut self, effect: impl FnOnce() + Send + 'static) {
        self.on_commit.push(Box::new(effect));
    }

    pub fn pending_events(&self) -> &[OutboxEvent] {
        &self.pending
    }
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<EventId, OutboxEvent>,
    dead_letters: Vec<DeadLetterEntry>,
}

/// Outbox store, dead-letter store and unit of work kept in memory.
///
/// Follows the same claim rules as the PostgreSQL store: leases, backoff and
/// per-transaction ordering.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    state: Mutex<StoreState>,
    last_id: AtomicI64,
    fail_next_insert: AtomicBool,
    fail_next_commit: AtomicBool,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Simulate a relay that crashed holding leases: every lease expires now
    pub fn expire_all_leases(&self) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for row in lock(&self.state).rows.values_mut() {
            if let Some(claim) = row.claim.as_mut() {
                claim.claimed_until = past;
            }
        }
    }

    /// Clear every backoff so failed rows are immediately claimable
    pub fn skip_backoff(&self) {
        let now = Utc::now();
        for row in lock(&self.state).rows.values_mut() {
            row.next_attempt_at = now;
        }
    }

    /// Committed rows in id order
    pub fn rows(&self) -> Vec<OutboxEvent> {
        lock(&self.state).rows.values().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        lock(&self.state).dead_letters.clone()
    }

    fn next_id(&self) -> EventId {
        EventId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn lease_until(lease: Duration) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    /// Claimable ids judged against one snapshot, so siblings claimed in the
    /// same call do not block each other
    fn claimable_ids(
        rows: &BTreeMap<EventId, OutboxEvent>,
        now: DateTime<Utc>,
        wanted: Option<&HashSet<EventId>>,
        limit: usize,
    ) -> Vec<EventId> {
        rows.values()
            .filter(|row| wanted.map_or(true, |ids| ids.contains(&row.id)))
            .filter(|row| row.is_claimable(now))
            .filter(|row| {
                !rows.range(..row.id).any(|(_, earlier)| {
                    earlier.transaction_id == row.transaction_id && !earlier.is_claimable(now)
                })
            })
            .map(|row| row.id)
            .take(limit)
            .collect()
    }

    fn claim(
        &self,
        wanted: Option<&HashSet<EventId>>,
        limit: usize,
        lease: Duration,
    ) -> Vec<ClaimedEvent> {
        let now = Utc::now();
        let claimed_until = Self::lease_until(lease);
        let mut state = lock(&self.state);

        let ids = Self::claimable_ids(&state.rows, now, wanted, limit);
        ids.into_iter()
            .filter_map(|id| {
                let row = state.rows.get_mut(&id)?;
                let token = ClaimToken::new();
                row.claim = Some(Claim {
                    token,
                    claimed_until,
                });
                Some((row.clone(), token))
            })
            .collect()
    }

    fn holds_lease(row: &OutboxEvent, token: ClaimToken) -> bool {
        row.claim.map_or(false, |claim| claim.token == token)
    }

    fn lease_held(state: &StoreState, id: EventId, token: ClaimToken) -> bool {
        state
            .rows
            .get(&id)
            .map_or(false, |row| Self::holds_lease(row, token))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryOutboxStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, OutboxError> {
        Ok(InMemoryTx::default())
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<(), OutboxError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(OutboxError::storage("commit failed: connection lost"));
        }

        {
            let mut state = lock(&self.state);
            for row in tx.pending {
                state.rows.insert(row.id, row);
            }
        }
        for effect in tx.on_commit {
            effect();
        }
        Ok(())
    }

    async fn rollback(&self, _tx: InMemoryTx) -> Result<(), OutboxError> {
        Ok(())
    }
}

#[async_trait]
impl OutboxRepositoryTx for InMemoryOutboxStore {
    type Tx = InMemoryTx;

    async fn insert_event_with_tx(
        &self,
        tx: &mut InMemoryTx,
        transaction_id: TransactionId,
        event: &OutboxEventInsert,
    ) -> Result<EventId, OutboxError> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(OutboxError::storage("insert failed: disk full"));
        }

        let now = Utc::now();
        let id = self.next_id();
        tx.pending.push(OutboxEvent {
            id,
            transaction_id,
            event_type: event.event_type.clone(),
            aggregate_id: event.aggregate_id.clone(),
            payload: event.payload.clone(),
            metadata: event.metadata.clone(),
            created_at: now,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            claim: None,
        });
        Ok(id)
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxStore {
    async fn claim_by_ids(
        &self,
        ids: &[EventId],
        lease: Duration,
    ) -> Result<Vec<ClaimedEvent>, OutboxError> {
        let wanted: HashSet<EventId> = ids.iter().copied().collect();
        Ok(self.claim(Some(&wanted), wanted.len(), lease))
    }

    async fn claim_staged(
        &self,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedEvent>, OutboxError> {
        Ok(self.claim(None, limit, lease))
    }

    async fn renew_claim(
        &self,
        id: EventId,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<bool, OutboxError> {
        let now = Utc::now();
        let mut state = lock(&self.state);
        match state.rows.get_mut(&id).and_then(|row| row.claim.as_mut()) {
            Some(claim) if claim.token == token && claim.is_live(now) => {
                claim.claimed_until = Self::lease_until(lease);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_claimed(&self, id: EventId, token: ClaimToken) -> Result<bool, OutboxError> {
        let mut state = lock(&self.state);
        if !Self::lease_held(&state, id, token) {
            return Ok(false);
        }
        state.rows.remove(&id);
        Ok(true)
    }

    async fn release_failed(
        &self,
        id: EventId,
        token: ClaimToken,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let mut state = lock(&self.state);
        match state.rows.get_mut(&id) {
            Some(row) if Self::holds_lease(row, token) => {
                row.attempts += 1;
                row.last_error = Some(error.to_string());
                row.next_attempt_at = next_attempt_at;
                row.claim = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, id: EventId, token: ClaimToken) -> Result<bool, OutboxError> {
        let mut state = lock(&self.state);
        match state.rows.get_mut(&id) {
            Some(row) if Self::holds_lease(row, token) => {
                row.claim = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<OutboxEvent>, OutboxError> {
        Ok(lock(&self.state).rows.get(&id).cloned())
    }

    async fn count_staged(&self) -> Result<u64, OutboxError> {
        Ok(lock(&self.state).rows.len() as u64)
    }

    async fn get_stats(&self) -> Result<OutboxStats, OutboxError> {
        let now = Utc::now();
        let state = lock(&self.state);
        let mut stats = OutboxStats::default();

        for row in state.rows.values() {
            match &row.claim {
                Some(claim) if claim.is_live(now) => stats.claimed_count += 1,
                _ => stats.staged_count += 1,
            }
            if row.attempts > 0 {
                stats.retrying_count += 1;
            }
        }
        stats.oldest_staged_age_seconds = state
            .rows
            .values()
            .map(|row| now.signed_duration_since(row.created_at).num_seconds())
            .max();

        Ok(stats)
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryOutboxStore {
    async fn move_to_dead_letter(
        &self,
        entry: &DeadLetterEntry,
        token: ClaimToken,
    ) -> Result<bool, OutboxError> {
        let mut state = lock(&self.state);
        if !Self::lease_held(&state, entry.original_event_id, token) {
            return Ok(false);
        }
        state.rows.remove(&entry.original_event_id);
        state.dead_letters.push(entry.clone());
        Ok(true)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, OutboxError> {
        Ok(lock(&self.state)
            .dead_letters
            .iter()
            .find(|entry| entry.id == id)
            .cloned())
    }

    async fn get_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<DeadLetterEntry>, OutboxError> {
        Ok(lock(&self.state)
            .dead_letters
            .iter()
            .find(|entry| entry.original_event_id == event_id)
            .cloned())
    }

    async fn list_pending(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeadLetterEntry>, OutboxError> {
        let state = lock(&self.state);
        let mut pending: Vec<DeadLetterEntry> = state
            .dead_letters
            .iter()
            .filter(|entry| entry.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|entry| entry.moved_at);
        Ok(pending.into_iter().skip(offset).take(limit).collect())
    }

    async fn resolve(
        &self,
        id: Uuid,
        notes: &str,
        resolved_by: &str,
    ) -> Result<bool, OutboxError> {
        let mut state = lock(&self.state);
        match state
            .dead_letters
            .iter_mut()
            .find(|entry| entry.id == id && entry.is_pending())
        {
            Some(entry) => {
                entry.resolved_at = Some(Utc::now());
                entry.resolved_by = Some(resolved_by.to_string());
                entry.resolution_notes = Some(notes.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue(&self, id: Uuid) -> Result<Option<EventId>, OutboxError> {
        let new_id = self.next_id();
        let now = Utc::now();
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let Some(entry) = state
            .dead_letters
            .iter_mut()
            .find(|entry| entry.id == id && entry.is_pending())
        else {
            return Ok(None);
        };

        entry.resolved_at = Some(now);
        entry.resolved_by = Some("requeue".to_string());
        entry.resolution_notes = Some(format!("requeued as event {}", new_id));

        let row = OutboxEvent {
            id: new_id,
            transaction_id: entry.transaction_id,
            event_type: entry.event_type.clone(),
            aggregate_id: entry.aggregate_id.clone(),
            payload: entry.payload.clone(),
            metadata: entry.metadata.clone(),
            created_at: now,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            claim: None,
        };
        state.rows.insert(new_id, row);

        Ok(Some(new_id))
    }

    async fn get_stats(&self) -> Result<DeadLetterStats, OutboxError> {
        let now = Utc::now();
        let state = lock(&self.state);
        let pending = state.dead_letters.iter().filter(|e| e.is_pending());

        Ok(DeadLetterStats {
            pending_count: pending.clone().count() as u64,
            resolved_count: state.dead_letters.iter().filter(|e| !e.is_pending()).count()
                as u64,
            oldest_pending_age_seconds: pending
                .map(|e| now.signed_duration_since(e.moved_at).num_seconds())
                .max(),
        })
    }

    async fn cleanup_resolved(&self, older_than: Duration) -> Result<u64, OutboxError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = lock(&self.state);
        let before = state.dead_letters.len();
        state
            .dead_letters
            .retain(|entry| entry.resolved_at.map_or(true, |at| at > cutoff));
        Ok((before - state.dead_letters.len()) as u64)
    }
}
