//! Relay counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free counters shared by every relay entry point
#[derive(Debug, Default)]
pub struct RelayMetrics {
    published: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    deferred: AtomicU64,
    claim_lost: AtomicU64,
    sweeps: AtomicU64,
    commit_signals: AtomicU64,
    max_send_ms: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMetricsSnapshot {
    pub published: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub deferred: u64,
    pub claim_lost: u64,
    pub sweeps: u64,
    pub commit_signals: u64,
    pub max_send_ms: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self, send_ms: u64) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.max_send_ms.fetch_max(send_ms, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self, count: u64) {
        self.deferred.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_claim_lost(&self) {
        self.claim_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_signal(&self) {
        self.commit_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            claim_lost: self.claim_lost.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            commit_signals: self.commit_signals.load(Ordering::Relaxed),
            max_send_ms: self.max_send_ms.load(Ordering::Relaxed),
        }
    }
}
