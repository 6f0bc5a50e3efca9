//! In-memory delivery queue and send selection.
//!
//! Records keep append order. Every mutation after a send round addresses
//! records by [`RecordId`], so two identical bodies are never confused.

use serde_json::Value;
use std::collections::VecDeque;

use crate::backoff::Backoff;
use crate::config::BatchingPolicy;

/// Identity assigned to a record when it is enqueued.
pub type RecordId = u64;

/// A pending event awaiting delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
    pub id: RecordId,
    /// Fully enriched body; never modified after enqueue
    pub body: Value,
    /// Failed sends that included this record
    pub attempt: u32,
    /// Earliest clock time (ms) this record may be selected
    pub next_attempt_at: u64,
}

/// Records chosen for one send round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub ids: Vec<RecordId>,
    pub bodies: Vec<Value>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Result of applying a failed round to the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureOutcome {
    pub rescheduled: Vec<RecordId>,
    /// Records removed because they ran out of retries
    pub dropped: Vec<RecordId>,
}

/// Ordered queue of pending records.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    records: VecDeque<QueuedRecord>,
    next_id: RecordId,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its id.
    pub fn push(&mut self, body: Value, attempt: u32, next_attempt_at: u64) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push_back(QueuedRecord {
            id,
            body,
            attempt,
            next_attempt_at,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: RecordId) -> Option<&QueuedRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Pick the records due at `now`, in queue order.
    ///
    /// With batching, up to `max_batch_size` due records; without, only the
    /// earliest due record. Records due later are skipped wherever they sit.
    pub fn select(&self, now: u64, batching: &BatchingPolicy) -> Selection {
        let limit = if batching.enabled {
            batching.max_batch_size.max(1)
        } else {
            1
        };

        let mut selection = Selection::default();
        for record in self
            .records
            .iter()
            .filter(|r| r.next_attempt_at <= now)
            .take(limit)
        {
            selection.ids.push(record.id);
            selection.bodies.push(record.body.clone());
        }
        selection
    }

    /// Remove the given records; returns how many were present.
    pub fn remove(&mut self, ids: &[RecordId]) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !ids.contains(&r.id));
        before - self.records.len()
    }

    /// Count a failed send against exactly `ids`.
    ///
    /// Each record's attempt goes up by one. Records past the retry limit are
    /// removed, the rest become due at `now + delay(attempt)`.
    pub fn record_failure(&mut self, ids: &[RecordId], now: u64, backoff: &Backoff) -> FailureOutcome {
        let retries = backoff.policy().retries;
        let mut outcome = FailureOutcome::default();

        for record in self.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.attempt += 1;
            if record.attempt > retries {
                outcome.dropped.push(record.id);
            } else {
                let delay = u64::try_from(backoff.delay(record.attempt).as_millis()).unwrap_or(u64::MAX);
                record.next_attempt_at = now.saturating_add(delay);
                outcome.rescheduled.push(record.id);
            }
        }

        if !outcome.dropped.is_empty() {
            self.remove(&outcome.dropped);
        }
        outcome
    }

    /// Earliest due time across all records.
    pub fn next_due(&self) -> Option<u64> {
        self.records.iter().map(|r| r.next_attempt_at).min()
    }
}
