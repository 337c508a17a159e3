use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{NewNotification, NotificationRecord, NotificationStatus};

use super::{FailureUpdate, NotificationQueue, PreparedInsert, log_queued};

/// In-process queue with the same transition rules as the Postgres one.
///
/// A single lock covers select-and-mark, which gives the same disjoint-claim
/// guarantee `SKIP LOCKED` gives across connections.
#[derive(Default)]
pub struct MemoryNotificationQueue {
    rows: Mutex<HashMap<Uuid, NotificationRecord>>,
}

impl MemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row as-is, bypassing validation.
    pub fn insert(&self, record: NotificationRecord) {
        self.rows.lock().insert(record.id, record);
    }

    pub fn all(&self) -> Vec<NotificationRecord> {
        let mut rows: Vec<_> = self.rows.lock().values().cloned().collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        rows
    }

    pub fn count_by_status(&self, status: NotificationStatus) -> usize {
        self.rows
            .lock()
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// Apply `apply` only if the row still holds the claim described by `claim`.
    fn update_claimed<F>(&self, claim: &NotificationRecord, apply: F) -> bool
    where
        F: FnOnce(&mut NotificationRecord),
    {
        let mut rows = self.rows.lock();
        match rows.get_mut(&claim.id) {
            Some(row) if holds_claim(row, claim) => {
                apply(row);
                true
            }
            _ => false,
        }
    }
}

fn holds_claim(row: &NotificationRecord, claim: &NotificationRecord) -> bool {
    row.status == NotificationStatus::Claimed
        && row.claimed_by.is_some()
        && row.claimed_by == claim.claimed_by
        && row.locked_at.is_some()
        && row.locked_at == claim.locked_at
}

fn claim(row: &mut NotificationRecord, worker_id: &str, now: DateTime<Utc>) {
    row.status = NotificationStatus::Claimed;
    row.locked_at = Some(now);
    row.claimed_by = Some(worker_id.to_string());
}

#[async_trait]
impl NotificationQueue for MemoryNotificationQueue {
    async fn enqueue(
        &self,
        notification: NewNotification,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, AppError> {
        let prepared = PreparedInsert::new(notification, now)?;
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            recipient: prepared.recipient,
            payload: prepared.payload,
            notification_type: prepared.notification_type,
            status: NotificationStatus::Queued,
            retry_count: 0,
            next_attempt_at: prepared.next_attempt_at,
            locked_at: None,
            claimed_by: None,
            error_message: None,
            created_at: now,
            sent_at: None,
            idempotency_key: prepared.idempotency_key,
        };
        self.rows.lock().insert(record.id, record.clone());
        log_queued(&record);
        Ok(record)
    }

    async fn claim_batch(
        &self,
        limit: u32,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        let mut rows = self.rows.lock();

        let mut due: Vec<(Option<DateTime<Utc>>, DateTime<Utc>, Uuid)> = rows
            .values()
            .filter(|r| r.status == NotificationStatus::Queued)
            .filter(|r| r.next_attempt_at.is_none_or(|at| at <= now))
            .map(|r| (r.next_attempt_at, r.created_at, r.id))
            .collect();
        // NULLS FIRST, then oldest first
        due.sort();
        due.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, _, id) in due {
            if let Some(row) = rows.get_mut(&id) {
                claim(row, worker_id, now);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn claim_one(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationRecord>, AppError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&id) {
            Some(row) if row.status == NotificationStatus::Queued => {
                claim(row, worker_id, now);
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_sent(
        &self,
        claim: &NotificationRecord,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self.update_claimed(claim, |row| {
            row.status = NotificationStatus::Sent;
            row.sent_at = Some(sent_at);
            row.error_message = None;
            row.next_attempt_at = None;
        }))
    }

    async fn record_failure(
        &self,
        claim: &NotificationRecord,
        update: &FailureUpdate,
    ) -> Result<bool, AppError> {
        Ok(self.update_claimed(claim, |row| {
            row.retry_count = update.retry_count;
            row.status = update.status;
            row.next_attempt_at = update.next_attempt_at;
            row.error_message = Some(update.error_message.clone());
        }))
    }

    async fn defer(
        &self,
        claim: &NotificationRecord,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<bool, AppError> {
        Ok(self.update_claimed(claim, |row| {
            row.status = NotificationStatus::Queued;
            row.next_attempt_at = Some(next_attempt_at);
            row.error_message = Some(reason.to_string());
        }))
    }

    async fn release_stale_claims(&self, locked_before: DateTime<Utc>) -> Result<u64, AppError> {
        let mut rows = self.rows.lock();
        let mut released = 0;
        for row in rows.values_mut() {
            let stale = row.status == NotificationStatus::Claimed
                && row.locked_at.is_some_and(|at| at < locked_before);
            if stale {
                row.status = NotificationStatus::Queued;
                row.claimed_by = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, AppError> {
        Ok(self.rows.lock().get(&id).cloned())
    }
}
