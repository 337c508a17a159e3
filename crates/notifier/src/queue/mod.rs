//! Notification queue: durable store of outbound notifications.
//!
//! Rows move `queued → claimed → {sent | queued | failed}`. Every transition
//! out of `claimed` takes the claimed record and only applies while the row
//! still carries that claim (`claimed_by` and `locked_at` unchanged). A worker
//! whose claim was swept and handed to another worker gets `false` back and
//! leaves the new claim alone.

mod memory;
mod postgres;

pub use memory::MemoryNotificationQueue;
pub use postgres::PgNotificationQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    DEFAULT_NOTIFICATION_TYPE, NewNotification, NotificationRecord, NotificationStatus,
    mask_recipient, normalize_recipient,
};

/// Failure bookkeeping applied to a claimed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    /// New retry count (previous + 1).
    pub retry_count: i32,
    /// `Queued` while retries remain, otherwise `Failed`.
    pub status: NotificationStatus,
    /// Earliest time of the next attempt; `None` once failed.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_message: String,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Validate and insert a new notification in `queued` state.
    async fn enqueue(
        &self,
        notification: NewNotification,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, AppError>;

    /// Atomically claim up to `limit` due rows for `worker_id`.
    ///
    /// A row is due when it is `queued` and its `next_attempt_at` is unset or
    /// not after `now`. Concurrent callers never receive the same row.
    async fn claim_batch(
        &self,
        limit: u32,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, AppError>;

    /// Claim one specific `queued` row regardless of its `next_attempt_at`.
    async fn claim_one(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationRecord>, AppError>;

    /// Mark a claimed row as sent.
    ///
    /// `claim` is the record as returned by `claim_batch`/`claim_one`. Returns
    /// `false` if the row no longer holds that claim.
    async fn mark_sent(
        &self,
        claim: &NotificationRecord,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Apply a failed attempt to a claimed row.
    async fn record_failure(
        &self,
        claim: &NotificationRecord,
        update: &FailureUpdate,
    ) -> Result<bool, AppError>;

    /// Return a claimed row to `queued` without counting an attempt.
    async fn defer(
        &self,
        claim: &NotificationRecord,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<bool, AppError>;

    /// Return rows claimed before `locked_before` to `queued`.
    async fn release_stale_claims(&self, locked_before: DateTime<Utc>) -> Result<u64, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, AppError>;
}

/// A validated insert, shared by both queue backends.
#[derive(Debug, Clone)]
pub(crate) struct PreparedInsert {
    pub recipient: String,
    pub payload: serde_json::Value,
    pub notification_type: String,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

impl PreparedInsert {
    pub(crate) fn new(notification: NewNotification, now: DateTime<Utc>) -> Result<Self, AppError> {
        let recipient = normalize_recipient(&notification.recipient);
        if recipient.len() < 2 {
            return Err(AppError::Validation("recipient is empty".to_string()));
        }

        match notification.payload.as_object() {
            Some(fields) if !fields.is_empty() => {}
            Some(_) => return Err(AppError::Validation("payload is empty".to_string())),
            None => {
                return Err(AppError::Validation(
                    "payload must be a JSON object".to_string(),
                ));
            }
        }

        let notification_type = notification
            .notification_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_TYPE.to_string());

        let idempotency_key = notification
            .idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let next_attempt_at = match notification.delay_seconds.filter(|secs| *secs > 0) {
            Some(secs) => Some(
                i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .and_then(|delay| now.checked_add_signed(delay))
                    .ok_or_else(|| AppError::Validation("delay_seconds is out of range".to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            recipient,
            payload: notification.payload,
            notification_type,
            next_attempt_at,
            idempotency_key,
        })
    }
}

pub(crate) fn log_queued(record: &NotificationRecord) {
    tracing::info!(
        event = "notify.queued",
        id = %record.id,
        notification_type = %record.notification_type,
        recipient = %mask_recipient(&record.recipient),
        next_attempt_at = ?record.next_attempt_at,
        "Notification queued"
    );
}
