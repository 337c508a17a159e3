use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{NewNotification, NotificationRecord, NotificationStatus};

use super::{FailureUpdate, NotificationQueue, PreparedInsert, log_queued};

const COLUMNS: &str = "id, recipient, payload, notification_type, status, retry_count, \
     next_attempt_at, locked_at, claimed_by, error_message, created_at, sent_at, idempotency_key";

/// Postgres-backed queue over the `notifications` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers partition the
/// due rows between them instead of blocking on each other. Transitions out
/// of `claimed` match on `claimed_by` and `locked_at` as well as the status.
#[derive(Clone)]
pub struct PgNotificationQueue {
    pool: PgPool,
}

impl PgNotificationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationQueue for PgNotificationQueue {
    async fn enqueue(
        &self,
        notification: NewNotification,
        now: DateTime<Utc>,
    ) -> Result<NotificationRecord, AppError> {
        let prepared = PreparedInsert::new(notification, now)?;

        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            INSERT INTO notifications
                (id, recipient, payload, notification_type, status, next_attempt_at, created_at, idempotency_key)
            VALUES ($1, $2, $3, $4, 'queued', $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&prepared.recipient)
        .bind(&prepared.payload)
        .bind(&prepared.notification_type)
        .bind(prepared.next_attempt_at)
        .bind(now)
        .bind(&prepared.idempotency_key)
        .fetch_one(&self.pool)
        .await?;

        log_queued(&record);
        Ok(record)
    }

    async fn claim_batch(
        &self,
        limit: u32,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            UPDATE notifications AS n
            SET status = 'claimed', locked_at = $2, claimed_by = $3
            FROM (
                SELECT id FROM notifications
                WHERE status = 'queued'
                  AND (next_attempt_at IS NULL OR next_attempt_at <= $2)
                ORDER BY next_attempt_at ASC NULLS FIRST, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ) AS due
            WHERE n.id = due.id
            RETURNING {}
            "#,
            qualified_columns("n")
        ))
        .bind(i64::from(limit))
        .bind(now)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn claim_one(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationRecord>, AppError> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            r#"
            UPDATE notifications
            SET status = 'claimed', locked_at = $2, claimed_by = $3
            WHERE id = $1 AND status = 'queued'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn mark_sent(
        &self,
        claim: &NotificationRecord,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sent', sent_at = $4, error_message = NULL, next_attempt_at = NULL
            WHERE id = $1 AND status = 'claimed' AND claimed_by = $2 AND locked_at = $3
            "#,
        )
        .bind(claim.id)
        .bind(&claim.claimed_by)
        .bind(claim.locked_at)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(
        &self,
        claim: &NotificationRecord,
        update: &FailureUpdate,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET retry_count = $4, status = $5, next_attempt_at = $6, error_message = $7
            WHERE id = $1 AND status = 'claimed' AND claimed_by = $2 AND locked_at = $3
            "#,
        )
        .bind(claim.id)
        .bind(&claim.claimed_by)
        .bind(claim.locked_at)
        .bind(update.retry_count)
        .bind(update.status)
        .bind(update.next_attempt_at)
        .bind(&update.error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn defer(
        &self,
        claim: &NotificationRecord,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'queued', next_attempt_at = $4, error_message = $5
            WHERE id = $1 AND status = 'claimed' AND claimed_by = $2 AND locked_at = $3
            "#,
        )
        .bind(claim.id)
        .bind(&claim.claimed_by)
        .bind(claim.locked_at)
        .bind(next_attempt_at)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_stale_claims(&self, locked_before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2, claimed_by = NULL
            WHERE status = 'claimed' AND locked_at < $1
            "#,
        )
        .bind(locked_before)
        .bind(NotificationStatus::Queued)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, AppError> {
        let record = sqlx::query_as::<_, NotificationRecord>(&format!(
            "SELECT {COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

fn qualified_columns(alias: &str) -> String {
    COLUMNS
        .split(',')
        .map(|column| format!("{}.{}", alias, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
