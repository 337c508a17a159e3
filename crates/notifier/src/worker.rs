//! Dispatch worker: claims due notifications and drives each one to a
//! terminal or rescheduled state.
//!
//! Per claimed row: admission policy (if attached) → payload check → send
//! (bounded, deduplicated by [`NotificationRecord::delivery_key`]) → queue
//! bookkeeping. A policy denial requeues the row at the time the denial lifts
//! without spending a retry; a send failure goes through [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use herald_common::clock::Clock;
use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::types::{NotificationRecord, NotificationStatus, mask_recipient};
use herald_engine::idempotency::IdempotencyStore;
use herald_engine::policy::{AdmissionPolicy, DenyReason, PolicyDecision};

use crate::queue::NotificationQueue;
use crate::retry::RetryPolicy;
use crate::transport::{DeliveryReceipt, Transport, TransportError};

pub type DeliveryIdempotency = IdempotencyStore<DeliveryReceipt, TransportError>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub claim_timeout: Duration,
    pub send_timeout: Duration,
    /// Claims older than this are returned to the queue each tick; `None` disables the sweep.
    pub stale_claim_after: Option<Duration>,
    /// How long an opted-out notification waits before it is evaluated again.
    pub opt_out_recheck: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "herald-worker".to_string(),
            poll_interval: Duration::from_millis(2000),
            batch_size: 10,
            claim_timeout: Duration::from_millis(5000),
            send_timeout: Duration::from_millis(10_000),
            stale_claim_after: None,
            opt_out_recheck: Duration::from_secs(86_400),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms.max(1)),
            batch_size: config.worker_batch_size,
            claim_timeout: Duration::from_millis(config.worker_claim_timeout_ms),
            send_timeout: Duration::from_millis(config.notify_send_timeout_ms),
            stale_claim_after: config.worker_stale_claim_secs.map(Duration::from_secs),
            opt_out_recheck: Duration::from_secs(config.notify_opt_out_recheck_secs),
            retry: RetryPolicy::from_app_config(config),
        }
    }
}

/// What happened to one claimed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent {
        id: Uuid,
        message_id: Option<String>,
    },
    Retrying {
        id: Uuid,
        retry_count: i32,
        next_attempt_at: Option<DateTime<Utc>>,
        error: String,
    },
    Failed {
        id: Uuid,
        retry_count: i32,
        error: String,
    },
    Deferred {
        id: Uuid,
        reason: DenyReason,
        next_attempt_at: DateTime<Utc>,
    },
    /// The row could not be updated; it stays claimed until swept.
    QueueError { id: Uuid, error: String },
}

impl DispatchOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            DispatchOutcome::Sent { id, .. }
            | DispatchOutcome::Retrying { id, .. }
            | DispatchOutcome::Failed { id, .. }
            | DispatchOutcome::Deferred { id, .. }
            | DispatchOutcome::QueueError { id, .. } => *id,
        }
    }

    /// Status the row was moved to, if the update landed.
    pub fn status(&self) -> Option<NotificationStatus> {
        match self {
            DispatchOutcome::Sent { .. } => Some(NotificationStatus::Sent),
            DispatchOutcome::Retrying { .. } | DispatchOutcome::Deferred { .. } => {
                Some(NotificationStatus::Queued)
            }
            DispatchOutcome::Failed { .. } => Some(NotificationStatus::Failed),
            DispatchOutcome::QueueError { .. } => None,
        }
    }
}

/// Polling dispatch worker.
pub struct DispatchWorker {
    queue: Arc<dyn NotificationQueue>,
    transport: Arc<dyn Transport>,
    policy: Option<Arc<AdmissionPolicy>>,
    idempotency: Option<Arc<DeliveryIdempotency>>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl DispatchWorker {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            policy: None,
            idempotency: None,
            clock,
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<AdmissionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_idempotency(mut self, store: Arc<DeliveryIdempotency>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between batches: a batch already claimed is
    /// processed to completion before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            policy = self.policy.is_some(),
            "Dispatch worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                tracing::warn!(
                    event = "notify.queue_error",
                    worker_id = %self.config.worker_id,
                    error = %e,
                    "Dispatch tick failed"
                );
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Dispatch worker stopped");
        Ok(())
    }

    async fn tick(&self) -> Result<Vec<DispatchOutcome>, AppError> {
        if let Some(after) = self.config.stale_claim_after {
            self.release_stale_claims(after).await?;
        }
        self.run_once().await
    }

    async fn release_stale_claims(&self, after: Duration) -> Result<u64, AppError> {
        let locked_before = chrono::Duration::from_std(after)
            .ok()
            .and_then(|after| self.clock.now().checked_sub_signed(after))
            .ok_or_else(|| AppError::Config("Stale claim window is out of range".to_string()))?;
        let released = self.queue.release_stale_claims(locked_before).await?;
        if released > 0 {
            tracing::warn!(
                event = "notify.claims_released",
                released,
                "Returned stale claims to the queue"
            );
        }
        Ok(released)
    }

    /// Claim one batch and process it. Returns one outcome per claimed row.
    pub async fn run_once(&self) -> Result<Vec<DispatchOutcome>, AppError> {
        let now = self.clock.now();
        let claim = self
            .queue
            .claim_batch(self.config.batch_size, &self.config.worker_id, now);

        let claimed = tokio::time::timeout(self.config.claim_timeout, claim)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "claim_batch exceeded {}ms",
                    self.config.claim_timeout.as_millis()
                ))
            })??;

        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(
            event = "notify.claimed",
            worker_id = %self.config.worker_id,
            count = claimed.len(),
            "Claimed notification batch"
        );

        Ok(join_all(claimed.iter().map(|record| self.process(record))).await)
    }

    /// Claim and process one notification immediately, ignoring its scheduled time.
    pub async fn deliver_now(&self, id: Uuid) -> Result<DispatchOutcome, AppError> {
        let record = self
            .queue
            .claim_one(id, &self.config.worker_id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} is not queued", id)))?;

        Ok(self.process(&record).await)
    }

    async fn process(&self, record: &NotificationRecord) -> DispatchOutcome {
        if let Some(policy) = &self.policy {
            if let PolicyDecision::Denied {
                reason,
                message,
                retry_at,
            } = policy.evaluate(&record.recipient).await
            {
                return self.defer(record, reason, &message, retry_at).await;
            }
        }

        match self.send(record).await {
            Ok(receipt) => self.complete(record, receipt).await,
            Err(e) => self.fail(record, e).await,
        }
    }

    async fn send(&self, record: &NotificationRecord) -> Result<DeliveryReceipt, TransportError> {
        if payload_is_empty(&record.payload) {
            return Err(TransportError::InvalidPayload(format!(
                "Notification {} payload is empty",
                record.id
            )));
        }

        let attempt = move || async move {
            match tokio::time::timeout(
                self.config.send_timeout,
                self.transport.send(&record.recipient, &record.payload),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(
                    self.config.send_timeout.as_millis() as u64,
                )),
            }
        };

        match &self.idempotency {
            Some(store) => {
                store.execute(&record.delivery_key(), attempt).await
            }
            None => attempt().await,
        }
    }

    async fn complete(&self, record: &NotificationRecord, receipt: DeliveryReceipt) -> DispatchOutcome {
        match self.queue.mark_sent(record, self.clock.now()).await {
            Ok(true) => {
                tracing::info!(
                    event = "notify.send_ok",
                    id = %record.id,
                    notification_type = %record.notification_type,
                    recipient = %mask_recipient(&record.recipient),
                    message_id = receipt.message_id.as_deref().unwrap_or(""),
                    "Notification sent"
                );
                DispatchOutcome::Sent {
                    id: record.id,
                    message_id: receipt.message_id,
                }
            }
            Ok(false) => self.claim_lost(record, "mark_sent"),
            Err(e) => self.queue_error(record, e),
        }
    }

    async fn fail(&self, record: &NotificationRecord, error: TransportError) -> DispatchOutcome {
        let message = error.to_string();
        let update = self
            .config
            .retry
            .on_failure(record, &message, self.clock.now());

        match self.queue.record_failure(record, &update).await {
            Ok(true) if update.status == NotificationStatus::Failed => {
                tracing::error!(
                    event = "notify.send_failed",
                    alert = true,
                    id = %record.id,
                    notification_type = %record.notification_type,
                    recipient = %mask_recipient(&record.recipient),
                    retry_count = update.retry_count,
                    error = %message,
                    "Notification failed permanently"
                );
                DispatchOutcome::Failed {
                    id: record.id,
                    retry_count: update.retry_count,
                    error: message,
                }
            }
            Ok(true) => {
                tracing::warn!(
                    event = "notify.send_retry",
                    id = %record.id,
                    notification_type = %record.notification_type,
                    recipient = %mask_recipient(&record.recipient),
                    retry_count = update.retry_count,
                    next_attempt_at = ?update.next_attempt_at,
                    error = %message,
                    "Notification send failed, scheduled retry"
                );
                DispatchOutcome::Retrying {
                    id: record.id,
                    retry_count: update.retry_count,
                    next_attempt_at: update.next_attempt_at,
                    error: message,
                }
            }
            Ok(false) => self.claim_lost(record, "record_failure"),
            Err(e) => self.queue_error(record, e),
        }
    }

    async fn defer(
        &self,
        record: &NotificationRecord,
        reason: DenyReason,
        message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> DispatchOutcome {
        let now = self.clock.now();
        let next_attempt_at = retry_at.unwrap_or_else(|| {
            chrono::Duration::from_std(self.config.opt_out_recheck)
                .ok()
                .and_then(|recheck| now.checked_add_signed(recheck))
                .unwrap_or(now + chrono::Duration::days(1))
        });
        let note = format!("{}: {}", reason, message);

        match self.queue.defer(record, next_attempt_at, &note).await {
            Ok(true) => DispatchOutcome::Deferred {
                id: record.id,
                reason,
                next_attempt_at,
            },
            Ok(false) => self.claim_lost(record, "defer"),
            Err(e) => self.queue_error(record, e),
        }
    }

    fn claim_lost(&self, record: &NotificationRecord, operation: &str) -> DispatchOutcome {
        tracing::warn!(
            event = "notify.queue_error",
            id = %record.id,
            operation,
            "Notification was no longer claimed by this worker"
        );
        DispatchOutcome::QueueError {
            id: record.id,
            error: format!("{}: claim lost", operation),
        }
    }

    fn queue_error(&self, record: &NotificationRecord, error: AppError) -> DispatchOutcome {
        tracing::error!(
            event = "notify.queue_error",
            id = %record.id,
            error = %error,
            "Failed to update notification state"
        );
        DispatchOutcome::QueueError {
            id: record.id,
            error: error.to_string(),
        }
    }
}

fn payload_is_empty(payload: &serde_json::Value) -> bool {
    match payload {
        serde_json::Value::Null => true,
        serde_json::Value::Object(fields) => fields.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use herald_common::clock::ManualClock;
    use herald_common::types::NewNotification;
    use herald_engine::policy::PolicyConfig;
    use herald_engine::settings::{PartialPolicySettings, StaticSettingsProvider};
    use herald_engine::throttle::ThrottleBucketStore;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::queue::MemoryNotificationQueue;

    /// Returns scripted results in order, then succeeds.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<DeliveryReceipt, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn with(results: Vec<Result<DeliveryReceipt, TransportError>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _: &str, _: &serde_json::Value) -> Result<DeliveryReceipt, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().pop_front().unwrap_or(Ok(DeliveryReceipt {
                message_id: Some("wamid.OK".to_string()),
            }))
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _: &str, _: &serde_json::Value) -> Result<DeliveryReceipt, TransportError> {
            std::future::pending::<()>().await;
            Ok(DeliveryReceipt::default())
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn worker(
        queue: Arc<MemoryNotificationQueue>,
        transport: Arc<dyn Transport>,
        clock: Arc<ManualClock>,
    ) -> DispatchWorker {
        DispatchWorker::new(queue, transport, clock, WorkerConfig::default())
    }

    fn policy(clock: Arc<ManualClock>, settings: PartialPolicySettings) -> Arc<AdmissionPolicy> {
        Arc::new(AdmissionPolicy::new(
            Arc::new(StaticSettingsProvider::new(settings)),
            Arc::new(ThrottleBucketStore::new()),
            clock,
            PolicyConfig::default(),
        ))
    }

    async fn enqueue(queue: &MemoryNotificationQueue, recipient: &str, at: DateTime<Utc>) -> Uuid {
        queue
            .enqueue(NewNotification::new(recipient, json!({"text": "hello"})), at)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_successful_send_marks_sent() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = enqueue(&queue, "+250788123456", noon()).await;

        let outcomes = worker(queue.clone(), transport.clone(), clock.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Sent {
                id,
                message_id: Some("wamid.OK".to_string())
            }]
        );
        let row = queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
        assert_eq!(row.sent_at, Some(noon()));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_requeues_with_backoff() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::with(vec![Err(TransportError::Rejected {
            status: 500,
            detail: "upstream".to_string(),
        })]));
        let id = enqueue(&queue, "+250788123456", noon()).await;

        let outcomes = worker(queue.clone(), transport, clock.clone())
            .run_once()
            .await
            .unwrap();
        assert!(matches!(outcomes[0], DispatchOutcome::Retrying { retry_count: 1, .. }));

        let row = queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Queued);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.next_attempt_at, Some(noon() + chrono::Duration::seconds(30)));
        assert!(row.error_message.unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_empty_payload_counts_as_failure() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = enqueue(&queue, "+250788123456", noon()).await;
        let mut row = queue.get(id).await.unwrap().unwrap();
        row.payload = json!({});
        queue.insert(row);

        let outcomes = worker(queue.clone(), transport.clone(), clock)
            .run_once()
            .await
            .unwrap();
        assert!(matches!(outcomes[0], DispatchOutcome::Retrying { .. }));
        assert_eq!(transport.calls(), 0);
        let row = queue.get(id).await.unwrap().unwrap();
        assert!(row.error_message.unwrap().contains("payload is empty"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_is_a_failure() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let id = enqueue(&queue, "+250788123456", noon()).await;

        let outcomes = worker(queue.clone(), Arc::new(HangingTransport), clock)
            .run_once()
            .await
            .unwrap();
        assert!(matches!(outcomes[0], DispatchOutcome::Retrying { .. }));
        let row = queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.error_message.as_deref(), Some("Send timed out after 10000ms"));
    }

    #[tokio::test]
    async fn test_quiet_hours_defers_without_spending_retry() {
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(late));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = enqueue(&queue, "+250788123456", late).await;

        let worker = worker(queue.clone(), transport.clone(), clock.clone())
            .with_policy(policy(clock, PartialPolicySettings::default()));
        let outcomes = worker.run_once().await.unwrap();

        let morning = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Deferred {
                id,
                reason: DenyReason::QuietHours,
                next_attempt_at: morning,
            }]
        );
        let row = queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Queued);
        assert_eq!(row.retry_count, 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_opt_out_defers_by_recheck_interval() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = enqueue(&queue, "+250788123456", noon()).await;

        let settings = PartialPolicySettings {
            opt_out_list: Some(vec!["+250788123456".to_string()]),
            ..PartialPolicySettings::default()
        };
        let worker = worker(queue.clone(), transport.clone(), clock.clone())
            .with_policy(policy(clock, settings));
        let outcomes = worker.run_once().await.unwrap();

        assert!(matches!(
            outcomes[0],
            DispatchOutcome::Deferred {
                reason: DenyReason::OptOut,
                ..
            }
        ));
        let row = queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.next_attempt_at, Some(noon() + chrono::Duration::days(1)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_deliver_now_bypasses_delay() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = queue
            .enqueue(
                NewNotification::new("+250788123456", json!({"text": "later"})).with_delay(3600),
                noon(),
            )
            .await
            .unwrap()
            .id;

        let worker = worker(queue.clone(), transport, clock);
        assert!(worker.run_once().await.unwrap().is_empty());

        let outcome = worker.deliver_now(id).await.unwrap();
        assert_eq!(outcome.status(), Some(NotificationStatus::Sent));

        let again = worker.deliver_now(id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotency_replays_receipt_for_reclaimed_row() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = enqueue(&queue, "+250788123456", noon()).await;

        let store = Arc::new(DeliveryIdempotency::new(Duration::from_secs(3600)));
        let worker = worker(queue.clone(), transport.clone(), clock.clone())
            .with_idempotency(store);

        worker.run_once().await.unwrap();
        // Simulate the row being requeued after a lost acknowledgement.
        let mut row = queue.get(id).await.unwrap().unwrap();
        row.status = NotificationStatus::Queued;
        queue.insert(row);

        let outcomes = worker.run_once().await.unwrap();
        assert_eq!(outcomes[0].status(), Some(NotificationStatus::Sent));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_claims_swept_on_tick() {
        let clock = Arc::new(ManualClock::new(noon()));
        let queue = Arc::new(MemoryNotificationQueue::new());
        let transport = Arc::new(ScriptedTransport::default());
        let id = enqueue(&queue, "+250788123456", noon()).await;
        queue.claim_batch(1, "crashed-worker", noon()).await.unwrap();

        let config = WorkerConfig {
            stale_claim_after: Some(Duration::from_secs(300)),
            ..WorkerConfig::default()
        };
        let worker = DispatchWorker::new(queue.clone(), transport, clock.clone(), config);

        assert!(worker.tick().await.unwrap().is_empty());
        clock.advance(chrono::Duration::seconds(301));
        let outcomes = worker.tick().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].id(), id);
        assert_eq!(
            queue.get(id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[test]
    fn test_payload_is_empty() {
        assert!(payload_is_empty(&json!(null)));
        assert!(payload_is_empty(&json!({})));
        assert!(payload_is_empty(&json!("  ")));
        assert!(!payload_is_empty(&json!({"text": "hi"})));
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let outcome = DispatchOutcome::Failed {
            id: Uuid::nil(),
            retry_count: 5,
            error: "HTTP 500".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["retry_count"], 5);
    }
}
