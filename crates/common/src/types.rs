use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a queued notification.
///
/// `queued → claimed → {sent | queued | failed}`; `sent` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Queued,
    Claimed,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Failed)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Queued => write!(f, "queued"),
            NotificationStatus::Claimed => write!(f, "claimed"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A notification row as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient: String,
    pub payload: serde_json::Value,
    pub notification_type: String,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

impl NotificationRecord {
    /// Key the send is deduplicated under.
    ///
    /// Rows enqueued with the same producer key for the same recipient share
    /// one delivery; rows without a key are only deduplicated against themselves.
    pub fn delivery_key(&self) -> String {
        match &self.idempotency_key {
            Some(key) => format!("{}:{}", self.recipient, key),
            None => format!("notification:{}", self.id),
        }
    }
}

/// Producer-side request to enqueue a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient: String,
    pub payload: serde_json::Value,
    /// Free-form label used in logs (default: "generic")
    pub notification_type: Option<String>,
    /// Delay before the first delivery attempt, in seconds
    pub delay_seconds: Option<u64>,
    /// Producer's id for the logical event, e.g. an order or payment id
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl NewNotification {
    pub fn new(recipient: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            recipient: recipient.into(),
            payload,
            notification_type: None,
            delay_seconds: None,
            idempotency_key: None,
        }
    }

    pub fn with_type(mut self, notification_type: impl Into<String>) -> Self {
        self.notification_type = Some(notification_type.into());
        self
    }

    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Default label for notifications enqueued without a type.
pub const DEFAULT_NOTIFICATION_TYPE: &str = "generic";

/// Normalize a recipient to `+<digits>` form.
///
/// Empty input stays empty so validation can reject it.
pub fn normalize_recipient(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('+') {
        return trimmed.to_string();
    }
    format!("+{}", trimmed)
}

/// Mask a recipient for logging, keeping only the last four characters.
pub fn mask_recipient(recipient: &str) -> String {
    let normalized = normalize_recipient(recipient);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() <= 4 {
        return normalized;
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", tail)
}
