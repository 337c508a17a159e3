//! Admission policy: decides whether a recipient may be messaged right now.
//!
//! Checks run in a fixed order and stop at the first denial:
//! 1. Opt-out list (exact match)
//! 2. Quiet hours (local time, window may wrap past midnight)
//! 3. Process-local throttle bucket (always counts the call once reached)
//! 4. Optional per-recipient limit through the distributed rate limiter
//!
//! A denial is an ordinary outcome, returned as [`PolicyDecision::Denied`]
//! with a suggested retry time. Nothing in here returns an error: settings
//! failures fall back to defaults and limiter failures fail open.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use herald_common::clock::Clock;
use herald_common::config::AppConfig;
use herald_common::types::mask_recipient;

use crate::rate_limiter::RateLimiter;
use crate::settings::{PolicySettings, QuietHours, SettingsProvider};
use crate::throttle::ThrottleBucketStore;

/// Default throttle bucket key.
pub const DEFAULT_CHANNEL_KEY: &str = "whatsapp";

/// Why a delivery was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    OptOut,
    QuietHours,
    Throttled,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::OptOut => write!(f, "opt_out"),
            DenyReason::QuietHours => write!(f, "quiet_hours"),
            DenyReason::Throttled => write!(f, "throttled"),
        }
    }
}

/// Result of evaluating a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allowed,
    Denied {
        reason: DenyReason,
        message: String,
        /// Earliest time a retry may succeed; `None` when no time-based retry applies.
        retry_at: Option<DateTime<Utc>>,
    },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            PolicyDecision::Allowed => None,
            PolicyDecision::Denied { reason, .. } => Some(*reason),
        }
    }
}

/// Per-recipient limit enforced through the distributed rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientLimit {
    pub limit: u64,
    pub window_seconds: u64,
}

/// Static knobs of the evaluator.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Throttle bucket key shared by every recipient
    pub channel_key: String,
    /// Offset used to turn `now` into local wall-clock time
    pub utc_offset: FixedOffset,
    /// How long a settings snapshot is reused
    pub settings_ttl: Duration,
    pub recipient_limit: Option<RecipientLimit>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            channel_key: DEFAULT_CHANNEL_KEY.to_string(),
            utc_offset: Utc.fix(),
            settings_ttl: Duration::seconds(30),
            recipient_limit: None,
        }
    }
}

impl PolicyConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let utc_offset = FixedOffset::east_opt(config.policy_utc_offset_minutes * 60)
            .unwrap_or_else(|| {
                tracing::warn!(
                    offset_minutes = config.policy_utc_offset_minutes,
                    "POLICY_UTC_OFFSET_MINUTES out of range, using UTC"
                );
                Utc.fix()
            });

        Self {
            channel_key: DEFAULT_CHANNEL_KEY.to_string(),
            utc_offset,
            settings_ttl: i64::try_from(config.policy_settings_ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            recipient_limit: config.recipient_rate_limit.map(|limit| RecipientLimit {
                limit,
                window_seconds: config.recipient_rate_window_secs,
            }),
        }
    }
}

struct CachedSettings {
    settings: PolicySettings,
    loaded_at: DateTime<Utc>,
}

/// Opt-out, quiet-hours and throttle evaluator.
pub struct AdmissionPolicy {
    settings: Arc<dyn SettingsProvider>,
    throttle: Arc<ThrottleBucketStore>,
    rate_limiter: Option<Arc<RateLimiter>>,
    clock: Arc<dyn Clock>,
    config: PolicyConfig,
    cache: Mutex<Option<CachedSettings>>,
}

impl AdmissionPolicy {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        throttle: Arc<ThrottleBucketStore>,
        clock: Arc<dyn Clock>,
        config: PolicyConfig,
    ) -> Self {
        Self {
            settings,
            throttle,
            rate_limiter: None,
            clock,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Attach the distributed limiter used for [`RecipientLimit`].
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn throttle(&self) -> &Arc<ThrottleBucketStore> {
        &self.throttle
    }

    /// Evaluate whether `recipient` may be messaged now.
    pub async fn evaluate(&self, recipient: &str) -> PolicyDecision {
        let settings = self.snapshot().await;
        let now = self.clock.now();

        if settings.is_opted_out(recipient) {
            return self.deny(
                recipient,
                DenyReason::OptOut,
                "Recipient has opted out of notifications".to_string(),
                None,
            );
        }

        let local = now.with_timezone(&self.config.utc_offset);
        let minutes = local.hour() * 60 + local.minute();
        if settings.quiet_hours.contains(minutes) {
            let q = &settings.quiet_hours;
            return self.deny(
                recipient,
                DenyReason::QuietHours,
                format!("Quiet hours in effect ({}-{})", q.start, q.end),
                quiet_window_end(q, local),
            );
        }

        let limit = settings.throttle_per_minute;
        if !self.throttle.hit(&self.config.channel_key, limit, now) {
            return self.deny(
                recipient,
                DenyReason::Throttled,
                format!("Throttle of {} per minute reached", limit),
                next_minute(now),
            );
        }

        if let (Some(limiter), Some(rl)) = (&self.rate_limiter, self.config.recipient_limit) {
            let key = format!("recipient:{}", recipient);
            let decision = limiter
                .check_rate_limit(&key, rl.limit, rl.window_seconds)
                .await;
            if !decision.allowed {
                return self.deny(
                    recipient,
                    DenyReason::Throttled,
                    format!(
                        "Recipient limit of {} per {}s reached",
                        rl.limit, rl.window_seconds
                    ),
                    Some(decision.reset_at),
                );
            }
        }

        PolicyDecision::Allowed
    }

    /// Drop the cached settings so the next evaluation reloads them.
    pub fn invalidate_settings(&self) {
        *self.cache.lock() = None;
    }

    async fn snapshot(&self) -> PolicySettings {
        let now = self.clock.now();

        let stale = {
            let cache = self.cache.lock();
            match cache.as_ref() {
                Some(cached) if now - cached.loaded_at < self.config.settings_ttl => {
                    return cached.settings.clone();
                }
                Some(cached) => Some(cached.settings.clone()),
                None => None,
            }
        };

        let settings = match self.settings.load().await {
            Ok(partial) => partial.resolve(),
            Err(e) => {
                tracing::warn!(
                    event = "policy.settings_degraded",
                    error = %e,
                    using_previous = stale.is_some(),
                    "Policy settings unavailable, falling back"
                );
                stale.unwrap_or_default()
            }
        };

        *self.cache.lock() = Some(CachedSettings {
            settings: settings.clone(),
            loaded_at: now,
        });
        settings
    }

    fn deny(
        &self,
        recipient: &str,
        reason: DenyReason,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> PolicyDecision {
        tracing::info!(
            event = "notify.policy_denied",
            recipient = %mask_recipient(recipient),
            reason = %reason,
            retry_at = ?retry_at,
            "Delivery denied by admission policy"
        );
        PolicyDecision::Denied {
            reason,
            message,
            retry_at,
        }
    }
}

/// First occurrence of the window's end strictly after `local`.
fn quiet_window_end(q: &QuietHours, local: DateTime<FixedOffset>) -> Option<DateTime<Utc>> {
    let end = q.end_minutes();
    let naive = local
        .date_naive()
        .and_hms_opt(end / 60, end % 60, 0)?;
    let mut candidate = local.timezone().from_local_datetime(&naive).single()?;
    if candidate <= local {
        candidate += Duration::days(1);
    }
    Some(candidate.with_timezone(&Utc))
}

/// Top of the minute following `now`.
fn next_minute(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .map(|t| t + Duration::minutes(1))
}
