//! Admission policy settings and their providers.
//!
//! Settings live outside the dispatch engine. Providers return a
//! [`PartialPolicySettings`] in which every field may be missing; resolving it
//! fills the gaps with defaults, so an incomplete or unreadable source never
//! stops evaluation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use herald_common::config::AppConfig;

pub const DEFAULT_QUIET_START: &str = "22:00";
pub const DEFAULT_QUIET_END: &str = "06:00";
pub const DEFAULT_THROTTLE_PER_MINUTE: u32 = 60;

const DEFAULT_QUIET_START_MINUTES: u32 = 22 * 60;
const DEFAULT_QUIET_END_MINUTES: u32 = 6 * 60;

pub const KEY_QUIET_HOURS: &str = "notify.quiet_hours";
pub const KEY_OPT_OUT_LIST: &str = "notify.opt_out_list";
pub const KEY_THROTTLE_PER_MINUTE: &str = "notify.throttle_per_minute";

/// Daily window, `HH:MM` to `HH:MM` local time, during which nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            start: DEFAULT_QUIET_START.to_string(),
            end: DEFAULT_QUIET_END.to_string(),
        }
    }
}

impl QuietHours {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Start as minutes since midnight; unparseable values fall back to 22:00.
    pub fn start_minutes(&self) -> u32 {
        parse_hhmm(&self.start).unwrap_or(DEFAULT_QUIET_START_MINUTES)
    }

    /// End as minutes since midnight; unparseable values fall back to 06:00.
    pub fn end_minutes(&self) -> u32 {
        parse_hhmm(&self.end).unwrap_or(DEFAULT_QUIET_END_MINUTES)
    }

    /// Whether `minutes` since midnight falls inside the window.
    ///
    /// `start < end` is a same-day window `[start, end)`. Otherwise the window
    /// wraps past midnight and covers `[start, 24:00) ∪ [00:00, end)`.
    pub fn contains(&self, minutes: u32) -> bool {
        let start = self.start_minutes();
        let end = self.end_minutes();
        if start < end {
            minutes >= start && minutes < end
        } else {
            minutes >= start || minutes < end
        }
    }
}

/// Parse `HH:MM` into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    let hours: u32 = h.trim().parse().ok()?;
    let minutes: u32 = m.trim().parse().ok()?;
    if hours >= 24 || minutes >= 60 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// A fully resolved settings snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub quiet_hours: QuietHours,
    pub opt_out_list: Vec<String>,
    pub throttle_per_minute: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            quiet_hours: QuietHours::default(),
            opt_out_list: Vec::new(),
            throttle_per_minute: DEFAULT_THROTTLE_PER_MINUTE,
        }
    }
}

impl PolicySettings {
    pub fn is_opted_out(&self, recipient: &str) -> bool {
        self.opt_out_list.iter().any(|r| r == recipient)
    }
}

/// Settings as read from a provider; any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPolicySettings {
    pub quiet_hours: Option<QuietHours>,
    pub opt_out_list: Option<Vec<String>>,
    pub throttle_per_minute: Option<u32>,
}

impl PartialPolicySettings {
    /// Fill missing fields with defaults. A zero throttle counts as missing.
    pub fn resolve(self) -> PolicySettings {
        PolicySettings {
            quiet_hours: self.quiet_hours.unwrap_or_default(),
            opt_out_list: self.opt_out_list.unwrap_or_default(),
            throttle_per_minute: self
                .throttle_per_minute
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_THROTTLE_PER_MINUTE),
        }
    }

    /// Build from `(key, value)` rows of the settings table.
    ///
    /// Unknown keys are ignored; malformed values are logged and left unset.
    pub fn from_rows(rows: Vec<(String, serde_json::Value)>) -> Self {
        let mut settings = Self::default();

        for (key, value) in rows {
            match key.as_str() {
                KEY_QUIET_HOURS => match serde_json::from_value::<QuietHours>(value) {
                    Ok(q) => settings.quiet_hours = Some(q),
                    Err(e) => malformed(&key, &e.to_string()),
                },
                KEY_OPT_OUT_LIST => match serde_json::from_value::<Vec<String>>(value) {
                    Ok(list) => settings.opt_out_list = Some(list),
                    Err(e) => malformed(&key, &e.to_string()),
                },
                KEY_THROTTLE_PER_MINUTE => {
                    // Either a bare number or `{"per_minute": n}`
                    let parsed = value
                        .as_u64()
                        .or_else(|| value.get("per_minute").and_then(|v| v.as_u64()))
                        .and_then(|n| u32::try_from(n).ok());
                    match parsed {
                        Some(n) => settings.throttle_per_minute = Some(n),
                        None => malformed(&key, "expected a positive integer"),
                    }
                }
                _ => {}
            }
        }

        settings
    }
}

fn malformed(key: &str, reason: &str) {
    tracing::warn!(
        event = "policy.settings_degraded",
        key,
        reason,
        "Ignoring malformed policy setting, default applies"
    );
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settings source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of policy settings.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn load(&self) -> Result<PartialPolicySettings, SettingsError>;
}

/// Fixed settings, typically taken from the process configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsProvider {
    settings: PartialPolicySettings,
}

impl StaticSettingsProvider {
    pub fn new(settings: PartialPolicySettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let quiet_hours = match (&config.quiet_hours_start, &config.quiet_hours_end) {
            (None, None) => None,
            (start, end) => Some(QuietHours::new(
                start.clone().unwrap_or_else(|| DEFAULT_QUIET_START.to_string()),
                end.clone().unwrap_or_else(|| DEFAULT_QUIET_END.to_string()),
            )),
        };

        Self::new(PartialPolicySettings {
            quiet_hours,
            opt_out_list: Some(config.opt_out_list.clone()),
            throttle_per_minute: config.throttle_per_minute,
        })
    }
}

#[async_trait]
impl SettingsProvider for StaticSettingsProvider {
    async fn load(&self) -> Result<PartialPolicySettings, SettingsError> {
        Ok(self.settings.clone())
    }
}

/// Settings read from the `app_settings` key-value table.
pub struct PgSettingsProvider {
    pool: PgPool,
}

impl PgSettingsProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsProvider for PgSettingsProvider {
    async fn load(&self) -> Result<PartialPolicySettings, SettingsError> {
        let keys = vec![
            KEY_QUIET_HOURS.to_string(),
            KEY_OPT_OUT_LIST.to_string(),
            KEY_THROTTLE_PER_MINUTE.to_string(),
        ];

        let rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT key, value FROM app_settings WHERE key = ANY($1)")
                .bind(&keys)
                .fetch_all(&self.pool)
                .await?;

        Ok(PartialPolicySettings::from_rows(rows))
    }
}
