use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string. When absent the distributed rate limiter fails open.
    pub redis_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Identifier recorded in `claimed_by` for rows this process claims
    pub worker_id: String,

    /// Queue poll interval in milliseconds (default: 2000)
    pub worker_poll_interval_ms: u64,

    /// Maximum notifications claimed per tick (default: 10)
    pub worker_batch_size: u32,

    /// Upper bound for a single claim round-trip in milliseconds (default: 5000)
    pub worker_claim_timeout_ms: u64,

    /// Age after which a `claimed` row is handed back to the queue. Unset disables the sweep.
    pub worker_stale_claim_secs: Option<u64>,

    /// Failed attempts before a notification is marked `failed` (default: 5)
    pub notify_max_retries: u32,

    /// Base delay for exponential backoff in seconds (default: 30)
    pub notify_backoff_base_secs: u64,

    /// Backoff ceiling in seconds (default: 900)
    pub notify_max_backoff_secs: u64,

    /// Upper bound for a single transport send in milliseconds (default: 10000)
    pub notify_send_timeout_ms: u64,

    /// Whether claimed notifications pass through the admission policy (default: true)
    pub notify_policy_enabled: bool,

    /// Delay before an opted-out recipient is re-offered, in seconds (default: 86400)
    pub notify_opt_out_recheck_secs: u64,

    /// How long a successful send is remembered for deduplication, in seconds (default: 3600)
    pub notify_idempotency_ttl_secs: u64,

    /// Upper bound for a rate-limiter store round-trip in milliseconds (default: 250)
    pub rate_limit_timeout_ms: u64,

    /// Optional per-recipient limit enforced through the distributed rate limiter
    pub recipient_rate_limit: Option<u64>,

    /// Window for `recipient_rate_limit`, in seconds (default: 3600)
    pub recipient_rate_window_secs: u64,

    /// Offset from UTC used to evaluate quiet hours, in minutes (default: 0)
    pub policy_utc_offset_minutes: i32,

    /// How long a settings snapshot is reused, in seconds (default: 30)
    pub policy_settings_ttl_secs: u64,

    /// Where policy settings are read from
    pub policy_settings_source: SettingsSource,

    /// Quiet hours start, `HH:MM` (default: 22:00)
    pub quiet_hours_start: Option<String>,

    /// Quiet hours end, `HH:MM` (default: 06:00)
    pub quiet_hours_end: Option<String>,

    /// Process-local sends allowed per minute (default: 60)
    pub throttle_per_minute: Option<u32>,

    /// Comma-separated recipients that never receive notifications
    pub opt_out_list: Vec<String>,

    /// Base URL of the messaging API
    pub whatsapp_api_base_url: String,

    /// Sender phone number ID
    pub whatsapp_phone_id: Option<String>,

    /// Bearer token for the messaging API
    pub whatsapp_token: Option<String>,
}

/// Backing source for admission policy settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsSource {
    /// Values from this configuration
    Env,
    /// The `app_settings` key-value table
    Database,
}

impl FromStr for SettingsSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "env" => Ok(SettingsSource::Env),
            "database" | "db" => Ok(SettingsSource::Database),
            other => Err(anyhow::anyhow!(
                "POLICY_SETTINGS_SOURCE must be 'env' or 'database', got '{}'",
                other
            )),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: var("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: var("REDIS_URL"),
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 20)?,
            worker_id: var("WORKER_ID").unwrap_or_else(default_worker_id),
            worker_poll_interval_ms: parse_or(&var, "WORKER_POLL_INTERVAL_MS", 2000)?,
            worker_batch_size: parse_or(&var, "WORKER_BATCH_SIZE", 10)?,
            worker_claim_timeout_ms: parse_or(&var, "WORKER_CLAIM_TIMEOUT_MS", 5000)?,
            worker_stale_claim_secs: parse_opt(&var, "WORKER_STALE_CLAIM_SECS")?,
            notify_max_retries: parse_or::<u32>(&var, "NOTIFY_MAX_RETRIES", 5)?.max(1),
            notify_backoff_base_secs: parse_or::<u64>(&var, "NOTIFY_BACKOFF_BASE_SECONDS", 30)?
                .max(1),
            notify_max_backoff_secs: parse_or(&var, "NOTIFY_MAX_BACKOFF_SECONDS", 900)?,
            notify_send_timeout_ms: parse_or(&var, "NOTIFY_SEND_TIMEOUT_MS", 10_000)?,
            notify_policy_enabled: parse_or(&var, "NOTIFY_POLICY_ENABLED", true)?,
            notify_opt_out_recheck_secs: parse_or(&var, "NOTIFY_OPT_OUT_RECHECK_SECS", 86_400)?,
            notify_idempotency_ttl_secs: parse_or(&var, "NOTIFY_IDEMPOTENCY_TTL_SECS", 3600)?,
            rate_limit_timeout_ms: parse_or(&var, "RATE_LIMIT_TIMEOUT_MS", 250)?,
            recipient_rate_limit: parse_opt(&var, "RECIPIENT_RATE_LIMIT")?,
            recipient_rate_window_secs: parse_or(&var, "RECIPIENT_RATE_WINDOW_SECS", 3600)?,
            policy_utc_offset_minutes: parse_or(&var, "POLICY_UTC_OFFSET_MINUTES", 0)?,
            policy_settings_ttl_secs: parse_or(&var, "POLICY_SETTINGS_TTL_SECS", 30)?,
            policy_settings_source: parse_or(&var, "POLICY_SETTINGS_SOURCE", SettingsSource::Env)?,
            quiet_hours_start: var("QUIET_HOURS_START"),
            quiet_hours_end: var("QUIET_HOURS_END"),
            throttle_per_minute: parse_opt(&var, "THROTTLE_PER_MINUTE")?,
            opt_out_list: var("OPT_OUT_LIST")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            whatsapp_api_base_url: var("WHATSAPP_API_BASE_URL")
                .unwrap_or_else(|| "https://graph.facebook.com/v20.0".to_string()),
            whatsapp_phone_id: var("WHATSAPP_PHONE_ID"),
            whatsapp_token: var("WHATSAPP_TOKEN"),
        })
    }
}

fn default_worker_id() -> String {
    format!("herald-{}", std::process::id())
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

fn parse_opt<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(None),
    }
}
