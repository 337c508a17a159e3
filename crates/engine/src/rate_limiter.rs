//! Distributed rate limiter: sliding-window counter over a shared store.
//!
//! Each key owns a sorted set whose members are scored by call time in
//! milliseconds. A check prunes entries older than the window, records the
//! current call, counts what is left and refreshes the key's TTL. The decision
//! is made on the post-insert count, so a rejected call still occupies a slot
//! until it ages out of the window. That overcount is accepted.
//!
//! The limiter fails open: an unconfigured, failing or slow store yields
//! `allowed = true` with `remaining = limit`, logged as degraded at warn. A
//! limiter without a store warns on its first check only. A window too large
//! to represent as a timestamp is treated as a configuration error and also
//! fails open.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use serde::Serialize;
use uuid::Uuid;

use herald_common::clock::Clock;

/// Default bound on a single store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

const KEY_PREFIX: &str = "ratelimit";

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Ordered-set operations the limiter needs from its backing store.
#[async_trait]
pub trait SlidingWindowStore: Send + Sync {
    /// Remove entries scored below `window_start_ms`, add `member` scored
    /// `now_ms`, refresh the key expiry to `ttl_secs` and return the number of
    /// entries left in the set.
    async fn record(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_start_ms: i64,
        ttl_secs: u64,
    ) -> anyhow::Result<u64>;
}

/// Redis sorted-set backend.
pub struct RedisWindowStore {
    conn: ConnectionManager,
}

impl RedisWindowStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SlidingWindowStore for RedisWindowStore {
    async fn record(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_start_ms: i64,
        ttl_secs: u64,
    ) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();

        // ZREMRANGEBYSCORE key -inf (start ; ZADD key now member ; ZCARD key ; EXPIRE key ttl
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", window_start_ms))
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }
}

/// Process-local backend with the same pruning semantics as the Redis one.
///
/// A key expires `ttl_secs` after its last write, like `EXPIRE`. Expired keys
/// are dropped on the next write to any key.
#[derive(Default)]
pub struct MemoryWindowStore {
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Default)]
struct Window {
    entries: Vec<(i64, String)>,
    expires_at_ms: i64,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held for `key`.
    pub fn entries(&self, key: &str) -> usize {
        self.windows
            .lock()
            .get(key)
            .map(|w| w.entries.len())
            .unwrap_or(0)
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> usize {
        self.windows.lock().len()
    }
}

#[async_trait]
impl SlidingWindowStore for MemoryWindowStore {
    async fn record(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_start_ms: i64,
        ttl_secs: u64,
    ) -> anyhow::Result<u64> {
        let mut windows = self.windows.lock();
        windows.retain(|_, w| w.expires_at_ms > now_ms);

        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let window = windows.entry(key.to_string()).or_default();
        window.entries.retain(|(score, _)| *score >= window_start_ms);
        window.entries.push((now_ms, member.to_string()));
        window.expires_at_ms = now_ms.saturating_add(ttl_ms);
        Ok(window.entries.len() as u64)
    }
}

/// Sliding-window limiter with fail-open semantics.
pub struct RateLimiter {
    store: Option<Arc<dyn SlidingWindowStore>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    warned_unconfigured: AtomicBool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SlidingWindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Some(store),
            timeout: DEFAULT_STORE_TIMEOUT,
            clock,
            warned_unconfigured: AtomicBool::new(false),
        }
    }

    /// A limiter with no backing store; every check is allowed.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: None,
            timeout: DEFAULT_STORE_TIMEOUT,
            clock,
            warned_unconfigured: AtomicBool::new(false),
        }
    }

    /// Redis-backed limiter, or a disabled one when no connection is available.
    pub fn from_redis(conn: Option<ConnectionManager>, clock: Arc<dyn Clock>) -> Self {
        match conn {
            Some(conn) => Self::new(Arc::new(RedisWindowStore::new(conn)), clock),
            None => Self::disabled(clock),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Check and record one call for `key` against `limit` calls per `window_seconds`.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
    ) -> RateLimitDecision {
        let now = self.clock.now();
        let bounds = i64::try_from(window_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| Some((window, now.checked_add_signed(window)?)));
        let Some((window, reset_at)) = bounds else {
            tracing::warn!(
                event = "rate_limit.degraded",
                key,
                window_seconds,
                "Rate limit window out of range, allowing (fail-open)"
            );
            return Self::fail_open(limit, now);
        };

        let Some(store) = &self.store else {
            if self.warned_unconfigured.swap(true, Ordering::Relaxed) {
                tracing::debug!(
                    event = "rate_limit.degraded",
                    key,
                    "Rate limiter store not configured, allowing (fail-open)"
                );
            } else {
                tracing::warn!(
                    event = "rate_limit.degraded",
                    key,
                    "Rate limiter store not configured, allowing (fail-open)"
                );
            }
            return Self::fail_open(limit, reset_at);
        };

        let redis_key = format!("{}:{}", KEY_PREFIX, key);
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms.saturating_sub(window.num_milliseconds());
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let result = tokio::time::timeout(
            self.timeout,
            store.record(
                &redis_key,
                &member,
                now_ms,
                window_start_ms,
                window_seconds.max(1),
            ),
        )
        .await;

        match result {
            Ok(Ok(count)) => {
                let allowed = count <= limit;
                if !allowed {
                    tracing::info!(
                        event = "rate_limit.exceeded",
                        key,
                        count,
                        limit,
                        window_seconds,
                        "Rate limit exceeded"
                    );
                }
                RateLimitDecision {
                    allowed,
                    remaining: limit.saturating_sub(count),
                    reset_at,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    event = "rate_limit.degraded",
                    key,
                    error = %e,
                    "Rate limiter store error, allowing (fail-open)"
                );
                Self::fail_open(limit, reset_at)
            }
            Err(_) => {
                tracing::warn!(
                    event = "rate_limit.degraded",
                    key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Rate limiter store timed out, allowing (fail-open)"
                );
                Self::fail_open(limit, reset_at)
            }
        }
    }

    fn fail_open(limit: u64, reset_at: DateTime<Utc>) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: limit,
            reset_at,
        }
    }
}
