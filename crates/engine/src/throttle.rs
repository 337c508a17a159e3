//! Throttle buckets: process-local per-minute send budget.
//!
//! Each bucket counts calls in a fixed 60-second window that starts at the
//! first call after the previous window lapsed. State is held in-memory and is
//! not shared between worker processes: with N workers the
//! effective global budget is N times the configured limit.
//!
//! The store is injected into the policy evaluator rather than living in a
//! static, so tests and co-located workers can own separate buckets.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Length of a throttle window.
pub const THROTTLE_WINDOW_SECS: i64 = 60;

/// Per-key throttle tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleBucket {
    /// Calls counted in the current window, including throttled ones.
    pub count: u32,
    /// When the current window started.
    pub window_start: DateTime<Utc>,
    /// Limit in force when the bucket was last touched.
    pub limit: u32,
}

/// In-memory throttle bucket store.
#[derive(Debug, Default)]
pub struct ThrottleBucketStore {
    buckets: Mutex<HashMap<String, ThrottleBucket>>,
}

impl ThrottleBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call against `key`.
    ///
    /// Returns `true` if the call fits within `limit` for the current window.
    /// The call is counted either way.
    pub fn hit(&self, key: &str, limit: u32, now: DateTime<Utc>) -> bool {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(ThrottleBucket {
            count: 0,
            window_start: now,
            limit,
        });

        if now - bucket.window_start > Duration::seconds(THROTTLE_WINDOW_SECS) {
            bucket.count = 0;
            bucket.window_start = now;
        }

        bucket.limit = limit;
        bucket.count = bucket.count.saturating_add(1);
        bucket.count <= limit
    }

    /// Snapshot of the bucket for `key`, if any.
    pub fn get(&self, key: &str) -> Option<ThrottleBucket> {
        self.buckets.lock().get(key).copied()
    }

    /// Drop the bucket for `key`.
    pub fn reset_key(&self, key: &str) {
        self.buckets.lock().remove(key);
    }

    /// Drop all buckets.
    pub fn reset(&self) {
        self.buckets.lock().clear();
    }

    /// Number of tracked buckets (for monitoring).
    pub fn tracked_count(&self) -> usize {
        self.buckets.lock().len()
    }
}
