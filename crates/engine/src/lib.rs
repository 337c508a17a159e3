//! Admission control and deduplication primitives for outbound notifications.
//!
//! - [`idempotency`]: single-flight execution keyed by a caller-supplied key
//! - [`rate_limiter`]: sliding-window limiter over a shared Redis store (fail-open)
//! - [`throttle`]: process-local per-minute throttle buckets
//! - [`settings`]: policy settings snapshot and its providers
//! - [`policy`]: opt-out → quiet hours → throttle admission evaluator

pub mod idempotency;
pub mod policy;
pub mod rate_limiter;
pub mod settings;
pub mod throttle;
