//! Notification queue, transports and the dispatch worker.
//!
//! - [`queue`]: durable queue with atomic batch claims (Postgres and in-memory)
//! - [`transport`]: outbound delivery (WhatsApp Cloud API)
//! - [`retry`]: failure bookkeeping and backoff
//! - [`worker`]: the polling dispatch loop
//! - [`state`]: wiring from configuration

pub mod queue;
pub mod retry;
pub mod state;
pub mod transport;
pub mod worker;
