//! Idempotency store: single-flight execution keyed by a caller-supplied key.
//!
//! The first caller for a key runs the operation. Callers arriving while it is
//! in flight wait for that result instead of running the operation again, and
//! callers arriving after it succeeded get the stored value until the TTL
//! lapses. Failures are handed to every waiter but never stored, so the next
//! call after a failure runs the operation afresh.
//!
//! State is held in-memory. Keys are independent: a slow operation for one key
//! never delays callers of another.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

type Outcome<T, E> = Option<Result<T, E>>;

enum Slot<T, E> {
    /// An operation is running; waiters subscribe to its outcome.
    InFlight(watch::Receiver<Outcome<T, E>>),
    /// The operation succeeded at `completed_at`.
    Done { value: T, completed_at: Instant },
}

enum Next<T, E> {
    Replay(T),
    Wait(watch::Receiver<Outcome<T, E>>),
    Lead(watch::Sender<Outcome<T, E>>),
}

/// In-memory single-flight store.
pub struct IdempotencyStore<T, E> {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot<T, E>>>,
}

impl<T, E> IdempotencyStore<T, E>
where
    T: Clone + Send + Sync,
    E: Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` at most once per `key` within the TTL.
    pub async fn execute<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            let next = {
                let mut slots = self.slots.lock();
                match slots.get(key) {
                    Some(Slot::Done {
                        value,
                        completed_at,
                    }) if completed_at.elapsed() < self.ttl => Next::Replay(value.clone()),
                    Some(Slot::InFlight(rx)) => Next::Wait(rx.clone()),
                    _ => {
                        Self::purge_expired(&mut slots, self.ttl);
                        let (tx, rx) = watch::channel(None);
                        slots.insert(key.to_string(), Slot::InFlight(rx));
                        Next::Lead(tx)
                    }
                }
            };

            match next {
                Next::Replay(value) => {
                    tracing::debug!(
                        event = "idempotency.replayed",
                        key,
                        "Returning stored result for idempotent operation"
                    );
                    return Ok(value);
                }
                Next::Lead(tx) => return self.lead(key, tx, operation).await,
                Next::Wait(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };

                    match outcome {
                        Some(result) => {
                            tracing::debug!(
                                event = "idempotency.replayed",
                                key,
                                ok = result.is_ok(),
                                "Joined in-flight idempotent operation"
                            );
                            return result;
                        }
                        // Leader was cancelled before finishing; contend again.
                        None => continue,
                    }
                }
            }
        }
    }

    async fn lead<F, Fut>(
        &self,
        key: &str,
        tx: watch::Sender<Outcome<T, E>>,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut guard = FlightGuard {
            slots: &self.slots,
            key,
            flight: tx.subscribe(),
            armed: true,
        };

        let result = operation().await;

        {
            // After `forget` the key may belong to a newer flight; leave it alone.
            let mut slots = self.slots.lock();
            if is_flight(slots.get(key), &guard.flight) {
                match &result {
                    Ok(value) => {
                        slots.insert(
                            key.to_string(),
                            Slot::Done {
                                value: value.clone(),
                                completed_at: Instant::now(),
                            },
                        );
                    }
                    Err(_) => {
                        slots.remove(key);
                    }
                }
            }
        }
        guard.armed = false;

        // No receivers simply means nobody joined this flight.
        let _ = tx.send(Some(result.clone()));
        result
    }

    /// Drop any state for `key`, stored or in flight.
    ///
    /// A flight already running keeps running and still answers its own
    /// waiters, but its result is not stored.
    pub fn forget(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    /// Number of keys currently tracked (in flight or within TTL).
    pub fn len(&self) -> usize {
        let slots = self.slots.lock();
        slots
            .values()
            .filter(|slot| match slot {
                Slot::InFlight(_) => true,
                Slot::Done { completed_at, .. } => completed_at.elapsed() < self.ttl,
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(slots: &mut HashMap<String, Slot<T, E>>, ttl: Duration) {
        slots.retain(|_, slot| match slot {
            Slot::InFlight(_) => true,
            Slot::Done { completed_at, .. } => completed_at.elapsed() < ttl,
        });
    }
}

fn is_flight<T, E>(slot: Option<&Slot<T, E>>, flight: &watch::Receiver<Outcome<T, E>>) -> bool {
    matches!(slot, Some(Slot::InFlight(rx)) if rx.same_channel(flight))
}

/// Releases an in-flight slot if the leading future is dropped mid-operation.
struct FlightGuard<'a, T, E> {
    slots: &'a Mutex<HashMap<String, Slot<T, E>>>,
    key: &'a str,
    /// Identifies this leader's flight among later ones for the same key.
    flight: watch::Receiver<Outcome<T, E>>,
    armed: bool,
}

impl<T, E> Drop for FlightGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.slots.lock();
        if is_flight(slots.get(self.key), &self.flight) {
            slots.remove(self.key);
        }
        tracing::warn!(
            key = self.key,
            "Idempotent operation abandoned before completion"
        );
    }
}
