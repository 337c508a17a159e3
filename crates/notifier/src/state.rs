//! Process wiring: turns an [`AppConfig`] plus its connections into a worker.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use herald_common::clock::Clock;
use herald_common::config::{AppConfig, SettingsSource};
use herald_engine::policy::{AdmissionPolicy, PolicyConfig};
use herald_engine::rate_limiter::RateLimiter;
use herald_engine::settings::{PgSettingsProvider, SettingsProvider, StaticSettingsProvider};
use herald_engine::throttle::ThrottleBucketStore;

use crate::queue::PgNotificationQueue;
use crate::transport::{Transport, WhatsAppTransport};
use crate::worker::{DeliveryIdempotency, DispatchWorker, WorkerConfig};

/// Shared handles the worker is assembled from.
#[derive(Clone)]
pub struct NotifierState {
    pub pool: PgPool,
    pub redis: Option<ConnectionManager>,
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
}

impl NotifierState {
    pub fn new(
        pool: PgPool,
        redis: Option<ConnectionManager>,
        config: AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            redis,
            config,
            clock,
        }
    }

    /// Admission policy per configuration, or `None` when disabled.
    pub fn admission_policy(&self) -> Option<AdmissionPolicy> {
        if !self.config.notify_policy_enabled {
            return None;
        }

        let settings: Arc<dyn SettingsProvider> = match self.config.policy_settings_source {
            SettingsSource::Env => Arc::new(StaticSettingsProvider::from_config(&self.config)),
            SettingsSource::Database => Arc::new(PgSettingsProvider::new(self.pool.clone())),
        };

        let policy = AdmissionPolicy::new(
            settings,
            Arc::new(ThrottleBucketStore::new()),
            self.clock.clone(),
            PolicyConfig::from_app_config(&self.config),
        );

        if self.config.recipient_rate_limit.is_none() {
            return Some(policy);
        }

        let limiter = RateLimiter::from_redis(self.redis.clone(), self.clock.clone())
            .with_timeout(Duration::from_millis(self.config.rate_limit_timeout_ms));
        Some(policy.with_rate_limiter(Arc::new(limiter)))
    }

    pub fn build_worker(&self) -> anyhow::Result<DispatchWorker> {
        let transport: Arc<dyn Transport> = Arc::new(WhatsAppTransport::from_config(&self.config)?);
        self.build_worker_with(transport)
    }

    /// Assemble the worker around a caller-supplied transport.
    pub fn build_worker_with(&self, transport: Arc<dyn Transport>) -> anyhow::Result<DispatchWorker> {
        let queue = Arc::new(PgNotificationQueue::new(self.pool.clone()));
        let idempotency = Arc::new(DeliveryIdempotency::new(Duration::from_secs(
            self.config.notify_idempotency_ttl_secs,
        )));

        let mut worker = DispatchWorker::new(
            queue,
            transport,
            self.clock.clone(),
            WorkerConfig::from_app_config(&self.config),
        )
        .with_idempotency(idempotency);

        if let Some(policy) = self.admission_policy() {
            worker = worker.with_policy(Arc::new(policy));
        } else {
            tracing::info!("Admission policy disabled");
        }

        Ok(worker)
    }
}
