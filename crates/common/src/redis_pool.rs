use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager for async operations.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}

/// Connect to Redis if a URL is configured.
///
/// A missing URL or a failed connection yields `None`; callers that depend on
/// Redis are expected to degrade rather than refuse to start.
pub async fn connect_optional(redis_url: Option<&str>) -> Option<ConnectionManager> {
    let Some(url) = redis_url else {
        tracing::warn!(
            event = "rate_limit.degraded",
            "REDIS_URL not set, distributed rate limiting disabled (fail-open)"
        );
        return None;
    };

    match create_redis_pool(url).await {
        Ok(manager) => Some(manager),
        Err(e) => {
            tracing::warn!(
                event = "rate_limit.degraded",
                error = %e,
                "Redis unreachable at startup, distributed rate limiting disabled (fail-open)"
            );
            None
        }
    }
}
