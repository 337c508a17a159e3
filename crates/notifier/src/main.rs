use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use herald_common::clock::SystemClock;
use herald_common::config::AppConfig;
use herald_common::{db, redis_pool};
use herald_notifier::state::NotifierState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info,herald_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    db::run_migrations(&pool).await?;

    // Redis is optional; without it the rate limiter fails open
    let redis = redis_pool::connect_optional(config.redis_url.as_deref()).await;

    let state = NotifierState::new(pool, redis, config, Arc::new(SystemClock));
    let worker = state.build_worker()?;

    // Stop polling on Ctrl+C; the batch in progress is finished first
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing current batch...");
            signal.cancel();
        }
    });

    if let Err(e) = worker.run(shutdown).await {
        tracing::error!(error = %e, "Dispatch worker exited with error");
        return Err(e);
    }

    tracing::info!("Herald notifier stopped.");
    Ok(())
}
