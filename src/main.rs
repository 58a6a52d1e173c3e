//! Bootstrap binary.
//!
//! Loads configuration, builds the rate limiter and session registries, warms
//! the preset limiters and keeps purging expired database sessions until
//! interrupted.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rural24_guard::adapters::rate_limiter::{PolicyKind, RateLimiterRegistry};
use rural24_guard::adapters::session::SessionRegistry;
use rural24_guard::config::{AppConfig, ConfigError};
use rural24_guard::ports::SessionStrategy;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    config.validate().map_err(ConfigError::from)?;
    tracing::info!(
        environment = %config.environment,
        session_strategy = %config.session_strategy(),
        "configuration loaded"
    );

    let rate_limiters = Arc::new(RateLimiterRegistry::from_config(
        &config.redis,
        config.rate_limit.clone(),
    ));
    for kind in PolicyKind::ALL {
        rate_limiters.for_policy(kind).await?;
    }
    tracing::info!(
        backend = rate_limiters.backend().as_str(),
        limiters = rate_limiters.len().await,
        "rate limiters ready"
    );

    let sessions = Arc::new(SessionRegistry::new(
        config.session.clone(),
        config.redis.clone(),
        config.database.clone(),
    ));
    sessions.store().await?;

    if sessions.strategy() == SessionStrategy::Database {
        let mut ticker = tokio::time::interval(config.session.cleanup_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sessions.cleanup_expired().await {
                        tracing::error!(error = %e, "session cleanup failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("shutting down");
    rate_limiters.reset().await;
    sessions.reset().await;
    Ok(())
}

/// JSON logs in production, human-readable otherwise.
fn init_tracing(config: &AppConfig) {
    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}
