//! Application configuration module
//!
//! Configuration is loaded from environment variables using the `config` and
//! `dotenvy` crates. Structured values use the `RURAL24` prefix with `__`
//! separating nested keys. The flat names the marketplace has always used
//! (`REDIS_URL`, `JWT_SECRET`, ...) override the structured ones.
//!
//! # Example
//!
//! ```no_run
//! use rural24_guard::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Sessions use {}", config.session_strategy());
//! ```

mod database;
mod environment;
mod error;
mod redis;
mod session;

pub use self::database::DatabaseConfig;
pub use self::environment::Environment;
pub use self::error::{ConfigError, ValidationError};
pub use self::redis::RedisConfig;
pub use self::session::{SessionConfig, MIN_PRODUCTION_SECRET_LEN};

use serde::Deserialize;
use std::env;

use crate::adapters::rate_limiter::{PolicyKind, RateLimitPolicies};
use crate::ports::SessionStrategy;

/// Flat variable names and the keys they override.
const FLAT_OVERRIDES: [(&str, &str); 4] = [
    ("REDIS_ENABLED", "redis.enabled"),
    ("REDIS_URL", "redis.url"),
    ("JWT_SECRET", "session.jwt_secret"),
    ("DATABASE_URL", "database.url"),
];

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// `tracing` filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Redis connection; disabled unless `REDIS_ENABLED=true`
    #[serde(default)]
    pub redis: RedisConfig,

    /// PostgreSQL connection, only needed for database sessions
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Session strategy and token settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Preset rate limit policies
    #[serde(default)]
    pub rate_limit: RateLimitPolicies,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `RURAL24` prefix, `__` separated
    /// 3. Applies the flat variable names on top
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `RURAL24__REDIS__TIMEOUT_SECS=2` -> `redis.timeout_secs = 2`
    /// - `RURAL24__RATE_LIMIT__AUTH__MAX=3` -> `rate_limit.auth.max = 3`
    /// - `REDIS_URL=redis://...` -> `redis.url`
    /// - `SESSION_STRATEGY=redis` -> `session.strategy`
    ///
    /// Empty flat variables are treated as unset.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        // Seed every preset so a single overridden field keeps the others.
        let presets = RateLimitPolicies::default();
        for kind in PolicyKind::ALL {
            let policy = presets.get(kind);
            let prefix = format!("rate_limit.{}", kind.namespace());
            builder = builder
                .set_default(format!("{}.max", prefix), i64::from(policy.max))?
                .set_default(format!("{}.window_ms", prefix), policy.window_ms as i64)?
                .set_default(
                    format!("{}.block_duration_ms", prefix),
                    policy.block_duration_ms as i64,
                )?;
        }

        builder = builder.add_source(
            config::Environment::default()
                .prefix("RURAL24")
                .separator("__"),
        );

        for (name, key) in FLAT_OVERRIDES {
            builder = builder.set_override_option(key, flat_var(name))?;
        }
        builder = builder
            .set_override_option(
                "session.strategy",
                flat_var("SESSION_STRATEGY").map(|s| s.trim().to_ascii_lowercase()),
            )?
            .set_override_option(
                "log_level",
                flat_var("LOG_LEVEL").or_else(|| flat_var("RUST_LOG")),
            )?;

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Checks URL formats and pool sizes, that the resolved session strategy
    /// has what it needs, and production-only secret strength.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.redis.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.session
            .validate(&self.redis, self.database.is_some(), &self.environment)?;
        self.rate_limit
            .validate()
            .map_err(ValidationError::InvalidRateLimitPolicy)?;
        Ok(())
    }

    /// The session strategy this configuration selects.
    pub fn session_strategy(&self) -> SessionStrategy {
        self.session.resolve_strategy(&self.redis)
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: default_log_level(),
            redis: RedisConfig::default(),
            database: None,
            session: SessionConfig::default(),
            rate_limit: RateLimitPolicies::default(),
        }
    }
}

fn flat_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_log_level() -> String {
    "info".to_string()
}
