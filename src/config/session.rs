//! Session configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use super::redis::RedisConfig;
use super::Environment;
use crate::ports::SessionStrategy;

/// Shortest JWT secret accepted in production.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Explicit strategy override (`SESSION_STRATEGY`)
    #[serde(default)]
    pub strategy: Option<SessionStrategy>,

    /// HMAC secret for signed tokens (`JWT_SECRET`)
    #[serde(default)]
    pub jwt_secret: Option<SecretString>,

    /// `iss` claim of signed tokens
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// `aud` claim of signed tokens
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Session lifetime used when the caller does not pick one
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// How often expired database sessions are purged
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl SessionConfig {
    /// Default session lifetime as Duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Cleanup interval as Duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Picks the strategy to run.
    ///
    /// An explicit override wins. Otherwise Redis is used when it is enabled
    /// and has a URL, and signed tokens are the zero-infrastructure default.
    pub fn resolve_strategy(&self, redis: &RedisConfig) -> SessionStrategy {
        match self.strategy {
            Some(strategy) => strategy,
            None if redis.enabled_url().is_some() => SessionStrategy::Redis,
            None => SessionStrategy::Jwt,
        }
    }

    /// The JWT secret if one is configured and non-empty.
    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.is_empty())
    }

    /// Validate session configuration for the strategy that will run.
    pub fn validate(
        &self,
        redis: &RedisConfig,
        database_configured: bool,
        environment: &Environment,
    ) -> Result<(), ValidationError> {
        if self.default_ttl_secs == 0 {
            return Err(ValidationError::InvalidSessionTtl);
        }

        match self.resolve_strategy(redis) {
            SessionStrategy::Jwt => {
                let secret = self
                    .jwt_secret()
                    .ok_or(ValidationError::MissingRequired("JWT_SECRET"))?;
                if *environment == Environment::Production
                    && secret.len() < MIN_PRODUCTION_SECRET_LEN
                {
                    return Err(ValidationError::WeakJwtSecret(MIN_PRODUCTION_SECRET_LEN));
                }
            }
            SessionStrategy::Database => {
                if !database_configured {
                    return Err(ValidationError::MissingRequired("DATABASE_URL"));
                }
            }
            SessionStrategy::Redis => {
                if redis.enabled_url().is_none() {
                    return Err(ValidationError::MissingRequired("REDIS_URL"));
                }
            }
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            jwt_secret: None,
            issuer: default_issuer(),
            audience: default_audience(),
            default_ttl_secs: default_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_issuer() -> String {
    "rural24".to_string()
}

fn default_audience() -> String {
    "rural24-api".to_string()
}

fn default_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    60 * 60
}
