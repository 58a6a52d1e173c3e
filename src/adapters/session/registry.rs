//! Registry choosing and holding the process-wide session store.
//!
//! The strategy is resolved from configuration alone: an explicit
//! `SESSION_STRATEGY` wins, otherwise Redis when it is enabled with a URL,
//! otherwise signed tokens. The store is built on the first call to
//! [`SessionRegistry::store`] and shared afterwards.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{DatabaseConfig, RedisConfig, SessionConfig};
use crate::domain::foundation::{Clock, SessionToken, SystemClock, UserId};
use crate::ports::{SessionAttributes, SessionError, SessionStore, SessionStrategy};

use super::jwt::JwtSessionStore;
use super::postgres::PostgresSessionStore;
use super::redis::RedisSessionStore;

#[derive(Clone)]
struct BuiltStore {
    store: Arc<dyn SessionStore>,
    database: Option<Arc<PostgresSessionStore>>,
}

/// Lazily-built singleton session store.
pub struct SessionRegistry {
    session: SessionConfig,
    redis: RedisConfig,
    database: Option<DatabaseConfig>,
    clock: Arc<dyn Clock>,
    built: Mutex<Option<BuiltStore>>,
}

impl SessionRegistry {
    pub fn new(
        session: SessionConfig,
        redis: RedisConfig,
        database: Option<DatabaseConfig>,
    ) -> Self {
        Self {
            session,
            redis,
            database,
            clock: Arc::new(SystemClock),
            built: Mutex::new(None),
        }
    }

    /// Replace the clock handed to the store when it is built.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The strategy `store()` will build.
    pub fn strategy(&self) -> SessionStrategy {
        self.session.resolve_strategy(&self.redis)
    }

    /// Returns the session store, building it on first use.
    ///
    /// Concurrent first calls build exactly one store.
    pub async fn store(&self) -> Result<Arc<dyn SessionStore>, SessionError> {
        Ok(self.built().await?.store)
    }

    /// Starts a session lasting the configured default TTL.
    pub async fn start_session(
        &self,
        user_id: &UserId,
        attributes: SessionAttributes,
    ) -> Result<SessionToken, SessionError> {
        self.store()
            .await?
            .create(user_id, attributes, self.session.default_ttl())
            .await
    }

    /// Purges expired rows when the database strategy is active.
    ///
    /// The other strategies expire sessions on their own, so this returns 0.
    pub async fn cleanup_expired(&self) -> Result<u64, SessionError> {
        match self.built().await?.database {
            Some(store) => store.cleanup().await,
            None => Ok(0),
        }
    }

    /// Forgets the built store. The next `store()` call builds a new one.
    pub async fn reset(&self) {
        *self.built.lock().await = None;
    }

    async fn built(&self) -> Result<BuiltStore, SessionError> {
        let mut built = self.built.lock().await;
        if let Some(existing) = built.as_ref() {
            return Ok(existing.clone());
        }

        let strategy = self.strategy();
        let created = self.build(strategy).await.map_err(|e| {
            tracing::error!(strategy = %strategy, error = %e, "failed to build session store");
            e
        })?;
        tracing::info!(strategy = %strategy, "session store ready");

        *built = Some(created.clone());
        Ok(created)
    }

    async fn build(&self, strategy: SessionStrategy) -> Result<BuiltStore, SessionError> {
        match strategy {
            SessionStrategy::Jwt => {
                let secret = self.session.jwt_secret.as_ref().ok_or_else(|| {
                    SessionError::Configuration("JWT_SECRET must be set for jwt sessions".into())
                })?;
                let store = JwtSessionStore::new(secret)?
                    .with_claims(self.session.issuer.clone(), self.session.audience.clone())
                    .with_clock(self.clock.clone());
                Ok(BuiltStore {
                    store: Arc::new(store),
                    database: None,
                })
            }
            SessionStrategy::Database => {
                let config = self.database.as_ref().ok_or_else(|| {
                    SessionError::Configuration(
                        "DATABASE_URL must be set for database sessions".into(),
                    )
                })?;
                let pool = config.pool_options().connect(&config.url).await?;
                let store = PostgresSessionStore::new(pool).with_clock(self.clock.clone());
                if config.run_migrations {
                    store.migrate().await?;
                }
                let store = Arc::new(store);
                Ok(BuiltStore {
                    store: store.clone(),
                    database: Some(store),
                })
            }
            SessionStrategy::Redis => {
                let url = self.redis.enabled_url().ok_or_else(|| {
                    SessionError::Configuration("REDIS_URL must be set for redis sessions".into())
                })?;
                let store = RedisSessionStore::connect(url, self.redis.timeout())
                    .await?
                    .with_clock(self.clock.clone());
                Ok(BuiltStore {
                    store: Arc::new(store),
                    database: None,
                })
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("strategy", &self.strategy())
            .finish_non_exhaustive()
    }
}
