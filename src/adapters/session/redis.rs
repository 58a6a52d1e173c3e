//! Redis implementation of SessionStore.
//!
//! Each session is a JSON value at `session:{token}` with a native TTL. A
//! set at `user_sessions:{user_id}` indexes a user's tokens so they can all
//! be ended at once. The index TTL is only ever extended, so it outlives the
//! longest session it lists by at least an hour. Extending relies on
//! `EXPIRE ... NX` / `GT`, which need Redis 7 or newer.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{Clock, SessionToken, SystemClock, UserId};
use crate::ports::{
    SessionAttributes, SessionData, SessionError, SessionPatch, SessionStore, SessionStrategy,
};

/// Extra lifetime of the per-user index beyond the session TTL.
const INDEX_GRACE_SECS: u64 = 3600;

/// TTL applied on update when the remaining TTL cannot be read.
const FALLBACK_TTL_MS: u64 = 3_600_000;

/// Session key lifetime in milliseconds. Redis cannot store less than 1ms.
pub(crate) fn session_ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, i64::MAX as u128) as u64
}

/// Index lifetime in whole seconds: the session TTL rounded up plus grace.
pub(crate) fn index_ttl_secs(ttl: Duration) -> u64 {
    session_ttl_millis(ttl)
        .div_ceil(1000)
        .saturating_add(INDEX_GRACE_SECS)
}

/// TTL to keep after rewriting a session, given its `PTTL` reply.
///
/// `None` means the key is gone (`-2`) and must not be recreated. A key
/// without expiry (`-1`) gets the fallback.
pub(crate) fn ttl_after_update(pttl: i64) -> Option<u64> {
    match pttl {
        -2 => None,
        remaining if remaining > 0 => Some(remaining as u64),
        _ => Some(FALLBACK_TTL_MS),
    }
}

/// Redis implementation of SessionStore.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: MultiplexedConnection,
    clock: Arc<dyn Clock>,
}

impl RedisSessionStore {
    /// Creates a store on an established connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connects to `url` and verifies the connection with `PING`, giving up
    /// after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, SessionError> {
        let client =
            redis::Client::open(url).map_err(|e| SessionError::Configuration(e.to_string()))?;

        let connecting = async {
            let mut conn = client.get_multiplexed_tokio_connection().await?;
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(conn)
        };

        let conn = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| {
                SessionError::Storage(format!(
                    "timed out connecting to redis after {}ms",
                    timeout.as_millis()
                ))
            })??;
        Ok(Self::new(conn))
    }

    /// Replaces the clock used for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn session_key(token: &SessionToken) -> String {
        format!("session:{}", token.as_str())
    }

    pub(crate) fn index_key(user_id: &UserId) -> String {
        format!("user_sessions:{}", user_id.as_str())
    }

    async fn load(&self, token: &SessionToken) -> Result<Option<SessionData>, SessionError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(Self::session_key(token)).await?;

        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        user_id: &UserId,
        attributes: SessionAttributes,
        ttl: Duration,
    ) -> Result<SessionToken, SessionError> {
        let token = SessionToken::generate();
        let session = SessionData::start(user_id.clone(), attributes, self.clock.now(), ttl)?;
        let json = serde_json::to_string(&session)?;
        let index = Self::index_key(user_id);
        let index_ttl = index_ttl_secs(ttl);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(Self::session_key(&token))
            .arg(json)
            .arg("PX")
            .arg(session_ttl_millis(ttl))
            .ignore()
            .cmd("SADD")
            .arg(&index)
            .arg(token.as_str())
            .ignore()
            // NX covers a fresh index, GT only ever pushes the expiry out
            .cmd("EXPIRE")
            .arg(&index)
            .arg(index_ttl)
            .arg("NX")
            .ignore()
            .cmd("EXPIRE")
            .arg(&index)
            .arg(index_ttl)
            .arg("GT")
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        tracing::debug!(user_id = %user_id, "created redis session");
        Ok(token)
    }

    async fn get(&self, token: &SessionToken) -> Result<Option<SessionData>, SessionError> {
        let session = self
            .load(token)
            .await?
            .filter(|session| !session.is_expired_at(self.clock.now()));
        Ok(session)
    }

    async fn update(&self, token: &SessionToken, patch: SessionPatch) -> Result<(), SessionError> {
        let Some(mut session) = self.get(token).await? else {
            return Err(SessionError::NotFound);
        };
        session.apply(patch);

        let key = Self::session_key(token);
        let mut conn = self.conn.clone();
        let pttl: i64 = match conn.pttl(&key).await {
            Ok(pttl) => pttl,
            Err(e) => {
                tracing::debug!(error = %e, "could not read session ttl, using fallback");
                -1
            }
        };
        let Some(ttl_ms) = ttl_after_update(pttl) else {
            return Err(SessionError::NotFound);
        };

        // XX: never recreate a session destroyed since it was read
        let written: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(serde_json::to_string(&session)?)
            .arg("PX")
            .arg(ttl_ms)
            .arg("XX")
            .query_async(&mut conn)
            .await?;

        if written.is_none() {
            return Err(SessionError::NotFound);
        }
        Ok(())
    }

    async fn destroy(&self, token: &SessionToken) -> Result<(), SessionError> {
        let session = self.load(token).await.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "could not read session before destroy, index left as is");
            None
        });

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(Self::session_key(token)).ignore();
        if let Some(session) = session {
            pipe.cmd("SREM")
                .arg(Self::index_key(&session.user_id))
                .arg(token.as_str())
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn destroy_all(&self, user_id: &UserId) -> Result<(), SessionError> {
        let index = Self::index_key(user_id);
        let mut conn = self.conn.clone();
        let tokens: Vec<String> = conn.smembers(&index).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for token in &tokens {
            pipe.cmd("DEL").arg(format!("session:{}", token)).ignore();
        }
        pipe.cmd("DEL").arg(&index).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::info!(
            user_id = %user_id,
            removed = tokens.len(),
            "destroyed all redis sessions for user"
        );
        Ok(())
    }

    fn strategy(&self) -> SessionStrategy {
        SessionStrategy::Redis
    }
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore").finish_non_exhaustive()
    }
}
