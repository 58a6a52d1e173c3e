//! PostgreSQL implementation of SessionStore.
//!
//! One row per session in `user_sessions`. Rows are revocable, carry a
//! `last_activity_at` touched on every read, and are purged by
//! [`PostgresSessionStore::cleanup`] once expired.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{Clock, SessionToken, SystemClock, Timestamp, UserId};
use crate::ports::{
    ActiveSession, SessionAttributes, SessionData, SessionError, SessionPatch, SessionStore,
    SessionStrategy,
};

/// PostgreSQL implementation of SessionStore.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresSessionStore {
    /// Creates a new PostgresSessionStore.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Applies the bundled migrations (creates `user_sessions`).
    pub async fn migrate(&self) -> Result<(), SessionError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to run migrations: {}", e)))?;
        Ok(())
    }

    /// Deletes every expired row, returning how many went.
    pub async fn cleanup(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < $1")
            .bind(self.clock.now().as_datetime())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "purged expired sessions");
        }
        Ok(removed)
    }

    /// Lists a user's live sessions, most recently active first.
    pub async fn user_sessions(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, SessionError> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, last_activity_at
            FROM user_sessions
            WHERE user_id = $1 AND expires_at >= $2
            ORDER BY last_activity_at DESC
            "#,
        )
        .bind(user_id.as_str())
        .bind(self.clock.now().as_datetime())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ActiveSession, SessionError> {
                let id: String = row.try_get("id")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                let last_activity_at: DateTime<Utc> = row.try_get("last_activity_at")?;
                Ok(ActiveSession {
                    id: SessionToken::from_string(id),
                    created_at: Timestamp::from_datetime(created_at),
                    last_activity_at: Timestamp::from_datetime(last_activity_at),
                })
            })
            .collect()
    }

    async fn delete_row(&self, token: &SessionToken) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE id = $1")
            .bind(token.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn touch_in_background(&self, token: &SessionToken, now: Timestamp) {
        let pool = self.pool.clone();
        let id = token.as_str().to_string();
        tokio::spawn(async move {
            let result = sqlx::query("UPDATE user_sessions SET last_activity_at = $2 WHERE id = $1")
                .bind(&id)
                .bind(now.as_datetime())
                .execute(&pool)
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to record session activity");
            }
        });
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create(
        &self,
        user_id: &UserId,
        attributes: SessionAttributes,
        ttl: Duration,
    ) -> Result<SessionToken, SessionError> {
        let token = SessionToken::generate();
        let now = self.clock.now();
        let session = SessionData::start(user_id.clone(), attributes, now, ttl)?;

        sqlx::query(
            r#"
            INSERT INTO user_sessions (
                id, user_id, email, role, metadata, created_at, expires_at, last_activity_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $6)
            "#,
        )
        .bind(token.as_str())
        .bind(session.user_id.as_str())
        .bind(&session.email)
        .bind(&session.role)
        .bind(&session.metadata)
        .bind(session.created_at.as_datetime())
        .bind(session.expires_at.as_datetime())
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id = %user_id, "created database session");
        Ok(token)
    }

    async fn get(&self, token: &SessionToken) -> Result<Option<SessionData>, SessionError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, email, role, metadata, created_at, expires_at
            FROM user_sessions
            WHERE id = $1
            "#,
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let session = row_to_session(row)?;

        let now = self.clock.now();
        if session.is_expired_at(now) {
            self.delete_row(token).await?;
            return Ok(None);
        }

        self.touch_in_background(token, now);
        Ok(Some(session))
    }

    async fn update(&self, token: &SessionToken, patch: SessionPatch) -> Result<(), SessionError> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions SET
                email = COALESCE($2, email),
                role = COALESCE($3, role),
                metadata = COALESCE($4, metadata),
                last_activity_at = $5
            WHERE id = $1 AND expires_at >= $5
            "#,
        )
        .bind(token.as_str())
        .bind(patch.email)
        .bind(patch.role)
        .bind(patch.metadata)
        .bind(self.clock.now().as_datetime())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound);
        }

        Ok(())
    }

    async fn destroy(&self, token: &SessionToken) -> Result<(), SessionError> {
        self.delete_row(token).await?;
        Ok(())
    }

    async fn destroy_all(&self, user_id: &UserId) -> Result<(), SessionError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;

        tracing::info!(
            user_id = %user_id,
            removed = result.rows_affected(),
            "destroyed all database sessions for user"
        );
        Ok(())
    }

    fn strategy(&self) -> SessionStrategy {
        SessionStrategy::Database
    }
}

impl std::fmt::Debug for PostgresSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSessionStore").finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Helper functions
// ════════════════════════════════════════════════════════════════════════════

fn row_to_session(row: sqlx::postgres::PgRow) -> Result<SessionData, SessionError> {
    let user_id: String = row.try_get("user_id")?;
    let email: String = row.try_get("email")?;
    let role: String = row.try_get("role")?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

    let user_id = UserId::new(user_id)
        .map_err(|e| SessionError::Storage(format!("Invalid user_id in session row: {}", e)))?;

    Ok(SessionData {
        user_id,
        email,
        role,
        created_at: Timestamp::from_datetime(created_at),
        expires_at: Timestamp::from_datetime(expires_at),
        metadata,
    })
}
