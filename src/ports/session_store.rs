//! Session store port.
//!
//! Authenticated requests carry an opaque session token. A `SessionStore`
//! issues those tokens and resolves them back to the session they stand for.
//! Three strategies exist (see [`SessionStrategy`]); they differ in whether a
//! session can be revoked before it expires.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::foundation::{SessionToken, Timestamp, UserId};

/// Port for issuing and resolving sessions.
///
/// `get` never returns a session whose `expires_at` has passed, whatever the
/// backing strategy.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Starts a session for `user_id` lasting `ttl`, returning its token.
    async fn create(
        &self,
        user_id: &UserId,
        attributes: SessionAttributes,
        ttl: Duration,
    ) -> Result<SessionToken, SessionError>;

    /// Resolves a token. Unknown, invalid and expired tokens yield `None`.
    async fn get(&self, token: &SessionToken) -> Result<Option<SessionData>, SessionError>;

    /// Applies `patch` to a live session.
    async fn update(&self, token: &SessionToken, patch: SessionPatch) -> Result<(), SessionError>;

    /// Ends one session. Ending an unknown session is not an error.
    async fn destroy(&self, token: &SessionToken) -> Result<(), SessionError>;

    /// Ends every session belonging to `user_id`.
    async fn destroy_all(&self, user_id: &UserId) -> Result<(), SessionError>;

    /// The strategy backing this store.
    fn strategy(&self) -> SessionStrategy;
}

/// Everything known about a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: UserId,
    pub email: String,
    pub role: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SessionData {
    /// Builds the record for a session starting at `now` and lasting `ttl`.
    ///
    /// # Errors
    ///
    /// `SessionError::Configuration` if `now + ttl` is not a representable
    /// instant.
    pub fn start(
        user_id: UserId,
        attributes: SessionAttributes,
        now: Timestamp,
        ttl: Duration,
    ) -> Result<Self, SessionError> {
        let expires_at = now.checked_plus(ttl).ok_or_else(|| {
            SessionError::Configuration(format!("session ttl of {}s is out of range", ttl.as_secs()))
        })?;

        Ok(Self {
            user_id,
            email: attributes.email,
            role: attributes.role,
            created_at: now,
            expires_at,
            metadata: attributes.metadata,
        })
    }

    /// True once `now` is past `expires_at`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now.is_after(&self.expires_at)
    }

    /// Applies a patch in place.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = Some(metadata);
        }
    }
}

/// Caller-supplied fields for a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAttributes {
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Default for SessionAttributes {
    fn default() -> Self {
        Self {
            email: String::new(),
            role: "user".to_string(),
            metadata: None,
        }
    }
}

impl SessionAttributes {
    /// Creates attributes with the given email and role.
    pub fn new(email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            role: role.into(),
            metadata: None,
        }
    }

    /// Attaches free-form metadata (device, user agent, ...).
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Partial update of a session. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl SessionPatch {
    /// Patch that changes only the role.
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Default::default()
        }
    }

    /// Patch that replaces the metadata.
    pub fn metadata(metadata: serde_json::Value) -> Self {
        Self {
            metadata: Some(metadata),
            ..Default::default()
        }
    }
}

/// A live session as shown on an "active devices" page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub id: SessionToken,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

/// Backing strategy of a session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStrategy {
    /// Signed stateless token; cannot be revoked.
    Jwt,
    /// Rows in PostgreSQL.
    Database,
    /// Values in Redis with native TTL.
    Redis,
}

impl SessionStrategy {
    /// Returns the configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStrategy::Jwt => "jwt",
            SessionStrategy::Database => "database",
            SessionStrategy::Redis => "redis",
        }
    }

    /// Whether sessions can be ended before they expire.
    pub fn supports_revocation(&self) -> bool {
        !matches!(self, SessionStrategy::Jwt)
    }
}

impl fmt::Display for SessionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStrategy {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jwt" => Ok(SessionStrategy::Jwt),
            "database" => Ok(SessionStrategy::Database),
            "redis" => Ok(SessionStrategy::Redis),
            other => Err(SessionError::Configuration(format!(
                "unknown session strategy '{}'",
                other
            ))),
        }
    }
}

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The store cannot run with the given settings (e.g. missing secret).
    #[error("session configuration error: {0}")]
    Configuration(String),

    /// The operation cannot be performed by this strategy.
    #[error("operation not supported by {strategy} sessions: {message}")]
    Unsupported {
        strategy: SessionStrategy,
        message: String,
    },

    /// The session to modify does not exist or has expired.
    #[error("session not found")]
    NotFound,

    /// The backing store failed.
    #[error("session storage error: {0}")]
    Storage(String),

    /// A stored or signed payload could not be encoded or decoded.
    #[error("session serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
