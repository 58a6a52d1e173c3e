//! Stateless signed-token session store.
//!
//! The token *is* the session: an HS256 JWT whose claims carry the
//! [`SessionData`] payload plus `iss`, `aud`, `exp` and `iat`. Nothing is
//! stored server-side, so sessions cannot be changed or revoked before they
//! expire.

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{Clock, SessionToken, SystemClock, UserId};
use crate::ports::{
    SessionAttributes, SessionData, SessionError, SessionPatch, SessionStore, SessionStrategy,
};

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "rural24";

/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "rural24-api";

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(flatten)]
    session: SessionData,
    iss: String,
    aud: String,
    exp: u64,
    iat: u64,
}

/// Session store backed by signed tokens.
pub struct JwtSessionStore {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl JwtSessionStore {
    /// Creates a store signing with `secret`.
    ///
    /// # Errors
    ///
    /// `SessionError::Configuration` if the secret is empty.
    pub fn new(secret: &SecretString) -> Result<Self, SessionError> {
        let secret = secret.expose_secret();
        if secret.is_empty() {
            return Err(SessionError::Configuration(
                "JWT_SECRET must be set for jwt sessions".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Overrides the `iss` and `aud` claims.
    pub fn with_claims(mut self, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self.audience = audience.into();
        self
    }

    /// Replaces the clock used for `iat`, `exp` and expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        // exp is checked below against the injected clock
        validation.validate_exp = false;
        validation.leeway = 0;
        validation
    }

    fn unsupported(message: &str) -> SessionError {
        SessionError::Unsupported {
            strategy: SessionStrategy::Jwt,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl SessionStore for JwtSessionStore {
    async fn create(
        &self,
        user_id: &UserId,
        attributes: SessionAttributes,
        ttl: Duration,
    ) -> Result<SessionToken, SessionError> {
        let now = self.clock.now();
        let session = SessionData::start(user_id.clone(), attributes, now, ttl)?;
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: session.expires_at.as_unix_secs(),
            iat: now.as_unix_secs(),
            session,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        tracing::debug!(user_id = %user_id, "issued jwt session");
        Ok(SessionToken::from_string(token))
    }

    async fn get(&self, token: &SessionToken) -> Result<Option<SessionData>, SessionError> {
        let claims = match decode::<SessionClaims>(
            token.as_str(),
            &self.decoding_key,
            &self.validation(),
        ) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "rejected jwt session token");
                return Ok(None);
            }
        };

        let now = self.clock.now();
        if claims.exp < now.as_unix_secs() || claims.session.is_expired_at(now) {
            return Ok(None);
        }

        Ok(Some(claims.session))
    }

    async fn update(&self, _token: &SessionToken, _patch: SessionPatch) -> Result<(), SessionError> {
        Err(Self::unsupported(
            "signed tokens are immutable; issue a new token instead",
        ))
    }

    async fn destroy(&self, _token: &SessionToken) -> Result<(), SessionError> {
        tracing::warn!("jwt sessions cannot be revoked; token stays valid until it expires");
        Ok(())
    }

    async fn destroy_all(&self, user_id: &UserId) -> Result<(), SessionError> {
        tracing::warn!(
            user_id = %user_id,
            "jwt sessions cannot be revoked; tokens stay valid until they expire"
        );
        Ok(())
    }

    fn strategy(&self) -> SessionStrategy {
        SessionStrategy::Jwt
    }
}

impl std::fmt::Debug for JwtSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionStore")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}
