//! Session verification for realtime connections.
//!
//! SYSTEM CONTEXT
//! ==============
//! Credential issuance happens elsewhere; this server only checks the session
//! token a client presents when it opens the websocket. The check sits behind
//! [`SessionVerifier`] so tests can swap in a fixed identity table.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::ErrorCode;

/// Authenticated caller attached to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("session token required")]
    MissingToken,
    #[error("invalid session token: {0}")]
    InvalidToken(String),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        "E_AUTHENTICATION"
    }
}

#[async_trait::async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Turn a session token into the caller's identity.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Claims carried by application session tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub name: String,
    pub exp: u64,
}

/// HS256 verifier sharing a secret with the credential issuer.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self { key: DecodingKey::from_secret(secret.as_bytes()), validation: Validation::new(Algorithm::HS256) }
    }
}

#[async_trait::async_trait]
impl SessionVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        let display_name = claims.name.trim();
        if display_name.is_empty() {
            return Err(AuthError::InvalidToken("empty display name".into()));
        }

        Ok(Identity { user_id: claims.user_id, display_name: display_name.to_string() })
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
