//! Bearer token verification and claims extraction.

use std::sync::Arc;

use jsonwebtoken::{decode, Validation};
use serde::Deserialize;

use crate::error::{AuthError, Result};
use crate::identity::IdentityClaim;
use crate::key_store::{KeyStore, VerificationKey};

/// Trait for gating requests on an `Authorization` header.
///
/// Verification is pure in-memory work and never suspends.
pub trait TokenVerifier: Send + Sync {
    /// Verify the raw `Authorization` header value, if any.
    ///
    /// # Errors
    ///
    /// Returns the `AuthError` kind that decides the response status.
    fn verify(&self, authorization: Option<&str>) -> Result<IdentityClaim>;
}

/// Claims as issued by the user service.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "teamId")]
    team_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

impl From<TokenClaims> for IdentityClaim {
    fn from(claims: TokenClaims) -> Self {
        Self::new(
            claims.id,
            claims.email,
            claims.name,
            claims.team_id,
            claims.role,
        )
    }
}

/// Extract the token from a `Bearer <token>` header value.
///
/// # Errors
///
/// `NoToken` when the header is missing or blank, `Malformed` when it does
/// not split into exactly a `Bearer` scheme and a token.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str> {
    let value = authorization
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::NoToken)?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::Malformed),
    }
}

/// Verify `token` against a specific key.
///
/// # Errors
///
/// Returns `InvalidOrExpired` for any signature, algorithm, claims or expiry failure.
pub fn verify_with_key(token: &str, key: &VerificationKey) -> Result<IdentityClaim> {
    let mut validation = Validation::new(key.algorithm());
    validation.leeway = 0;
    validation.validate_aud = false;
    // Tokens without `exp` never expire; a present `exp` is still enforced.
    validation.required_spec_claims.clear();

    let data = decode::<TokenClaims>(token, key.decoding_key(), &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT verification error");
        AuthError::InvalidOrExpired
    })?;

    Ok(data.claims.into())
}

/// Verifier backed by a [`KeyStore`].
pub struct KeyStoreVerifier {
    keys: Arc<KeyStore>,
}

impl KeyStoreVerifier {
    /// Create a verifier reading from `keys`.
    #[must_use]
    pub const fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Get the underlying key store.
    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }
}

impl TokenVerifier for KeyStoreVerifier {
    fn verify(&self, authorization: Option<&str>) -> Result<IdentityClaim> {
        // Checked first so every protected request during a key outage is a 503.
        let key = self.keys.current_key().ok_or(AuthError::KeyUnavailable)?;
        let token = bearer_token(authorization)?;
        verify_with_key(token, &key)
    }
}
