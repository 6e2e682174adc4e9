//! Bearer token authentication for the tollgate gateway.
//!
//! This crate provides:
//!
//! - A [`KeyStore`] holding the current verification key, fetched from the
//!   key-issuing authority by a background refresh loop
//! - A [`TokenVerifier`] that checks `Authorization: Bearer <token>` headers
//!   against the key store and yields an [`IdentityClaim`]
//! - The `X-User-*` header encoding used to hand identity to backends
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Gateway        │────▶│  TokenVerifier   │
//! │   (HTTP/WS)      │     │  (trait)         │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │ KeyStoreVerifier │
//!                          │ (impl)           │
//!                          └────────┬─────────┘
//!                                   │ snapshot
//!                          ┌────────▼─────────┐
//!                          │    KeyStore      │
//!                          │ (refresh loop)   │
//!                          └────────┬─────────┘
//!                                   │ HTTP
//!                          ┌────────▼─────────┐
//!                          │ /api/auth/       │
//!                          │   public-key     │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_auth::{AuthConfig, KeyStore, KeyStoreVerifier, TokenVerifier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = Arc::new(KeyStore::new(AuthConfig::default())?);
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! keys.spawn_refresh(shutdown_rx);
//!
//! let verifier = KeyStoreVerifier::new(Arc::clone(&keys));
//! let claim = verifier.verify(Some("Bearer eyJhbGciOiJSUzI1NiJ9..."))?;
//! println!("user {} ({})", claim.id, claim.role);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod identity;
pub mod key_store;
pub mod verifier;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::time::Duration;

pub use jsonwebtoken::Algorithm;

pub use error::{AuthError, KeyFetchError, Result};
pub use identity::IdentityClaim;
pub use key_store::{KeyStore, VerificationKey};
pub use verifier::{bearer_token, KeyStoreVerifier, TokenVerifier};

/// Configuration for talking to the key-issuing authority.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the authority (e.g., `http://user-service:3001`).
    pub base_url: String,
    /// Signing algorithm tokens must use.
    pub algorithm: Algorithm,
    /// Delay between failed fetch attempts while no key is installed, in seconds.
    pub retry_delay_seconds: u64,
    /// Interval between re-fetches once a key is installed, in seconds. `0` disables.
    pub refresh_interval_seconds: u64,
}

impl AuthConfig {
    /// Get the public key endpoint URL.
    #[must_use]
    pub fn public_key_url(&self) -> String {
        format!("{}/api/auth/public-key", self.base_url.trim_end_matches('/'))
    }

    /// Get the retry delay as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    /// Get the periodic refresh interval, if enabled.
    #[must_use]
    pub const fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh_interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.refresh_interval_seconds))
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            algorithm: Algorithm::RS256,
            retry_delay_seconds: 5,
            refresh_interval_seconds: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.base_url, "http://localhost:3001");
        assert_eq!(config.algorithm, Algorithm::RS256);
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.refresh_interval(), None);
    }

    #[test]
    fn public_key_url_ignores_trailing_slash() {
        let config = AuthConfig {
            base_url: "http://user-service:3001/".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(
            config.public_key_url(),
            "http://user-service:3001/api/auth/public-key"
        );
    }

    #[test]
    fn auth_error_status_codes() {
        assert_eq!(AuthError::NoToken.http_status_code(), 401);
        assert_eq!(AuthError::Malformed.http_status_code(), 401);
        assert_eq!(AuthError::InvalidOrExpired.http_status_code(), 401);
        assert_eq!(AuthError::KeyUnavailable.http_status_code(), 503);
    }

    #[test]
    fn auth_error_retriable() {
        assert!(AuthError::KeyUnavailable.is_retriable());
        assert!(!AuthError::NoToken.is_retriable());
        assert!(!AuthError::Malformed.is_retriable());
        assert!(!AuthError::InvalidOrExpired.is_retriable());
    }

    #[test]
    fn fetch_error_reasons() {
        assert_eq!(KeyFetchError::Network("refused".into()).reason(), "network");
        assert_eq!(KeyFetchError::Status(500).reason(), "status");
        assert_eq!(KeyFetchError::Malformed("bad".into()).reason(), "malformed");
    }
}
