//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Reasons a request fails the bearer token gate.
///
/// The `Display` text of each variant is the message returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("No token provided")]
    NoToken,

    /// The header is not of the form `Bearer <token>`.
    #[error("Malformed token")]
    Malformed,

    /// No verification key has been fetched yet.
    #[error("Service unavailable. Public key not yet fetched.")]
    KeyUnavailable,

    /// Signature, algorithm, claims or expiry check failed.
    #[error("Invalid or expired token")]
    InvalidOrExpired,
}

impl AuthError {
    /// Returns `true` if the client may retry the same request later.
    ///
    /// Only a missing key is transient; every other failure needs a new token.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::KeyUnavailable)
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NoToken | Self::Malformed | Self::InvalidOrExpired => 401,
            Self::KeyUnavailable => 503,
        }
    }

    /// Short machine-readable name, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::Malformed => "malformed",
            Self::KeyUnavailable => "key_unavailable",
            Self::InvalidOrExpired => "invalid_or_expired",
        }
    }
}

/// Errors from fetching the verification key document.
#[derive(Debug, Error)]
pub enum KeyFetchError {
    /// The authority could not be reached.
    #[error("key request failed: {0}")]
    Network(String),

    /// The authority answered with a non-success status.
    #[error("key authority returned status {0}")]
    Status(u16),

    /// The response body or the key material could not be parsed.
    #[error("malformed key document: {0}")]
    Malformed(String),
}

impl KeyFetchError {
    /// Classification used in log fields.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status(_) => "status",
            Self::Malformed(_) => "malformed",
        }
    }
}
