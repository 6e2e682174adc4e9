//! API error types and responses.
//!
//! Every error the gateway itself produces is a JSON object with an `error`
//! field, plus a `message` for upstream failures. Internal details stay in
//! the logs.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use tollgate_auth::AuthError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The bearer token gate failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// No route matches the request path.
    #[error("route not found")]
    RouteNotFound,

    /// The client exceeded its request budget for the current window.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },

    /// The request body exceeds the configured limit.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The request body stream failed before it was fully read.
    #[error("request body could not be read")]
    InvalidBody,

    /// The backend could not be reached.
    #[error("backend {backend} unreachable: {cause}")]
    BackendUnreachable {
        /// Backend name.
        backend: String,
        /// Underlying failure, logged only.
        cause: String,
    },

    /// The backend did not answer in time.
    #[error("backend {backend} timed out")]
    BackendTimeout {
        /// Backend name.
        backend: String,
    },

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::KeyUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidBody => StatusCode::BAD_REQUEST,
            Self::BackendUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The client-visible `error` text.
    #[must_use]
    pub const fn error_text(&self) -> &'static str {
        match self {
            Self::Auth(AuthError::NoToken) => "No token provided",
            Self::Auth(AuthError::Malformed) => "Malformed token",
            Self::Auth(AuthError::KeyUnavailable) => {
                "Service unavailable. Public key not yet fetched."
            }
            Self::Auth(AuthError::InvalidOrExpired) => "Invalid or expired token",
            Self::RouteNotFound => "Route not found",
            Self::RateLimited { .. } => "Too many requests from this IP, please try again later.",
            Self::PayloadTooLarge => "Request body too large",
            Self::InvalidBody => "Invalid request body",
            Self::BackendUnreachable { .. } => "Service unavailable",
            Self::BackendTimeout { .. } => "Gateway timeout",
            Self::Internal(_) => "Internal server error",
        }
    }

    /// The client-visible `message` text, for upstream failures only.
    #[must_use]
    pub const fn message_text(&self) -> Option<&'static str> {
        match self {
            Self::BackendUnreachable { .. } => Some("The upstream service could not be reached"),
            Self::BackendTimeout { .. } => Some("The upstream service did not respond in time"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Gateway error");
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_text(),
            message: self.message_text(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
