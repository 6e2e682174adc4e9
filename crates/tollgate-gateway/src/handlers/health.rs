//! Health check endpoint.
//!
//! Reports liveness only: it never touches the key store or the backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use tollgate_auth::TokenVerifier;

use crate::state::GatewayState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Current time, RFC 3339.
    pub timestamp: String,
    /// Configured backends by name.
    pub services: BTreeMap<String, String>,
}

/// Health check handler.
///
/// # Example
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "timestamp": "2024-05-01T12:00:00.000Z",
///   "services": {
///     "task-service": "http://localhost:3003",
///     "user-service": "http://localhost:3001"
///   }
/// }
/// ```
pub async fn health<V>(State(state): State<Arc<GatewayState<V>>>) -> impl IntoResponse
where
    V: TokenVerifier + 'static,
{
    let response = HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        services: state.config.backends.clone(),
    };

    (StatusCode::OK, Json(response))
}
