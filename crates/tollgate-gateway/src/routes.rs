//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::any::Any;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use tollgate_auth::TokenVerifier;

use crate::error::ApiError;
use crate::handlers::{health, proxy};
use crate::rate_limit::limit_by_client;
use crate::security::{build_cors_layer, security_headers};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// - `GET /health` - Health check (public, not proxied)
/// - anything else - resolved against the routing table and proxied
///
/// # Middleware (outermost first)
///
/// tracing, security headers, CORS, rate limiting, panic recovery.
pub fn create_router<V>(state: GatewayState<V>) -> Router
where
    V: TokenVerifier + 'static,
{
    let cors = build_cors_layer(&state.config.cors_origins);
    let rate_limiter = Arc::clone(&state.rate_limiter);

    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health::health::<V>))
        .fallback(proxy::proxy::<V>)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            limit_by_client,
        ))
        .layer(cors)
        .layer(axum::middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn panic_becomes_opaque_500() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Internal server error" }));
    }
}
