//! Catch-all proxy handler.
//!
//! Resolves the route, gates protected routes on the bearer token, then
//! hands the request to the HTTP forwarder or the WebSocket proxy.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State, WebSocketUpgrade};
use axum::http::header;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;

use tollgate_auth::{AuthError, IdentityClaim, TokenVerifier};

use crate::error::ApiError;
use crate::handlers::ws;
use crate::proxy::ProxyOutcome;
use crate::state::GatewayState;

/// Only the length limit is a 413; a body that fails mid-read is the client's fault.
fn body_read_error(error: axum::Error) -> ApiError {
    let inner = error.into_inner();
    if inner.is::<LengthLimitError>() {
        ApiError::PayloadTooLarge
    } else {
        tracing::debug!(error = %inner, "Failed to read request body");
        ApiError::InvalidBody
    }
}

/// Verify the request's `Authorization` header.
///
/// # Errors
///
/// Returns the verifier's rejection.
pub fn authenticate<V>(verifier: &V, headers: &HeaderMap) -> Result<IdentityClaim, AuthError>
where
    V: TokenVerifier + ?Sized,
{
    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
    verifier.verify(authorization.as_deref())
}

/// Proxy any path that has a route rule.
///
/// # Errors
///
/// Returns 404 for unrouted paths, 401/503 for failed authentication,
/// 400/413 for unreadable or oversized bodies and 502/504 for backend failures.
pub async fn proxy<V>(
    State(state): State<Arc<GatewayState<V>>>,
    request: Request,
) -> Result<Response, ApiError>
where
    V: TokenVerifier + 'static,
{
    let Some(rule) = state.routes.resolve(request.uri().path()) else {
        tracing::debug!(path = %request.uri().path(), "No route");
        return Err(ApiError::RouteNotFound);
    };

    let claim = if rule.requires_auth {
        match authenticate(state.verifier.as_ref(), request.headers()) {
            Ok(claim) => Some(claim),
            Err(e) => {
                tracing::debug!(
                    path = %request.uri().path(),
                    reason = e.kind(),
                    "Rejected request"
                );
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let (mut parts, body) = request.into_parts();

    if rule.supports_upgrade && ws::is_upgrade_request(&parts.headers) {
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        return ws::proxy_websocket(
            upgrade,
            &parts,
            rule,
            claim.as_ref(),
            state.forwarder.timeout(),
        )
        .await
        .inspect_err(|e| log_backend_failure(e, &parts.uri.to_string()));
    }

    let body = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(body_read_error)?;
    let target = parts.uri.to_string();
    let request = Request::from_parts(parts, body);

    let error = match state.forwarder.forward(request, rule, claim.as_ref()).await? {
        ProxyOutcome::Forwarded(response) => return Ok(response),
        ProxyOutcome::BackendUnreachable(cause) => ApiError::BackendUnreachable {
            backend: rule.backend.clone(),
            cause,
        },
        ProxyOutcome::BackendTimeout => ApiError::BackendTimeout {
            backend: rule.backend.clone(),
        },
    };
    log_backend_failure(&error, &target);
    Err(error)
}

fn log_backend_failure(error: &ApiError, target: &str) {
    match error {
        ApiError::BackendUnreachable { backend, cause } => {
            tracing::error!(backend = %backend, target = %target, cause = %cause, "Proxy error");
        }
        ApiError::BackendTimeout { backend } => {
            tracing::error!(backend = %backend, target = %target, "Proxy timeout");
        }
        _ => {}
    }
}
