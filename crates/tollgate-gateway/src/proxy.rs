//! HTTP request forwarding to backends.
//!
//! The forwarder rewrites the target to the rule's backend, keeps method,
//! path, query and body, swaps client identity headers for gateway-issued
//! ones, and streams the backend response back without touching its body.
//! Dropping the returned response (client gone) drops the backend stream and
//! releases its connection.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Request;
use axum::response::Response;
use reqwest::redirect::Policy;

use tollgate_auth::IdentityClaim;

use crate::error::ApiError;
use crate::routing::RouteRule;

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Result of one forwarding attempt.
pub enum ProxyOutcome {
    /// The backend answered; its response is relayed as-is.
    Forwarded(Response),
    /// The backend could not be reached.
    BackendUnreachable(String),
    /// Connecting or waiting for response headers exceeded the timeout.
    BackendTimeout,
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed.into_iter().chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

/// Headers for the outbound request: inbound headers minus hop-by-hop,
/// `Host`, `Authorization` and client-sent identity, plus gateway identity
/// and `X-Forwarded-*`.
///
/// # Errors
///
/// Returns an error if a claim field cannot be encoded as a header value.
pub fn outbound_headers(
    inbound: &HeaderMap,
    claim: Option<&IdentityClaim>,
    client: Option<SocketAddr>,
) -> Result<HeaderMap, header::InvalidHeaderValue> {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::AUTHORIZATION);
    headers.remove(header::CONTENT_LENGTH);
    let host = headers.remove(header::HOST);
    IdentityClaim::strip_headers(&mut headers);

    if let Some(claim) = claim {
        claim.insert_headers(&mut headers)?;
    }

    if let Some(client) = client {
        let ip = client.ip().to_string();
        let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip,
        };
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&forwarded_for)?);
    }
    // The gateway terminates plain HTTP; client-sent values are overwritten.
    match host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    Ok(headers)
}

/// Backend base URL joined with the request's path and query.
#[must_use]
pub fn target_url(backend_url: &str, request_target: &str) -> String {
    format!("{}{}", backend_url.trim_end_matches('/'), request_target)
}

/// Forwards buffered requests to backends over a shared connection pool.
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyForwarder {
    /// Create a forwarder bounding connect and response-header waits by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(Policy::none())
            .build()?;

        Ok(Self { client, timeout })
    }

    /// The configured backend timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward `request` to `rule`'s backend.
    ///
    /// The body is sent exactly as received. Only response headers are
    /// awaited under the timeout; the body streams afterwards.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Internal` if the outbound request cannot be built.
    pub async fn forward(
        &self,
        request: Request<Bytes>,
        rule: &RouteRule,
        claim: Option<&IdentityClaim>,
    ) -> Result<ProxyOutcome, ApiError> {
        let (parts, body) = request.into_parts();
        let client = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let headers = outbound_headers(&parts.headers, claim, client)
            .map_err(|e| ApiError::Internal(format!("invalid outbound header: {e}")))?;

        let request_target = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path(), |pq| pq.as_str());
        let url = target_url(&rule.backend_url, request_target);

        let mut outbound = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if !body.is_empty() {
            outbound = outbound.body(body);
        }

        let response = match tokio::time::timeout(self.timeout, outbound.send()).await {
            Err(_) => return Ok(ProxyOutcome::BackendTimeout),
            Ok(Err(e)) if e.is_builder() => {
                return Err(ApiError::Internal(format!("invalid backend request: {e}")));
            }
            Ok(Err(e)) if e.is_timeout() => return Ok(ProxyOutcome::BackendTimeout),
            Ok(Err(e)) => return Ok(ProxyOutcome::BackendUnreachable(e.to_string())),
            Ok(Ok(response)) => response,
        };

        Ok(ProxyOutcome::Forwarded(relay(response)))
    }
}

/// Convert a backend response into a client response, streaming the body.
fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
