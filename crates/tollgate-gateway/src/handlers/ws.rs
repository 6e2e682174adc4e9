//! WebSocket proxying.
//!
//! The backend handshake completes before the client is upgraded, so a dead
//! backend yields an ordinary 502/504 response instead of a socket that
//! closes immediately. Once both sides are connected, frames are relayed in
//! both directions until either side closes.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::WebSocketUpgrade;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::request::Parts;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message as TungsteniteMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tollgate_auth::IdentityClaim;

use crate::error::ApiError;
use crate::proxy::{outbound_headers, target_url};
use crate::routing::RouteRule;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the surviving direction may run after the other one ends.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Handshake headers the backend connection generates itself.
const HANDSHAKE_HEADERS: [HeaderName; 4] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_ACCEPT,
];

/// Whether the request asks for a WebSocket upgrade.
#[must_use]
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    connection_upgrade && websocket
}

/// Map an `http(s)` backend URL to `ws(s)`.
#[must_use]
pub fn websocket_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        http_url.to_string()
    }
}

/// Connect to the backend, then upgrade the client and relay frames.
///
/// # Errors
///
/// Returns `BackendUnreachable`/`BackendTimeout` if the backend handshake
/// fails, or `Internal` if the handshake request cannot be built.
pub async fn proxy_websocket(
    upgrade: WebSocketUpgrade,
    parts: &Parts,
    rule: &RouteRule,
    claim: Option<&IdentityClaim>,
    timeout: Duration,
) -> Result<Response, ApiError> {
    let request_target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());
    let url = websocket_url(&target_url(&rule.backend_url, request_target));

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ApiError::Internal(format!("invalid backend websocket url: {e}")))?;

    let client = parts
        .extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let mut forwarded = outbound_headers(&parts.headers, claim, client)
        .map_err(|e| ApiError::Internal(format!("invalid outbound header: {e}")))?;
    for name in HANDSHAKE_HEADERS {
        forwarded.remove(name);
    }
    // Keep the generated Host, Connection, Upgrade and key headers.
    for (name, value) in &forwarded {
        if !request.headers().contains_key(name) {
            request.headers_mut().insert(name.clone(), value.clone());
        }
    }

    let backend_name = rule.backend.clone();
    let (backend, handshake) =
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(TungsteniteError::Http(rejection))) => {
                tracing::info!(
                    backend = %backend_name,
                    status = %rejection.status(),
                    "Backend refused websocket upgrade"
                );
                return Ok(relay_rejection(rejection));
            }
            Ok(Err(e)) => {
                return Err(ApiError::BackendUnreachable {
                    backend: backend_name,
                    cause: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ApiError::BackendTimeout {
                    backend: backend_name,
                });
            }
        };

    let protocol = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let upgrade = match protocol {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    tracing::info!(
        backend = %backend_name,
        path = %parts.uri.path(),
        "WebSocket connection initiated"
    );

    Ok(upgrade.on_upgrade(move |socket| relay(socket, backend, backend_name)))
}

/// Turn a refused backend handshake into the client's response.
fn relay_rejection(rejection: axum::http::Response<Option<Vec<u8>>>) -> Response {
    let (parts, body) = rejection.into_parts();
    let mut response = Response::new(Body::from(body.unwrap_or_default()));
    *response.status_mut() = parts.status;
    for name in [header::CONTENT_TYPE, header::WWW_AUTHENTICATE] {
        if let Some(value) = parts.headers.get(&name) {
            response.headers_mut().insert(name, value.clone());
        }
    }
    response
}

/// Relay frames between the upgraded client and the backend.
///
/// When one direction ends, the other gets [`CLOSE_GRACE`] to deliver the
/// peer's Close reply before both sockets are dropped.
async fn relay(client_socket: WebSocket, backend_socket: BackendSocket, backend: String) {
    let (client_write, client_read) = client_socket.split();
    let (backend_write, backend_read) = backend_socket.split();

    let client_to_backend = forward_client_to_backend(client_read, backend_write, &backend);
    let backend_to_client = forward_backend_to_client(backend_read, client_write, &backend);
    tokio::pin!(client_to_backend);
    tokio::pin!(backend_to_client);

    tokio::select! {
        result = &mut client_to_backend => {
            log_direction_end(&backend, "Client to backend", result);
            drain(&backend, "Backend to client", &mut backend_to_client).await;
        }
        result = &mut backend_to_client => {
            log_direction_end(&backend, "Backend to client", result);
            drain(&backend, "Client to backend", &mut client_to_backend).await;
        }
    }

    tracing::info!(backend = %backend, "WebSocket proxy ended");
}

async fn drain<F>(backend: &str, direction: &str, remaining: F)
where
    F: std::future::Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(CLOSE_GRACE, remaining).await {
        Ok(result) => log_direction_end(backend, direction, result),
        Err(_) => {
            tracing::debug!(backend = %backend, direction, "Close handshake timed out");
        }
    }
}

fn log_direction_end(backend: &str, direction: &str, result: Result<(), String>) {
    if let Err(e) = result {
        tracing::debug!(backend = %backend, direction, error = %e, "Forward ended");
    }
}

/// Forward messages from client to backend.
async fn forward_client_to_backend(
    mut client_read: SplitStream<WebSocket>,
    mut backend_write: SplitSink<BackendSocket, TungsteniteMessage>,
    backend: &str,
) -> Result<(), String> {
    while let Some(msg_result) = client_read.next().await {
        let msg = msg_result.map_err(|e| format!("Error reading from client: {e}"))?;
        let closing = matches!(msg, Message::Close(_));

        let tungstenite_msg = match msg {
            Message::Text(text) => TungsteniteMessage::Text(text),
            Message::Binary(data) => TungsteniteMessage::Binary(data),
            Message::Ping(data) => TungsteniteMessage::Ping(data),
            Message::Pong(data) => TungsteniteMessage::Pong(data),
            Message::Close(frame) => TungsteniteMessage::Close(frame.map(|f| {
                TungsteniteCloseFrame {
                    code: CloseCode::from(f.code),
                    reason: f.reason,
                }
            })),
        };

        backend_write
            .send(tungstenite_msg)
            .await
            .map_err(|e| format!("Failed to send to backend: {e}"))?;

        if closing {
            tracing::debug!(backend = %backend, "Client closed connection");
            break;
        }
    }
    Ok(())
}

/// Forward messages from backend to client.
async fn forward_backend_to_client(
    mut backend_read: SplitStream<BackendSocket>,
    mut client_write: SplitSink<WebSocket, Message>,
    backend: &str,
) -> Result<(), String> {
    while let Some(msg_result) = backend_read.next().await {
        let msg = msg_result.map_err(|e| format!("Error reading from backend: {e}"))?;
        let closing = matches!(msg, TungsteniteMessage::Close(_));

        let axum_msg = match msg {
            TungsteniteMessage::Text(text) => Message::Text(text),
            TungsteniteMessage::Binary(data) => Message::Binary(data),
            TungsteniteMessage::Ping(data) => Message::Ping(data),
            TungsteniteMessage::Pong(data) => Message::Pong(data),
            TungsteniteMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
                code: f.code.into(),
                reason: f.reason,
            })),
            TungsteniteMessage::Frame(_) => continue,
        };

        client_write
            .send(axum_msg)
            .await
            .map_err(|e| format!("Failed to send to client: {e}"))?;

        if closing {
            tracing::debug!(backend = %backend, "Backend closed connection");
            break;
        }
    }
    Ok(())
}
