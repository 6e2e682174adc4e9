//! End-to-end tests driving the gateway router against mock backends.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{any, body_string, header as has_header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tollgate_auth::testing;
use tollgate_auth::{KeyStore, KeyStoreVerifier, VerificationKey};
use tollgate_gateway::config::{TASK_SERVICE, USER_SERVICE};
use tollgate_gateway::{create_router, GatewayConfig, GatewayState};

const CLIENT: ([u8; 4], u16) = ([203, 0, 113, 7], 40_000);

fn config_for(backend_url: &str) -> GatewayConfig {
    GatewayConfig {
        backends: BTreeMap::from([
            (USER_SERVICE.to_string(), backend_url.to_string()),
            (TASK_SERVICE.to_string(), backend_url.to_string()),
        ]),
        ..GatewayConfig::default()
    }
}

fn build(config: GatewayConfig, key: Option<VerificationKey>) -> (Router, Arc<KeyStore>) {
    let keys = Arc::new(KeyStore::new(config.auth_config().unwrap()).unwrap());
    if let Some(key) = key {
        keys.install(key);
    }
    let verifier = Arc::new(KeyStoreVerifier::new(Arc::clone(&keys)));
    let state = GatewayState::from_config(verifier, config).unwrap();
    (create_router(state), keys)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let mut request = builder.body(body).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(CLIENT)));
    request
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, token, Body::empty())
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// An address nothing listens on.
async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn protected_route_without_key_is_503_and_never_forwarded() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let (app, _keys) = build(config_for(&backend.uri()), None);
    let token = testing::token_for("u-1", "ana@example.com");

    for req in [get("/api/users", Some(&token)), get("/api/teams/7", None)] {
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Service unavailable. Public key not yet fetched." })
        );
    }
}

#[tokio::test]
async fn public_route_is_forwarded_without_key() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "t" })))
        .expect(1)
        .mount(&backend)
        .await;

    let (app, _keys) = build(config_for(&backend.uri()), None);
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/login",
            None,
            Body::from(r#"{"email":"a@b.c","password":"x"}"#),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "token": "t" }));
}

#[tokio::test]
async fn authentication_failures_are_401() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let (app, _keys) = build(config_for(&backend.uri()), Some(testing::primary_key()));

    let expired = testing::mint(
        &json!({ "id": "u-1", "email": "a@b.c", "exp": testing::expires_in(-60) }),
        testing::PRIMARY_PRIVATE_PEM,
    );
    let foreign = testing::mint(
        &json!({ "id": "u-1", "email": "a@b.c", "exp": testing::expires_in(3600) }),
        testing::ROTATED_PRIVATE_PEM,
    );

    let mut basic = get("/api/users", None);
    basic
        .headers_mut()
        .insert(header::AUTHORIZATION, "Basic dXNlcjpwdw==".parse().unwrap());

    let cases = [
        (get("/api/users", None), "No token provided"),
        (basic, "Malformed token"),
        (get("/api/users", Some(&expired)), "Invalid or expired token"),
        (get("/api/users", Some(&foreign)), "Invalid or expired token"),
        (get("/api/users", Some("not-a-jwt")), "Invalid or expired token"),
    ];

    for (req, message) in cases {
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{message}");
        assert_eq!(json_body(response).await, json!({ "error": message }));
    }
}

#[tokio::test]
async fn identity_headers_replace_client_supplied_ones() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .and(has_header("x-user-id", "u-1"))
        .and(has_header("x-user-email", "ana@example.com"))
        .and(has_header("x-user-role", "user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "u-1" })))
        .expect(1)
        .mount(&backend)
        .await;

    let (app, _keys) = build(config_for(&backend.uri()), Some(testing::primary_key()));
    let token = testing::token_for("u-1", "ana@example.com");

    let mut req = get("/api/users/me?fields=id", Some(&token));
    req.headers_mut()
        .insert("x-user-id", "attacker".parse().unwrap());
    req.headers_mut()
        .insert("x-user-role", "admin".parse().unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let forwarded = &received[0];
    assert_eq!(forwarded.url.query(), Some("fields=id"));
    assert!(!forwarded.headers.contains_key("authorization"));
    assert_eq!(forwarded.headers.get_all("x-user-id").iter().count(), 1);
    assert_eq!(forwarded.headers["x-user-teamid"], "");
    assert_eq!(forwarded.headers["x-forwarded-for"], "203.0.113.7");
}

#[tokio::test]
async fn unrouted_path_is_404() {
    let (app, _keys) = build(GatewayConfig::default(), None);

    for uri in ["/nope", "/api/usersx", "/"] {
        let response = app.clone().oneshot(get(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(json_body(response).await, json!({ "error": "Route not found" }));
    }
}

#[tokio::test]
async fn unreachable_backend_is_502_without_details() {
    let dead = dead_address().await;
    let (app, _keys) = build(config_for(&dead), None);

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/register",
            None,
            Body::from("{}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Service unavailable");
    assert!(!body.to_string().contains("127.0.0.1"));
}

#[tokio::test]
async fn slow_backend_is_504() {
    let backend = MockServer::start().await;
    Mock::given(path("/api/auth/public-key"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&backend)
        .await;

    let config = GatewayConfig {
        backend_timeout_seconds: 1,
        ..config_for(&backend.uri())
    };
    let (app, _keys) = build(config, None);

    let response = app
        .oneshot(get("/api/auth/public-key", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(response).await["error"], "Gateway timeout");
}

#[tokio::test]
async fn health_is_ok_while_key_authority_is_down() {
    let dead = dead_address().await;
    let (app, keys) = build(config_for(&dead), None);
    assert!(keys.current_key().is_none());

    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
    assert_eq!(body["services"][USER_SERVICE], dead.as_str());
    assert_eq!(body["services"][TASK_SERVICE], dead.as_str());
}

#[tokio::test]
async fn rate_limit_rejects_then_recovers() {
    let backend = MockServer::start().await;
    Mock::given(path("/api/auth/public-key"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let config = GatewayConfig {
        rate_limit_max: 2,
        rate_limit_window_ms: 300,
        ..config_for(&backend.uri())
    };
    let (app, _keys) = build(config, None);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(get("/api/auth/public-key", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(get("/api/auth/public-key", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    assert_eq!(
        json_body(response).await,
        json!({ "error": "Too many requests from this IP, please try again later." })
    );

    tokio::time::sleep(Duration::from_millis(350)).await;

    let response = app
        .oneshot(get("/api/auth/public-key", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn body_and_backend_response_pass_through_verbatim() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(has_header("content-type", "application/json"))
        .and(body_string("{not json"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header("content-type", "text/plain")
                .insert_header("x-backend", "users")
                .set_body_string("bad payload"),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let (app, _keys) = build(config_for(&backend.uri()), None);

    let mut req = request(
        Method::POST,
        "/api/auth/login",
        None,
        Body::from("{not json"),
    );
    req.headers_mut()
        .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());

    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-backend"], "users");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"bad payload");
}

#[tokio::test]
async fn oversized_body_is_413() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let config = GatewayConfig {
        max_body_bytes: 16,
        ..config_for(&backend.uri())
    };
    let (app, _keys) = build(config, None);

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/register",
            None,
            Body::from(vec![b'x'; 100]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn broken_body_stream_is_400_not_413() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;
    let (app, _keys) = build(config_for(&backend.uri()), None);

    let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
        Ok(b"{\"email\":"),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
    ];
    let body = Body::from_stream(futures::stream::iter(chunks));

    let response = app
        .oneshot(request(Method::POST, "/api/auth/register", None, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "Invalid request body" })
    );
}

#[tokio::test]
async fn protected_route_opens_once_refresh_loop_installs_key() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/public-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "publicKey": testing::PRIMARY_PUBLIC_PEM })),
        )
        .mount(&backend)
        .await;
    Mock::given(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&backend)
        .await;

    let (app, keys) = build(config_for(&backend.uri()), None);
    let token = testing::token_for("u-1", "ana@example.com");

    let response = app
        .clone()
        .oneshot(get("/api/users", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let refresh = keys.spawn_refresh(shutdown_rx);

    for _ in 0..100 {
        if keys.current_key().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(keys.current_key().is_some());

    let response = app
        .oneshot(get("/api/users", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    shutdown_tx.send(true).unwrap();
    refresh.await.unwrap();
}
