//! Authenticating HTTP and WebSocket reverse proxy.
//!
//! The gateway is the single entry point in front of the user and task
//! services. It handles:
//!
//! - Prefix routing of every request to a named backend
//! - Bearer token verification against a key fetched from the user service
//! - Handing the verified identity to backends as `X-User-*` headers
//! - HTTP and WebSocket proxying with bounded backend waits
//! - Per-address rate limiting, CORS and security headers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Clients                              │
//! │                   (HTTP / WebSocket)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    tollgate-gateway                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │ Middleware  │ │ RouteTable  │ │  ProxyForwarder /   │    │
//! │  │ (rate, CORS)│ │ + Verifier  │ │  WebSocket proxy    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌──────────────┐             ┌──────────────┐
//!        │ user-service │             │ task-service │
//!        │ (+ key)      │             │ (GraphQL)    │
//!        └──────────────┘             └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use tollgate_auth::{KeyStore, KeyStoreVerifier};
//! use tollgate_gateway::{create_router, GatewayConfig, GatewayState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env()?;
//! let keys = Arc::new(KeyStore::new(config.auth_config()?)?);
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! keys.spawn_refresh(shutdown_rx);
//!
//! let verifier = Arc::new(KeyStoreVerifier::new(keys));
//! let listen_addr = config.listen_addr.clone();
//! let app = create_router(GatewayState::from_config(verifier, config)?);
//!
//! let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod proxy;
pub mod rate_limit;
pub mod routes;
pub mod routing;
pub mod security;
pub mod state;

pub use config::{ConfigError, GatewayConfig, RouteConfig};
pub use error::ApiError;
pub use proxy::{ProxyForwarder, ProxyOutcome};
pub use rate_limit::RateLimiter;
pub use routes::create_router;
pub use routing::{RouteRule, RouteTable};
pub use state::GatewayState;
