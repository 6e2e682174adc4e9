//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use tollgate_auth::TokenVerifier;

use crate::config::{ConfigError, GatewayConfig};
use crate::proxy::ProxyForwarder;
use crate::rate_limit::RateLimiter;
use crate::routing::RouteTable;

/// Shared application state for the gateway.
pub struct GatewayState<V>
where
    V: TokenVerifier,
{
    /// Bearer token verifier for protected routes.
    pub verifier: Arc<V>,
    /// Resolved routing table.
    pub routes: Arc<RouteTable>,
    /// HTTP forwarder with its connection pool.
    pub forwarder: ProxyForwarder,
    /// Per-address request counters.
    pub rate_limiter: Arc<RateLimiter>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<V> GatewayState<V>
where
    V: TokenVerifier,
{
    /// Create a new gateway state from its parts.
    #[must_use]
    pub fn new(
        verifier: Arc<V>,
        routes: RouteTable,
        forwarder: ProxyForwarder,
        config: GatewayConfig,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window(),
        ));

        Self {
            verifier,
            routes: Arc::new(routes),
            forwarder,
            rate_limiter,
            config,
        }
    }

    /// Build the routing table and forwarder described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a route is invalid or names an unknown backend, or
    /// if the HTTP client cannot be built.
    pub fn from_config(verifier: Arc<V>, config: GatewayConfig) -> Result<Self, ConfigError> {
        let routes = RouteTable::from_config(&config.routes, &config.backends)?;
        let forwarder = ProxyForwarder::new(config.backend_timeout())?;
        Ok(Self::new(verifier, routes, forwarder, config))
    }
}

impl<V> Clone for GatewayState<V>
where
    V: TokenVerifier,
{
    fn clone(&self) -> Self {
        Self {
            verifier: Arc::clone(&self.verifier),
            routes: Arc::clone(&self.routes),
            forwarder: self.forwarder.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            config: self.config.clone(),
        }
    }
}
