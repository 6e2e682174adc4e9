//! Gateway configuration types.
//!
//! Configuration is read from environment variables. The route table can be
//! replaced by a JSON file named in `ROUTES_FILE`.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tollgate_auth::{Algorithm, AuthConfig};

/// Name of the backend that also issues signing keys.
pub const USER_SERVICE: &str = "user-service";
/// Name of the task (GraphQL) backend.
pub const TASK_SERVICE: &str = "task-service";

/// Errors raised while loading configuration or building the gateway from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that does not parse.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// The routes file could not be read.
    #[error("failed to read routes file {path}: {source}")]
    RoutesFile {
        /// Path as configured.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The routes file is not a JSON list of route rules.
    #[error("failed to parse routes file {path}: {source}")]
    RoutesParse {
        /// Path as configured.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A route prefix does not start with `/`.
    #[error("route prefix must start with '/': {0:?}")]
    InvalidPrefix(String),

    /// A route or the key authority names a backend that is not configured.
    #[error("unknown backend {backend:?} referenced by {referenced_by}")]
    UnknownBackend {
        /// Missing backend name.
        backend: String,
        /// What referenced it (a route prefix or `key_authority`).
        referenced_by: String,
    },

    /// The outbound HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// One entry of the routing table as configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Path prefix, e.g. `/api/users` or `/api/teams/:id/members`.
    pub prefix: String,
    /// Name of the backend in [`GatewayConfig::backends`].
    pub backend: String,
    /// Whether a valid bearer token is required.
    #[serde(default)]
    pub requires_auth: bool,
    /// Whether WebSocket upgrades are proxied.
    #[serde(default)]
    pub supports_upgrade: bool,
}

impl RouteConfig {
    fn new(prefix: &str, backend: &str, requires_auth: bool, supports_upgrade: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            backend: backend.to_string(),
            requires_auth,
            supports_upgrade,
        }
    }
}

/// Configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0:3000").
    #[serde(default = "GatewayConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Backend base URLs by name.
    #[serde(default = "GatewayConfig::default_backends")]
    pub backends: BTreeMap<String, String>,

    /// Routing table, in declaration order.
    #[serde(default = "GatewayConfig::default_routes")]
    pub routes: Vec<RouteConfig>,

    /// Backend that serves `/api/auth/public-key`.
    #[serde(default = "GatewayConfig::default_key_authority")]
    pub key_authority: String,

    /// Algorithm tokens must be signed with.
    #[serde(default = "GatewayConfig::default_algorithm")]
    pub jwt_algorithm: Algorithm,

    /// Seconds between key fetch attempts while no key is installed.
    #[serde(default = "GatewayConfig::default_key_retry")]
    pub key_retry_delay_seconds: u64,

    /// Seconds between key re-fetches once installed (0 disables).
    #[serde(default)]
    pub key_refresh_interval_seconds: u64,

    /// Allowed CORS origins.
    #[serde(default = "GatewayConfig::default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Rate limit window length in milliseconds.
    #[serde(default = "GatewayConfig::default_rate_limit_window")]
    pub rate_limit_window_ms: u64,

    /// Requests allowed per client address per window.
    #[serde(default = "GatewayConfig::default_rate_limit_max")]
    pub rate_limit_max: u32,

    /// Bound on backend connect and response-header wait, in seconds.
    #[serde(default = "GatewayConfig::default_backend_timeout")]
    pub backend_timeout_seconds: u64,

    /// Maximum request body size in bytes.
    #[serde(default = "GatewayConfig::default_max_body")]
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    fn default_backends() -> BTreeMap<String, String> {
        BTreeMap::from([
            (USER_SERVICE.to_string(), "http://localhost:3001".to_string()),
            (TASK_SERVICE.to_string(), "http://localhost:3003".to_string()),
        ])
    }

    fn default_routes() -> Vec<RouteConfig> {
        vec![
            RouteConfig::new("/api/auth/login", USER_SERVICE, false, false),
            RouteConfig::new("/api/auth/register", USER_SERVICE, false, false),
            RouteConfig::new("/api/auth/public-key", USER_SERVICE, false, false),
            RouteConfig::new("/api/auth/check-token", USER_SERVICE, true, false),
            RouteConfig::new("/api/users", USER_SERVICE, true, false),
            RouteConfig::new("/api/teams", USER_SERVICE, true, false),
            RouteConfig::new("/graphql", TASK_SERVICE, true, true),
        ]
    }

    fn default_key_authority() -> String {
        USER_SERVICE.to_string()
    }

    const fn default_algorithm() -> Algorithm {
        Algorithm::RS256
    }

    const fn default_key_retry() -> u64 {
        5
    }

    fn default_cors_origins() -> Vec<String> {
        vec![
            "http://localhost:3002".to_string(),
            "http://frontend-app:3000".to_string(),
        ]
    }

    const fn default_rate_limit_window() -> u64 {
        15 * 60 * 1000 // 15 minutes
    }

    const fn default_rate_limit_max() -> u32 {
        100
    }

    const fn default_backend_timeout() -> u64 {
        30
    }

    const fn default_max_body() -> usize {
        1024 * 1024 // 1 MB
    }

    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or the routes file is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Recognized variables: `PORT`, `LISTEN_ADDR`, `USER_SERVICE_URL`,
    /// `TASK_SERVICE_URL`, `CORS_ORIGINS`, `JWT_ALGORITHM`,
    /// `RATE_LIMIT_WINDOW_MS`, `RATE_LIMIT_MAX`, `KEY_RETRY_DELAY_SECS`,
    /// `KEY_REFRESH_INTERVAL_SECS`, `BACKEND_TIMEOUT_SECS`, `MAX_BODY_BYTES`,
    /// `ROUTES_FILE`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or the routes file is unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = var("LISTEN_ADDR") {
            config.listen_addr = addr;
        } else if let Some(port) = var("PORT") {
            let port: u16 = parse("PORT", &port)?;
            config.listen_addr = format!("0.0.0.0:{port}");
        }

        if let Some(url) = var("USER_SERVICE_URL") {
            config.backends.insert(USER_SERVICE.to_string(), url);
        }
        if let Some(url) = var("TASK_SERVICE_URL") {
            config.backends.insert(TASK_SERVICE.to_string(), url);
        }

        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        if let Some(alg) = var("JWT_ALGORITHM") {
            config.jwt_algorithm = parse("JWT_ALGORITHM", &alg)?;
        }
        if let Some(v) = var("RATE_LIMIT_WINDOW_MS") {
            config.rate_limit_window_ms = parse("RATE_LIMIT_WINDOW_MS", &v)?;
        }
        if let Some(v) = var("RATE_LIMIT_MAX") {
            config.rate_limit_max = parse("RATE_LIMIT_MAX", &v)?;
        }
        if let Some(v) = var("KEY_RETRY_DELAY_SECS") {
            config.key_retry_delay_seconds = parse("KEY_RETRY_DELAY_SECS", &v)?;
        }
        if let Some(v) = var("KEY_REFRESH_INTERVAL_SECS") {
            config.key_refresh_interval_seconds = parse("KEY_REFRESH_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("BACKEND_TIMEOUT_SECS") {
            config.backend_timeout_seconds = parse("BACKEND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("MAX_BODY_BYTES") {
            config.max_body_bytes = parse("MAX_BODY_BYTES", &v)?;
        }

        if let Some(path) = var("ROUTES_FILE") {
            config.routes = load_routes(Path::new(&path))?;
        }

        Ok(config)
    }

    /// Build the key store configuration.
    ///
    /// # Errors
    ///
    /// Returns `UnknownBackend` if `key_authority` is not a configured backend.
    pub fn auth_config(&self) -> Result<AuthConfig, ConfigError> {
        let base_url = self.backends.get(&self.key_authority).ok_or_else(|| {
            ConfigError::UnknownBackend {
                backend: self.key_authority.clone(),
                referenced_by: "key_authority".to_string(),
            }
        })?;

        Ok(AuthConfig {
            base_url: base_url.clone(),
            algorithm: self.jwt_algorithm,
            retry_delay_seconds: self.key_retry_delay_seconds,
            refresh_interval_seconds: self.key_refresh_interval_seconds,
        })
    }

    /// Get the rate limit window as a `Duration`.
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Get the backend timeout as a `Duration`.
    #[must_use]
    pub const fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            backends: Self::default_backends(),
            routes: Self::default_routes(),
            key_authority: Self::default_key_authority(),
            jwt_algorithm: Self::default_algorithm(),
            key_retry_delay_seconds: Self::default_key_retry(),
            key_refresh_interval_seconds: 0,
            cors_origins: Self::default_cors_origins(),
            rate_limit_window_ms: Self::default_rate_limit_window(),
            rate_limit_max: Self::default_rate_limit_max(),
            backend_timeout_seconds: Self::default_backend_timeout(),
            max_body_bytes: Self::default_max_body(),
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn load_routes(path: &Path) -> Result<Vec<RouteConfig>, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RoutesFile {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::RoutesParse {
        path: display,
        source,
    })
}
