//! Static path-prefix routing table.
//!
//! A prefix matches a path on segment boundaries: `/api/users` matches
//! `/api/users`, `/api/users/` and `/api/users/42`, but not `/api/usersX`.
//! Segments written as `:name` match any single non-empty segment.
//!
//! Rules are ordered by specificity (more segments first, then more literal
//! segments); equal specificity keeps declaration order.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::config::{ConfigError, RouteConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

impl Segment {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == candidate,
            Self::Param => !candidate.is_empty(),
        }
    }
}

/// A resolved routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// Path prefix as configured.
    pub prefix: String,
    /// Backend name, used in logs and `/health`.
    pub backend: String,
    /// Backend base URL requests are forwarded to.
    pub backend_url: String,
    /// Whether a valid bearer token is required.
    pub requires_auth: bool,
    /// Whether WebSocket upgrades are proxied.
    pub supports_upgrade: bool,
    segments: Vec<Segment>,
}

impl RouteRule {
    /// Create a rule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrefix` unless `prefix` starts with `/`.
    pub fn new(
        prefix: impl Into<String>,
        backend: impl Into<String>,
        backend_url: impl Into<String>,
        requires_auth: bool,
        supports_upgrade: bool,
    ) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') {
            return Err(ConfigError::InvalidPrefix(prefix));
        }

        let segments = prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.starts_with(':') {
                    Segment::Param
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();

        Ok(Self {
            prefix,
            backend: backend.into(),
            backend_url: backend_url.into(),
            requires_auth,
            supports_upgrade,
            segments,
        })
    }

    /// Whether this rule's prefix covers `path`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/').skip(1);
        self.segments
            .iter()
            .all(|segment| parts.next().is_some_and(|part| segment.matches(part)))
    }

    fn specificity(&self) -> (usize, usize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (self.segments.len(), literals)
    }
}

/// The gateway's routing table. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Build a table from rules given in declaration order.
    #[must_use]
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        // Stable sort keeps declaration order among equally specific rules.
        rules.sort_by_key(|rule| Reverse(rule.specificity()));
        Self { rules }
    }

    /// Resolve configured routes against the backend registry.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad prefix or a route naming an unknown backend.
    pub fn from_config(
        routes: &[RouteConfig],
        backends: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let rules = routes
            .iter()
            .map(|route| {
                let url = backends
                    .get(&route.backend)
                    .ok_or_else(|| ConfigError::UnknownBackend {
                        backend: route.backend.clone(),
                        referenced_by: route.prefix.clone(),
                    })?;
                RouteRule::new(
                    route.prefix.as_str(),
                    route.backend.as_str(),
                    url.as_str(),
                    route.requires_auth,
                    route.supports_upgrade,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules))
    }

    /// Find the most specific rule covering `path`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// All rules, most specific first.
    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}
