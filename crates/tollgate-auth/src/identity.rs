//! Verified caller identity and its header encoding.
//!
//! The gateway hands identity to backends only through the `X-User-*`
//! headers defined here. Backends trust these headers because the gateway is
//! the only component clients can reach; the gateway strips any client-sent
//! copies before setting its own.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use serde::{Deserialize, Serialize};

/// Header carrying the user id.
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");
/// Header carrying the user email.
pub const USER_EMAIL_HEADER: HeaderName = HeaderName::from_static("x-user-email");
/// Header carrying the display name, empty when absent.
pub const USER_NAME_HEADER: HeaderName = HeaderName::from_static("x-user-name");
/// Header carrying the team id, empty when absent.
pub const USER_TEAM_ID_HEADER: HeaderName = HeaderName::from_static("x-user-teamid");
/// Header carrying the role.
pub const USER_ROLE_HEADER: HeaderName = HeaderName::from_static("x-user-role");

/// Role assigned when a token carries none.
pub const DEFAULT_ROLE: &str = "user";

/// The verified facts about a caller, scoped to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaim {
    /// Subject (user) id.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Team the user belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Role, `"user"` unless the token says otherwise.
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl IdentityClaim {
    /// Build a claim, normalizing empty optionals to `None` and an empty role to `"user"`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        name: Option<String>,
        team_id: Option<String>,
        role: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: non_empty(name),
            team_id: non_empty(team_id),
            role: non_empty(role).unwrap_or_else(default_role),
        }
    }

    /// Write the five identity headers into `headers`, replacing existing values.
    ///
    /// # Errors
    ///
    /// Returns an error if a field contains bytes not allowed in a header value.
    pub fn insert_headers(&self, headers: &mut HeaderMap) -> Result<(), InvalidHeaderValue> {
        let fields = [
            (USER_ID_HEADER, self.id.as_str()),
            (USER_EMAIL_HEADER, self.email.as_str()),
            (USER_NAME_HEADER, self.name.as_deref().unwrap_or_default()),
            (USER_TEAM_ID_HEADER, self.team_id.as_deref().unwrap_or_default()),
            (USER_ROLE_HEADER, self.role.as_str()),
        ];

        for (name, value) in fields {
            headers.insert(name, HeaderValue::from_bytes(value.as_bytes())?);
        }
        Ok(())
    }

    /// Reconstruct a claim from identity headers.
    ///
    /// Returns `None` when `X-User-Id` is missing or empty.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &HeaderName| {
            headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        };

        let id = non_empty(read(&USER_ID_HEADER))?;
        Some(Self::new(
            id,
            read(&USER_EMAIL_HEADER).unwrap_or_default(),
            read(&USER_NAME_HEADER),
            read(&USER_TEAM_ID_HEADER),
            read(&USER_ROLE_HEADER),
        ))
    }

    /// Remove every identity header from `headers`.
    pub fn strip_headers(headers: &mut HeaderMap) {
        for name in [
            USER_ID_HEADER,
            USER_EMAIL_HEADER,
            USER_NAME_HEADER,
            USER_TEAM_ID_HEADER,
            USER_ROLE_HEADER,
        ] {
            headers.remove(name);
        }
    }
}
