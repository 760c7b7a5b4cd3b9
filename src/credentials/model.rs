/*!
 * Session credential model and identity key derivation.
 *
 * Two credential records that carry the same underlying secrets are the same
 * logical session slot. The identity key is what detects that.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

static PSID1_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"__Secure-1PSID=([^;\s]+)").expect("Invalid PSID regex")
});

static PSID3_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"__Secure-3PSID=([^;\s]+)").expect("Invalid PSID regex")
});

/// A secret bundle granting session-channel access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Record id assigned by the credential owner
    pub id: String,

    /// Raw session cookie header
    #[serde(default)]
    pub cookie: String,

    /// Anti-forgery token paired with the cookie
    #[serde(default)]
    pub at_token: String,

    /// Whether the owner enabled this credential
    #[serde(default, rename = "isActive")]
    pub active: bool,

    /// Whether the backend flagged this credential as broken
    #[serde(default, rename = "isError")]
    pub error: bool,

    /// Human readable label (usually the account email)
    #[serde(default, rename = "email", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Credential {
    /// Create an active, healthy credential
    pub fn new(id: impl Into<String>, cookie: impl Into<String>, at_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cookie: cookie.into(),
            at_token: at_token.into(),
            active: true,
            error: false,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_error(mut self) -> Self {
        self.error = true;
        self
    }

    /// Active and not flagged as broken
    pub fn is_usable(&self) -> bool {
        self.active && !self.error
    }

    /// Label for logs, falling back to the record id
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Normalized hash of the underlying secrets.
    ///
    /// Records that share it are the same logical slot regardless of their id.
    pub fn identity_key(&self) -> String {
        identity_key(&self.cookie, &self.at_token)
    }
}

/// Extract the session part of a cookie header.
///
/// Only the `__Secure-1PSID` / `__Secure-3PSID` values identify a session;
/// other cookies rotate freely. Falls back to the whole trimmed header.
pub fn extract_cookie_key(cookie: &str) -> String {
    let trimmed = cookie.trim();
    let parts: Vec<&str> = [&*PSID1_REGEX, &*PSID3_REGEX]
        .iter()
        .filter_map(|re| re.captures(trimmed).and_then(|c| c.get(1)).map(|m| m.as_str()))
        .collect();

    if parts.is_empty() {
        trimmed.to_string()
    } else {
        parts.join("|")
    }
}

/// Hex SHA-256 of `cookieKey|atToken`.
pub fn identity_key(cookie: &str, at_token: &str) -> String {
    let normalized = format!("{}|{}", extract_cookie_key(cookie), at_token.trim());
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
