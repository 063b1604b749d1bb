//! auth::token
//!
//! GitLab access tokens held in memory for a session or request.
//!
//! # Security
//!
//! Tokens MUST never appear in logs, JSON outputs, error messages or debug
//! output. [`GitLabToken`] implements a redacting `Debug` and is never
//! serialized.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use super::TokenKind;

/// Buffer before expiry to trigger proactive refresh (5 minutes).
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// An access token for the GitLab API.
#[derive(Clone)]
pub struct GitLabToken {
    kind: TokenKind,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl GitLabToken {
    /// An OAuth token as returned by the token endpoint.
    ///
    /// `expires_in` is in seconds; tokens without it never expire.
    pub fn oauth(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Self {
        Self {
            kind: TokenKind::OAuth,
            access_token: access_token.into(),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at: expires_in
                .and_then(|secs| i64::try_from(secs).ok())
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }

    /// A personal access token supplied by the client.
    pub fn personal(access_token: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::PersonalAccessToken,
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Check if the access token has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Check if the access token needs refresh.
    ///
    /// Returns true if the access token will expire within the buffer
    /// period, allowing proactive refresh before expiry.
    pub fn needs_refresh(&self) -> bool {
        let buffer = Duration::seconds(EXPIRY_BUFFER_SECS);
        self.expires_at.is_some_and(|at| Utc::now() >= at - buffer)
    }

    /// Whether a refresh token is available.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    #[cfg(test)]
    pub(crate) fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

// Custom Debug to avoid exposing tokens
impl fmt::Debug for GitLabToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabToken")
            .field("kind", &self.kind)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
