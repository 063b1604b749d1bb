//! auth::errors
//!
//! Authentication error types for GitLab OAuth and personal access tokens.
//!
//! # Design
//!
//! Error messages MUST NOT contain tokens. All error variants provide useful
//! context without exposing sensitive data.
//!
//! # Example
//!
//! ```
//! use sdlc_server::auth::AuthError;
//!
//! let err = AuthError::NotAuthenticated("gitlab.example.com".to_string());
//! assert!(err.to_string().contains("gitlab.example.com"));
//! assert!(err.needs_reauth());
//! ```

use thiserror::Error;

/// Errors from authentication operations.
///
/// # Security
///
/// Error messages intentionally do not include token values.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No authentication exists for the host.
    #[error("not authenticated with '{0}'")]
    NotAuthenticated(String),

    /// The access token expired and cannot be refreshed.
    #[error("authentication expired for '{0}'")]
    Expired(String),

    /// Token refresh failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The OAuth callback carried a state that does not match the pending one.
    #[error("authorization state mismatch")]
    InvalidState,

    /// The OAuth callback arrived without a pending authorization.
    #[error("no authorization in progress")]
    NoPendingAuthorization,

    /// The user or GitLab refused the authorization.
    #[error("authorization denied: {0}")]
    Denied(String),

    /// The OAuth endpoints answered with something unexpected.
    #[error("invalid OAuth response: {0}")]
    InvalidResponse(String),

    /// Network error during authentication.
    #[error("network error: {0}")]
    Network(String),

    /// GitLab API error during authentication.
    #[error("GitLab API error: {status} - {message}")]
    GitLabApi {
        /// HTTP status code
        status: u16,
        /// Error message from GitLab
        message: String,
    },

    /// The server is not configured for this authentication method.
    #[error("authentication not configured: {0}")]
    NotConfigured(String),

    /// Internal error (should not happen).
    #[error("internal auth error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Check if this error indicates the user needs to re-authenticate.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated(_)
                | AuthError::Expired(_)
                | AuthError::InvalidState
                | AuthError::NoPendingAuthorization
                | AuthError::Denied(_)
        )
    }

    /// Check if this error indicates a transient failure that might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_))
            || matches!(self, AuthError::GitLabApi { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::InvalidResponse(err.to_string())
    }
}
