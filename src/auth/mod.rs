//! auth - GitLab authentication
//!
//! Every request against the GitLab backend runs with the caller's own
//! GitLab credentials. Two kinds are accepted:
//!
//! - OAuth tokens obtained through the authorization-code flow and kept in a
//!   server-side browser session
//! - Personal access tokens sent by API clients with each request
//!
//! The filesystem backend needs no credentials; callers act as the
//! configured local user.
//!
//! # Components
//!
//! - [`GitLabOAuthClient`] - HTTP client for the OAuth endpoints
//! - [`SessionStore`] / [`Session`] - browser sessions and their
//!   [`AuthorizationState`]
//! - [`GitLabAuthorizer`] - drives a session through the OAuth flow
//! - [`GitLabIdentity`] - resolves tokens to users
//! - [`TokenProvider`] - trait for providing bearer tokens to the store
//! - [`Caller`] - the user and credentials a request runs as
//!
//! # Security
//!
//! Tokens MUST never appear in logs, error messages or debug output. All
//! token-carrying types implement custom Debug to redact them.

mod authorizer;
mod errors;
mod identity;
mod oauth;
mod provider;
mod session;
mod token;

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};

use crate::core::model::User;

pub use authorizer::GitLabAuthorizer;
pub use errors::AuthError;
pub use identity::{token_fingerprint, GitLabIdentity, IDENTITY_CACHE_TTL};
pub use oauth::GitLabOAuthClient;
pub use provider::{SessionTokenProvider, StaticTokenProvider};
pub use session::{AuthorizationState, Session, SessionStore, SESSION_COOKIE};
pub use token::{GitLabToken, EXPIRY_BUFFER_SECS};

/// Header carrying GitLab personal access tokens.
pub const PRIVATE_TOKEN_HEADER: &str = "private-token";

/// How a token is presented to GitLab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `Authorization: Bearer <token>`
    OAuth,
    /// `PRIVATE-TOKEN: <token>`
    PersonalAccessToken,
}

/// Build the request header presenting `token` to GitLab.
pub(crate) fn auth_header(
    kind: TokenKind,
    token: &str,
) -> Result<(HeaderName, HeaderValue), AuthError> {
    let (name, raw) = match kind {
        TokenKind::OAuth => (AUTHORIZATION, format!("Bearer {token}")),
        TokenKind::PersonalAccessToken => (
            HeaderName::from_static(PRIVATE_TOKEN_HEADER),
            token.to_string(),
        ),
    };
    let mut value = HeaderValue::from_str(&raw)
        .map_err(|_| AuthError::InvalidResponse("token contains invalid characters".into()))?;
    value.set_sensitive(true);
    Ok((name, value))
}

/// Trait for providing bearer tokens to the GitLab store.
///
/// # Implementation Notes
///
/// Implementors must:
/// - Handle token refresh transparently
/// - Serialize refreshes so a refresh token is used once
/// - Never log or expose token values
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a valid token, refreshing if necessary.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if no token exists
    /// - [`AuthError::Expired`] if the token expired and cannot be refreshed
    async fn bearer_token(&self) -> Result<String, AuthError>;

    /// Force a refresh after GitLab rejected the current token.
    ///
    /// Returns `false` when the provider cannot refresh.
    async fn refresh(&self) -> Result<bool, AuthError> {
        Ok(false)
    }

    /// How the token is presented.
    fn token_kind(&self) -> TokenKind;

    /// Get the host this provider authenticates for.
    fn host(&self) -> &str;
}

/// Credentials a request carries to the backend.
#[derive(Clone)]
pub enum Credentials {
    /// No credentials; only valid for the filesystem backend.
    None,
    Token(Arc<dyn TokenProvider>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Token(provider) => f
                .debug_struct("Token")
                .field("host", &provider.host())
                .field("kind", &provider.token_kind())
                .finish(),
        }
    }
}

/// The user a request runs as.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
    pub credentials: Credentials,
}

impl Caller {
    /// A caller without credentials.
    pub fn local(user: User) -> Self {
        Self {
            user,
            credentials: Credentials::None,
        }
    }

    pub fn with_token(user: User, provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            user,
            credentials: Credentials::Token(provider),
        }
    }

    pub fn token_provider(&self) -> Option<Arc<dyn TokenProvider>> {
        match &self.credentials {
            Credentials::Token(provider) => Some(Arc::clone(provider)),
            Credentials::None => None,
        }
    }
}
