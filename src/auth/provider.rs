//! auth::provider
//!
//! [`TokenProvider`] implementations handed to the GitLab store.
//!
//! # Concurrency
//!
//! A session's token is refreshed while the session's state lock is held.
//! The pattern is:
//!
//! 1. Lock the session state
//! 2. If the token is still fresh (another request may have refreshed it),
//!    return it
//! 3. Otherwise trade the refresh token for a new pair and store it
//! 4. Release the lock
//!
//! A refresh rejected by GitLab drops the session back to `Unauthorized`.

use std::sync::Arc;

use tracing::{debug, warn};

use super::errors::AuthError;
use super::oauth::GitLabOAuthClient;
use super::session::{AuthorizationState, Session};
use super::token::GitLabToken;
use super::{TokenKind, TokenProvider};

/// Tokens from an OAuth-authorized browser session.
pub struct SessionTokenProvider {
    session: Arc<Session>,
    oauth: GitLabOAuthClient,
}

impl SessionTokenProvider {
    pub fn new(session: Arc<Session>, oauth: GitLabOAuthClient) -> Self {
        Self { session, oauth }
    }

    fn host(&self) -> &str {
        self.oauth.base_url()
    }

    /// Refresh the token held in `state`, returning the new access token.
    async fn refresh_locked(&self, state: &mut AuthorizationState) -> Result<String, AuthError> {
        let (refresh_token, expired) = match &*state {
            AuthorizationState::Authorized { token, .. } => (
                token.refresh_token().map(str::to_string),
                token.is_expired(),
            ),
            _ => return Err(AuthError::NotAuthenticated(self.host().to_string())),
        };

        let Some(refresh_token) = refresh_token else {
            if expired {
                *state = AuthorizationState::Unauthorized;
                return Err(AuthError::Expired(self.host().to_string()));
            }
            return current_access_token(state)
                .ok_or_else(|| AuthError::NotAuthenticated(self.host().to_string()));
        };

        match self.oauth.refresh(&refresh_token).await {
            Ok(new_token) => {
                debug!(session = self.session.id(), "refreshed session token");
                let access = new_token.access_token().to_string();
                if let AuthorizationState::Authorized { token, .. } = state {
                    *token = new_token;
                }
                Ok(access)
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(session = self.session.id(), error = %e, "token refresh rejected");
                *state = AuthorizationState::Unauthorized;
                Err(AuthError::Expired(self.host().to_string()))
            }
        }
    }
}

fn current_access_token(state: &AuthorizationState) -> Option<String> {
    match state {
        AuthorizationState::Authorized { token, .. } => Some(token.access_token().to_string()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl TokenProvider for SessionTokenProvider {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        let mut state = self.session.state().await;
        match &*state {
            AuthorizationState::Authorized { token, .. } if !token.needs_refresh() => {
                return Ok(token.access_token().to_string());
            }
            AuthorizationState::Authorized { .. } => {}
            _ => return Err(AuthError::NotAuthenticated(self.host().to_string())),
        }
        self.refresh_locked(&mut state).await
    }

    async fn refresh(&self) -> Result<bool, AuthError> {
        let mut state = self.session.state().await;
        if !state.is_authorized() {
            return Ok(false);
        }
        self.refresh_locked(&mut state).await.map(|_| true)
    }

    fn token_kind(&self) -> TokenKind {
        TokenKind::OAuth
    }

    fn host(&self) -> &str {
        SessionTokenProvider::host(self)
    }
}

impl std::fmt::Debug for SessionTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenProvider")
            .field("session", &self.session.id())
            .field("host", &self.host())
            .finish_non_exhaustive()
    }
}

/// A fixed token, typically a personal access token sent by the client.
pub struct StaticTokenProvider {
    token: GitLabToken,
    host: String,
}

impl StaticTokenProvider {
    pub fn new(host: &str, token: GitLabToken) -> Self {
        Self {
            token,
            host: host.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.token.is_expired() {
            return Err(AuthError::Expired(self.host.clone()));
        }
        Ok(self.token.access_token().to_string())
    }

    fn token_kind(&self) -> TokenKind {
        self.token.kind()
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("host", &self.host)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionStore;
    use crate::core::model::User;
    use crate::core::types::UserId;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alice() -> User {
        User {
            user_id: UserId::new("alice").unwrap(),
            name: "Alice".into(),
        }
    }

    async fn authorized_session(token: GitLabToken) -> Arc<Session> {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.create();
        *session.state().await = AuthorizationState::Authorized {
            token,
            user: alice(),
        };
        session
    }

    fn oauth(base: &str) -> GitLabOAuthClient {
        GitLabOAuthClient::new(base, "app", None, "http://localhost/cb")
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let server = MockServer::start().await;
        let session = authorized_session(GitLabToken::oauth("at", Some("rt".into()), Some(7200))).await;
        let provider = SessionTokenProvider::new(session, oauth(&server.uri()));

        assert_eq!(provider.bearer_token().await.unwrap(), "at");
        assert_eq!(provider.token_kind(), TokenKind::OAuth);
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at2",
                "refresh_token": "rt2",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = authorized_session(GitLabToken::oauth("at", Some("rt".into()), Some(30))).await;
        let provider = SessionTokenProvider::new(Arc::clone(&session), oauth(&server.uri()));

        assert_eq!(provider.bearer_token().await.unwrap(), "at2");
        // second call sees the stored, refreshed token
        assert_eq!(provider.bearer_token().await.unwrap(), "at2");
        let state = session.state().await;
        match &*state {
            AuthorizationState::Authorized { token, .. } => {
                assert_eq!(token.refresh_token(), Some("rt2"))
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_refresh_unauthorizes_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let session = authorized_session(GitLabToken::oauth("at", Some("rt".into()), Some(30))).await;
        let provider = SessionTokenProvider::new(Arc::clone(&session), oauth(&server.uri()));

        let err = provider.bearer_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Expired(_)));
        assert!(!session.state().await.is_authorized());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token() {
        let server = MockServer::start().await;
        let token = GitLabToken::oauth("at", None, None).with_expiry(Utc::now() - ChronoDuration::seconds(5));
        let session = authorized_session(token).await;
        let provider = SessionTokenProvider::new(session, oauth(&server.uri()));

        assert!(matches!(
            provider.bearer_token().await,
            Err(AuthError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn unauthorized_session_has_no_token() {
        let server = MockServer::start().await;
        let store = SessionStore::new(Duration::from_secs(60));
        let provider = SessionTokenProvider::new(store.create(), oauth(&server.uri()));

        assert!(matches!(
            provider.bearer_token().await,
            Err(AuthError::NotAuthenticated(_))
        ));
        assert!(!provider.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn static_provider() {
        let provider = StaticTokenProvider::new("https://gitlab.example.com", GitLabToken::personal("glpat-x"));
        assert_eq!(provider.bearer_token().await.unwrap(), "glpat-x");
        assert_eq!(provider.token_kind(), TokenKind::PersonalAccessToken);
        assert!(!provider.refresh().await.unwrap());
        assert!(!format!("{provider:?}").contains("glpat-x"));
    }
}
