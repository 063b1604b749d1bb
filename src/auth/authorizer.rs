//! auth::authorizer
//!
//! Drives a session through the GitLab OAuth authorization-code flow.
//!
//! The `state` nonce sent to GitLab is random per attempt; only its
//! fingerprint is kept in the session, and a callback is accepted only if
//! its `state` hashes to the same fingerprint.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::errors::AuthError;
use super::identity::{token_fingerprint, GitLabIdentity};
use super::oauth::GitLabOAuthClient;
use super::provider::SessionTokenProvider;
use super::session::{AuthorizationState, Session};

/// GitLab OAuth authorization for browser sessions.
#[derive(Debug)]
pub struct GitLabAuthorizer {
    oauth: GitLabOAuthClient,
    identity: Arc<GitLabIdentity>,
}

impl GitLabAuthorizer {
    pub fn new(oauth: GitLabOAuthClient, identity: Arc<GitLabIdentity>) -> Self {
        Self { oauth, identity }
    }

    /// Start authorization: moves the session to `Pending` and returns the
    /// GitLab URL the browser must visit.
    ///
    /// A pending attempt is replaced. Returns `None` and leaves the session
    /// alone if it is already authorized.
    pub async fn begin(&self, session: &Session, return_to: Option<String>) -> Option<String> {
        let mut guard = session.state().await;
        if guard.is_authorized() {
            return None;
        }
        Some(self.start(&mut guard, return_to))
    }

    /// The authorize URL for a session whose request lacked authorization.
    ///
    /// A pending attempt keeps its nonce, so a callback already on its way
    /// still matches. Returns `None` if the session is authorized.
    pub async fn authorize_url(&self, session: &Session) -> Option<String> {
        let mut guard = session.state().await;
        if let AuthorizationState::Pending { authorize_url, .. } = &*guard {
            return Some(authorize_url.clone());
        }
        if guard.is_authorized() {
            return None;
        }
        Some(self.start(&mut guard, None))
    }

    fn start(&self, state: &mut AuthorizationState, return_to: Option<String>) -> String {
        let nonce = Uuid::new_v4().simple().to_string();
        let authorize_url = self.oauth.authorize_url(&nonce);
        *state = AuthorizationState::Pending {
            state_hash: token_fingerprint(&nonce),
            return_to,
            authorize_url: authorize_url.clone(),
        };
        authorize_url
    }

    /// Finish authorization with the callback's `code` and `state`.
    ///
    /// Returns the `return_to` location recorded by [`Self::begin`].
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoPendingAuthorization`] if no authorization was started
    /// - [`AuthError::InvalidState`] if `state` does not match
    /// - exchange or identity errors; the session becomes `Unauthorized`
    pub async fn complete(
        &self,
        session: &Session,
        code: &str,
        state: &str,
    ) -> Result<Option<String>, AuthError> {
        let mut guard = session.state().await;
        let return_to = match &*guard {
            AuthorizationState::Pending {
                state_hash,
                return_to,
                ..
            } => {
                if *state_hash != token_fingerprint(state) {
                    warn!(session = session.id(), "authorization state mismatch");
                    *guard = AuthorizationState::Unauthorized;
                    return Err(AuthError::InvalidState);
                }
                return_to.clone()
            }
            _ => return Err(AuthError::NoPendingAuthorization),
        };

        let outcome = async {
            let token = self.oauth.exchange_code(code).await?;
            let user = self.identity.fetch_user(&token).await?;
            Ok::<_, AuthError>((token, user))
        }
        .await;

        match outcome {
            Ok((token, user)) => {
                info!(session = session.id(), user = %user.user_id, "session authorized");
                *guard = AuthorizationState::Authorized { token, user };
                Ok(return_to)
            }
            Err(e) => {
                warn!(session = session.id(), error = %e, "authorization failed");
                *guard = AuthorizationState::Unauthorized;
                Err(e)
            }
        }
    }

    /// Record an error reported by GitLab on the callback.
    pub async fn deny(&self, session: &Session, error: &str) -> AuthError {
        *session.state().await = AuthorizationState::Unauthorized;
        AuthError::Denied(error.to_string())
    }

    /// Token provider backed by an authorized session.
    pub fn token_provider(&self, session: Arc<Session>) -> SessionTokenProvider {
        SessionTokenProvider::new(session, self.oauth.clone())
    }
}
