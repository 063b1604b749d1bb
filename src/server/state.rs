//! server::state
//!
//! Shared state handed to every handler.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{GitLabAuthorizer, GitLabIdentity, GitLabOAuthClient, SessionStore, IDENTITY_CACHE_TTL};
use crate::core::config::{BackendKind, Config, GitLabAuthMode};
use crate::store::{create_backend, Backend, StoreError};

struct Shared {
    config: Config,
    backend: Arc<dyn Backend>,
    sessions: SessionStore,
    identity: Option<Arc<GitLabIdentity>>,
    authorizer: Option<GitLabAuthorizer>,
}

/// Cheaply cloneable handle on the server's shared state.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.shared.backend.kind())
            .field("sessions", &self.shared.sessions.len())
            .field("oauth", &self.shared.authorizer.is_some())
            .finish()
    }
}

impl AppState {
    /// State over an already built backend.
    ///
    /// GitLab identity lookup is set up whenever a GitLab URL is configured;
    /// the OAuth authorizer additionally needs the application id and
    /// redirect URI.
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let identity = match (backend.kind(), config.gitlab_url()) {
            (BackendKind::Gitlab, Some(url)) => {
                Some(Arc::new(GitLabIdentity::new(url, IDENTITY_CACHE_TTL)))
            }
            _ => None,
        };

        let authorizer = match (&identity, config.gitlab_auth_mode()) {
            (Some(identity), GitLabAuthMode::Oauth) => {
                match (config.gitlab_url(), config.gitlab_app_id(), config.gitlab_redirect_uri()) {
                    (Some(url), Some(app_id), Some(redirect)) => {
                        let oauth = GitLabOAuthClient::new(
                            url,
                            app_id,
                            config.gitlab_app_secret(),
                            redirect,
                        );
                        info!(url, "GitLab OAuth enabled");
                        Some(GitLabAuthorizer::new(oauth, Arc::clone(identity)))
                    }
                    _ => {
                        warn!("GitLab OAuth is selected but not fully configured");
                        None
                    }
                }
            }
            _ => None,
        };

        let sessions = SessionStore::new(config.session_ttl());
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                sessions,
                identity,
                authorizer,
            }),
        }
    }

    /// Build the backend selected by `config` and wrap it.
    pub fn from_config(config: Config) -> Result<Self, StoreError> {
        let backend = create_backend(&config)?;
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.shared.backend
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.shared.sessions
    }

    pub fn identity(&self) -> Option<&Arc<GitLabIdentity>> {
        self.shared.identity.as_ref()
    }

    pub fn authorizer(&self) -> Option<&GitLabAuthorizer> {
        self.shared.authorizer.as_ref()
    }
}
