//! server::caller
//!
//! Working out who a request runs as.
//!
//! # Resolution order
//!
//! 1. The trusted user header, when configured (identity from a fronting
//!    proxy). On the filesystem backend it names the caller; on GitLab it
//!    must agree with the token's owner.
//! 2. A personal access token (`PRIVATE-TOKEN` or `Authorization: Bearer`)
//!    when GitLab runs in personal-access-token mode.
//! 3. The `sdlc_session` cookie of an OAuth-authorized session when GitLab
//!    runs in OAuth mode.
//! 4. The configured default user on the filesystem backend.
//!
//! A GitLab request without credentials is rejected with 401. In OAuth mode
//! the rejection carries `authorizeUrl`: the pending GitLab URL of the
//! request's session, or this server's authorize endpoint when the request
//! has no session. Only that endpoint creates sessions.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tracing::debug;

use super::error::ApiError;
use super::handlers::auth::AUTHORIZE_PATH;
use super::state::AppState;
use crate::auth::{
    AuthorizationState, Caller, GitLabToken, Session, StaticTokenProvider, PRIVATE_TOKEN_HEADER,
    SESSION_COOKIE,
};
use crate::core::config::{BackendKind, GitLabAuthMode};
use crate::core::model::User;
use crate::core::types::UserId;
use crate::service::{Sdlc, SdlcError};

/// `Set-Cookie` value binding the browser to `session`.
pub fn session_cookie(session: &Session, state: &AppState) -> String {
    format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id(),
        state.sessions().ttl().as_secs()
    )
}

/// `Set-Cookie` value removing the session cookie.
pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Session id carried in the request's cookies.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
}

/// The request's live session, if any.
pub fn request_session(state: &AppState, headers: &HeaderMap) -> Option<Arc<Session>> {
    session_id(headers).and_then(|id| state.sessions().get(id))
}

fn personal_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get(PRIVATE_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(token.trim().to_string()).filter(|t| !t.is_empty());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn trusted_user(state: &AppState, headers: &HeaderMap) -> Result<Option<UserId>, ApiError> {
    let Some(name) = state.config().trusted_user_header() else {
        return Ok(None);
    };
    match headers.get(name).and_then(|v| v.to_str().ok()) {
        Some(value) if !value.trim().is_empty() => UserId::new(value.trim())
            .map(Some)
            .map_err(|e| ApiError::unauthorized(format!("invalid user in {name}: {e}"), None)),
        _ => Ok(None),
    }
}

fn local_user(id: UserId) -> User {
    User {
        name: id.to_string(),
        user_id: id,
    }
}

/// Resolve the caller of a request.
pub async fn resolve_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let trusted = trusted_user(state, headers)?;

    if state.backend().kind() == BackendKind::Filesystem {
        let id = match trusted {
            Some(id) => id,
            None => {
                let default = state.config().default_user().ok_or_else(|| {
                    ApiError::unauthorized("no user identity on the request", None)
                })?;
                UserId::new(default).map_err(SdlcError::from)?
            }
        };
        return Ok(Caller::local(local_user(id)));
    }

    let caller = match state.config().gitlab_auth_mode() {
        GitLabAuthMode::PersonalAccessToken => personal_token_caller(state, headers).await?,
        GitLabAuthMode::Oauth => session_caller(state, headers).await?,
    };
    if let Some(id) = trusted {
        if id != caller.user.user_id {
            return Err(ApiError::unauthorized(
                format!("trusted user {id} does not own the presented credentials"),
                None,
            ));
        }
    }
    Ok(caller)
}

async fn personal_token_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let secret = personal_token(headers)
        .ok_or_else(|| ApiError::unauthorized("a GitLab personal access token is required", None))?;
    let identity = state
        .identity()
        .ok_or_else(|| SdlcError::Internal("GitLab identity lookup is not configured".into()))?;
    let user = identity.resolve_personal_token(&secret).await?;
    debug!(user = %user.user_id, "request authenticated by personal access token");
    let provider = StaticTokenProvider::new(identity_host(state), GitLabToken::personal(secret));
    Ok(Caller::with_token(user, Arc::new(provider)))
}

fn identity_host(state: &AppState) -> &str {
    state.config().gitlab_url().unwrap_or_default()
}

async fn session_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let authorizer = state
        .authorizer()
        .ok_or_else(|| SdlcError::Unsupported("GitLab OAuth is not configured".into()))?;

    let unauthorized = |url: String| {
        ApiError::unauthorized("authorization with GitLab is required", Some(url))
    };
    let Some(session) = request_session(state, headers) else {
        return Err(unauthorized(AUTHORIZE_PATH.to_string()));
    };

    let user = match &*session.state().await {
        AuthorizationState::Authorized { user, .. } => Some(user.clone()),
        _ => None,
    };
    if let Some(user) = user {
        let provider = authorizer.token_provider(Arc::clone(&session));
        return Ok(Caller::with_token(user, Arc::new(provider)));
    }

    let url = authorizer
        .authorize_url(&session)
        .await
        .unwrap_or_else(|| AUTHORIZE_PATH.to_string());
    Err(unauthorized(url))
}

/// Extractor giving a handler the domain facade for the request's caller.
#[derive(Debug)]
pub struct Api(pub Sdlc);

impl FromRequestParts<AppState> for Api {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let caller = resolve_caller(state, &parts.headers).await?;
        let store = state.backend().store_for(&caller)?;
        Ok(Api(Sdlc::new(store, caller.user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, ServerConfig};
    use crate::store::FileSystemBackend;
    use axum::http::HeaderValue;

    fn filesystem_state(extra: &str) -> AppState {
        let file: ServerConfig = toml::from_str(&format!(
            "[filesystem]\nroot = \"/tmp/sdlc\"\ndefault_user = \"alice\"\n{extra}"
        ))
        .unwrap();
        AppState::new(
            Config::new(file).unwrap(),
            Arc::new(FileSystemBackend::new("/tmp/sdlc")),
        )
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; sdlc_session=abc-123"));
        assert_eq!(session_id(&headers), Some("abc-123"));

        headers.insert(COOKIE, HeaderValue::from_static("sdlc_session="));
        assert_eq!(session_id(&headers), None);
        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn token_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("private-token", HeaderValue::from_static("glpat-1"));
        assert_eq!(personal_token(&headers).as_deref(), Some("glpat-1"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer glpat-2"));
        assert_eq!(personal_token(&headers).as_deref(), Some("glpat-2"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(personal_token(&headers), None);
    }

    #[tokio::test]
    async fn filesystem_default_user() {
        let state = filesystem_state("");
        let caller = resolve_caller(&state, &HeaderMap::new()).await.unwrap();
        assert_eq!(caller.user.user_id.as_str(), "alice");
        assert!(caller.token_provider().is_none());
    }

    #[tokio::test]
    async fn trusted_header_wins() {
        let state = filesystem_state("[auth]\ntrusted_user_header = \"X-Forwarded-User\"\n");
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("bob"));
        let caller = resolve_caller(&state, &headers).await.unwrap();
        assert_eq!(caller.user.user_id.as_str(), "bob");

        headers.insert("x-forwarded-user", HeaderValue::from_static("bad/user"));
        let err = resolve_caller(&state, &headers).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 401);
    }
}
