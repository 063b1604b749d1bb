//! GitLab OAuth endpoints.
//!
//! `authorize` sends the browser to GitLab, `callback` finishes the flow,
//! `authorized` reports the session's state and `logout` forgets it. On the
//! filesystem backend every request is authorized.

use axum::extract::{Query, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::ApiResult;
use crate::auth::{AuthError, GitLabAuthorizer};
use crate::core::config::{BackendKind, GitLabAuthMode};
use crate::server::caller::{expired_session_cookie, request_session, resolve_caller, session_cookie};
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::service::SdlcError;

fn authorizer(state: &AppState) -> Result<&GitLabAuthorizer, ApiError> {
    state.authorizer().ok_or_else(|| {
        ApiError::from(AuthError::NotConfigured("GitLab OAuth is not enabled".into()))
    })
}

fn redirect(location: &str, cookie: Option<String>) -> ApiResult<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| SdlcError::invalid(format!("invalid redirect location '{location}'")))?;
    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(LOCATION, location);
    if let Some(cookie) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Path of the endpoint that starts authorization.
pub const AUTHORIZE_PATH: &str = "/api/auth/authorize";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeQuery {
    pub return_to: Option<String>,
}

/// `returnTo` must be a path on this server: it starts with a single `/`
/// and names no scheme or host.
fn check_return_to(target: &str) -> Result<(), SdlcError> {
    let local = target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.contains("://")
        && !target.chars().any(char::is_control);
    if local {
        Ok(())
    } else {
        Err(SdlcError::invalid(format!(
            "returnTo must be a path on this server, got '{target}'"
        )))
    }
}

pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> ApiResult<Response> {
    let authorizer = authorizer(&state)?;
    if let Some(target) = &query.return_to {
        check_return_to(target)?;
    }
    let (session, cookie) = match request_session(&state, &headers) {
        Some(session) => (session, None),
        None => {
            let session = state.sessions().create();
            let cookie = session_cookie(&session, &state);
            (session, Some(cookie))
        }
    };
    match authorizer.begin(&session, query.return_to.clone()).await {
        Some(url) => redirect(&url, cookie),
        // already authorized
        None => redirect(query.return_to.as_deref().unwrap_or("/"), cookie),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    let authorizer = authorizer(&state)?;
    let session = request_session(&state, &headers).ok_or(AuthError::NoPendingAuthorization)?;
    if let Some(error) = query.error {
        return Err(authorizer.deny(&session, &error).await.into());
    }
    let (Some(code), Some(nonce)) = (query.code, query.state) else {
        return Err(SdlcError::invalid("callback requires code and state").into());
    };

    match authorizer.complete(&session, &code, &nonce).await? {
        Some(return_to) => redirect(&return_to, None),
        None => Ok(Json(json!({ "authorized": true })).into_response()),
    }
}

/// Whether the request would be served without a new authorization.
pub async fn authorized(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let authorized = match state.backend().kind() {
        BackendKind::Filesystem => true,
        BackendKind::Gitlab => match state.config().gitlab_auth_mode() {
            GitLabAuthMode::PersonalAccessToken => resolve_caller(&state, &headers).await.is_ok(),
            GitLabAuthMode::Oauth => match request_session(&state, &headers) {
                Some(session) => session.state().await.is_authorized(),
                None => false,
            },
        },
    };
    Json(json!({ "authorized": authorized }))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = request_session(&state, &headers) {
        state.sessions().remove(session.id());
        info!(session = session.id(), "session logged out");
    }
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(cookie) = HeaderValue::from_str(&expired_session_cookie()) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, ServerConfig};
    use crate::server::router;
    use crate::store::GitLabBackend;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn oauth_app() -> axum::Router {
        let file: ServerConfig = toml::from_str(
            r#"
[backend]
kind = "gitlab"

[gitlab]
url = "https://gitlab.example.com"
app_id = "app"
redirect_uri = "http://localhost:6100/api/auth/callback"
"#,
        )
        .unwrap();
        let backend = Arc::new(GitLabBackend::new("https://gitlab.example.com", "sdlc"));
        router(AppState::new(Config::new(file).unwrap(), backend))
    }

    async fn authorize_with(return_to: &str) -> Response {
        let uri = format!("{AUTHORIZE_PATH}?returnTo={}", urlencoding::encode(return_to));
        oauth_app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn return_targets() {
        for ok in ["/", "/app", "/app/projects/1?tab=reviews"] {
            assert!(check_return_to(ok).is_ok(), "{ok}");
        }
        for bad in [
            "https://evil.example/",
            "//evil.example/",
            "/\\evil.example",
            "evil.example",
            "/redirect?to=https://evil.example",
            "",
        ] {
            assert!(check_return_to(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn authorize_refuses_foreign_return_targets() {
        let response = authorize_with("https://evil.example/").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(LOCATION).is_none());
        assert!(response.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn authorize_redirects_to_gitlab() {
        let response = authorize_with("/app").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert!(
            location.starts_with("https://gitlab.example.com/oauth/authorize?"),
            "{location}"
        );
        assert!(response.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .starts_with("sdlc_session="));
    }
}
