//! auth::oauth
//!
//! OAuth2 authorization-code client for GitLab.
//!
//! # Flow Overview
//!
//! 1. The server redirects the browser to `/oauth/authorize` with the
//!    application id, redirect URI, a one-time `state` and the `api` scope
//! 2. GitLab redirects back to the redirect URI with `code` and `state`
//! 3. The server exchanges the code at `/oauth/token` for an access token
//!    and a refresh token
//! 4. Before the access token expires, the server trades the refresh token
//!    for a new pair
//!
//! Refresh tokens rotate: every refresh response carries a new one.
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::auth::GitLabOAuthClient;
//!
//! let client = GitLabOAuthClient::new(
//!     "https://gitlab.example.com",
//!     "app-id",
//!     Some("app-secret".to_string()),
//!     "http://localhost:6100/api/auth/callback",
//! );
//!
//! let url = client.authorize_url("nonce");
//! // ... browser round trip ...
//! let token = client.exchange_code("code-from-callback").await?;
//! let refreshed = client.refresh(token.refresh_token().unwrap()).await?;
//! ```

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::errors::AuthError;
use super::token::GitLabToken;

/// Scopes requested for the application.
const DEFAULT_SCOPES: &str = "api";

/// User-Agent header for OAuth requests.
const USER_AGENT: &str = "sdlc-server";

/// Successful token response from GitLab.
#[derive(Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Error response from GitLab OAuth endpoints.
#[derive(Debug, Clone, Deserialize)]
struct OAuthError {
    error: String,
    error_description: Option<String>,
}

/// Request body for the token endpoint.
#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    grant_type: &'a str,
    redirect_uri: &'a str,
}

/// Client for the GitLab OAuth2 endpoints.
#[derive(Clone)]
pub struct GitLabOAuthClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
}

impl GitLabOAuthClient {
    /// Create a client for the GitLab instance at `base_url`.
    pub fn new(
        base_url: &str,
        client_id: &str,
        client_secret: Option<String>,
        redirect_uri: &str,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret,
            redirect_uri: redirect_uri.to_string(),
        }
    }

    /// Base URL of the GitLab instance.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );
        headers
    }

    /// URL the browser is sent to in order to authorize the application.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/oauth/authorize?client_id={}&redirect_uri={}&response_type=code&state={}&scope={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(DEFAULT_SCOPES),
        )
    }

    /// Exchange an authorization code for a token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Denied`] if GitLab rejects the code
    /// - [`AuthError::Network`] if there's a network error
    pub async fn exchange_code(&self, code: &str) -> Result<GitLabToken, AuthError> {
        self.request_token(TokenRequest {
            client_id: &self.client_id,
            client_secret: self.client_secret.as_deref(),
            code: Some(code),
            refresh_token: None,
            grant_type: "authorization_code",
            redirect_uri: &self.redirect_uri,
        })
        .await
    }

    /// Trade a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RefreshFailed`] if GitLab rejects the refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<GitLabToken, AuthError> {
        self.request_token(TokenRequest {
            client_id: &self.client_id,
            client_secret: self.client_secret.as_deref(),
            code: None,
            refresh_token: Some(refresh_token),
            grant_type: "refresh_token",
            redirect_uri: &self.redirect_uri,
        })
        .await
        .map_err(|e| match e {
            AuthError::Denied(msg) => AuthError::RefreshFailed(msg),
            other => other,
        })
    }

    async fn request_token(&self, request: TokenRequest<'_>) -> Result<GitLabToken, AuthError> {
        let response = self
            .client
            .post(self.token_url())
            .headers(self.headers())
            .form(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
                AuthError::InvalidResponse(format!("failed to parse token response: {e}"))
            })?;
            Ok(GitLabToken::oauth(
                token.access_token,
                token.refresh_token,
                token.expires_in,
            ))
        } else if let Ok(err) = serde_json::from_str::<OAuthError>(&body) {
            Err(AuthError::Denied(format!(
                "{}: {}",
                err.error,
                err.error_description.unwrap_or_default()
            )))
        } else {
            Err(AuthError::GitLabApi {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

// Custom Debug to avoid exposing the application secret
impl std::fmt::Debug for GitLabOAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabOAuthClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}
