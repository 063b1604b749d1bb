//! auth::identity
//!
//! Resolving GitLab tokens to the users they belong to.
//!
//! Personal access tokens arrive with every request, so the user behind a
//! token is cached for a while. Cache keys are SHA-256 fingerprints; the
//! tokens themselves are never stored.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::errors::AuthError;
use super::token::GitLabToken;
use super::auth_header;
use crate::core::model::User;
use crate::core::types::UserId;

/// How long a token-to-user mapping is trusted.
pub const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Hex SHA-256 of a secret, usable as a map key or log field.
pub fn token_fingerprint(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone)]
struct CachedUser {
    user: User,
    fetched: Instant,
}

/// Looks up the GitLab user behind a token.
#[derive(Debug)]
pub struct GitLabIdentity {
    client: Client,
    base_url: String,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedUser>>,
}

impl GitLabIdentity {
    pub fn new(base_url: &str, ttl: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the user owning `token` from `GET /api/v4/user`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if GitLab rejects the token
    pub async fn fetch_user(&self, token: &GitLabToken) -> Result<User, AuthError> {
        let (name, value) = auth_header(token.kind(), token.access_token())?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(name, value);

        let response = self
            .client
            .get(format!("{}/api/v4/user", self.base_url))
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                let user: GitLabUser = response.json().await?;
                let user_id = UserId::new(&user.username)
                    .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
                Ok(User {
                    name: if user.name.is_empty() {
                        user.username
                    } else {
                        user.name
                    },
                    user_id,
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AuthError::NotAuthenticated(self.base_url.clone()))
            }
            _ => Err(AuthError::GitLabApi {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Resolve a personal access token, consulting the cache first.
    pub async fn resolve_personal_token(&self, secret: &str) -> Result<User, AuthError> {
        let key = token_fingerprint(secret);
        if let Ok(cache) = self.cache.read() {
            if let Some(entry) = cache.get(&key) {
                if entry.fetched.elapsed() < self.ttl {
                    return Ok(entry.user.clone());
                }
            }
        }

        let user = self.fetch_user(&GitLabToken::personal(secret)).await?;
        debug!(user = %user.user_id, "resolved personal access token");
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| entry.fetched.elapsed() < self.ttl);
            cache.insert(
                key,
                CachedUser {
                    user: user.clone(),
                    fetched: Instant::now(),
                },
            );
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = token_fingerprint("glpat-abc");
        assert_eq!(a.len(), 64);
        assert_eq!(a, token_fingerprint("glpat-abc"));
        assert_ne!(a, token_fingerprint("glpat-abd"));
        assert!(!a.contains("glpat"));
    }

    #[tokio::test]
    async fn personal_token_lookup_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/user"))
            .and(header("PRIVATE-TOKEN", "glpat-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 7,
                "username": "alice",
                "name": "Alice Example"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let identity = GitLabIdentity::new(&server.uri(), IDENTITY_CACHE_TTL);
        let first = identity.resolve_personal_token("glpat-abc").await.unwrap();
        let second = identity.resolve_personal_token("glpat-abc").await.unwrap();
        assert_eq!(first.user_id.as_str(), "alice");
        assert_eq!(first.name, "Alice Example");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn oauth_token_uses_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/user"))
            .and(header("Authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "username": "bob"
            })))
            .mount(&server)
            .await;

        let identity = GitLabIdentity::new(&server.uri(), IDENTITY_CACHE_TTL);
        let user = identity
            .fetch_user(&GitLabToken::oauth("at", None, None))
            .await
            .unwrap();
        assert_eq!(user.name, "bob");
    }

    #[tokio::test]
    async fn rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let identity = GitLabIdentity::new(&server.uri(), IDENTITY_CACHE_TTL);
        let err = identity.resolve_personal_token("bad").await.unwrap_err();
        assert!(err.needs_reauth());
    }
}
