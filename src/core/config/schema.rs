//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 6100
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [backend]
//! kind = "gitlab"
//!
//! [gitlab]
//! url = "https://gitlab.example.com"
//! auth = "oauth"
//! app_id = "sdlc"
//! redirect_uri = "https://sdlc.example.com/api/auth/callback"
//! ```
//!
//! # Validation
//!
//! Values are validated after parsing so that a server never starts with a
//! configuration it cannot honour (e.g. the GitLab backend without a URL).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::UserId;

/// Which backend stores projects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Filesystem,
    Gitlab,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Filesystem => "filesystem",
            BackendKind::Gitlab => "gitlab",
        }
    }
}

/// How callers authenticate against GitLab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitLabAuthMode {
    /// OAuth2 authorization code flow with server-side sessions.
    #[default]
    Oauth,
    /// Callers send a personal access token with every request.
    PersonalAccessToken,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub server: Option<ServerSection>,
    pub logging: Option<LoggingSection>,
    pub backend: Option<BackendSection>,
    pub filesystem: Option<FileSystemSection>,
    pub gitlab: Option<GitLabSection>,
    pub auth: Option<AuthSection>,
}

/// Listener settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub request_timeout_secs: Option<u64>,
}

/// Logging settings. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    pub kind: Option<BackendKind>,
}

/// Filesystem backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileSystemSection {
    /// Directory holding one bare repository per project.
    pub root: Option<PathBuf>,
    /// User assumed when a request carries no identity.
    pub default_user: Option<String>,
}

/// GitLab backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitLabSection {
    pub url: Option<String>,
    pub auth: Option<GitLabAuthMode>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub redirect_uri: Option<String>,
    /// Topic marking projects managed by this server.
    pub project_tag: Option<String>,
}

/// Request authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Header set by a trusted fronting proxy (SAML, Kerberos) with the user id.
    pub trusted_user_header: Option<String>,
    pub session_ttl_secs: Option<u64>,
}

fn check_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{field} must start with http:// or https://, got '{url}'"
        )))
    }
}

impl ServerConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(server) = &self.server {
            if server.port == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "server.port must be non-zero".into(),
                ));
            }
            if server.request_timeout_secs == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "server.request_timeout_secs must be non-zero".into(),
                ));
            }
        }

        if let Some(fs) = &self.filesystem {
            if let Some(user) = &fs.default_user {
                UserId::new(user.as_str()).map_err(|e| {
                    ConfigError::InvalidValue(format!("filesystem.default_user: {e}"))
                })?;
            }
        }

        let kind = self
            .backend
            .as_ref()
            .and_then(|b| b.kind)
            .unwrap_or_default();

        match kind {
            BackendKind::Filesystem => {
                let root = self.filesystem.as_ref().and_then(|fs| fs.root.as_ref());
                if root.is_none() {
                    return Err(ConfigError::InvalidValue(
                        "filesystem.root is required for the filesystem backend".into(),
                    ));
                }
            }
            BackendKind::Gitlab => {
                let gitlab = self.gitlab.as_ref().ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "[gitlab] section is required for the gitlab backend".into(),
                    )
                })?;
                let url = gitlab.url.as_deref().ok_or_else(|| {
                    ConfigError::InvalidValue("gitlab.url is required".into())
                })?;
                check_url("gitlab.url", url)?;

                if gitlab.auth.unwrap_or_default() == GitLabAuthMode::Oauth {
                    if gitlab.app_id.is_none() {
                        return Err(ConfigError::InvalidValue(
                            "gitlab.app_id is required for oauth".into(),
                        ));
                    }
                    let redirect = gitlab.redirect_uri.as_deref().ok_or_else(|| {
                        ConfigError::InvalidValue(
                            "gitlab.redirect_uri is required for oauth".into(),
                        )
                    })?;
                    check_url("gitlab.redirect_uri", redirect)?;
                }
            }
        }

        if let Some(auth) = &self.auth {
            if let Some(header) = &auth.trusted_user_header {
                if header.is_empty() || !header.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                    return Err(ConfigError::InvalidValue(format!(
                        "auth.trusted_user_header '{header}' is not a valid header name"
                    )));
                }
            }
            if auth.session_ttl_secs == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "auth.session_ttl_secs must be non-zero".into(),
                ));
            }
        }

        Ok(())
    }
}
