//! core::config
//!
//! Server configuration schema and loading.
//!
//! # Precedence
//!
//! The first configuration file found wins:
//! 1. Explicit path (`--config`)
//! 2. `$SDLC_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/sdlc-server/config.toml`
//! 4. `~/.sdlc-server/config.toml` (canonical write location)
//!
//! Missing files are not an error; built-in defaults are used. CLI flags
//! for host and port are applied on top by the caller. The GitLab
//! application secret may also come from `$SDLC_GITLAB_APP_SECRET`, which
//! keeps it out of the file.
//!
//! # Example
//!
//! ```no_run
//! use sdlc_server::core::config::Config;
//!
//! let config = Config::load(None).unwrap().config;
//! println!("listening on {}:{}", config.host(), config.port());
//! println!("backend: {}", config.backend_kind().name());
//! ```

pub mod schema;

pub use schema::{BackendKind, GitLabAuthMode, LogFormat, ServerConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SDLC_CONFIG";

/// Environment variable holding the GitLab application secret.
pub const APP_SECRET_ENV: &str = "SDLC_GITLAB_APP_SECRET";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PROJECT_TAG: &str = "sdlc";
const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 60 * 60;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// The file it was loaded from, if any.
    pub path: Option<PathBuf>,
}

/// Loaded configuration with defaults applied through accessors.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// The parsed file contents.
    pub file: ServerConfig,
}

impl Config {
    /// Wrap parsed contents, validating them.
    pub fn new(file: ServerConfig) -> Result<Self, ConfigError> {
        file.validate()?;
        Ok(Self { file })
    }

    /// Load configuration from the explicit path or the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if the explicit file is missing, or if a config file
    /// exists but cannot be parsed or fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let (file, path) = match explicit {
            Some(path) => (Self::read_config(path)?, Some(path.to_path_buf())),
            None => match Self::find_config() {
                Some(path) => (Self::read_config(&path)?, Some(path)),
                None => (ServerConfig::default(), None),
            },
        };

        Ok(ConfigLoadResult {
            config: Self::new(file)?,
            path,
        })
    }

    /// Locate the first existing config file in the default locations.
    fn find_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("sdlc-server/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".sdlc-server/config.toml"))
            .filter(|path| path.exists())
    }

    /// Read and parse a config file.
    fn read_config(path: &Path) -> Result<ServerConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Get the canonical path for the config file.
    ///
    /// Returns `~/.sdlc-server/config.toml`.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".sdlc-server/config.toml"))
    }

    /// Write a config file atomically.
    ///
    /// Creates parent directories if needed and writes through a temp file
    /// renamed into place.
    pub fn write_atomic(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn host(&self) -> &str {
        self.file
            .server
            .as_ref()
            .and_then(|s| s.host.as_deref())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.file
            .server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .file
            .server
            .as_ref()
            .and_then(|s| s.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Default `EnvFilter` directive.
    pub fn log_level(&self) -> &str {
        self.file
            .logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_format(&self) -> LogFormat {
        self.file
            .logging
            .as_ref()
            .and_then(|l| l.format)
            .unwrap_or_default()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.file
            .backend
            .as_ref()
            .and_then(|b| b.kind)
            .unwrap_or_default()
    }

    pub fn filesystem_root(&self) -> Option<&Path> {
        self.file
            .filesystem
            .as_ref()
            .and_then(|fs| fs.root.as_deref())
    }

    /// User assumed for filesystem requests without identity.
    pub fn default_user(&self) -> Option<&str> {
        self.file
            .filesystem
            .as_ref()
            .and_then(|fs| fs.default_user.as_deref())
    }

    pub fn gitlab_url(&self) -> Option<&str> {
        self.file
            .gitlab
            .as_ref()
            .and_then(|g| g.url.as_deref())
            .map(|url| url.trim_end_matches('/'))
    }

    pub fn gitlab_auth_mode(&self) -> GitLabAuthMode {
        self.file
            .gitlab
            .as_ref()
            .and_then(|g| g.auth)
            .unwrap_or_default()
    }

    pub fn gitlab_app_id(&self) -> Option<&str> {
        self.file.gitlab.as_ref().and_then(|g| g.app_id.as_deref())
    }

    /// Application secret, preferring the environment over the file.
    pub fn gitlab_app_secret(&self) -> Option<String> {
        std::env::var(APP_SECRET_ENV).ok().or_else(|| {
            self.file
                .gitlab
                .as_ref()
                .and_then(|g| g.app_secret.clone())
        })
    }

    pub fn gitlab_redirect_uri(&self) -> Option<&str> {
        self.file
            .gitlab
            .as_ref()
            .and_then(|g| g.redirect_uri.as_deref())
    }

    /// Topic marking projects managed by this server.
    pub fn project_tag(&self) -> &str {
        self.file
            .gitlab
            .as_ref()
            .and_then(|g| g.project_tag.as_deref())
            .unwrap_or(DEFAULT_PROJECT_TAG)
    }

    pub fn trusted_user_header(&self) -> Option<&str> {
        self.file
            .auth
            .as_ref()
            .and_then(|a| a.trusted_user_header.as_deref())
    }

    pub fn session_ttl(&self) -> Duration {
        let secs = self
            .file
            .auth
            .as_ref()
            .and_then(|a| a.session_ttl_secs)
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);
        Duration::from_secs(secs)
    }
}
