//! store::factory
//!
//! Backend selection and per-caller store creation.
//!
//! # Design
//!
//! Handlers never construct stores directly. The server holds one
//! [`Backend`] chosen at startup by [`create_backend`], and asks it for a
//! [`ProjectStore`] bound to each request's [`Caller`].
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::store::create_backend;
//!
//! let backend = create_backend(&config)?;
//! let store = backend.store_for(&caller)?;
//! let projects = store.list_projects(&ProjectFilter::default()).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use super::filesystem::FileSystemStore;
use super::gitlab::GitLabStore;
use super::traits::{ProjectStore, StoreError};
use crate::auth::Caller;
use crate::core::config::{BackendKind, Config};

/// Source of caller-bound project stores.
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Build a store acting for `caller`.
    ///
    /// # Errors
    ///
    /// - `AuthRequired` if the backend needs credentials the caller lacks
    fn store_for(&self, caller: &Caller) -> Result<Arc<dyn ProjectStore>, StoreError>;
}

/// Bare repositories under a local directory.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Backend for FileSystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn store_for(&self, caller: &Caller) -> Result<Arc<dyn ProjectStore>, StoreError> {
        Ok(Arc::new(FileSystemStore::new(
            self.root.clone(),
            caller.user.clone(),
        )))
    }
}

/// A GitLab instance, accessed with each caller's own token.
#[derive(Debug, Clone)]
pub struct GitLabBackend {
    client: Client,
    url: String,
    project_tag: String,
}

impl GitLabBackend {
    pub fn new(url: &str, project_tag: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            project_tag: project_tag.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Backend for GitLabBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gitlab
    }

    fn store_for(&self, caller: &Caller) -> Result<Arc<dyn ProjectStore>, StoreError> {
        let provider = caller.token_provider().ok_or(StoreError::AuthRequired)?;
        Ok(Arc::new(GitLabStore::new(
            self.client.clone(),
            &self.url,
            provider,
            caller.user.clone(),
            &self.project_tag,
        )))
    }
}

/// Create the backend selected by the configuration.
///
/// The filesystem root is created if missing.
///
/// # Errors
///
/// - `InvalidRequest` if the backend's settings are missing
/// - `Internal` if the filesystem root cannot be created
pub fn create_backend(config: &Config) -> Result<Arc<dyn Backend>, StoreError> {
    match config.backend_kind() {
        BackendKind::Filesystem => {
            let root = config.filesystem_root().ok_or_else(|| {
                StoreError::InvalidRequest("filesystem.root is not configured".into())
            })?;
            std::fs::create_dir_all(root).map_err(|e| {
                StoreError::Internal(format!("cannot create {}: {e}", root.display()))
            })?;
            info!(root = %root.display(), "using filesystem backend");
            Ok(Arc::new(FileSystemBackend::new(root)))
        }
        BackendKind::Gitlab => {
            let url = config
                .gitlab_url()
                .ok_or_else(|| StoreError::InvalidRequest("gitlab.url is not configured".into()))?;
            info!(url, tag = config.project_tag(), "using GitLab backend");
            Ok(Arc::new(GitLabBackend::new(url, config.project_tag())))
        }
    }
}
