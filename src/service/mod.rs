//! service
//!
//! Domain operations over a [`ProjectStore`]: projects, workspaces,
//! entities, revisions, reviews, versions, patches, comparisons, project
//! configuration, conflict resolution and backups.
//!
//! # Architecture
//!
//! [`Sdlc`] is a facade bound to one caller's store. Each concern lives in
//! its own module as an `impl Sdlc` block; all of them are written against
//! the store trait only, so both backends share every rule below.
//!
//! # Git mapping
//!
//! - the project lives on `master`, patches on `patch/x.y.z`
//! - workspaces are branches named by [`WorkspaceSpecification`]
//! - reviews are merge requests from a workspace branch into its source
//! - versions are `release-x.y.z` tags
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::service::{Sdlc, SourceContext};
//!
//! let sdlc = Sdlc::new(store, user);
//! let entities = sdlc
//!     .get_entities(&project, &SourceContext::Project, None, &EntityFilter::default())
//!     .await?;
//! ```

mod comparisons;
mod configuration;
mod conflicts;
mod context;
mod entities;
mod errors;
mod projects;
mod reviews;
mod revisions;
mod users;
mod versions;
mod workspaces;

use std::sync::Arc;

use crate::core::model::User;
use crate::core::types::{BranchName, Oid, ProjectId, VersionId};
use crate::store::ProjectStore;
use crate::structure::{EntityLayout, ProjectConfiguration, ProjectStructure, PROJECT_CONFIG_FILE};

pub use context::{RevisionSelector, SourceContext};
pub use errors::SdlcError;

/// Result alias for service operations.
pub type Result<T, E = SdlcError> = std::result::Result<T, E>;

/// Domain operations for one caller.
#[derive(Clone)]
pub struct Sdlc {
    store: Arc<dyn ProjectStore>,
    user: User,
}

impl std::fmt::Debug for Sdlc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdlc")
            .field("backend", &self.store.name())
            .field("user", &self.user.user_id)
            .finish()
    }
}

impl Sdlc {
    pub fn new(store: Arc<dyn ProjectStore>, user: User) -> Self {
        Self { store, user }
    }

    /// The caller.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Name of the backend behind this facade.
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    pub(crate) async fn head(&self, project: &ProjectId, branch: &BranchName) -> Result<Option<Oid>> {
        Ok(self.store.branch_head(project, branch.as_str()).await?)
    }

    /// The commit a context currently points at.
    pub(crate) async fn context_head(&self, project: &ProjectId, ctx: &SourceContext) -> Result<Oid> {
        match (ctx, ctx.branch()) {
            (SourceContext::Version(version), _) => self.version_revision(project, version).await,
            (_, Some(branch)) => self
                .head(project, &branch)
                .await?
                .ok_or_else(|| SdlcError::not_found(format!("{ctx} not found in project {project}"))),
            (_, None) => Err(SdlcError::Internal(format!("{ctx} has no branch"))),
        }
    }

    /// Resolve an optional selector within a context; `None` means head.
    pub(crate) async fn resolve_revision(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        selector: Option<&RevisionSelector>,
    ) -> Result<Oid> {
        let head = self.context_head(project, ctx).await?;
        match selector {
            None | Some(RevisionSelector::Head) => Ok(head),
            Some(RevisionSelector::Base) => {
                let spec = ctx
                    .workspace()
                    .ok_or_else(|| SdlcError::invalid(format!("{ctx} has no base revision")))?;
                let source = self.head(project, &spec.source_branch()).await?.ok_or_else(|| {
                    SdlcError::not_found(format!("source of {ctx} not found"))
                })?;
                self.store
                    .merge_base(project, &head, &source)
                    .await?
                    .ok_or_else(|| SdlcError::not_found(format!("{ctx} has no base revision")))
            }
            Some(RevisionSelector::Id(id)) => {
                if self.is_ancestor(project, id, &head).await? {
                    Ok(id.clone())
                } else {
                    Err(SdlcError::not_found(format!("revision {id} not found in {ctx}")))
                }
            }
        }
    }

    pub(crate) async fn is_ancestor(
        &self,
        project: &ProjectId,
        ancestor: &Oid,
        descendant: &Oid,
    ) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let base = self.store.merge_base(project, ancestor, descendant).await?;
        Ok(base.as_ref() == Some(ancestor))
    }

    /// Commit tagged for a released version.
    pub(crate) async fn version_revision(&self, project: &ProjectId, version: &VersionId) -> Result<Oid> {
        let name = version.to_tag_name();
        self.store
            .list_tags(project, &name)
            .await?
            .into_iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.target)
            .ok_or_else(|| SdlcError::not_found(format!("version {version} of project {project}")))
    }

    pub(crate) async fn read_configuration(
        &self,
        project: &ProjectId,
        revision: &Oid,
    ) -> Result<ProjectConfiguration> {
        let bytes = self
            .store
            .read_file(project, revision, PROJECT_CONFIG_FILE)
            .await?
            .ok_or_else(|| {
                SdlcError::not_found(format!(
                    "project configuration of {project} at revision {revision}"
                ))
            })?;
        ProjectConfiguration::from_file_content(&bytes)
            .map_err(|e| SdlcError::Internal(format!("project {project}: {e}")))
    }

    pub(crate) async fn layout(&self, project: &ProjectId, revision: &Oid) -> Result<EntityLayout> {
        let config = self.read_configuration(project, revision).await?;
        Ok(ProjectStructure::layout(&config)?)
    }
}
