//! service::revisions
//!
//! Commit history of a context, of one entity, or of a package.

use super::{Result, RevisionSelector, Sdlc, SdlcError, SourceContext};
use crate::core::model::{Revision, RevisionQuery};
use crate::core::types::{EntityPath, ProjectId};

impl Sdlc {
    /// Commits reachable from the context head, newest first.
    pub async fn get_revisions(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        query: &RevisionQuery,
    ) -> Result<Vec<Revision>> {
        let head = self.context_head(project, ctx).await?;
        Ok(self.store.list_revisions(project, &head, None, query).await?)
    }

    pub async fn get_revision(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        selector: &RevisionSelector,
    ) -> Result<Revision> {
        let id = self.resolve_revision(project, ctx, Some(selector)).await?;
        Ok(self.store.get_revision(project, &id).await?)
    }

    /// Commits that touched the entity's file.
    pub async fn get_entity_revisions(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        path: &EntityPath,
        query: &RevisionQuery,
    ) -> Result<Vec<Revision>> {
        let head = self.context_head(project, ctx).await?;
        let file = self.layout(project, &head).await?.file_path(path);
        Ok(self
            .store
            .list_revisions(project, &head, Some(&file), query)
            .await?)
    }

    /// Commits that touched any entity in the package or its sub-packages.
    pub async fn get_package_revisions(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        package: &str,
        query: &RevisionQuery,
    ) -> Result<Vec<Revision>> {
        if !EntityPath::is_valid_package(package) {
            return Err(SdlcError::invalid(format!("invalid package '{package}'")));
        }
        let head = self.context_head(project, ctx).await?;
        let dir = self.layout(project, &head).await?.package_dir(package);
        Ok(self
            .store
            .list_revisions(project, &head, Some(&dir), query)
            .await?)
    }
}
