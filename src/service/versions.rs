//! service::versions
//!
//! Versions are `release-x.y.z` tags on the project history. Patches are
//! `patch/x.y.z` branches started from a released version, where `x.y.z`
//! is the version the patch will be released as.

use tracing::info;

use super::{Result, Sdlc, SdlcError, SourceContext};
use crate::core::model::{NewPatch, NewVersion, Patch, ReleasePatch, Version};
use crate::core::types::{Oid, ProjectId, VersionId, VersionType};
use crate::core::workspace::{parse_patch_branch, patch_branch_name, PATCH_BRANCH_PREFIX};
use crate::store::Tag;

fn to_version(project: &ProjectId, tag: Tag) -> Option<Version> {
    let id = VersionId::from_tag_name(&tag.name)?;
    // Tags released without notes carry their own name as annotation
    let notes = tag
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| *m != tag.name)
        .unwrap_or_default();
    Some(Version {
        id,
        project_id: project.clone(),
        revision_id: tag.target,
        notes,
    })
}

impl Sdlc {
    // =========================================================================
    // Versions
    // =========================================================================

    /// Released versions within `[min, max]`, ascending.
    pub async fn get_versions(
        &self,
        project: &ProjectId,
        min: Option<VersionId>,
        max: Option<VersionId>,
    ) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .store
            .list_tags(project, VersionId::TAG_PREFIX)
            .await?
            .into_iter()
            .filter_map(|tag| to_version(project, tag))
            .filter(|v| min.is_none_or(|min| v.id >= min) && max.is_none_or(|max| v.id <= max))
            .collect();
        versions.sort_by_key(|v| v.id);
        Ok(versions)
    }

    pub async fn get_latest_version(&self, project: &ProjectId) -> Result<Option<Version>> {
        Ok(self.get_versions(project, None, None).await?.pop())
    }

    pub async fn get_version(&self, project: &ProjectId, version: &VersionId) -> Result<Version> {
        self.get_versions(project, Some(*version), Some(*version))
            .await?
            .pop()
            .ok_or_else(|| SdlcError::not_found(format!("version {version} of project {project}")))
    }

    async fn is_released(&self, project: &ProjectId, version: &VersionId) -> Result<bool> {
        match self.version_revision(project, version).await {
            Ok(_) => Ok(true),
            Err(SdlcError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the next version of the project.
    ///
    /// The revision defaults to the project head and must be part of the
    /// project history.
    pub async fn new_version(&self, project: &ProjectId, request: NewVersion) -> Result<Version> {
        let head = self.context_head(project, &SourceContext::Project).await?;
        let revision = match request.revision_id {
            Some(revision) => {
                if !self.is_ancestor(project, &revision, &head).await? {
                    return Err(SdlcError::invalid(format!(
                        "revision {revision} is not part of the project history"
                    )));
                }
                revision
            }
            None => head,
        };

        let latest = self
            .get_latest_version(project)
            .await?
            .map_or_else(|| VersionId::new(0, 0, 0), |v| v.id);
        let id = latest.next(request.version_type)?;
        let version = self.tag_version(project, id, &revision, &request.notes).await?;
        info!(project = %project, version = %id, revision = %revision, "released version");
        Ok(version)
    }

    async fn tag_version(
        &self,
        project: &ProjectId,
        id: VersionId,
        revision: &Oid,
        notes: &str,
    ) -> Result<Version> {
        let tag = self
            .store
            .create_tag(project, &id.to_tag_name(), revision, notes)
            .await
            .map_err(|e| match e {
                crate::store::StoreError::AlreadyExists(_) => {
                    SdlcError::AlreadyExists(format!("version {id} is already released"))
                }
                e => e.into(),
            })?;
        Ok(Version {
            id,
            project_id: project.clone(),
            revision_id: tag.target,
            notes: notes.trim().to_string(),
        })
    }

    // =========================================================================
    // Patches
    // =========================================================================

    pub async fn get_patches(&self, project: &ProjectId) -> Result<Vec<Patch>> {
        let mut patches: Vec<Patch> = self
            .store
            .list_branches(project, PATCH_BRANCH_PREFIX)
            .await?
            .iter()
            .filter_map(|branch| parse_patch_branch(&branch.name))
            .map(|version| Patch {
                project_id: project.clone(),
                patch_release_version_id: version,
            })
            .collect();
        patches.sort_by_key(|p| p.patch_release_version_id);
        Ok(patches)
    }

    pub async fn get_patch(&self, project: &ProjectId, version: &VersionId) -> Result<Patch> {
        self.head(project, &patch_branch_name(version))
            .await?
            .ok_or_else(|| SdlcError::not_found(format!("patch {version} not found in project {project}")))?;
        Ok(Patch {
            project_id: project.clone(),
            patch_release_version_id: *version,
        })
    }

    /// Start a patch of a released version.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the source version was never released
    /// - `AlreadyExists` if the patch exists or its version is released
    pub async fn create_patch(&self, project: &ProjectId, request: NewPatch) -> Result<Patch> {
        let source = request.source_version_id;
        let revision = self.version_revision(project, &source).await?;
        let id = source.next(VersionType::Patch)?;
        if self.is_released(project, &id).await? {
            return Err(SdlcError::AlreadyExists(format!(
                "version {id} is already released"
            )));
        }
        let branch = patch_branch_name(&id);
        if self.head(project, &branch).await?.is_some() {
            return Err(SdlcError::AlreadyExists(format!(
                "patch {id} already exists in project {project}"
            )));
        }
        self.store.create_branch(project, branch.as_str(), &revision).await?;
        info!(project = %project, patch = %id, source = %source, "created patch");
        Ok(Patch {
            project_id: project.clone(),
            patch_release_version_id: id,
        })
    }

    pub async fn delete_patch(&self, project: &ProjectId, version: &VersionId) -> Result<()> {
        self.get_patch(project, version).await?;
        self.store
            .delete_branch(project, patch_branch_name(version).as_str())
            .await?;
        info!(project = %project, patch = %version, "deleted patch");
        Ok(())
    }

    /// Release a patch as its version and remove the patch branch.
    pub async fn release_patch(
        &self,
        project: &ProjectId,
        version: &VersionId,
        request: ReleasePatch,
    ) -> Result<Version> {
        let ctx = SourceContext::Patch(*version);
        let head = self.context_head(project, &ctx).await?;
        let released = self.tag_version(project, *version, &head, &request.notes).await?;
        self.store
            .delete_branch(project, patch_branch_name(version).as_str())
            .await?;
        info!(project = %project, version = %version, revision = %head, "released patch");
        Ok(released)
    }
}
