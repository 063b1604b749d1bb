//! service::workspaces
//!
//! Workspace branches and bringing them up to date with their source.
//!
//! # Update algorithm
//!
//! ```text
//! base = merge_base(workspace, source)
//! base == source head          -> NO_OP
//! workspace head == base       -> fast-forward workspace to source (UPDATED)
//! local/upstream paths overlap
//!   with different content     -> create conflict resolution branch (CONFLICT)
//! otherwise                    -> backup, replay local changes on source head,
//!                                 move workspace (CAS), drop backup (UPDATED)
//! ```

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};

use super::{Result, Sdlc, SdlcError};
use crate::core::model::{Workspace, WorkspaceUpdateReport, WorkspaceUpdateStatus};
use crate::core::types::{Oid, ProjectId};
use crate::core::workspace::{
    WorkspaceAccessType, WorkspaceSource, WorkspaceSpecification, WorkspaceType,
};
use crate::store::{CommitRequest, FileChange, FileDiff};

impl Sdlc {
    // =========================================================================
    // Listing and lifecycle
    // =========================================================================

    /// The caller's user workspaces and/or the group workspaces of `source`.
    pub async fn list_workspaces(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        workspace_type: Option<WorkspaceType>,
    ) -> Result<Vec<Workspace>> {
        let mut workspaces = Vec::new();
        if workspace_type != Some(WorkspaceType::Group) {
            let prefix = WorkspaceSpecification::branch_prefix(
                WorkspaceType::User,
                WorkspaceAccessType::Workspace,
                &source,
                Some(&self.user.user_id),
            );
            workspaces.extend(self.workspaces_with_prefix(project, &prefix, source).await?);
        }
        if workspace_type != Some(WorkspaceType::User) {
            let prefix = WorkspaceSpecification::branch_prefix(
                WorkspaceType::Group,
                WorkspaceAccessType::Workspace,
                &source,
                None,
            );
            workspaces.extend(self.workspaces_with_prefix(project, &prefix, source).await?);
        }
        Ok(workspaces)
    }

    /// Every user's workspaces and the group workspaces of `source`.
    pub async fn list_all_workspaces(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
    ) -> Result<Vec<Workspace>> {
        let mut workspaces = Vec::new();
        for workspace_type in [WorkspaceType::User, WorkspaceType::Group] {
            let prefix = WorkspaceSpecification::branch_prefix(
                workspace_type,
                WorkspaceAccessType::Workspace,
                &source,
                None,
            );
            workspaces.extend(self.workspaces_with_prefix(project, &prefix, source).await?);
        }
        Ok(workspaces)
    }

    async fn workspaces_with_prefix(
        &self,
        project: &ProjectId,
        prefix: &str,
        source: WorkspaceSource,
    ) -> Result<Vec<Workspace>> {
        Ok(self
            .store
            .list_branches(project, prefix)
            .await?
            .iter()
            .filter_map(|branch| WorkspaceSpecification::parse_branch(&branch.name))
            .filter(|spec| {
                spec.source == source && spec.access_type == WorkspaceAccessType::Workspace
            })
            .map(|spec| Workspace::from_spec(project, &spec))
            .collect())
    }

    pub async fn get_workspace(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Workspace> {
        self.require_workspace_head(project, spec).await?;
        Ok(Workspace::from_spec(project, spec))
    }

    /// Create a workspace at the head of its source.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if the workspace exists
    /// - `NotFound` if the source branch (e.g. a patch) does not exist
    pub async fn create_workspace(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Workspace> {
        if spec.access_type != WorkspaceAccessType::Workspace {
            return Err(SdlcError::invalid(
                "only plain workspaces can be created directly",
            ));
        }
        let branch = spec.branch_name();
        if self.head(project, &branch).await?.is_some() {
            return Err(SdlcError::AlreadyExists(format!(
                "workspace {} already exists in project {project}",
                spec.id
            )));
        }
        let source = self.source_head(project, spec).await?;
        self.store.create_branch(project, branch.as_str(), &source).await?;
        info!(project = %project, workspace = %branch, "created workspace");
        Ok(Workspace::from_spec(project, spec))
    }

    /// Delete a workspace together with a pending conflict resolution.
    pub async fn delete_workspace(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<()> {
        let spec = spec.with_access(WorkspaceAccessType::Workspace);
        let branch = spec.branch_name();
        self.require_workspace_head(project, &spec).await?;
        self.store.delete_branch(project, branch.as_str()).await?;

        let resolution = spec.with_access(WorkspaceAccessType::ConflictResolution).branch_name();
        if self.head(project, &resolution).await?.is_some() {
            self.store.delete_branch(project, resolution.as_str()).await?;
        }
        info!(project = %project, workspace = %branch, "deleted workspace");
        Ok(())
    }

    // =========================================================================
    // State
    // =========================================================================

    pub(crate) async fn require_workspace_head(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Oid> {
        self.head(project, &spec.branch_name()).await?.ok_or_else(|| {
            let what = match spec.access_type {
                WorkspaceAccessType::Workspace => "workspace",
                WorkspaceAccessType::ConflictResolution => "conflict resolution for workspace",
                WorkspaceAccessType::Backup => "backup for workspace",
            };
            SdlcError::not_found(format!("{what} {} not found in project {project}", spec.id))
        })
    }

    pub(crate) async fn source_head(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Oid> {
        self.head(project, &spec.source_branch())
            .await?
            .ok_or_else(|| SdlcError::not_found(format!("{} not found in project {project}", spec.source)))
    }

    /// Whether the source moved past the point the workspace is based on.
    pub async fn is_workspace_outdated(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<bool> {
        let head = self.require_workspace_head(project, spec).await?;
        let source = self.source_head(project, spec).await?;
        let base = self.store.merge_base(project, &head, &source).await?;
        Ok(base.as_ref() != Some(&source))
    }

    pub async fn is_in_conflict_resolution(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<bool> {
        let resolution = spec.with_access(WorkspaceAccessType::ConflictResolution);
        Ok(self.head(project, &resolution.branch_name()).await?.is_some())
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Bring a workspace up to date with its source.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the workspace is in conflict resolution, or moved
    ///   while it was being updated
    pub async fn update_workspace(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<WorkspaceUpdateReport> {
        let spec = spec.with_access(WorkspaceAccessType::Workspace);
        if self.is_in_conflict_resolution(project, &spec).await? {
            return Err(SdlcError::conflict(format!(
                "workspace {} is in conflict resolution mode",
                spec.id
            )));
        }

        let branch = spec.branch_name();
        let head = self.require_workspace_head(project, &spec).await?;
        let source = self.source_head(project, &spec).await?;
        let base = self
            .store
            .merge_base(project, &head, &source)
            .await?
            .ok_or_else(|| {
                SdlcError::Internal(format!("workspace {} shares no history with its source", spec.id))
            })?;

        if base == source {
            debug!(workspace = %branch, "workspace is up to date");
            return Ok(report(WorkspaceUpdateStatus::NoOp, base, head));
        }

        if head == base {
            self.store
                .reset_branch(project, branch.as_str(), &source, &head)
                .await?;
            info!(project = %project, workspace = %branch, "fast-forwarded workspace");
            return Ok(report(WorkspaceUpdateStatus::Updated, source.clone(), source));
        }

        let local = self.store.diff(project, &base, &head).await?;
        let upstream = self.store.diff(project, &base, &source).await?;
        let upstream_paths: HashSet<&str> = upstream.iter().flat_map(FileDiff::paths).collect();
        let local_paths: BTreeSet<&str> = local.iter().flat_map(FileDiff::paths).collect();

        let mut changes = Vec::new();
        let mut conflicts = Vec::new();
        for path in local_paths {
            let mine = self.store.read_file(project, &head, path).await?;
            let theirs = self.store.read_file(project, &source, path).await?;
            if mine == theirs {
                continue;
            }
            if upstream_paths.contains(path) {
                conflicts.push(path.to_string());
                continue;
            }
            let path = path.to_string();
            match (theirs, mine) {
                (None, Some(content)) => changes.push(FileChange::Create { path, content }),
                (Some(_), Some(content)) => changes.push(FileChange::Update { path, content }),
                (Some(_), None) => changes.push(FileChange::Delete { path }),
                (None, None) => {}
            }
        }

        if !conflicts.is_empty() {
            let resolution = spec.with_access(WorkspaceAccessType::ConflictResolution).branch_name();
            self.store
                .create_branch(project, resolution.as_str(), &source)
                .await?;
            info!(
                project = %project,
                workspace = %branch,
                conflicts = conflicts.len(),
                "workspace update needs conflict resolution"
            );
            return Ok(report(WorkspaceUpdateStatus::Conflict, base, head));
        }

        let backup = self.take_backup(project, &spec, &head).await?;

        let new_head = if changes.is_empty() {
            self.store
                .reset_branch(project, branch.as_str(), &source, &head)
                .await?;
            source.clone()
        } else {
            let request = CommitRequest {
                branch: branch.to_string(),
                expected_head: Some(head.clone()),
                start_point: Some(source.clone()),
                message: format!("Update workspace {} from {}", spec.id, spec.source_branch()),
                changes,
            };
            self.store.commit(project, request).await?.id
        };
        self.store.delete_branch(project, &backup).await?;

        info!(project = %project, workspace = %branch, revision = %new_head, "updated workspace");
        Ok(report(WorkspaceUpdateStatus::Updated, source, new_head))
    }
}

fn report(status: WorkspaceUpdateStatus, base: Oid, head: Oid) -> WorkspaceUpdateReport {
    WorkspaceUpdateReport {
        status,
        workspace_merge_base_revision_id: Some(base),
        workspace_revision_id: Some(head),
    }
}
