//! service::conflicts
//!
//! Conflict resolution and backup workspaces.
//!
//! A conflict resolution branch starts at the source head when an update
//! cannot be replayed. The user re-applies their work there and accepts it,
//! which moves the workspace onto the resolution. Backups hold the previous
//! workspace head while the branch is rewritten.

use tracing::{info, warn};

use super::{Result, Sdlc, SdlcError};
use crate::core::model::{EntityChangesRequest, Workspace};
use crate::core::types::{Oid, ProjectId};
use crate::core::workspace::{WorkspaceAccessType, WorkspaceSpecification};

impl Sdlc {
    // =========================================================================
    // Conflict resolution
    // =========================================================================

    /// Drop the resolution and keep the workspace as it was.
    pub async fn discard_conflict_resolution(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<()> {
        let resolution = spec.with_access(WorkspaceAccessType::ConflictResolution);
        self.require_workspace_head(project, &resolution).await?;
        self.store
            .delete_branch(project, resolution.branch_name().as_str())
            .await?;
        info!(project = %project, workspace = %spec.id, "discarded conflict resolution");
        Ok(())
    }

    /// Drop the resolution and the workspace's changes; the workspace starts
    /// over at the source head.
    pub async fn discard_changes_conflict_resolution(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Workspace> {
        let workspace = spec.with_access(WorkspaceAccessType::Workspace);
        self.discard_conflict_resolution(project, &workspace).await?;
        if self.head(project, &workspace.branch_name()).await?.is_some() {
            self.store
                .delete_branch(project, workspace.branch_name().as_str())
                .await?;
        }
        self.create_workspace(project, &workspace).await
    }

    /// Apply final changes to the resolution and make it the workspace.
    ///
    /// The workspace head is backed up while its branch moves, and the
    /// backup is dropped once the move succeeded.
    pub async fn accept_conflict_resolution(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        request: EntityChangesRequest,
    ) -> Result<Workspace> {
        let workspace = spec.with_access(WorkspaceAccessType::Workspace);
        let resolution = spec.with_access(WorkspaceAccessType::ConflictResolution);
        self.require_workspace_head(project, &resolution).await?;
        if !request.entity_changes.is_empty() {
            self.perform_changes(project, &resolution, request).await?;
        }
        let resolved = self.require_workspace_head(project, &resolution).await?;
        let head = self.require_workspace_head(project, &workspace).await?;

        let backup = self.take_backup(project, &workspace, &head).await?;
        self.store
            .reset_branch(project, workspace.branch_name().as_str(), &resolved, &head)
            .await?;
        self.store
            .delete_branch(project, resolution.branch_name().as_str())
            .await?;
        self.store.delete_branch(project, &backup).await?;

        info!(
            project = %project,
            workspace = %workspace.branch_name(),
            revision = %resolved,
            "accepted conflict resolution"
        );
        Ok(Workspace::from_spec(project, &workspace))
    }

    /// Point the backup branch of `spec` at `head`, replacing a stale one.
    pub(crate) async fn take_backup(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        head: &Oid,
    ) -> Result<String> {
        let backup = spec.with_access(WorkspaceAccessType::Backup).branch_name();
        if self.head(project, &backup).await?.is_some() {
            warn!(project = %project, backup = %backup, "replacing stale backup");
            self.store.delete_branch(project, backup.as_str()).await?;
        }
        self.store.create_branch(project, backup.as_str(), head).await?;
        Ok(backup.to_string())
    }

    // =========================================================================
    // Backup
    // =========================================================================

    pub async fn discard_backup(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<()> {
        let backup = spec.with_access(WorkspaceAccessType::Backup);
        self.require_workspace_head(project, &backup).await?;
        self.store
            .delete_branch(project, backup.branch_name().as_str())
            .await?;
        info!(project = %project, workspace = %spec.id, "discarded backup");
        Ok(())
    }

    /// Restore a workspace from its backup.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no backup
    /// - `Conflict` if the workspace exists and `force` is not set
    pub async fn recover_backup(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        force: bool,
    ) -> Result<Workspace> {
        let workspace = spec.with_access(WorkspaceAccessType::Workspace);
        let backup = spec.with_access(WorkspaceAccessType::Backup);
        let saved = self.require_workspace_head(project, &backup).await?;
        let branch = workspace.branch_name();

        match self.head(project, &branch).await? {
            Some(_) if !force => {
                return Err(SdlcError::conflict(format!(
                    "workspace {} exists; recovering its backup requires force",
                    spec.id
                )));
            }
            Some(current) => {
                self.store
                    .reset_branch(project, branch.as_str(), &saved, &current)
                    .await?;
            }
            None => self.store.create_branch(project, branch.as_str(), &saved).await?,
        }
        self.store
            .delete_branch(project, backup.branch_name().as_str())
            .await?;
        info!(project = %project, workspace = %branch, revision = %saved, "recovered backup");
        Ok(Workspace::from_spec(project, &workspace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EntityChange, EntityFilter, WorkspaceUpdateStatus};
    use crate::service::test_support::*;
    use crate::service::SourceContext;
    use serde_json::json;

    /// A workspace of alice whose update conflicts with the project.
    async fn conflicted(sdlc: &Sdlc, project: &ProjectId) -> WorkspaceSpecification {
        let spec = workspace(sdlc, "w1");
        sdlc.create_workspace(project, &spec).await.unwrap();
        apply(
            sdlc,
            project,
            &spec,
            vec![EntityChange::create(path("model::A"), CLASS, content(json!({"mine": true})))],
        )
        .await;
        commit_classes(sdlc, project, "w2", &["model::A"]).await;
        let report = sdlc.update_workspace(project, &spec).await.unwrap();
        assert_eq!(report.status, WorkspaceUpdateStatus::Conflict);
        spec
    }

    fn changes(changes: Vec<EntityChange>) -> EntityChangesRequest {
        EntityChangesRequest {
            message: "resolve".into(),
            entity_changes: changes,
            revision_id: None,
        }
    }

    mod resolution {
        use super::*;

        #[tokio::test]
        async fn accept_moves_workspace_to_resolution() {
            let (_dir, sdlc, project) = setup().await;
            let spec = conflicted(&sdlc, &project).await;

            // writes to the workspace are blocked, the resolution is writable
            let err = sdlc
                .perform_changes(&project, &spec, changes(vec![class("model::X")]))
                .await
                .unwrap_err();
            assert!(matches!(err, SdlcError::Conflict(_)));

            let resolution = spec.with_access(WorkspaceAccessType::ConflictResolution);
            let ctx = SourceContext::Workspace(resolution.clone());
            let upstream = sdlc.get_entity(&project, &ctx, None, &path("model::A")).await.unwrap();
            assert!(upstream.content.get("mine").is_none());

            sdlc.accept_conflict_resolution(
                &project,
                &spec,
                changes(vec![EntityChange::modify(
                    path("model::A"),
                    CLASS,
                    content(json!({"mine": true, "merged": true})),
                )]),
            )
            .await
            .unwrap();

            assert!(!sdlc.is_in_conflict_resolution(&project, &spec).await.unwrap());
            assert!(!sdlc.is_workspace_outdated(&project, &spec).await.unwrap());
            let entity = sdlc
                .get_entity(&project, &SourceContext::Workspace(spec.clone()), None, &path("model::A"))
                .await
                .unwrap();
            assert_eq!(entity.content["merged"], true);
            assert!(sdlc
                .get_workspace(&project, &spec.with_access(WorkspaceAccessType::Backup))
                .await
                .is_err());
        }

        #[tokio::test]
        async fn discard_keeps_workspace() {
            let (_dir, sdlc, project) = setup().await;
            let spec = conflicted(&sdlc, &project).await;
            sdlc.discard_conflict_resolution(&project, &spec).await.unwrap();
            assert!(!sdlc.is_in_conflict_resolution(&project, &spec).await.unwrap());
            let entity = sdlc
                .get_entity(&project, &SourceContext::Workspace(spec.clone()), None, &path("model::A"))
                .await
                .unwrap();
            assert_eq!(entity.content["mine"], true);

            let err = sdlc.discard_conflict_resolution(&project, &spec).await.unwrap_err();
            assert!(matches!(err, SdlcError::NotFound(_)));
        }

        #[tokio::test]
        async fn discard_changes_starts_over() {
            let (_dir, sdlc, project) = setup().await;
            let spec = conflicted(&sdlc, &project).await;
            sdlc.discard_changes_conflict_resolution(&project, &spec).await.unwrap();

            assert!(!sdlc.is_in_conflict_resolution(&project, &spec).await.unwrap());
            assert!(!sdlc.is_workspace_outdated(&project, &spec).await.unwrap());
            let comparison = sdlc.workspace_creation_comparison(&project, &spec).await.unwrap();
            assert!(comparison.deltas.is_empty());
        }
    }

    mod backup {
        use super::*;

        async fn with_backup(sdlc: &Sdlc, project: &ProjectId) -> (WorkspaceSpecification, Oid) {
            let spec = workspace(sdlc, "w1");
            sdlc.create_workspace(project, &spec).await.unwrap();
            let saved = apply(sdlc, project, &spec, vec![class("model::A")]).await;
            sdlc.take_backup(project, &spec, &saved).await.unwrap();
            (spec, saved)
        }

        #[tokio::test]
        async fn recover_requires_force_when_workspace_exists() {
            let (_dir, sdlc, project) = setup().await;
            let (spec, saved) = with_backup(&sdlc, &project).await;
            apply(&sdlc, &project, &spec, vec![class("model::B")]).await;

            let backup = SourceContext::Workspace(spec.with_access(WorkspaceAccessType::Backup));
            let paths = sdlc
                .get_entity_paths(&project, &backup, None, &EntityFilter::default())
                .await
                .unwrap();
            assert_eq!(paths, vec![path("model::A")]);

            let err = sdlc.recover_backup(&project, &spec, false).await.unwrap_err();
            assert!(matches!(err, SdlcError::Conflict(_)));

            sdlc.recover_backup(&project, &spec, true).await.unwrap();
            let head = sdlc.require_workspace_head(&project, &spec).await.unwrap();
            assert_eq!(head, saved);
            assert!(sdlc.discard_backup(&project, &spec).await.is_err());
        }

        #[tokio::test]
        async fn recover_deleted_workspace() {
            let (_dir, sdlc, project) = setup().await;
            let (spec, saved) = with_backup(&sdlc, &project).await;
            sdlc.delete_workspace(&project, &spec).await.unwrap();

            sdlc.recover_backup(&project, &spec, false).await.unwrap();
            assert_eq!(sdlc.require_workspace_head(&project, &spec).await.unwrap(), saved);
        }

        #[tokio::test]
        async fn discard() {
            let (_dir, sdlc, project) = setup().await;
            let (spec, _) = with_backup(&sdlc, &project).await;
            sdlc.discard_backup(&project, &spec).await.unwrap();
            assert!(matches!(
                sdlc.recover_backup(&project, &spec, true).await,
                Err(SdlcError::NotFound(_))
            ));
        }
    }
}
