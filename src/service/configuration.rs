//! service::configuration
//!
//! Reading and changing `project.json`. A change that moves the entity root
//! (new artifact id, structure upgrade) moves every entity file in the same
//! commit.

use tracing::info;

use super::{Result, RevisionSelector, Sdlc, SdlcError, SourceContext};
use crate::core::model::Revision;
use crate::core::types::ProjectId;
use crate::core::workspace::{WorkspaceAccessType, WorkspaceSpecification};
use crate::store::{CommitRequest, FileChange};
use crate::structure::{
    ProjectConfiguration, ProjectConfigurationUpdate, ProjectStructure, PROJECT_CONFIG_FILE,
};

impl Sdlc {
    pub async fn get_project_configuration(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        selector: Option<&RevisionSelector>,
    ) -> Result<ProjectConfiguration> {
        let revision = self.resolve_revision(project, ctx, selector).await?;
        self.read_configuration(project, &revision).await
    }

    /// Apply a configuration change in a workspace.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty update, a blank message, a structure
    ///   downgrade or an invalid resulting configuration
    /// - `Conflict` if the workspace is in conflict resolution
    pub async fn update_project_configuration(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        update: ProjectConfigurationUpdate,
        message: &str,
    ) -> Result<Revision> {
        if spec.access_type == WorkspaceAccessType::Backup {
            return Err(SdlcError::invalid("backup workspaces are read-only"));
        }
        if update.is_empty() {
            return Err(SdlcError::invalid("nothing to update"));
        }
        if message.trim().is_empty() {
            return Err(SdlcError::invalid("commit message is required"));
        }
        if spec.access_type == WorkspaceAccessType::Workspace
            && self.is_in_conflict_resolution(project, spec).await?
        {
            return Err(SdlcError::conflict(format!(
                "workspace {} is in conflict resolution mode",
                spec.id
            )));
        }

        let head = self.require_workspace_head(project, spec).await?;
        let current = self.read_configuration(project, &head).await?;
        let next = update.apply(&current)?;
        let before = ProjectStructure::layout(&current)?;
        let after = ProjectStructure::layout(&next)?;

        let mut changes = vec![FileChange::Update {
            path: PROJECT_CONFIG_FILE.to_string(),
            content: next.to_file_content()?,
        }];
        if before != after {
            for file in self.store.list_files(project, &head, before.root()).await? {
                if let Some(to) = before.relocate(&file, &after) {
                    changes.push(FileChange::Move {
                        from: file,
                        to,
                        content: None,
                    });
                }
            }
        }

        let moved = changes.len() - 1;
        let revision = self
            .store
            .commit(
                project,
                CommitRequest {
                    branch: spec.branch_name().to_string(),
                    expected_head: Some(head),
                    start_point: None,
                    message: message.to_string(),
                    changes,
                },
            )
            .await?;
        info!(
            project = %project,
            workspace = %spec.branch_name(),
            moved,
            revision = %revision.id,
            "updated project configuration"
        );
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::EntityFilter;
    use crate::service::test_support::*;
    use crate::structure::ProjectDependency;

    #[tokio::test]
    async fn artifact_change_moves_entities() {
        let (_dir, sdlc, project) = setup().await;
        let spec = workspace(&sdlc, "w1");
        sdlc.create_workspace(&project, &spec).await.unwrap();
        apply(&sdlc, &project, &spec, vec![class("model::A"), class("model::sub::B")]).await;

        sdlc.update_project_configuration(
            &project,
            &spec,
            ProjectConfigurationUpdate {
                artifact_id: Some("trading".into()),
                ..Default::default()
            },
            "rename artifact",
        )
        .await
        .unwrap();

        let ctx = SourceContext::Workspace(spec.clone());
        let config = sdlc.get_project_configuration(&project, &ctx, None).await.unwrap();
        assert_eq!(config.artifact_id, "trading");
        let paths = sdlc
            .get_entity_paths(&project, &ctx, None, &EntityFilter::default())
            .await
            .unwrap();
        assert_eq!(paths, vec![path("model::A"), path("model::sub::B")]);

        // the base revision still has the old configuration
        let base = sdlc
            .get_project_configuration(&project, &ctx, Some(&RevisionSelector::Base))
            .await
            .unwrap();
        assert_eq!(base.artifact_id, "trades");
    }

    #[tokio::test]
    async fn dependencies_and_invalid_updates() {
        let (_dir, sdlc, project) = setup().await;
        let spec = workspace(&sdlc, "w1");
        sdlc.create_workspace(&project, &spec).await.unwrap();

        let dependency = ProjectDependency {
            project_id: "org.finos:refdata".into(),
            version_id: "1.0.0".parse().unwrap(),
        };
        sdlc.update_project_configuration(
            &project,
            &spec,
            ProjectConfigurationUpdate {
                project_dependencies_to_add: vec![dependency.clone()],
                ..Default::default()
            },
            "depend on refdata",
        )
        .await
        .unwrap();
        let config = sdlc
            .get_project_configuration(&project, &SourceContext::Workspace(spec.clone()), None)
            .await
            .unwrap();
        assert_eq!(config.project_dependencies, vec![dependency]);

        for update in [
            ProjectConfigurationUpdate::default(),
            ProjectConfigurationUpdate {
                project_structure_version: Some(0),
                ..Default::default()
            },
            ProjectConfigurationUpdate {
                group_id: Some("bad..group".into()),
                ..Default::default()
            },
        ] {
            let err = sdlc
                .update_project_configuration(&project, &spec, update, "change")
                .await
                .unwrap_err();
            assert!(matches!(err, SdlcError::InvalidRequest(_)));
        }
    }
}
