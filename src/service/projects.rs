//! service::projects
//!
//! Project lifecycle. A new project gets its repository and an initial
//! commit on `master` holding `project.json` at the latest structure
//! version.

use tracing::{info, warn};

use super::{Result, Sdlc, SdlcError};
use crate::core::model::{NewProject, Project, ProjectFilter, ProjectUpdate};
use crate::core::types::ProjectId;
use crate::core::workspace::DEFAULT_BRANCH;
use crate::store::{CommitRequest, FileChange};
use crate::structure::{ProjectConfiguration, PROJECT_CONFIG_FILE};

impl Sdlc {
    pub async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        Ok(self.store.list_projects(filter).await?)
    }

    pub async fn get_project(&self, project: &ProjectId) -> Result<Project> {
        Ok(self.store.get_project(project).await?)
    }

    /// Create a project with its initial configuration commit.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a blank name or invalid group/artifact ids
    pub async fn create_project(&self, request: NewProject) -> Result<Project> {
        if request.name.trim().is_empty() {
            return Err(SdlcError::invalid("project name is required"));
        }
        // Validate coordinates before anything is created
        ProjectConfiguration::new(ProjectId::new("new")?, &request.group_id, &request.artifact_id)
            .validate()?;

        let project = self.store.create_project(&request).await?;
        let config = ProjectConfiguration::new(
            project.project_id.clone(),
            &request.group_id,
            &request.artifact_id,
        );
        let commit = CommitRequest {
            branch: DEFAULT_BRANCH.to_string(),
            expected_head: None,
            start_point: None,
            message: "Set up project structure".to_string(),
            changes: vec![FileChange::Create {
                path: PROJECT_CONFIG_FILE.to_string(),
                content: config.to_file_content()?,
            }],
        };
        if let Err(e) = self.store.commit(&project.project_id, commit).await {
            warn!(project = %project.project_id, error = %e, "initial commit failed, removing project");
            if let Err(cleanup) = self.store.delete_project(&project.project_id).await {
                warn!(project = %project.project_id, error = %cleanup, "could not remove project");
            }
            return Err(e.into());
        }

        info!(project = %project.project_id, user = %self.user.user_id, "created project");
        Ok(project)
    }

    pub async fn update_project(&self, project: &ProjectId, update: &ProjectUpdate) -> Result<Project> {
        if update.is_empty() {
            return Err(SdlcError::invalid("nothing to update"));
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(SdlcError::invalid("project name cannot be blank"));
        }
        Ok(self.store.update_project(project, update).await?)
    }

    pub async fn delete_project(&self, project: &ProjectId) -> Result<()> {
        self.store.delete_project(project).await?;
        info!(project = %project, user = %self.user.user_id, "deleted project");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ProjectType;
    use crate::service::test_support::*;
    use crate::service::SourceContext;

    #[tokio::test]
    async fn new_project_has_configuration() {
        let (_dir, sdlc, project) = setup().await;
        let config = sdlc
            .get_project_configuration(&project, &SourceContext::Project, None)
            .await
            .unwrap();
        assert_eq!(config.group_id, "org.finos");
        assert_eq!(config.artifact_id, "trades");
        assert_eq!(config.project_structure_version, 1);
        assert_eq!(config.project_id, project);
    }

    #[tokio::test]
    async fn invalid_coordinates_create_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sdlc = sdlc_as(&dir, "alice");
        let err = sdlc
            .create_project(NewProject {
                name: "Bad".into(),
                description: String::new(),
                project_type: ProjectType::Managed,
                group_id: "org..finos".into(),
                artifact_id: "bad".into(),
                tags: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SdlcError::InvalidRequest(_)));
        assert!(sdlc.list_projects(&ProjectFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (_dir, sdlc, project) = setup().await;
        let err = sdlc
            .update_project(&project, &ProjectUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SdlcError::InvalidRequest(_)));

        let updated = sdlc
            .update_project(
                &project,
                &ProjectUpdate {
                    description: Some("trade model".into()),
                    tags: Some(vec!["finance".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description, "trade model");
        assert_eq!(updated.tags, vec!["finance".to_string()]);

        sdlc.delete_project(&project).await.unwrap();
        assert!(matches!(
            sdlc.get_project(&project).await,
            Err(SdlcError::NotFound(_))
        ));
    }
}
