//! service::entities
//!
//! Reading entities in any context and applying entity changes to
//! workspaces.
//!
//! A batch of changes becomes exactly one commit. Every change is checked
//! against the workspace head before anything is written, so a batch either
//! applies completely or not at all.

use std::collections::HashSet;

use tracing::info;

use super::{Result, RevisionSelector, Sdlc, SdlcError, SourceContext};
use crate::core::model::{
    Entity, EntityChange, EntityChangeType, EntityChangesRequest, EntityFilter, EntityUpdate,
    Revision,
};
use crate::core::types::{EntityPath, Oid, ProjectId};
use crate::core::workspace::{WorkspaceAccessType, WorkspaceSpecification};
use crate::store::{CommitRequest, FileChange};
use crate::structure::{decode_entity, encode_entity, EntityLayout};

impl Sdlc {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Entities matching `filter`, sorted by path.
    pub async fn get_entities(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        selector: Option<&RevisionSelector>,
        filter: &EntityFilter,
    ) -> Result<Vec<Entity>> {
        let revision = self.resolve_revision(project, ctx, selector).await?;
        let layout = self.layout(project, &revision).await?;
        let mut entities = Vec::new();
        for (path, file) in self.entity_files(project, &revision, &layout).await? {
            if !filter.matches_path(&path) {
                continue;
            }
            let entity = self.read_entity(project, &revision, path, &file).await?;
            if filter.matches(&entity) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Paths of entities matching `filter`, sorted.
    ///
    /// Classifier criteria need the file contents; without them only the
    /// tree is listed.
    pub async fn get_entity_paths(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        selector: Option<&RevisionSelector>,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityPath>> {
        if !filter.classifier_paths.is_empty() {
            let entities = self.get_entities(project, ctx, selector, filter).await?;
            return Ok(entities.into_iter().map(|e| e.path).collect());
        }
        let revision = self.resolve_revision(project, ctx, selector).await?;
        let layout = self.layout(project, &revision).await?;
        Ok(self
            .entity_files(project, &revision, &layout)
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .filter(|path| filter.matches_path(path))
            .collect())
    }

    pub async fn get_entity(
        &self,
        project: &ProjectId,
        ctx: &SourceContext,
        selector: Option<&RevisionSelector>,
        path: &EntityPath,
    ) -> Result<Entity> {
        let revision = self.resolve_revision(project, ctx, selector).await?;
        let layout = self.layout(project, &revision).await?;
        let file = layout.file_path(path);
        self.read_entity(project, &revision, path.clone(), &file).await
    }

    async fn entity_files(
        &self,
        project: &ProjectId,
        revision: &Oid,
        layout: &EntityLayout,
    ) -> Result<Vec<(EntityPath, String)>> {
        let mut files: Vec<(EntityPath, String)> = self
            .store
            .list_files(project, revision, layout.root())
            .await?
            .into_iter()
            .filter_map(|file| layout.entity_path(&file).map(|path| (path, file)))
            .collect();
        files.sort();
        Ok(files)
    }

    async fn read_entity(
        &self,
        project: &ProjectId,
        revision: &Oid,
        path: EntityPath,
        file: &str,
    ) -> Result<Entity> {
        let bytes = self
            .store
            .read_file(project, revision, file)
            .await?
            .ok_or_else(|| SdlcError::not_found(format!("entity {path} not found")))?;
        decode_entity(path, &bytes).map_err(|e| SdlcError::Internal(e.to_string()))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a batch of entity changes to a workspace as one commit.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty batch, a blank message, a path touched
    ///   twice, or a change that does not fit the current state
    /// - `Conflict` if the workspace is in conflict resolution or its head
    ///   is not `revision_id`
    pub async fn perform_changes(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        request: EntityChangesRequest,
    ) -> Result<Revision> {
        if spec.access_type == WorkspaceAccessType::Backup {
            return Err(SdlcError::invalid("backup workspaces are read-only"));
        }
        if request.entity_changes.is_empty() {
            return Err(SdlcError::invalid("no entity changes given"));
        }
        if request.message.trim().is_empty() {
            return Err(SdlcError::invalid("commit message is required"));
        }
        let mut touched = HashSet::new();
        for change in &request.entity_changes {
            for path in std::iter::once(&change.entity_path).chain(&change.new_entity_path) {
                if !touched.insert(path) {
                    return Err(SdlcError::invalid(format!(
                        "entity {path} is changed more than once"
                    )));
                }
            }
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
        if let Some(expected) = &request.revision_id {
            if *expected != head {
                return Err(SdlcError::conflict(format!(
                    "workspace {} is at revision {head}, not {expected}",
                    spec.id
                )));
            }
        }

        let layout = self.layout(project, &head).await?;
        let mut changes = Vec::with_capacity(request.entity_changes.len());
        for change in &request.entity_changes {
            changes.push(self.file_change(project, &head, &layout, change).await?);
        }

        let commit = CommitRequest {
            branch: spec.branch_name().to_string(),
            expected_head: Some(head),
            start_point: None,
            message: request.message,
            changes,
        };
        let revision = self.store.commit(project, commit).await?;
        info!(
            project = %project,
            workspace = %spec.branch_name(),
            changes = request.entity_changes.len(),
            revision = %revision.id,
            "applied entity changes"
        );
        Ok(revision)
    }

    async fn file_change(
        &self,
        project: &ProjectId,
        head: &Oid,
        layout: &EntityLayout,
        change: &EntityChange,
    ) -> Result<FileChange> {
        let path = &change.entity_path;
        let file = layout.file_path(path);
        let existing = self.store.read_file(project, head, &file).await?;

        match change.change_type {
            EntityChangeType::Create => {
                if existing.is_some() {
                    return Err(SdlcError::invalid(format!("entity {path} already exists")));
                }
                let (Some(classifier), Some(content)) = (&change.classifier_path, &change.content)
                else {
                    return Err(SdlcError::invalid(format!(
                        "creating entity {path} requires a classifier path and content"
                    )));
                };
                let entity = Entity {
                    path: path.clone(),
                    classifier_path: classifier.clone(),
                    content: content.clone(),
                };
                Ok(FileChange::Create {
                    path: file,
                    content: encode_entity(&entity)?,
                })
            }
            EntityChangeType::Modify => {
                let bytes = existing.ok_or_else(|| missing(path))?;
                let content = change.content.clone().ok_or_else(|| {
                    SdlcError::invalid(format!("modifying entity {path} requires content"))
                })?;
                let classifier_path = match &change.classifier_path {
                    Some(classifier) => classifier.clone(),
                    None => {
                        decode_entity(path.clone(), &bytes)
                            .map_err(|e| SdlcError::Internal(e.to_string()))?
                            .classifier_path
                    }
                };
                let entity = Entity {
                    path: path.clone(),
                    classifier_path,
                    content,
                };
                Ok(FileChange::Update {
                    path: file,
                    content: encode_entity(&entity)?,
                })
            }
            EntityChangeType::Delete => {
                existing.ok_or_else(|| missing(path))?;
                Ok(FileChange::Delete { path: file })
            }
            EntityChangeType::Rename => {
                let bytes = existing.ok_or_else(|| missing(path))?;
                let target = change.new_entity_path.as_ref().ok_or_else(|| {
                    SdlcError::invalid(format!("renaming entity {path} requires a new path"))
                })?;
                let target_file = layout.file_path(target);
                if self.store.read_file(project, head, &target_file).await?.is_some() {
                    return Err(SdlcError::invalid(format!("entity {target} already exists")));
                }
                let mut entity = decode_entity(path.clone(), &bytes)
                    .map_err(|e| SdlcError::Internal(e.to_string()))?;
                entity.path = target.clone();
                entity.content.remove("package");
                entity.content.remove("name");
                Ok(FileChange::Move {
                    from: file,
                    to: target_file,
                    content: Some(encode_entity(&entity)?),
                })
            }
        }
    }

    /// Create the entity at `path`, or replace it when it exists.
    pub async fn create_or_update_entity(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        path: &EntityPath,
        update: EntityUpdate,
    ) -> Result<Revision> {
        let ctx = SourceContext::Workspace(spec.clone());
        let exists = match self.get_entity(project, &ctx, None, path).await {
            Ok(_) => true,
            Err(SdlcError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        let change = if exists {
            EntityChange::modify(path.clone(), &update.classifier_path, update.content)
        } else {
            EntityChange::create(path.clone(), &update.classifier_path, update.content)
        };
        self.perform_changes(
            project,
            spec,
            EntityChangesRequest {
                message: update.message,
                entity_changes: vec![change],
                revision_id: update.revision_id,
            },
        )
        .await
    }

    pub async fn delete_entity(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
        path: &EntityPath,
        message: &str,
        revision_id: Option<Oid>,
    ) -> Result<Revision> {
        self.perform_changes(
            project,
            spec,
            EntityChangesRequest {
                message: message.to_string(),
                entity_changes: vec![EntityChange::delete(path.clone())],
                revision_id,
            },
        )
        .await
    }
}

fn missing(path: &EntityPath) -> SdlcError {
    SdlcError::invalid(format!("entity {path} does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::*;
    use serde_json::json;

    fn request(changes: Vec<EntityChange>) -> EntityChangesRequest {
        EntityChangesRequest {
            message: "edit".into(),
            entity_changes: changes,
            revision_id: None,
        }
    }

    mod reads {
        use super::*;

        #[tokio::test]
        async fn filters_by_package_and_classifier() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1");
            sdlc.create_workspace(&project, &spec).await.unwrap();
            apply(
                &sdlc,
                &project,
                &spec,
                vec![
                    class("model::Person"),
                    class("model::domain::Firm"),
                    EntityChange::create(
                        path("model::run"),
                        "meta::pure::metamodel::function::ConcreteFunctionDefinition",
                        content(json!({"body": []})),
                    ),
                ],
            )
            .await;
            let ctx = SourceContext::Workspace(spec.clone());

            let all = sdlc
                .get_entities(&project, &ctx, None, &EntityFilter::default())
                .await
                .unwrap();
            assert_eq!(all.len(), 3);
            assert_eq!(all[0].content["package"], "model");

            let classes = EntityFilter {
                classifier_paths: vec![CLASS.into()],
                ..Default::default()
            };
            let paths = sdlc.get_entity_paths(&project, &ctx, None, &classes).await.unwrap();
            assert_eq!(paths, vec![path("model::Person"), path("model::domain::Firm")]);

            let shallow = EntityFilter {
                packages: vec!["model".into()],
                ..Default::default()
            };
            let paths = sdlc.get_entity_paths(&project, &ctx, None, &shallow).await.unwrap();
            assert_eq!(paths, vec![path("model::Person"), path("model::run")]);

            // the project itself has no entities yet
            let on_master = sdlc
                .get_entities(&project, &SourceContext::Project, None, &EntityFilter::default())
                .await
                .unwrap();
            assert!(on_master.is_empty());
        }

        #[tokio::test]
        async fn reads_at_older_revision() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1");
            sdlc.create_workspace(&project, &spec).await.unwrap();
            let first = apply(&sdlc, &project, &spec, vec![class("model::A")]).await;
            apply(&sdlc, &project, &spec, vec![EntityChange::delete(path("model::A"))]).await;

            let ctx = SourceContext::Workspace(spec.clone());
            assert!(matches!(
                sdlc.get_entity(&project, &ctx, None, &path("model::A")).await,
                Err(SdlcError::NotFound(_))
            ));
            let old = sdlc
                .get_entity(&project, &ctx, Some(&RevisionSelector::Id(first)), &path("model::A"))
                .await
                .unwrap();
            assert_eq!(old.classifier_path, CLASS);
        }
    }

    mod changes {
        use super::*;

        #[tokio::test]
        async fn validates_each_change_type() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1");
            sdlc.create_workspace(&project, &spec).await.unwrap();
            apply(&sdlc, &project, &spec, vec![class("model::A")]).await;

            for change in [
                class("model::A"),
                EntityChange::modify(path("model::Missing"), CLASS, content(json!({}))),
                EntityChange::delete(path("model::Missing")),
                EntityChange::rename(path("model::Missing"), path("model::B")),
                EntityChange {
                    new_entity_path: None,
                    ..EntityChange::rename(path("model::A"), path("model::B"))
                },
                EntityChange {
                    content: None,
                    ..class("model::C")
                },
            ] {
                let err = sdlc
                    .perform_changes(&project, &spec, request(vec![change.clone()]))
                    .await
                    .unwrap_err();
                assert!(matches!(err, SdlcError::InvalidRequest(_)), "{change:?}");
            }

            let err = sdlc
                .perform_changes(&project, &spec, request(vec![]))
                .await
                .unwrap_err();
            assert!(matches!(err, SdlcError::InvalidRequest(_)));

            let err = sdlc
                .perform_changes(
                    &project,
                    &spec,
                    request(vec![class("model::X"), EntityChange::delete(path("model::X"))]),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, SdlcError::InvalidRequest(_)));
        }

        #[tokio::test]
        async fn stale_revision_is_a_conflict() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1");
            sdlc.create_workspace(&project, &spec).await.unwrap();
            let first = apply(&sdlc, &project, &spec, vec![class("model::A")]).await;
            apply(&sdlc, &project, &spec, vec![class("model::B")]).await;

            let err = sdlc
                .perform_changes(
                    &project,
                    &spec,
                    EntityChangesRequest {
                        revision_id: Some(first),
                        ..request(vec![class("model::C")])
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, SdlcError::Conflict(_)));
        }

        #[tokio::test]
        async fn rename_rewrites_identity() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1");
            sdlc.create_workspace(&project, &spec).await.unwrap();
            apply(&sdlc, &project, &spec, vec![class("model::A")]).await;
            apply(
                &sdlc,
                &project,
                &spec,
                vec![EntityChange::rename(path("model::A"), path("other::B"))],
            )
            .await;

            let ctx = SourceContext::Workspace(spec.clone());
            let entity = sdlc.get_entity(&project, &ctx, None, &path("other::B")).await.unwrap();
            assert_eq!(entity.content["package"], "other");
            assert_eq!(entity.content["name"], "B");
            assert_eq!(entity.content["properties"], json!([]));
        }

        #[tokio::test]
        async fn create_or_update_and_delete() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1");
            sdlc.create_workspace(&project, &spec).await.unwrap();
            let update = |v: i64| EntityUpdate {
                message: "upsert".into(),
                classifier_path: CLASS.into(),
                content: content(json!({"v": v})),
                revision_id: None,
            };
            sdlc.create_or_update_entity(&project, &spec, &path("model::A"), update(1))
                .await
                .unwrap();
            sdlc.create_or_update_entity(&project, &spec, &path("model::A"), update(2))
                .await
                .unwrap();

            let ctx = SourceContext::Workspace(spec.clone());
            let entity = sdlc.get_entity(&project, &ctx, None, &path("model::A")).await.unwrap();
            assert_eq!(entity.content["v"], 2);

            sdlc.delete_entity(&project, &spec, &path("model::A"), "remove", None)
                .await
                .unwrap();
            assert!(sdlc.get_entity(&project, &ctx, None, &path("model::A")).await.is_err());
        }

        #[tokio::test]
        async fn backup_is_read_only() {
            let (_dir, sdlc, project) = setup().await;
            let spec = workspace(&sdlc, "w1").with_access(WorkspaceAccessType::Backup);
            let err = sdlc
                .perform_changes(&project, &spec, request(vec![class("model::A")]))
                .await
                .unwrap_err();
            assert!(matches!(err, SdlcError::InvalidRequest(_)));
        }
    }
}
