//! service::comparisons
//!
//! Entity-level views of the difference between two revisions.

use super::{Result, RevisionSelector, Sdlc, SdlcError, SourceContext};
use crate::core::model::{Comparison, EntityChangeType, EntityDiff, ReviewState};
use crate::core::types::{Oid, ProjectId};
use crate::core::workspace::{WorkspaceSource, WorkspaceSpecification};
use crate::store::{FileDiff, FileDiffKind};
use crate::structure::{EntityLayout, PROJECT_CONFIG_FILE};

/// Translate file differences into entity differences.
///
/// `before` resolves old paths and `after` new ones, so files relocated by a
/// structure change keep their entity identity.
fn entity_diffs(diffs: &[FileDiff], before: &EntityLayout, after: &EntityLayout) -> Vec<EntityDiff> {
    let mut deltas = Vec::new();
    for diff in diffs {
        let old = diff.old_path.as_deref().and_then(|p| before.entity_path(p));
        let new = diff.new_path.as_deref().and_then(|p| after.entity_path(p));
        let change = match (diff.kind, &old, &new) {
            (FileDiffKind::Renamed, Some(o), Some(n)) if o != n => EntityChangeType::Rename,
            (_, Some(_), Some(_)) => EntityChangeType::Modify,
            (_, None, Some(_)) => EntityChangeType::Create,
            (_, Some(_), None) => EntityChangeType::Delete,
            (_, None, None) => continue,
        };
        deltas.push(EntityDiff {
            entity_change_type: change,
            old_path: old,
            new_path: new,
        });
    }
    deltas.sort_by(|a, b| {
        let key = |d: &EntityDiff| d.new_path.clone().or_else(|| d.old_path.clone());
        key(a).cmp(&key(b))
    });
    deltas
}

impl Sdlc {
    async fn compare(&self, project: &ProjectId, from: &Oid, to: &Oid) -> Result<Comparison> {
        let diffs = self.store.diff(project, from, to).await?;
        let before = self.layout(project, from).await?;
        let after = self.layout(project, to).await?;
        let project_configuration_updated = diffs
            .iter()
            .flat_map(FileDiff::paths)
            .any(|p| p == PROJECT_CONFIG_FILE);
        Ok(Comparison {
            from_revision_id: from.clone(),
            to_revision_id: to.clone(),
            deltas: entity_diffs(&diffs, &before, &after),
            project_configuration_updated,
        })
    }

    /// Changes made in a workspace since it was created (or last updated).
    pub async fn workspace_creation_comparison(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Comparison> {
        let ctx = SourceContext::Workspace(spec.clone());
        let head = self.resolve_revision(project, &ctx, None).await?;
        let base = self
            .resolve_revision(project, &ctx, Some(&RevisionSelector::Base))
            .await?;
        self.compare(project, &base, &head).await
    }

    /// Difference between the current source head and the workspace.
    pub async fn workspace_source_comparison(
        &self,
        project: &ProjectId,
        spec: &WorkspaceSpecification,
    ) -> Result<Comparison> {
        let head = self.require_workspace_head(project, spec).await?;
        let source = self.source_head(project, spec).await?;
        self.compare(project, &source, &head).await
    }

    /// Changes a review proposes, or committed.
    pub async fn review_comparison(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<Comparison> {
        let (mr, spec) = self.review_merge_request(project, source, id).await?;
        match mr.state {
            ReviewState::Committed => {
                let merge = mr.merge_commit.ok_or_else(|| {
                    SdlcError::Internal(format!("committed review {id} has no commit"))
                })?;
                let parent = self
                    .store
                    .revision_parents(project, &merge)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| SdlcError::Internal(format!("commit {merge} has no parent")))?;
                self.compare(project, &parent, &merge).await
            }
            ReviewState::Open | ReviewState::Closed => {
                let head = self.require_workspace_head(project, &spec).await?;
                let target = self.source_head(project, &spec).await?;
                let base = self
                    .store
                    .merge_base(project, &head, &target)
                    .await?
                    .ok_or_else(|| SdlcError::Internal(format!("review {id} shares no history")))?;
                self.compare(project, &base, &head).await
            }
            ReviewState::Unknown => Err(SdlcError::Unsupported(format!(
                "review {id} is in an unknown state"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EntityChange, NewReview, ReviewQuery};
    use crate::service::test_support::*;
    use crate::structure::ProjectConfigurationUpdate;
    use serde_json::json;

    fn diff(kind: FileDiffKind, old: Option<&str>, new: Option<&str>) -> FileDiff {
        FileDiff {
            kind,
            old_path: old.map(String::from),
            new_path: new.map(String::from),
        }
    }

    #[test]
    fn file_diffs_become_entity_diffs() {
        let layout = EntityLayout::with_root("entities");
        let diffs = vec![
            diff(FileDiffKind::Added, None, Some("entities/a/B.json")),
            diff(FileDiffKind::Deleted, Some("entities/a/C.json"), None),
            diff(FileDiffKind::Renamed, Some("entities/a/D.json"), Some("entities/b/D.json")),
            diff(FileDiffKind::Modified, Some("project.json"), Some("project.json")),
        ];
        let deltas = entity_diffs(&diffs, &layout, &layout);
        let kinds: Vec<_> = deltas.iter().map(|d| d.entity_change_type).collect();
        assert_eq!(
            kinds,
            vec![EntityChangeType::Create, EntityChangeType::Delete, EntityChangeType::Rename]
        );
        assert_eq!(deltas[2].new_path.as_ref().unwrap().as_str(), "b::D");
    }

    #[test]
    fn relocated_files_keep_identity() {
        let before = EntityLayout::with_root("entities");
        let after = EntityLayout::with_root("model-entities/src/main/resources/entities");
        let diffs = vec![diff(
            FileDiffKind::Renamed,
            Some("entities/a/B.json"),
            Some("model-entities/src/main/resources/entities/a/B.json"),
        )];
        let deltas = entity_diffs(&diffs, &before, &after);
        assert_eq!(deltas[0].entity_change_type, EntityChangeType::Modify);
    }

    #[tokio::test]
    async fn workspace_comparisons() {
        let (_dir, sdlc, project) = setup().await;
        let spec = workspace(&sdlc, "w1");
        sdlc.create_workspace(&project, &spec).await.unwrap();
        apply(&sdlc, &project, &spec, vec![class("model::A")]).await;
        commit_classes(&sdlc, &project, "w2", &["model::B"]).await;

        let creation = sdlc.workspace_creation_comparison(&project, &spec).await.unwrap();
        assert_eq!(creation.deltas.len(), 1);
        assert_eq!(creation.deltas[0].entity_change_type, EntityChangeType::Create);
        assert!(!creation.project_configuration_updated);

        // against the moved source, B is missing from the workspace view
        let source = sdlc.workspace_source_comparison(&project, &spec).await.unwrap();
        assert!(source.deltas.iter().any(|d| d.new_path == Some(path("model::A"))));
        assert!(source.deltas.iter().any(|d| d.old_path == Some(path("model::B"))));

        sdlc.update_project_configuration(
            &project,
            &spec,
            ProjectConfigurationUpdate {
                group_id: Some("org.finos.trades".into()),
                ..Default::default()
            },
            "regroup",
        )
        .await
        .unwrap();
        let creation = sdlc.workspace_creation_comparison(&project, &spec).await.unwrap();
        assert!(creation.project_configuration_updated);
    }

    #[tokio::test]
    async fn review_comparison_before_and_after_commit() {
        let (_dir, sdlc, project) = setup().await;
        let spec = workspace(&sdlc, "w1");
        sdlc.create_workspace(&project, &spec).await.unwrap();
        apply(&sdlc, &project, &spec, vec![class("model::A"), class("model::B")]).await;
        apply(
            &sdlc,
            &project,
            &spec,
            vec![EntityChange::modify(path("model::B"), CLASS, content(json!({"v": 2})))],
        )
        .await;
        let source = WorkspaceSource::Project;
        let review = sdlc
            .create_review(
                &project,
                source,
                NewReview {
                    workspace_id: spec.id.clone(),
                    workspace_type: spec.workspace_type,
                    title: "two classes".into(),
                    description: String::new(),
                    labels: vec![],
                },
            )
            .await
            .unwrap();

        let open = sdlc.review_comparison(&project, source, &review.id).await.unwrap();
        assert_eq!(open.deltas.len(), 2);

        sdlc.commit_review(&project, source, &review.id, None).await.unwrap();
        let committed = sdlc.review_comparison(&project, source, &review.id).await.unwrap();
        assert_eq!(committed.deltas, open.deltas);
        let reviews = sdlc.get_reviews(&project, source, &ReviewQuery::default()).await.unwrap();
        assert_eq!(committed.to_revision_id, reviews[0].commit_revision_id.clone().unwrap());
    }
}
