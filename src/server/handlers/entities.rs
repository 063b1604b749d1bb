//! Entities, project configuration and history, on any scope.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::Json;
use serde::Deserialize;

use super::{path_param, split_list, ApiResult, RevisionParam};
use crate::core::model::{Entity, EntityChangesRequest, EntityFilter, EntityUpdate, Revision, RevisionQuery};
use crate::core::types::{EntityPath, Oid};
use crate::server::scope::Scope;
use crate::service::{RevisionSelector, SdlcError};
use crate::structure::{ProjectConfiguration, ProjectConfigurationUpdate};

/// Entity listing query. `classifierPaths` and `packages` are comma
/// separated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQuery {
    pub revision_id: Option<String>,
    pub classifier_paths: Option<String>,
    pub packages: Option<String>,
    #[serde(default)]
    pub include_sub_packages: bool,
    pub name: Option<String>,
}

impl EntityQuery {
    fn filter(&self) -> EntityFilter {
        EntityFilter {
            classifier_paths: split_list(self.classifier_paths.as_deref()),
            packages: split_list(self.packages.as_deref()),
            include_sub_packages: self.include_sub_packages,
            name: self.name.clone().filter(|n| !n.is_empty()),
        }
    }

    fn selector(&self) -> ApiResult<Option<RevisionSelector>> {
        RevisionParam {
            revision_id: self.revision_id.clone(),
        }
        .selector()
    }
}

fn entity_path(params: &HashMap<String, String>) -> ApiResult<EntityPath> {
    Ok(EntityPath::new(path_param(params, "entity")?).map_err(SdlcError::from)?)
}

// =============================================================================
// Reads
// =============================================================================

pub async fn list(scope: Scope, Query(query): Query<EntityQuery>) -> ApiResult<Json<Vec<Entity>>> {
    let selector = query.selector()?;
    let entities = scope
        .sdlc
        .get_entities(&scope.project, &scope.ctx, selector.as_ref(), &query.filter())
        .await?;
    Ok(Json(entities))
}

pub async fn paths(scope: Scope, Query(query): Query<EntityQuery>) -> ApiResult<Json<Vec<EntityPath>>> {
    let selector = query.selector()?;
    let paths = scope
        .sdlc
        .get_entity_paths(&scope.project, &scope.ctx, selector.as_ref(), &query.filter())
        .await?;
    Ok(Json(paths))
}

pub async fn get(
    scope: Scope,
    Path(params): Path<HashMap<String, String>>,
    Query(revision): Query<RevisionParam>,
) -> ApiResult<Json<Entity>> {
    let selector = revision.selector()?;
    let entity = scope
        .sdlc
        .get_entity(&scope.project, &scope.ctx, selector.as_ref(), &entity_path(&params)?)
        .await?;
    Ok(Json(entity))
}

pub async fn configuration(
    scope: Scope,
    Query(revision): Query<RevisionParam>,
) -> ApiResult<Json<ProjectConfiguration>> {
    let selector = revision.selector()?;
    let config = scope
        .sdlc
        .get_project_configuration(&scope.project, &scope.ctx, selector.as_ref())
        .await?;
    Ok(Json(config))
}

// =============================================================================
// Writes
// =============================================================================

pub async fn perform_changes(
    scope: Scope,
    Json(request): Json<EntityChangesRequest>,
) -> ApiResult<Json<Revision>> {
    let revision = scope
        .sdlc
        .perform_changes(&scope.project, scope.workspace()?, request)
        .await?;
    Ok(Json(revision))
}

pub async fn put(
    scope: Scope,
    Path(params): Path<HashMap<String, String>>,
    Json(update): Json<EntityUpdate>,
) -> ApiResult<Json<Revision>> {
    let revision = scope
        .sdlc
        .create_or_update_entity(&scope.project, scope.workspace()?, &entity_path(&params)?, update)
        .await?;
    Ok(Json(revision))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntity {
    pub message: String,
    #[serde(default)]
    pub revision_id: Option<Oid>,
}

pub async fn delete(
    scope: Scope,
    Path(params): Path<HashMap<String, String>>,
    Json(request): Json<DeleteEntity>,
) -> ApiResult<Json<Revision>> {
    let revision = scope
        .sdlc
        .delete_entity(
            &scope.project,
            scope.workspace()?,
            &entity_path(&params)?,
            &request.message,
            request.revision_id,
        )
        .await?;
    Ok(Json(revision))
}

/// Body of `PUT configuration`: the update plus a commit message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationChange {
    pub message: String,
    #[serde(flatten)]
    pub update: ProjectConfigurationUpdate,
}

pub async fn update_configuration(
    scope: Scope,
    Json(change): Json<ConfigurationChange>,
) -> ApiResult<Json<Revision>> {
    let revision = scope
        .sdlc
        .update_project_configuration(&scope.project, scope.workspace()?, change.update, &change.message)
        .await?;
    Ok(Json(revision))
}

// =============================================================================
// History
// =============================================================================

pub async fn revisions(scope: Scope, Query(query): Query<RevisionQuery>) -> ApiResult<Json<Vec<Revision>>> {
    Ok(Json(
        scope.sdlc.get_revisions(&scope.project, &scope.ctx, &query).await?,
    ))
}

pub async fn revision(scope: Scope, Path(params): Path<HashMap<String, String>>) -> ApiResult<Json<Revision>> {
    let selector: RevisionSelector = path_param(&params, "revision")?.parse()?;
    Ok(Json(
        scope.sdlc.get_revision(&scope.project, &scope.ctx, &selector).await?,
    ))
}

pub async fn entity_revisions(
    scope: Scope,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<Vec<Revision>>> {
    let revisions = scope
        .sdlc
        .get_entity_revisions(&scope.project, &scope.ctx, &entity_path(&params)?, &query)
        .await?;
    Ok(Json(revisions))
}

pub async fn package_revisions(
    scope: Scope,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<RevisionQuery>,
) -> ApiResult<Json<Vec<Revision>>> {
    let revisions = scope
        .sdlc
        .get_package_revisions(&scope.project, &scope.ctx, path_param(&params, "package")?, &query)
        .await?;
    Ok(Json(revisions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_query_filter() {
        let query = EntityQuery {
            classifier_paths: Some("meta::Class".into()),
            packages: Some("model,other".into()),
            include_sub_packages: true,
            name: Some(String::new()),
            ..Default::default()
        };
        let filter = query.filter();
        assert_eq!(filter.classifier_paths, vec!["meta::Class"]);
        assert_eq!(filter.packages, vec!["model", "other"]);
        assert!(filter.include_sub_packages);
        assert!(filter.name.is_none());
    }

    #[test]
    fn configuration_change_body() {
        let change: ConfigurationChange = serde_json::from_value(serde_json::json!({
            "message": "regroup",
            "groupId": "org.finos.trades"
        }))
        .unwrap();
        assert_eq!(change.message, "regroup");
        assert_eq!(change.update.group_id.as_deref(), Some("org.finos.trades"));
    }
}
