//! Workspaces, their comparisons, conflict resolution and backups.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::ApiResult;
use crate::core::model::{Comparison, EntityChangesRequest, Workspace, WorkspaceUpdateReport};
use crate::core::workspace::WorkspaceType;
use crate::server::scope::Scope;

// =============================================================================
// Listings (project and patch scopes)
// =============================================================================

pub async fn list_user(scope: Scope) -> ApiResult<Json<Vec<Workspace>>> {
    let workspaces = scope
        .sdlc
        .list_workspaces(&scope.project, scope.source()?, Some(WorkspaceType::User))
        .await?;
    Ok(Json(workspaces))
}

pub async fn list_group(scope: Scope) -> ApiResult<Json<Vec<Workspace>>> {
    let workspaces = scope
        .sdlc
        .list_workspaces(&scope.project, scope.source()?, Some(WorkspaceType::Group))
        .await?;
    Ok(Json(workspaces))
}

pub async fn list_all(scope: Scope) -> ApiResult<Json<Vec<Workspace>>> {
    let workspaces = scope
        .sdlc
        .list_all_workspaces(&scope.project, scope.source()?)
        .await?;
    Ok(Json(workspaces))
}

// =============================================================================
// Workspace
// =============================================================================

pub async fn get(scope: Scope) -> ApiResult<Json<Workspace>> {
    Ok(Json(
        scope.sdlc.get_workspace(&scope.project, scope.workspace()?).await?,
    ))
}

pub async fn create(scope: Scope) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let workspace = scope
        .sdlc
        .create_workspace(&scope.project, scope.workspace()?)
        .await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn delete(scope: Scope) -> ApiResult<StatusCode> {
    scope
        .sdlc
        .delete_workspace(&scope.project, scope.workspace()?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn outdated(scope: Scope) -> ApiResult<Json<bool>> {
    Ok(Json(
        scope
            .sdlc
            .is_workspace_outdated(&scope.project, scope.workspace()?)
            .await?,
    ))
}

pub async fn in_conflict_resolution(scope: Scope) -> ApiResult<Json<bool>> {
    Ok(Json(
        scope
            .sdlc
            .is_in_conflict_resolution(&scope.project, scope.workspace()?)
            .await?,
    ))
}

pub async fn update(scope: Scope) -> ApiResult<Json<WorkspaceUpdateReport>> {
    Ok(Json(
        scope
            .sdlc
            .update_workspace(&scope.project, scope.workspace()?)
            .await?,
    ))
}

pub async fn creation_comparison(scope: Scope) -> ApiResult<Json<Comparison>> {
    Ok(Json(
        scope
            .sdlc
            .workspace_creation_comparison(&scope.project, scope.workspace()?)
            .await?,
    ))
}

pub async fn source_comparison(scope: Scope) -> ApiResult<Json<Comparison>> {
    Ok(Json(
        scope
            .sdlc
            .workspace_source_comparison(&scope.project, scope.workspace()?)
            .await?,
    ))
}

// =============================================================================
// Conflict resolution
// =============================================================================

pub async fn discard_resolution(scope: Scope) -> ApiResult<StatusCode> {
    scope
        .sdlc
        .discard_conflict_resolution(&scope.project, scope.workspace()?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn discard_resolution_changes(scope: Scope) -> ApiResult<Json<Workspace>> {
    Ok(Json(
        scope
            .sdlc
            .discard_changes_conflict_resolution(&scope.project, scope.workspace()?)
            .await?,
    ))
}

pub async fn accept_resolution(
    scope: Scope,
    Json(request): Json<EntityChangesRequest>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(
        scope
            .sdlc
            .accept_conflict_resolution(&scope.project, scope.workspace()?, request)
            .await?,
    ))
}

// =============================================================================
// Backup
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RecoverQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn discard_backup(scope: Scope) -> ApiResult<StatusCode> {
    scope
        .sdlc
        .discard_backup(&scope.project, scope.workspace()?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recover_backup(scope: Scope, Query(query): Query<RecoverQuery>) -> ApiResult<Json<Workspace>> {
    Ok(Json(
        scope
            .sdlc
            .recover_backup(&scope.project, scope.workspace()?, query.force)
            .await?,
    ))
}
