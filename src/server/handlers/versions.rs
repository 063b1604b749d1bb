//! Versions and patches.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::ApiResult;
use crate::core::model::{NewPatch, NewVersion, Patch, ReleasePatch, Version};
use crate::core::types::VersionId;
use crate::server::error::ApiError;
use crate::server::scope::Scope;
use crate::service::{SdlcError, SourceContext};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRange {
    pub min_version_id: Option<VersionId>,
    pub max_version_id: Option<VersionId>,
}

fn scoped_version(scope: &Scope) -> Result<VersionId, ApiError> {
    match &scope.ctx {
        SourceContext::Version(version) | SourceContext::Patch(version) => Ok(*version),
        other => Err(SdlcError::Internal(format!("{other} names no version")).into()),
    }
}

pub async fn list(scope: Scope, Query(range): Query<VersionRange>) -> ApiResult<Json<Vec<Version>>> {
    Ok(Json(
        scope
            .sdlc
            .get_versions(&scope.project, range.min_version_id, range.max_version_id)
            .await?,
    ))
}

pub async fn create(scope: Scope, Json(request): Json<NewVersion>) -> ApiResult<(StatusCode, Json<Version>)> {
    let version = scope.sdlc.new_version(&scope.project, request).await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// `GET versions/{version}`; the scope resolves `latest`.
pub async fn get(scope: Scope) -> ApiResult<Json<Version>> {
    let version = scoped_version(&scope)?;
    Ok(Json(scope.sdlc.get_version(&scope.project, &version).await?))
}

pub async fn list_patches(scope: Scope) -> ApiResult<Json<Vec<Patch>>> {
    Ok(Json(scope.sdlc.get_patches(&scope.project).await?))
}

pub async fn create_patch(scope: Scope, Json(request): Json<NewPatch>) -> ApiResult<(StatusCode, Json<Patch>)> {
    let patch = scope.sdlc.create_patch(&scope.project, request).await?;
    Ok((StatusCode::CREATED, Json(patch)))
}

pub async fn get_patch(scope: Scope) -> ApiResult<Json<Patch>> {
    let version = scoped_version(&scope)?;
    Ok(Json(scope.sdlc.get_patch(&scope.project, &version).await?))
}

pub async fn delete_patch(scope: Scope) -> ApiResult<StatusCode> {
    let version = scoped_version(&scope)?;
    scope.sdlc.delete_patch(&scope.project, &version).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn release_patch(scope: Scope, body: Option<Json<ReleasePatch>>) -> ApiResult<Json<Version>> {
    let version = scoped_version(&scope)?;
    let request = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        scope
            .sdlc
            .release_patch(&scope.project, &version, request)
            .await?,
    ))
}
