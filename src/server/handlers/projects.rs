//! Project collection and project resource.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{path_param, split_list, ApiResult};
use crate::core::model::{NewProject, Project, ProjectFilter, ProjectUpdate};
use crate::core::types::ProjectId;
use crate::server::caller::Api;
use crate::service::SdlcError;

/// `GET /api/projects` query; `tags` is comma separated.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectListQuery {
    pub search: Option<String>,
    pub tags: Option<String>,
    pub limit: Option<usize>,
}

impl From<ProjectListQuery> for ProjectFilter {
    fn from(query: ProjectListQuery) -> Self {
        ProjectFilter {
            search: query.search.filter(|s| !s.trim().is_empty()),
            tags: split_list(query.tags.as_deref()),
            limit: query.limit,
        }
    }
}

fn project_id(params: &HashMap<String, String>) -> ApiResult<ProjectId> {
    Ok(ProjectId::new(path_param(params, "project")?).map_err(SdlcError::from)?)
}

pub async fn list(Api(sdlc): Api, Query(query): Query<ProjectListQuery>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(sdlc.list_projects(&query.into()).await?))
}

pub async fn create(
    Api(sdlc): Api,
    Json(request): Json<NewProject>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = sdlc.create_project(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get(Api(sdlc): Api, Path(params): Path<HashMap<String, String>>) -> ApiResult<Json<Project>> {
    Ok(Json(sdlc.get_project(&project_id(&params)?).await?))
}

pub async fn update(
    Api(sdlc): Api,
    Path(params): Path<HashMap<String, String>>,
    Json(update): Json<ProjectUpdate>,
) -> ApiResult<Json<Project>> {
    Ok(Json(sdlc.update_project(&project_id(&params)?, &update).await?))
}

pub async fn delete(Api(sdlc): Api, Path(params): Path<HashMap<String, String>>) -> ApiResult<StatusCode> {
    sdlc.delete_project(&project_id(&params)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
