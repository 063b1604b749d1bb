//! server::handlers
//!
//! Request handlers, one module per resource family. Handlers only extract,
//! call the [`Sdlc`](crate::service::Sdlc) facade and wrap the result in
//! JSON; every rule lives in the service layer.

pub mod auth;
pub mod entities;
pub mod projects;
pub mod reviews;
pub mod versions;
pub mod workspaces;

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::caller::Api;
use super::error::ApiError;
use super::state::AppState;
use crate::core::model::User;
use crate::service::{RevisionSelector, SdlcError};

/// Result of a handler.
pub type ApiResult<T> = Result<T, ApiError>;

/// A named path parameter.
pub(crate) fn path_param<'a>(
    params: &'a HashMap<String, String>,
    name: &str,
) -> ApiResult<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SdlcError::Internal(format!("route has no '{name}' parameter")).into())
}

/// Split a comma separated query value.
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// `?revisionId=` on read routes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionParam {
    pub revision_id: Option<String>,
}

impl RevisionParam {
    pub fn selector(&self) -> ApiResult<Option<RevisionSelector>> {
        self.revision_id
            .as_deref()
            .map(str::parse::<RevisionSelector>)
            .transpose()
            .map_err(ApiError::from)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
}

pub async fn info(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        backend: state.backend().kind().name(),
    })
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn current_user(Api(sdlc): Api) -> ApiResult<Json<User>> {
    Ok(Json(sdlc.get_current_user().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UserSearch {
    pub search: Option<String>,
}

pub async fn users(Api(sdlc): Api, Query(query): Query<UserSearch>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(sdlc.get_users(query.search.as_deref()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists() {
        assert_eq!(split_list(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn revision_param() {
        let param = RevisionParam {
            revision_id: Some("base".into()),
        };
        assert_eq!(param.selector().unwrap(), Some(RevisionSelector::Base));
        assert_eq!(RevisionParam::default().selector().unwrap(), None);
        let bad = RevisionParam {
            revision_id: Some("nope".into()),
        };
        assert_eq!(bad.selector().unwrap_err().status().as_u16(), 400);
    }
}
