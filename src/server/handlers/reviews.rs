//! Reviews on project and patch scopes.

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::Json;

use super::{path_param, ApiResult};
use crate::core::model::{Comparison, CommitReview, NewReview, Review, ReviewApproval, ReviewQuery, ReviewUpdate};
use crate::server::scope::Scope;

type Params = Path<HashMap<String, String>>;

pub async fn list(scope: Scope, Query(query): Query<ReviewQuery>) -> ApiResult<Json<Vec<Review>>> {
    Ok(Json(
        scope
            .sdlc
            .get_reviews(&scope.project, scope.source()?, &query)
            .await?,
    ))
}

pub async fn create(scope: Scope, Json(request): Json<NewReview>) -> ApiResult<(StatusCode, Json<Review>)> {
    let review = scope
        .sdlc
        .create_review(&scope.project, scope.source()?, request)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn get(scope: Scope, Path(params): Params) -> ApiResult<Json<Review>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope.sdlc.get_review(&scope.project, scope.source()?, id).await?,
    ))
}

pub async fn edit(
    scope: Scope,
    Path(params): Params,
    Json(update): Json<ReviewUpdate>,
) -> ApiResult<Json<Review>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope
            .sdlc
            .edit_review(&scope.project, scope.source()?, id, update)
            .await?,
    ))
}

pub async fn close(scope: Scope, Path(params): Params) -> ApiResult<Json<Review>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope.sdlc.close_review(&scope.project, scope.source()?, id).await?,
    ))
}

pub async fn reopen(scope: Scope, Path(params): Params) -> ApiResult<Json<Review>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope.sdlc.reopen_review(&scope.project, scope.source()?, id).await?,
    ))
}

/// The body is optional; without a message a default one is used.
pub async fn commit(
    scope: Scope,
    Path(params): Params,
    body: Option<Json<CommitReview>>,
) -> ApiResult<Json<Review>> {
    let id = path_param(&params, "review")?;
    let message = body.and_then(|Json(b)| b.message);
    Ok(Json(
        scope
            .sdlc
            .commit_review(&scope.project, scope.source()?, id, message)
            .await?,
    ))
}

pub async fn approve(scope: Scope, Path(params): Params) -> ApiResult<Json<ReviewApproval>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope.sdlc.approve_review(&scope.project, scope.source()?, id).await?,
    ))
}

pub async fn revoke_approval(scope: Scope, Path(params): Params) -> ApiResult<Json<ReviewApproval>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope
            .sdlc
            .revoke_review_approval(&scope.project, scope.source()?, id)
            .await?,
    ))
}

pub async fn approval(scope: Scope, Path(params): Params) -> ApiResult<Json<ReviewApproval>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope
            .sdlc
            .get_review_approval(&scope.project, scope.source()?, id)
            .await?,
    ))
}

pub async fn comparison(scope: Scope, Path(params): Params) -> ApiResult<Json<Comparison>> {
    let id = path_param(&params, "review")?;
    Ok(Json(
        scope
            .sdlc
            .review_comparison(&scope.project, scope.source()?, id)
            .await?,
    ))
}
