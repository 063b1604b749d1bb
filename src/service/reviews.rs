//! service::reviews
//!
//! Reviews are merge requests from a workspace branch into the branch of
//! its source. Merge requests whose source branch is not a workspace of the
//! requested source are not reviews and are never returned.

use tracing::info;

use super::{Result, Sdlc, SdlcError};
use crate::core::model::{
    NewReview, Review, ReviewApproval, ReviewQuery, ReviewState, ReviewUpdate,
};
use crate::core::types::ProjectId;
use crate::core::workspace::{WorkspaceAccessType, WorkspaceSource, WorkspaceSpecification};
use crate::store::{
    MergeRequest, MergeRequestQuery, MergeRequestStateEvent, MergeRequestUpdate, NewMergeRequest,
};

/// Workspace behind a merge request, when it is a review of `source`.
fn review_workspace(mr: &MergeRequest, source: WorkspaceSource) -> Option<WorkspaceSpecification> {
    let spec = WorkspaceSpecification::parse_branch(&mr.source_branch)?;
    let is_review = spec.source == source
        && spec.access_type == WorkspaceAccessType::Workspace
        && mr.target_branch == source.branch_name().as_str();
    is_review.then_some(spec)
}

fn to_review(project: &ProjectId, spec: &WorkspaceSpecification, mr: MergeRequest) -> Review {
    Review {
        id: mr.id,
        project_id: project.clone(),
        workspace_id: spec.id.clone(),
        workspace_type: spec.workspace_type,
        source: spec.source,
        title: mr.title,
        description: mr.description,
        labels: mr.labels,
        author: mr.author,
        state: mr.state,
        created_at: mr.created_at,
        last_updated_at: mr.updated_at,
        closed_at: mr.closed_at,
        committed_at: mr.merged_at,
        commit_revision_id: mr.merge_commit,
        web_url: mr.web_url,
    }
}

impl Sdlc {
    pub async fn get_reviews(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        query: &ReviewQuery,
    ) -> Result<Vec<Review>> {
        let mr_query = MergeRequestQuery {
            state: query.state,
            source_branch: None,
            target_branch: Some(source.branch_name().to_string()),
            updated_after: query.since,
            updated_before: query.until,
        };
        let reviews = self
            .store
            .list_merge_requests(project, &mr_query)
            .await?
            .into_iter()
            .filter_map(|mr| review_workspace(&mr, source).map(|spec| to_review(project, &spec, mr)))
            .filter(|review| {
                query.workspace_id.as_ref().is_none_or(|id| *id == review.workspace_id)
                    && query.workspace_type.is_none_or(|t| t == review.workspace_type)
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(reviews)
    }

    pub async fn get_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<Review> {
        let (mr, spec) = self.review_merge_request(project, source, id).await?;
        Ok(to_review(project, &spec, mr))
    }

    pub(crate) async fn review_merge_request(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<(MergeRequest, WorkspaceSpecification)> {
        let not_found = || SdlcError::not_found(format!("review {id} not found in project {project}"));
        let mr = match self.store.get_merge_request(project, id).await {
            Ok(mr) => mr,
            Err(crate::store::StoreError::NotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let spec = review_workspace(&mr, source).ok_or_else(not_found)?;
        Ok((mr, spec))
    }

    async fn require_state(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
        state: ReviewState,
    ) -> Result<(MergeRequest, WorkspaceSpecification)> {
        let (mr, spec) = self.review_merge_request(project, source, id).await?;
        if mr.state != state {
            return Err(SdlcError::conflict(format!(
                "review {id} is {:?}, expected {state:?}",
                mr.state
            )));
        }
        Ok((mr, spec))
    }

    /// Open a review of a workspace's changes.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a blank title or a workspace without changes
    /// - `Conflict` if the workspace already has an open review
    pub async fn create_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        request: NewReview,
    ) -> Result<Review> {
        if request.title.trim().is_empty() {
            return Err(SdlcError::invalid("review title is required"));
        }
        let spec = WorkspaceSpecification::of_type(
            request.workspace_id,
            request.workspace_type,
            &self.user.user_id,
            source,
        );
        let branch = spec.branch_name();
        let head = self.require_workspace_head(project, &spec).await?;
        let source_head = self.source_head(project, &spec).await?;
        if self.is_ancestor(project, &head, &source_head).await? {
            return Err(SdlcError::invalid(format!(
                "workspace {} has no changes to review",
                spec.id
            )));
        }

        let open = MergeRequestQuery {
            state: Some(ReviewState::Open),
            source_branch: Some(branch.to_string()),
            ..Default::default()
        };
        if let Some(existing) = self.store.list_merge_requests(project, &open).await?.first() {
            return Err(SdlcError::conflict(format!(
                "workspace {} already has open review {}",
                spec.id, existing.id
            )));
        }

        let mr = self
            .store
            .create_merge_request(
                project,
                &NewMergeRequest {
                    source_branch: branch.to_string(),
                    target_branch: spec.source_branch().to_string(),
                    title: request.title,
                    description: request.description,
                    labels: request.labels,
                },
            )
            .await?;
        info!(project = %project, review = %mr.id, workspace = %branch, "opened review");
        Ok(to_review(project, &spec, mr))
    }

    pub async fn edit_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
        update: ReviewUpdate,
    ) -> Result<Review> {
        if update.title.is_none() && update.description.is_none() && update.labels.is_none() {
            return Err(SdlcError::invalid("nothing to update"));
        }
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SdlcError::invalid("review title cannot be blank"));
        }
        let (_, spec) = self.require_state(project, source, id, ReviewState::Open).await?;
        let mr = self
            .store
            .update_merge_request(
                project,
                id,
                &MergeRequestUpdate {
                    title: update.title,
                    description: update.description,
                    labels: update.labels,
                    state_event: None,
                },
            )
            .await?;
        Ok(to_review(project, &spec, mr))
    }

    pub async fn close_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<Review> {
        self.transition(project, source, id, ReviewState::Open, MergeRequestStateEvent::Close)
            .await
    }

    pub async fn reopen_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<Review> {
        self.transition(project, source, id, ReviewState::Closed, MergeRequestStateEvent::Reopen)
            .await
    }

    async fn transition(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
        from: ReviewState,
        event: MergeRequestStateEvent,
    ) -> Result<Review> {
        let (_, spec) = self.require_state(project, source, id, from).await?;
        let update = MergeRequestUpdate {
            state_event: Some(event),
            ..Default::default()
        };
        let mr = self.store.update_merge_request(project, id, &update).await?;
        info!(project = %project, review = %id, event = event.as_str(), "review state changed");
        Ok(to_review(project, &spec, mr))
    }

    /// Merge a review's workspace into its source.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the review is not open, the workspace is outdated,
    ///   or the workspace moved during the merge
    pub async fn commit_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
        message: Option<String>,
    ) -> Result<Review> {
        let (mr, spec) = self.require_state(project, source, id, ReviewState::Open).await?;
        if self.is_workspace_outdated(project, &spec).await? {
            return Err(SdlcError::conflict(format!(
                "workspace {} is outdated; update it before committing review {id}",
                spec.id
            )));
        }
        let head = self.require_workspace_head(project, &spec).await?;
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("{} (review {id})", mr.title));

        let merged = self
            .store
            .merge_merge_request(project, id, &message, &head)
            .await?;
        info!(
            project = %project,
            review = %id,
            revision = ?merged.merge_commit,
            "committed review"
        );
        Ok(to_review(project, &spec, merged))
    }

    // =========================================================================
    // Approvals
    // =========================================================================

    pub async fn approve_review(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<ReviewApproval> {
        self.require_state(project, source, id, ReviewState::Open).await?;
        self.store.approve_merge_request(project, id).await?;
        self.get_review_approval(project, source, id).await
    }

    pub async fn revoke_review_approval(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<ReviewApproval> {
        self.review_merge_request(project, source, id).await?;
        self.store.unapprove_merge_request(project, id).await?;
        self.get_review_approval(project, source, id).await
    }

    pub async fn get_review_approval(
        &self,
        project: &ProjectId,
        source: WorkspaceSource,
        id: &str,
    ) -> Result<ReviewApproval> {
        self.review_merge_request(project, source, id).await?;
        Ok(ReviewApproval {
            approved_by: self.store.merge_request_approvers(project, id).await?,
        })
    }
}
