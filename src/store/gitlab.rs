//! store::gitlab
//!
//! Project store over the GitLab REST API (v4).
//!
//! # Design
//!
//! Each store instance is bound to one caller and authenticates with that
//! caller's token, obtained through a [`TokenProvider`] for every request.
//! Personal access tokens travel in `PRIVATE-TOKEN`, OAuth tokens as
//! `Authorization: Bearer`.
//!
//! Projects managed by this server carry the configured topic (the project
//! tag); embedded projects additionally carry `<tag>-embedded`. Projects
//! without the tag are invisible to the store.
//!
//! # Authentication
//!
//! A 401 response triggers one retry after asking the provider to refresh
//! the token. Other failures are mapped to [`StoreError`] without retry.
//!
//! # Limitations
//!
//! GitLab has no compare-and-swap for branch updates. Expected heads are
//! checked right before the write, which narrows but does not close the
//! race window.
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::store::{GitLabStore, ProjectStore};
//!
//! let store = GitLabStore::new(Client::new(), "https://gitlab.example.com", provider, user, "sdlc");
//! let projects = store.list_projects(&ProjectFilter::default()).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use urlencoding::encode;

use super::traits::{
    Branch, CommitRequest, FileChange, FileDiff, FileDiffKind, MergeRequest, MergeRequestQuery,
    MergeRequestUpdate, NewMergeRequest, ProjectStore, StoreError, Tag,
};
use crate::auth::{auth_header, AuthError, TokenProvider};
use crate::core::model::{
    NewProject, Project, ProjectFilter, ProjectType, ProjectUpdate, ReviewState, Revision,
    RevisionQuery, User,
};
use crate::core::types::{Oid, ProjectId, UserId};
use crate::core::workspace::DEFAULT_BRANCH;

/// Page size for list endpoints (GitLab's maximum).
const PER_PAGE: usize = 100;

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "sdlc-server";

/// Suffix of the topic marking embedded projects.
const EMBEDDED_TOPIC_SUFFIX: &str = "-embedded";

fn auth_error(err: AuthError) -> StoreError {
    match err {
        AuthError::NotAuthenticated(_) => StoreError::AuthRequired,
        e if e.is_transient() => StoreError::Network(e.to_string()),
        e => StoreError::AuthFailed(e.to_string()),
    }
}

fn network_error(err: reqwest::Error) -> StoreError {
    StoreError::Network(err.to_string())
}

/// Pull a readable message out of a GitLab error body.
///
/// GitLab reports `message` as a string, a list or a field map.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("message").or_else(|| map.get("error")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ if body.is_empty() => "unknown error".to_string(),
        _ => body.to_string(),
    }
}

fn map_status(status: StatusCode, message: String) -> StoreError {
    let exists = message.to_lowercase().contains("already exists");
    match status {
        StatusCode::UNAUTHORIZED => StoreError::AuthFailed("invalid or expired token".into()),
        StatusCode::FORBIDDEN => StoreError::AuthFailed(format!("permission denied: {message}")),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT if exists => {
            StoreError::AlreadyExists(message)
        }
        StatusCode::BAD_REQUEST => StoreError::InvalidRequest(message),
        StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY
        | StatusCode::METHOD_NOT_ALLOWED
        | StatusCode::NOT_ACCEPTABLE => StoreError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => StoreError::Api {
            status: status.as_u16(),
            message: "rate limited by GitLab".into(),
        },
        s if s.is_server_error() => StoreError::Api {
            status: s.as_u16(),
            message: format!("GitLab server error: {message}"),
        },
        s => StoreError::Api {
            status: s.as_u16(),
            message,
        },
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
    #[serde(default)]
    name: String,
}

impl GitLabUser {
    fn into_user(self) -> Option<User> {
        let user_id = UserId::new(self.username.as_str()).ok()?;
        let name = if self.name.is_empty() {
            self.username
        } else {
            self.name
        };
        Some(User { user_id, name })
    }
}

#[derive(Debug, Deserialize)]
struct GitLabCommitRef {
    id: Oid,
}

#[derive(Debug, Deserialize)]
struct GitLabBranch {
    name: String,
    commit: GitLabCommitRef,
}

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: Oid,
    #[serde(default)]
    message: String,
    author_name: String,
    authored_date: DateTime<Utc>,
    committer_name: String,
    committed_date: DateTime<Utc>,
    #[serde(default)]
    parent_ids: Vec<Oid>,
}

impl From<GitLabCommit> for Revision {
    fn from(commit: GitLabCommit) -> Self {
        Revision {
            id: commit.id,
            author_name: commit.author_name,
            authored_timestamp: commit.authored_date,
            committer_name: commit.committer_name,
            committed_timestamp: commit.committed_date,
            message: commit.message.trim_end().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitLabTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GitLabCompare {
    #[serde(default)]
    diffs: Vec<GitLabDiff>,
}

#[derive(Debug, Deserialize)]
struct GitLabDiff {
    old_path: String,
    new_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

impl From<GitLabDiff> for FileDiff {
    fn from(diff: GitLabDiff) -> Self {
        if diff.new_file {
            FileDiff {
                kind: FileDiffKind::Added,
                old_path: None,
                new_path: Some(diff.new_path),
            }
        } else if diff.deleted_file {
            FileDiff {
                kind: FileDiffKind::Deleted,
                old_path: Some(diff.old_path),
                new_path: None,
            }
        } else if diff.renamed_file {
            FileDiff {
                kind: FileDiffKind::Renamed,
                old_path: Some(diff.old_path),
                new_path: Some(diff.new_path),
            }
        } else {
            FileDiff {
                kind: FileDiffKind::Modified,
                old_path: Some(diff.old_path),
                new_path: Some(diff.new_path),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequest {
    iid: u64,
    source_branch: String,
    target_branch: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    author: Option<GitLabUser>,
    state: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    #[serde(default)]
    squash_commit_sha: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

fn review_state(state: &str) -> ReviewState {
    match state {
        "opened" => ReviewState::Open,
        "closed" => ReviewState::Closed,
        "merged" => ReviewState::Committed,
        _ => ReviewState::Unknown,
    }
}

fn gitlab_state(state: ReviewState) -> &'static str {
    match state {
        ReviewState::Open => "opened",
        ReviewState::Closed => "closed",
        ReviewState::Committed => "merged",
        ReviewState::Unknown => "all",
    }
}

impl From<GitLabMergeRequest> for MergeRequest {
    fn from(mr: GitLabMergeRequest) -> Self {
        let merge_commit = mr
            .merge_commit_sha
            .or(mr.squash_commit_sha)
            .and_then(|sha| Oid::new(sha).ok());
        MergeRequest {
            id: mr.iid.to_string(),
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            title: mr.title,
            description: mr.description.unwrap_or_default(),
            labels: mr.labels,
            author: mr.author.and_then(GitLabUser::into_user),
            state: review_state(&mr.state),
            created_at: mr.created_at,
            updated_at: mr.updated_at,
            closed_at: mr.closed_at,
            merged_at: mr.merged_at,
            merge_commit,
            web_url: mr.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitLabApprovals {
    #[serde(default)]
    approved_by: Vec<GitLabApprover>,
}

#[derive(Debug, Deserialize)]
struct GitLabApprover {
    user: GitLabUser,
}

#[derive(Debug, Deserialize)]
struct GitLabTag {
    name: String,
    #[serde(default)]
    message: Option<String>,
    commit: GitLabCommitRef,
}

impl From<GitLabTag> for Tag {
    fn from(tag: GitLabTag) -> Self {
        Tag {
            name: tag.name,
            target: tag.commit.id,
            message: tag.message.filter(|m| !m.is_empty()),
        }
    }
}

#[derive(Serialize)]
struct CreateProjectBody<'a> {
    name: &'a str,
    description: &'a str,
    topics: Vec<String>,
    default_branch: &'a str,
    initialize_with_readme: bool,
}

#[derive(Serialize)]
struct UpdateProjectBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topics: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct CommitAction {
    action: &'static str,
    file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct CommitBody<'a> {
    branch: &'a str,
    commit_message: &'a str,
    actions: Vec<CommitAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    force: Option<bool>,
}

#[derive(Serialize)]
struct MergeRequestBody<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
    labels: String,
    remove_source_branch: bool,
}

#[derive(Serialize)]
struct MergeRequestUpdateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_event: Option<&'static str>,
}

#[derive(Serialize)]
struct MergeBody<'a> {
    merge_commit_message: &'a str,
    sha: &'a str,
    should_remove_source_branch: bool,
}

#[derive(Serialize)]
struct CreateTagBody<'a> {
    tag_name: &'a str,
    #[serde(rename = "ref")]
    target: &'a str,
    message: &'a str,
}

fn text_content(path: &str, content: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(content)
        .map_err(|_| StoreError::InvalidRequest(format!("file {path} is not valid UTF-8")))
}

fn commit_action(change: FileChange) -> Result<CommitAction, StoreError> {
    Ok(match change {
        FileChange::Create { path, content } => CommitAction {
            action: "create",
            content: Some(text_content(&path, content)?),
            file_path: path,
            previous_path: None,
        },
        FileChange::Update { path, content } => CommitAction {
            action: "update",
            content: Some(text_content(&path, content)?),
            file_path: path,
            previous_path: None,
        },
        FileChange::Delete { path } => CommitAction {
            action: "delete",
            file_path: path,
            previous_path: None,
            content: None,
        },
        FileChange::Move { from, to, content } => CommitAction {
            action: "move",
            content: content.map(|c| text_content(&to, c)).transpose()?,
            file_path: to,
            previous_path: Some(from),
        },
    })
}

// =============================================================================
// Store
// =============================================================================

/// Project store over the GitLab API, acting with one caller's token.
pub struct GitLabStore {
    client: Client,
    api_base: String,
    provider: Arc<dyn TokenProvider>,
    user: User,
    project_tag: String,
}

// Custom Debug to avoid touching the token provider
impl std::fmt::Debug for GitLabStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabStore")
            .field("api_base", &self.api_base)
            .field("user", &self.user.user_id)
            .field("project_tag", &self.project_tag)
            .finish_non_exhaustive()
    }
}

impl GitLabStore {
    /// Create a store for the GitLab instance at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client, shared across stores
    /// * `base_url` - GitLab instance URL (without `/api/v4`)
    /// * `provider` - Token provider of the caller
    /// * `user` - The caller
    /// * `project_tag` - Topic marking managed projects
    pub fn new(
        client: Client,
        base_url: &str,
        provider: Arc<dyn TokenProvider>,
        user: User,
        project_tag: &str,
    ) -> Self {
        Self {
            client,
            api_base: format!("{}/api/v4", base_url.trim_end_matches('/')),
            provider,
            user,
            project_tag: project_tag.to_string(),
        }
    }

    fn embedded_topic(&self) -> String {
        format!("{}{EMBEDDED_TOPIC_SUFFIX}", self.project_tag)
    }

    fn topics(&self, project_type: ProjectType, tags: &[String]) -> Vec<String> {
        let mut topics = vec![self.project_tag.clone()];
        if project_type == ProjectType::Embedded {
            topics.push(self.embedded_topic());
        }
        for tag in tags {
            if !topics.contains(tag) {
                topics.push(tag.clone());
            }
        }
        topics
    }

    /// Convert a GitLab project, or `None` if it is not managed here.
    fn to_project(&self, project: GitLabProject) -> Option<Project> {
        if !project.topics.contains(&self.project_tag) {
            return None;
        }
        let embedded = self.embedded_topic();
        let project_type = if project.topics.contains(&embedded) {
            ProjectType::Embedded
        } else {
            ProjectType::Managed
        };
        let tags = project
            .topics
            .into_iter()
            .filter(|t| *t != self.project_tag && *t != embedded)
            .collect();
        Some(Project {
            project_id: ProjectId::new(project.id.to_string()).ok()?,
            name: project.name,
            description: project.description.unwrap_or_default(),
            tags,
            project_type,
            web_url: project.web_url,
            default_branch: project
                .default_branch
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    /// Build URL for a project endpoint.
    fn project_url(&self, project: &ProjectId, path: &str) -> String {
        let base = format!("{}/projects/{}", self.api_base, encode(project.as_str()));
        if path.is_empty() {
            base
        } else {
            format!("{base}/{path}")
        }
    }

    /// Build common headers for API requests (async to allow token refresh).
    async fn headers(&self) -> Result<HeaderMap, StoreError> {
        let token = self.provider.bearer_token().await.map_err(auth_error)?;
        let (name, value) = auth_header(self.provider.token_kind(), &token).map_err(auth_error)?;
        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        Ok(headers)
    }

    /// Send a request, retrying once with a refreshed token after a 401.
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = build(&self.client)
            .headers(self.headers().await?)
            .send()
            .await
            .map_err(network_error)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match self.provider.refresh().await {
            Ok(true) => {
                debug!("retrying GitLab request with refreshed token");
                build(&self.client)
                    .headers(self.headers().await?)
                    .send()
                    .await
                    .map_err(network_error)
            }
            Ok(false) => Ok(response),
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                Err(auth_error(e))
            }
        }
    }

    /// Handle API response, mapping errors appropriately.
    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| StoreError::Api {
                status: status.as_u16(),
                message: format!("failed to parse response: {e}"),
            })
        } else {
            Self::handle_error_response(response, status).await
        }
    }

    /// Handle an error response from the API.
    async fn handle_error_response<T>(response: Response, status: StatusCode) -> Result<T, StoreError> {
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, error_message(&body)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, StoreError> {
        let response = self.send(|c| c.get(url).query(query)).await?;
        Self::handle_response(response).await
    }

    /// Like [`Self::get_json`], with 404 mapped to `None`.
    async fn get_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        match self.get_json(url, query).await {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch every page of a list endpoint, stopping early at `limit` items.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        limit: Option<usize>,
    ) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let mut params = query.to_vec();
            params.push(("per_page", PER_PAGE.to_string()));
            params.push(("page", page.to_string()));
            let batch: Vec<T> = self.get_json(url, &params).await?;
            let last = batch.len() < PER_PAGE;
            items.extend(batch);
            if last || limit.is_some_and(|l| items.len() >= l) {
                break;
            }
            page += 1;
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, StoreError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(|c| c.post(url).json(body)).await?;
        Self::handle_response(response).await
    }

    async fn put_json<B, T>(&self, url: &str, body: &B) -> Result<T, StoreError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(|c| c.put(url).json(body)).await?;
        Self::handle_response(response).await
    }

    async fn delete(&self, url: &str) -> Result<(), StoreError> {
        let response = self.send(|c| c.delete(url)).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Self::handle_error_response(response, status).await
        }
    }

    async fn fetch_project(&self, project: &ProjectId) -> Result<Project, StoreError> {
        let raw: GitLabProject = self.get_json(&self.project_url(project, ""), &[]).await?;
        self.to_project(raw)
            .ok_or_else(|| StoreError::NotFound(format!("project {project}")))
    }

    fn merge_request_url(&self, project: &ProjectId, id: &str, suffix: &str) -> String {
        let path = format!("merge_requests/{}{suffix}", encode(id));
        self.project_url(project, &path)
    }
}

#[async_trait]
impl ProjectStore for GitLabStore {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    // =========================================================================
    // Users
    // =========================================================================

    async fn current_user(&self) -> Result<User, StoreError> {
        Ok(self.user.clone())
    }

    async fn list_users(&self, search: Option<&str>) -> Result<Vec<User>, StoreError> {
        let mut query = vec![("active", "true".to_string())];
        if let Some(term) = search {
            query.push(("search", term.to_string()));
        }
        let users: Vec<GitLabUser> = self.get_paged(&self.url("users"), &query, None).await?;
        Ok(users.into_iter().filter_map(GitLabUser::into_user).collect())
    }

    // =========================================================================
    // Projects
    // =========================================================================

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let mut query = vec![
            ("topic", self.project_tag.clone()),
            ("membership", "true".to_string()),
            ("order_by", "name".to_string()),
            ("sort", "asc".to_string()),
        ];
        if let Some(term) = &filter.search {
            query.push(("search", term.clone()));
        }
        let raw: Vec<GitLabProject> = self.get_paged(&self.url("projects"), &query, None).await?;
        let mut projects: Vec<Project> = raw
            .into_iter()
            .filter_map(|p| self.to_project(p))
            .filter(|p| filter.matches(p))
            .collect();
        if let Some(limit) = filter.limit {
            projects.truncate(limit);
        }
        Ok(projects)
    }

    async fn get_project(&self, project: &ProjectId) -> Result<Project, StoreError> {
        self.fetch_project(project).await
    }

    async fn create_project(&self, request: &NewProject) -> Result<Project, StoreError> {
        let body = CreateProjectBody {
            name: &request.name,
            description: &request.description,
            topics: self.topics(request.project_type, &request.tags),
            default_branch: DEFAULT_BRANCH,
            initialize_with_readme: false,
        };
        let raw: GitLabProject = self.post_json(&self.url("projects"), &body).await?;
        let project = self
            .to_project(raw)
            .ok_or_else(|| StoreError::Internal("created project lacks the project tag".into()))?;
        debug!(project = %project.project_id, "created GitLab project");
        Ok(project)
    }

    async fn update_project(
        &self,
        project: &ProjectId,
        update: &ProjectUpdate,
    ) -> Result<Project, StoreError> {
        let current = self.fetch_project(project).await?;
        let body = UpdateProjectBody {
            name: update.name.as_deref(),
            description: update.description.as_deref(),
            topics: update
                .tags
                .as_ref()
                .map(|tags| self.topics(current.project_type, tags)),
        };
        let raw: GitLabProject = self.put_json(&self.project_url(project, ""), &body).await?;
        self.to_project(raw)
            .ok_or_else(|| StoreError::NotFound(format!("project {project}")))
    }

    async fn delete_project(&self, project: &ProjectId) -> Result<(), StoreError> {
        self.fetch_project(project).await?;
        self.delete(&self.project_url(project, "")).await
    }

    // =========================================================================
    // Branches
    // =========================================================================

    async fn list_branches(
        &self,
        project: &ProjectId,
        prefix: &str,
    ) -> Result<Vec<Branch>, StoreError> {
        let query = vec![("search", format!("^{prefix}"))];
        let raw: Vec<GitLabBranch> = self
            .get_paged(&self.project_url(project, "repository/branches"), &query, None)
            .await?;
        let mut branches: Vec<Branch> = raw
            .into_iter()
            .filter(|b| b.name.starts_with(prefix))
            .map(|b| Branch {
                name: b.name,
                head: b.commit.id,
            })
            .collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    async fn branch_head(
        &self,
        project: &ProjectId,
        branch: &str,
    ) -> Result<Option<Oid>, StoreError> {
        let url = self.project_url(project, &format!("repository/branches/{}", encode(branch)));
        let branch: Option<GitLabBranch> = self.get_optional(&url, &[]).await?;
        Ok(branch.map(|b| b.commit.id))
    }

    async fn create_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        at: &Oid,
    ) -> Result<(), StoreError> {
        let url = self.project_url(project, "repository/branches");
        let query = [("branch", branch.to_string()), ("ref", at.to_string())];
        let response = self.send(|c| c.post(&url).query(&query)).await?;
        let _: GitLabBranch = Self::handle_response(response).await?;
        Ok(())
    }

    async fn delete_branch(&self, project: &ProjectId, branch: &str) -> Result<(), StoreError> {
        let url = self.project_url(project, &format!("repository/branches/{}", encode(branch)));
        self.delete(&url).await
    }

    async fn reset_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        to: &Oid,
        expected: &Oid,
    ) -> Result<(), StoreError> {
        let current = self
            .branch_head(project, branch)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("branch {branch}")))?;
        if &current != expected {
            return Err(StoreError::Conflict(format!(
                "branch {branch} is at {current}, expected {expected}"
            )));
        }
        if &current == to {
            return Ok(());
        }
        self.delete_branch(project, branch).await?;
        self.create_branch(project, branch, to).await
    }

    // =========================================================================
    // Content
    // =========================================================================

    async fn list_files(
        &self,
        project: &ProjectId,
        revision: &Oid,
        dir: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut query = vec![
            ("ref", revision.to_string()),
            ("recursive", "true".to_string()),
        ];
        let dir = dir.trim_end_matches('/');
        if !dir.is_empty() {
            query.push(("path", dir.to_string()));
        }
        let url = self.project_url(project, "repository/tree");
        let entries: Vec<GitLabTreeEntry> = match self.get_paged(&url, &query, None).await {
            Ok(entries) => entries,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut files: Vec<String> = entries
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect();
        files.sort();
        Ok(files)
    }

    async fn read_file(
        &self,
        project: &ProjectId,
        revision: &Oid,
        path: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let url = self.project_url(project, &format!("repository/files/{}/raw", encode(path)));
        let query = [("ref", revision.to_string())];
        let response = self.send(|c| c.get(&url).query(&query)).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Self::handle_error_response(response, status).await;
        }
        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(Some(bytes.to_vec()))
    }

    async fn commit(
        &self,
        project: &ProjectId,
        request: CommitRequest,
    ) -> Result<Revision, StoreError> {
        let CommitRequest {
            branch,
            expected_head,
            start_point,
            message,
            changes,
        } = request;

        if let Some(expected) = &expected_head {
            let current = self.branch_head(project, &branch).await?;
            if current.as_ref() != Some(expected) {
                return Err(StoreError::Conflict(format!(
                    "branch {branch} moved, expected {expected}"
                )));
            }
        }

        let actions = changes
            .into_iter()
            .map(commit_action)
            .collect::<Result<Vec<_>, _>>()?;
        let body = CommitBody {
            branch: &branch,
            commit_message: &message,
            actions,
            start_sha: start_point.as_ref().map(Oid::as_str),
            force: start_point.as_ref().map(|_| true),
        };
        let commit: GitLabCommit = self
            .post_json(&self.project_url(project, "repository/commits"), &body)
            .await?;
        debug!(project = %project, branch = %branch, commit = %commit.id, "committed");
        Ok(commit.into())
    }

    // =========================================================================
    // History
    // =========================================================================

    async fn get_revision(
        &self,
        project: &ProjectId,
        revision: &Oid,
    ) -> Result<Revision, StoreError> {
        let url = self.project_url(project, &format!("repository/commits/{revision}"));
        let commit: GitLabCommit = self.get_json(&url, &[]).await?;
        Ok(commit.into())
    }

    async fn revision_parents(
        &self,
        project: &ProjectId,
        revision: &Oid,
    ) -> Result<Vec<Oid>, StoreError> {
        let url = self.project_url(project, &format!("repository/commits/{revision}"));
        let commit: GitLabCommit = self.get_json(&url, &[]).await?;
        Ok(commit.parent_ids)
    }

    async fn list_revisions(
        &self,
        project: &ProjectId,
        from: &Oid,
        path: Option<&str>,
        query: &RevisionQuery,
    ) -> Result<Vec<Revision>, StoreError> {
        let mut params = vec![("ref_name", from.to_string())];
        if let Some(path) = path {
            params.push(("path", path.to_string()));
        }
        if let Some(since) = query.since {
            params.push(("since", since.to_rfc3339()));
        }
        if let Some(until) = query.until {
            params.push(("until", until.to_rfc3339()));
        }
        let url = self.project_url(project, "repository/commits");
        let commits: Vec<GitLabCommit> = self.get_paged(&url, &params, query.limit).await?;
        Ok(commits
            .into_iter()
            .map(Revision::from)
            .filter(|r| query.contains(&r.committed_timestamp))
            .collect())
    }

    async fn merge_base(
        &self,
        project: &ProjectId,
        a: &Oid,
        b: &Oid,
    ) -> Result<Option<Oid>, StoreError> {
        let url = self.project_url(project, "repository/merge_base");
        let query = [("refs[]", a.to_string()), ("refs[]", b.to_string())];
        match self.get_json::<GitLabCommitRef>(&url, &query).await {
            Ok(commit) => Ok(Some(commit.id)),
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidRequest(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn diff(
        &self,
        project: &ProjectId,
        from: &Oid,
        to: &Oid,
    ) -> Result<Vec<FileDiff>, StoreError> {
        let url = self.project_url(project, "repository/compare");
        let query = [
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("straight", "true".to_string()),
        ];
        let compare: GitLabCompare = self.get_json(&url, &query).await?;
        Ok(compare.diffs.into_iter().map(FileDiff::from).collect())
    }

    // =========================================================================
    // Merge requests
    // =========================================================================

    async fn list_merge_requests(
        &self,
        project: &ProjectId,
        query: &MergeRequestQuery,
    ) -> Result<Vec<MergeRequest>, StoreError> {
        let state = query.state.map_or("all", gitlab_state);
        let mut params = vec![("state", state.to_string())];
        if let Some(source) = &query.source_branch {
            params.push(("source_branch", source.clone()));
        }
        if let Some(target) = &query.target_branch {
            params.push(("target_branch", target.clone()));
        }
        if let Some(after) = query.updated_after {
            params.push(("updated_after", after.to_rfc3339()));
        }
        if let Some(before) = query.updated_before {
            params.push(("updated_before", before.to_rfc3339()));
        }
        let url = self.project_url(project, "merge_requests");
        let raw: Vec<GitLabMergeRequest> = self.get_paged(&url, &params, None).await?;
        Ok(raw
            .into_iter()
            .map(MergeRequest::from)
            .filter(|mr| query.matches(mr))
            .collect())
    }

    async fn get_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<MergeRequest, StoreError> {
        let raw: GitLabMergeRequest = self
            .get_json(&self.merge_request_url(project, id, ""), &[])
            .await?;
        Ok(raw.into())
    }

    async fn create_merge_request(
        &self,
        project: &ProjectId,
        request: &NewMergeRequest,
    ) -> Result<MergeRequest, StoreError> {
        let body = MergeRequestBody {
            source_branch: &request.source_branch,
            target_branch: &request.target_branch,
            title: &request.title,
            description: &request.description,
            labels: request.labels.join(","),
            remove_source_branch: true,
        };
        let raw: GitLabMergeRequest = self
            .post_json(&self.project_url(project, "merge_requests"), &body)
            .await?;
        Ok(raw.into())
    }

    async fn update_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
        update: &MergeRequestUpdate,
    ) -> Result<MergeRequest, StoreError> {
        let body = MergeRequestUpdateBody {
            title: update.title.as_deref(),
            description: update.description.as_deref(),
            labels: update.labels.as_ref().map(|l| l.join(",")),
            state_event: update.state_event.map(|e| e.as_str()),
        };
        let raw: GitLabMergeRequest = self
            .put_json(&self.merge_request_url(project, id, ""), &body)
            .await?;
        Ok(raw.into())
    }

    async fn merge_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
        message: &str,
        expected_source_head: &Oid,
    ) -> Result<MergeRequest, StoreError> {
        let body = MergeBody {
            merge_commit_message: message,
            sha: expected_source_head.as_str(),
            should_remove_source_branch: true,
        };
        let raw: GitLabMergeRequest = self
            .put_json(&self.merge_request_url(project, id, "/merge"), &body)
            .await?;
        Ok(raw.into())
    }

    async fn approve_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<(), StoreError> {
        let url = self.merge_request_url(project, id, "/approve");
        let _: Value = self.post_json(&url, &serde_json::json!({})).await?;
        Ok(())
    }

    async fn unapprove_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<(), StoreError> {
        let url = self.merge_request_url(project, id, "/unapprove");
        // GitLab answers 404 when the caller had not approved
        match self.post_json::<_, Value>(&url, &serde_json::json!({})).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn merge_request_approvers(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<Vec<User>, StoreError> {
        let approvals: GitLabApprovals = self
            .get_json(&self.merge_request_url(project, id, "/approvals"), &[])
            .await?;
        Ok(approvals
            .approved_by
            .into_iter()
            .filter_map(|a| a.user.into_user())
            .collect())
    }

    // =========================================================================
    // Tags
    // =========================================================================

    async fn list_tags(&self, project: &ProjectId, prefix: &str) -> Result<Vec<Tag>, StoreError> {
        let query = vec![("search", format!("^{prefix}"))];
        let raw: Vec<GitLabTag> = self
            .get_paged(&self.project_url(project, "repository/tags"), &query, None)
            .await?;
        let mut tags: Vec<Tag> = raw
            .into_iter()
            .filter(|t| t.name.starts_with(prefix))
            .map(Tag::from)
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn create_tag(
        &self,
        project: &ProjectId,
        name: &str,
        target: &Oid,
        message: &str,
    ) -> Result<Tag, StoreError> {
        let body = CreateTagBody {
            tag_name: name,
            target: target.as_str(),
            message,
        };
        let raw: GitLabTag = self
            .post_json(&self.project_url(project, "repository/tags"), &body)
            .await?;
        Ok(raw.into())
    }
}
