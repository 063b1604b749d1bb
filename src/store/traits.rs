//! store::traits
//!
//! The `ProjectStore` trait: Git-level primitives every backend provides.
//!
//! # Design
//!
//! The trait is async because backend operations involve network I/O
//! (GitLab) or blocking repository access (filesystem, run off the runtime).
//! A store instance is bound to one caller, so implementations attribute
//! commits, merge requests and approvals to that caller.
//!
//! The service layer composes these primitives into workspace, review,
//! version and patch semantics; stores know nothing about workspaces.
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::store::{ProjectStore, CommitRequest, FileChange};
//!
//! async fn touch(store: &dyn ProjectStore, project: &ProjectId) -> Result<(), StoreError> {
//!     let head = store.branch_head(project, "master").await?;
//!     store.commit(project, CommitRequest {
//!         branch: "master".to_string(),
//!         expected_head: head,
//!         start_point: None,
//!         message: "touch".to_string(),
//!         changes: vec![FileChange::Create {
//!             path: "notes.txt".to_string(),
//!             content: b"hello".to_vec(),
//!         }],
//!     }).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::model::{
    NewProject, Project, ProjectFilter, ProjectUpdate, ReviewState, Revision, RevisionQuery, User,
};
use crate::core::types::{Oid, ProjectId};
use crate::git::GitError;

/// Errors from store operations.
///
/// These map to common failure modes of both backends.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource to create already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A precondition failed (stale head, merge conflict, wrong state).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication is required but not available.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication failed (invalid token, expired, insufficient permissions).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The operation is not supported by this backend.
    #[error("not supported: {0}")]
    Unsupported(String),

    /// Network or connection error.
    #[error("network error: {0}")]
    Network(String),

    /// The upstream API returned an error.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Repository access failed.
    #[error("git error: {0}")]
    Git(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GitError> for StoreError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::RefNotFound { refname } => StoreError::NotFound(refname),
            GitError::ObjectNotFound { oid } => StoreError::NotFound(oid),
            GitError::AlreadyExists { name } => StoreError::AlreadyExists(name),
            err @ (GitError::CasFailed { .. } | GitError::MergeConflict { .. }) => {
                StoreError::Conflict(err.to_string())
            }
            err @ (GitError::InvalidOid { .. } | GitError::InvalidRefName { .. }) => {
                StoreError::InvalidRequest(err.to_string())
            }
            err => StoreError::Git(err.to_string()),
        }
    }
}

// =============================================================================
// Branches and content
// =============================================================================

/// A branch and the commit it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub head: Oid,
}

/// A file-level change in a commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    /// Add a file that must not exist yet.
    Create { path: String, content: Vec<u8> },
    /// Replace the content of an existing file.
    Update { path: String, content: Vec<u8> },
    /// Remove an existing file.
    Delete { path: String },
    /// Move a file, optionally replacing its content.
    Move {
        from: String,
        to: String,
        content: Option<Vec<u8>>,
    },
}

impl FileChange {
    /// Path the change writes to or removes.
    pub fn path(&self) -> &str {
        match self {
            FileChange::Create { path, .. }
            | FileChange::Update { path, .. }
            | FileChange::Delete { path } => path,
            FileChange::Move { to, .. } => to,
        }
    }
}

/// Request to commit file changes to a branch.
///
/// Without a start point the commit's parent is the branch head (the branch
/// is created by a root commit when it does not exist yet). With a start
/// point the commit's parent is that commit and the branch is moved to the
/// new commit whatever it pointed to, subject to `expected_head`.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub branch: String,
    /// Required current head of the branch; `None` skips the check.
    pub expected_head: Option<Oid>,
    pub start_point: Option<Oid>,
    pub message: String,
    pub changes: Vec<FileChange>,
}

/// Kind of a file-level difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDiffKind {
    Added,
    Deleted,
    Modified,
    Renamed,
}

/// One file-level difference between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub kind: FileDiffKind,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
}

impl FileDiff {
    /// Paths touched by this difference.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.old_path
            .as_deref()
            .into_iter()
            .chain(self.new_path.as_deref())
    }
}

// =============================================================================
// Merge requests and tags
// =============================================================================

/// A merge request between two branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub author: Option<User>,
    pub state: ReviewState,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit: Option<Oid>,
    pub web_url: Option<String>,
}

/// Request to open a merge request.
#[derive(Debug, Clone)]
pub struct NewMergeRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
}

/// State transition for a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRequestStateEvent {
    Close,
    Reopen,
}

impl MergeRequestStateEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeRequestStateEvent::Close => "close",
            MergeRequestStateEvent::Reopen => "reopen",
        }
    }
}

/// Partial update of a merge request.
#[derive(Debug, Clone, Default)]
pub struct MergeRequestUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub state_event: Option<MergeRequestStateEvent>,
}

/// Merge request listing filter.
#[derive(Debug, Clone, Default)]
pub struct MergeRequestQuery {
    pub state: Option<ReviewState>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl MergeRequestQuery {
    pub fn matches(&self, mr: &MergeRequest) -> bool {
        let updated = mr.updated_at.unwrap_or(mr.created_at);
        self.state.is_none_or(|s| s == mr.state)
            && self
                .source_branch
                .as_deref()
                .is_none_or(|b| b == mr.source_branch)
            && self
                .target_branch
                .as_deref()
                .is_none_or(|b| b == mr.target_branch)
            && self.updated_after.is_none_or(|t| updated >= t)
            && self.updated_before.is_none_or(|t| updated <= t)
    }
}

/// A tag and the commit it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub target: Oid,
    pub message: Option<String>,
}

/// Git-level operations against one backend, bound to one caller.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// All methods return `Result<T, StoreError>`. Callers should handle:
/// - `AuthRequired` / `AuthFailed`: ask the user to authenticate
/// - `NotFound`: resource doesn't exist
/// - `Conflict`: a head moved or a merge did not apply; re-read and retry
/// - `Api` / `Network`: upstream trouble, reported as a gateway error
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Backend name (e.g., "filesystem", "gitlab").
    fn name(&self) -> &'static str;

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    /// The user this store acts for.
    async fn current_user(&self) -> Result<User, StoreError>;

    /// Users known to the backend, optionally filtered by a search term.
    async fn list_users(&self, search: Option<&str>) -> Result<Vec<User>, StoreError>;

    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError>;

    /// # Errors
    ///
    /// - `NotFound` if the project doesn't exist
    async fn get_project(&self, project: &ProjectId) -> Result<Project, StoreError>;

    /// Create an empty project repository; the default branch does not exist
    /// until the first commit.
    async fn create_project(&self, request: &NewProject) -> Result<Project, StoreError>;

    async fn update_project(
        &self,
        project: &ProjectId,
        update: &ProjectUpdate,
    ) -> Result<Project, StoreError>;

    async fn delete_project(&self, project: &ProjectId) -> Result<(), StoreError>;

    // -------------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------------

    /// Branches whose names start with `prefix`, sorted by name.
    async fn list_branches(
        &self,
        project: &ProjectId,
        prefix: &str,
    ) -> Result<Vec<Branch>, StoreError>;

    /// Head of a branch, or `None` if it doesn't exist.
    async fn branch_head(&self, project: &ProjectId, branch: &str)
        -> Result<Option<Oid>, StoreError>;

    /// # Errors
    ///
    /// - `AlreadyExists` if the branch exists
    async fn create_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        at: &Oid,
    ) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// - `NotFound` if the branch doesn't exist
    async fn delete_branch(&self, project: &ProjectId, branch: &str) -> Result<(), StoreError>;

    /// Move a branch to `to` if it still points to `expected`.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the branch moved
    async fn reset_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        to: &Oid,
        expected: &Oid,
    ) -> Result<(), StoreError>;

    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------

    /// Paths of all files under `dir` at `revision`, recursively.
    async fn list_files(
        &self,
        project: &ProjectId,
        revision: &Oid,
        dir: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Content of the file at `path`, or `None` if there is no such file.
    async fn read_file(
        &self,
        project: &ProjectId,
        revision: &Oid,
        path: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Commit file changes; returns the new commit.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the branch head differs from `expected_head`
    /// - `InvalidRequest` if a change doesn't apply (missing or existing file)
    async fn commit(
        &self,
        project: &ProjectId,
        request: CommitRequest,
    ) -> Result<Revision, StoreError>;

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// # Errors
    ///
    /// - `NotFound` if the commit doesn't exist
    async fn get_revision(&self, project: &ProjectId, revision: &Oid)
        -> Result<Revision, StoreError>;

    /// Parents of a commit, first parent first.
    async fn revision_parents(
        &self,
        project: &ProjectId,
        revision: &Oid,
    ) -> Result<Vec<Oid>, StoreError>;

    /// Commits reachable from `from`, newest first, optionally restricted to
    /// those touching `path`.
    async fn list_revisions(
        &self,
        project: &ProjectId,
        from: &Oid,
        path: Option<&str>,
        query: &RevisionQuery,
    ) -> Result<Vec<Revision>, StoreError>;

    async fn merge_base(
        &self,
        project: &ProjectId,
        a: &Oid,
        b: &Oid,
    ) -> Result<Option<Oid>, StoreError>;

    /// File differences between two commits, renames detected.
    async fn diff(
        &self,
        project: &ProjectId,
        from: &Oid,
        to: &Oid,
    ) -> Result<Vec<FileDiff>, StoreError>;

    // -------------------------------------------------------------------------
    // Merge requests
    // -------------------------------------------------------------------------

    async fn list_merge_requests(
        &self,
        project: &ProjectId,
        query: &MergeRequestQuery,
    ) -> Result<Vec<MergeRequest>, StoreError>;

    async fn get_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<MergeRequest, StoreError>;

    async fn create_merge_request(
        &self,
        project: &ProjectId,
        request: &NewMergeRequest,
    ) -> Result<MergeRequest, StoreError>;

    async fn update_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
        update: &MergeRequestUpdate,
    ) -> Result<MergeRequest, StoreError>;

    /// Merge into the target branch and delete the source branch.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the source head differs from `expected_source_head`
    ///   or the merge does not apply cleanly
    async fn merge_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
        message: &str,
        expected_source_head: &Oid,
    ) -> Result<MergeRequest, StoreError>;

    async fn approve_merge_request(&self, project: &ProjectId, id: &str)
        -> Result<(), StoreError>;

    async fn unapprove_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<(), StoreError>;

    async fn merge_request_approvers(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<Vec<User>, StoreError>;

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    /// Tags whose names start with `prefix`.
    async fn list_tags(&self, project: &ProjectId, prefix: &str) -> Result<Vec<Tag>, StoreError>;

    /// # Errors
    ///
    /// - `AlreadyExists` if the tag exists
    async fn create_tag(
        &self,
        project: &ProjectId,
        name: &str,
        target: &Oid,
        message: &str,
    ) -> Result<Tag, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mr(state: ReviewState, source: &str) -> MergeRequest {
        MergeRequest {
            id: "1".into(),
            source_branch: source.into(),
            target_branch: "master".into(),
            title: "t".into(),
            description: String::new(),
            labels: vec![],
            author: None,
            state,
            created_at: DateTime::from_timestamp(1_000, 0).unwrap(),
            updated_at: None,
            closed_at: None,
            merged_at: None,
            merge_commit: None,
            web_url: None,
        }
    }

    #[test]
    fn merge_request_query() {
        let open = mr(ReviewState::Open, "workspace/a/w");
        assert!(MergeRequestQuery::default().matches(&open));

        let query = MergeRequestQuery {
            state: Some(ReviewState::Closed),
            ..Default::default()
        };
        assert!(!query.matches(&open));

        let query = MergeRequestQuery {
            source_branch: Some("workspace/a/w".into()),
            updated_after: DateTime::from_timestamp(500, 0),
            ..Default::default()
        };
        assert!(query.matches(&open));

        let query = MergeRequestQuery {
            updated_before: DateTime::from_timestamp(500, 0),
            ..Default::default()
        };
        assert!(!query.matches(&open));
    }

    #[test]
    fn git_errors_map_to_store_errors() {
        let err: StoreError = GitError::RefNotFound {
            refname: "refs/heads/x".into(),
        }
        .into();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err: StoreError = GitError::CasFailed {
            refname: "refs/heads/x".into(),
            expected: "a".into(),
            actual: "b".into(),
        }
        .into();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err: StoreError = GitError::MergeConflict {
            paths: vec!["f".into()],
        }
        .into();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn file_change_target_path() {
        let change = FileChange::Move {
            from: "a".into(),
            to: "b".into(),
            content: None,
        };
        assert_eq!(change.path(), "b");
        let diff = FileDiff {
            kind: FileDiffKind::Renamed,
            old_path: Some("a".into()),
            new_path: Some("b".into()),
        };
        assert_eq!(diff.paths().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn store_error_display() {
        assert_eq!(
            StoreError::Api {
                status: 502,
                message: "bad gateway".into()
            }
            .to_string(),
            "API error: 502 - bad gateway"
        );
        assert_eq!(StoreError::AuthRequired.to_string(), "authentication required");
    }
}
