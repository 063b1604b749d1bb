//! store::filesystem
//!
//! Project store over bare Git repositories on the local filesystem.
//!
//! # Layout
//!
//! The configured root holds one bare repository per project, named
//! `<projectId>.git`. Besides ordinary branches and tags, each repository
//! carries JSON blobs behind private refs:
//!
//! - `refs/sdlc/project`: project name, description, tags and type
//! - `refs/sdlc/reviews/<n>`: one record per merge request
//!
//! Every ref write goes through the CAS operations of [`crate::git::Git`],
//! so two requests racing on the same branch or record cannot both win.
//!
//! All git2 work runs on the blocking thread pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::traits::{
    Branch, CommitRequest, FileChange, FileDiff, FileDiffKind, MergeRequest, MergeRequestQuery,
    MergeRequestStateEvent, MergeRequestUpdate, NewMergeRequest, ProjectStore, StoreError, Tag,
};
use crate::core::model::{
    NewProject, Project, ProjectFilter, ProjectType, ProjectUpdate, ReviewState, Revision,
    RevisionQuery, User,
};
use crate::core::types::{BranchName, Oid, ProjectId, RefName, UserId};
use crate::core::workspace::{WorkspaceSpecification, DEFAULT_BRANCH};
use crate::git::{CommitAuthor, CommitInfo, DeltaKind, Git, GitError, TreeChange};

/// Ref holding the project metadata blob.
const PROJECT_REF: &str = "refs/sdlc/project";

/// Namespace of merge request records.
const REVIEW_REF_PREFIX: &str = "refs/sdlc/reviews/";

/// Attempts at allocating a merge request id before giving up.
const MAX_ID_ATTEMPTS: usize = 5;

/// Email domain for commit signatures.
const EMAIL_DOMAIN: &str = "sdlc.local";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectRecord {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    project_type: ProjectType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRecord {
    id: u64,
    source_branch: String,
    target_branch: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: Vec<String>,
    author: User,
    state: ReviewState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    merge_commit: Option<Oid>,
    #[serde(default)]
    approvers: Vec<User>,
}

impl ReviewRecord {
    fn to_merge_request(&self) -> MergeRequest {
        MergeRequest {
            id: self.id.to_string(),
            source_branch: self.source_branch.clone(),
            target_branch: self.target_branch.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            labels: self.labels.clone(),
            author: Some(self.author.clone()),
            state: self.state,
            created_at: self.created_at,
            updated_at: Some(self.updated_at),
            closed_at: self.closed_at,
            merged_at: self.merged_at,
            merge_commit: self.merge_commit.clone(),
            web_url: None,
        }
    }
}

/// Project store over local bare repositories, acting for one user.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
    user: User,
}

impl FileSystemStore {
    /// Create a store rooted at `root`, acting for `user`.
    pub fn new(root: impl Into<PathBuf>, user: User) -> Self {
        Self {
            root: root.into(),
            user,
        }
    }

    /// Directory holding the project repositories.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo_path(&self, project: &ProjectId) -> PathBuf {
        self.root.join(format!("{project}.git"))
    }

    fn author(&self) -> CommitAuthor {
        CommitAuthor::new(
            self.user.name.clone(),
            format!("{}@{EMAIL_DOMAIN}", self.user.user_id),
        )
    }

    async fn blocking<T, F>(f: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StoreError::Internal(format!("blocking task failed: {e}")))?
    }

    /// Run `f` against the project's repository on the blocking pool.
    async fn with_repo<T, F>(&self, project: &ProjectId, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Git) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.repo_path(project);
        let project = project.clone();
        Self::blocking(move || {
            let git = open_project(&path, &project)?;
            f(&git)
        })
        .await
    }
}

// =============================================================================
// Blocking helpers
// =============================================================================

fn open_project(path: &Path, project: &ProjectId) -> Result<Git, StoreError> {
    if !path.is_dir() {
        return Err(StoreError::NotFound(format!("project {project}")));
    }
    Git::open(path).map_err(|e| match e {
        GitError::NotARepo { .. } => StoreError::NotFound(format!("project {project}")),
        other => other.into(),
    })
}

fn branch_ref(branch: &str) -> Result<String, StoreError> {
    let branch = BranchName::new(branch).map_err(|e| StoreError::InvalidRequest(e.to_string()))?;
    Ok(RefName::for_branch(&branch).to_string())
}

fn read_json_ref<T: serde::de::DeserializeOwned>(
    git: &Git,
    refname: &str,
) -> Result<Option<(T, Oid)>, StoreError> {
    let Some(blob) = git.try_resolve_ref_to_object(refname)? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(&git.read_blob(&blob)?)
        .map_err(|e| StoreError::Internal(format!("corrupt record {refname}: {e}")))?;
    Ok(Some((value, blob)))
}

fn write_json_ref<T: Serialize>(
    git: &Git,
    refname: &str,
    value: &T,
    expected: Option<&Oid>,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| StoreError::Internal(format!("cannot encode {refname}: {e}")))?;
    let blob = git.write_blob(&bytes)?;
    git.update_ref_cas(refname, &blob, expected, "sdlc: update record")?;
    Ok(())
}

fn read_project(git: &Git, id: &ProjectId) -> Result<(Project, Oid), StoreError> {
    let (record, blob): (ProjectRecord, Oid) = read_json_ref(git, PROJECT_REF)?
        .ok_or_else(|| StoreError::NotFound(format!("project {id} has no metadata")))?;
    let project = Project {
        project_id: id.clone(),
        name: record.name,
        description: record.description,
        tags: record.tags,
        project_type: record.project_type,
        web_url: None,
        default_branch: DEFAULT_BRANCH.to_string(),
    };
    Ok((project, blob))
}

fn review_ref(id: &str) -> Result<String, StoreError> {
    let n: u64 = id
        .parse()
        .map_err(|_| StoreError::NotFound(format!("review {id}")))?;
    Ok(format!("{REVIEW_REF_PREFIX}{n}"))
}

fn read_review(git: &Git, id: &str) -> Result<(ReviewRecord, Oid), StoreError> {
    read_json_ref(git, &review_ref(id)?)?.ok_or_else(|| StoreError::NotFound(format!("review {id}")))
}

fn list_reviews(git: &Git) -> Result<Vec<ReviewRecord>, StoreError> {
    let mut records = Vec::new();
    for entry in git.list_refs_by_prefix(REVIEW_REF_PREFIX)? {
        let value = git.read_blob(&entry.oid)?;
        let record: ReviewRecord = serde_json::from_slice(&value)
            .map_err(|e| StoreError::Internal(format!("corrupt record {}: {e}", entry.name)))?;
        records.push(record);
    }
    records.sort_by_key(|r| r.id);
    Ok(records)
}

fn to_revision(info: CommitInfo) -> Revision {
    Revision {
        id: info.oid,
        author_name: info.author_name,
        authored_timestamp: info.author_time,
        committer_name: info.committer_name,
        committed_timestamp: info.committer_time,
        message: info.message.trim_end().to_string(),
    }
}

fn file_exists(git: &Git, parent: Option<&Oid>, path: &str) -> Result<bool, StoreError> {
    match parent {
        Some(commit) => Ok(git.read_file(commit, path)?.is_some()),
        None => Ok(false),
    }
}

/// Translate file changes into tree changes, checking each against `parent`.
fn tree_changes(
    git: &Git,
    parent: Option<&Oid>,
    changes: Vec<FileChange>,
) -> Result<Vec<TreeChange>, StoreError> {
    let mut result = Vec::with_capacity(changes.len());
    for change in changes {
        match change {
            FileChange::Create { path, content } => {
                if file_exists(git, parent, &path)? {
                    return Err(StoreError::InvalidRequest(format!("file {path} already exists")));
                }
                result.push(TreeChange::upsert(path, content));
            }
            FileChange::Update { path, content } => {
                if !file_exists(git, parent, &path)? {
                    return Err(StoreError::InvalidRequest(format!("file {path} does not exist")));
                }
                result.push(TreeChange::upsert(path, content));
            }
            FileChange::Delete { path } => {
                if !file_exists(git, parent, &path)? {
                    return Err(StoreError::InvalidRequest(format!("file {path} does not exist")));
                }
                result.push(TreeChange::remove(path));
            }
            FileChange::Move { from, to, content } => {
                let existing = match parent {
                    Some(commit) => git.read_file(commit, &from)?,
                    None => None,
                };
                let Some(existing) = existing else {
                    return Err(StoreError::InvalidRequest(format!("file {from} does not exist")));
                };
                if file_exists(git, parent, &to)? {
                    return Err(StoreError::InvalidRequest(format!("file {to} already exists")));
                }
                result.push(TreeChange::remove(from));
                result.push(TreeChange::upsert(to, content.unwrap_or(existing)));
            }
        }
    }
    Ok(result)
}

fn commit_blocking(
    git: &Git,
    author: &CommitAuthor,
    request: CommitRequest,
) -> Result<Oid, StoreError> {
    let refname = branch_ref(&request.branch)?;
    let current = git.try_resolve_ref(&refname)?;

    if let Some(expected) = &request.expected_head {
        if current.as_ref() != Some(expected) {
            return Err(StoreError::Conflict(format!(
                "branch {} is at {}, expected {}",
                request.branch,
                current.as_ref().map_or("<none>".to_string(), |c| c.to_string()),
                expected
            )));
        }
    }

    let parent = request.start_point.clone().or_else(|| current.clone());
    let changes = tree_changes(git, parent.as_ref(), request.changes)?;
    let commit = git.commit_changes(parent.as_ref(), &changes, &request.message, author)?;
    git.update_ref_cas(&refname, &commit, current.as_ref(), "sdlc: commit")?;
    Ok(commit)
}

/// Allocate the next merge request id and store `build(id)` under it.
fn create_review(
    git: &Git,
    build: impl Fn(u64) -> ReviewRecord,
) -> Result<ReviewRecord, StoreError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let next = list_reviews(git)?.last().map_or(1, |r| r.id + 1);
        let record = build(next);
        match write_json_ref(git, &format!("{REVIEW_REF_PREFIX}{next}"), &record, None) {
            Ok(()) => return Ok(record),
            // Another request took this id; try the next one
            Err(StoreError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::Conflict(
        "could not allocate a review id".to_string(),
    ))
}

fn merge_blocking(
    git: &Git,
    author: &CommitAuthor,
    id: &str,
    message: &str,
    expected_source_head: &Oid,
) -> Result<ReviewRecord, StoreError> {
    let (mut record, blob) = read_review(git, id)?;
    if record.state != ReviewState::Open {
        return Err(StoreError::Conflict(format!("review {id} is not open")));
    }

    let source_ref = branch_ref(&record.source_branch)?;
    let target_ref = branch_ref(&record.target_branch)?;
    let source_head = git.resolve_ref(&source_ref)?;
    if &source_head != expected_source_head {
        return Err(StoreError::Conflict(format!(
            "branch {} moved to {source_head}",
            record.source_branch
        )));
    }
    let target_head = git.resolve_ref(&target_ref)?;

    let merge = git.merge_commits(&target_head, &source_head, message, author)?;
    git.update_ref_cas(&target_ref, &merge, Some(&target_head), "sdlc: merge review")?;
    git.delete_ref_cas(&source_ref, &source_head)?;

    let now = Utc::now();
    record.state = ReviewState::Committed;
    record.merged_at = Some(now);
    record.updated_at = now;
    record.merge_commit = Some(merge);
    write_json_ref(git, &review_ref(id)?, &record, Some(&blob))?;
    Ok(record)
}

/// Turn a project name into a repository-safe id.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}

fn allocate_project_id(root: &Path, name: &str) -> Result<ProjectId, StoreError> {
    let base = slugify(name);
    let mut candidate = base.clone();
    let mut n = 2;
    while root.join(format!("{candidate}.git")).exists() {
        candidate = format!("{base}-{n}");
        n += 1;
    }
    ProjectId::new(candidate).map_err(|e| StoreError::Internal(e.to_string()))
}

fn list_project_ids(root: &Path) -> Result<Vec<ProjectId>, StoreError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Internal(format!("cannot read {}: {e}", root.display()))),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| StoreError::Internal(format!("cannot read {}: {e}", root.display())))?;
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".git")) else {
            continue;
        };
        if let Ok(id) = ProjectId::new(id) {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

// =============================================================================
// ProjectStore implementation
// =============================================================================

#[async_trait]
impl ProjectStore for FileSystemStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn current_user(&self) -> Result<User, StoreError> {
        Ok(self.user.clone())
    }

    async fn list_users(&self, search: Option<&str>) -> Result<Vec<User>, StoreError> {
        let root = self.root.clone();
        let current = self.user.clone();
        let mut users = Self::blocking(move || {
            let mut ids: Vec<UserId> = vec![current.user_id.clone()];
            for project in list_project_ids(&root)? {
                let git = open_project(&root.join(format!("{project}.git")), &project)?;
                for entry in git.list_refs_by_prefix(RefName::HEADS)? {
                    let Some(branch) = entry.name.strip_prefix(RefName::HEADS) else {
                        continue;
                    };
                    if let Some(user) = WorkspaceSpecification::parse_branch(branch).and_then(|s| s.user) {
                        ids.push(user);
                    }
                }
                for review in list_reviews(&git)? {
                    ids.push(review.author.user_id);
                }
            }
            ids.sort();
            ids.dedup();
            Ok(ids
                .into_iter()
                .map(|id| {
                    if id == current.user_id {
                        current.clone()
                    } else {
                        User {
                            name: id.to_string(),
                            user_id: id,
                        }
                    }
                })
                .collect::<Vec<_>>())
        })
        .await?;

        if let Some(term) = search.map(str::to_lowercase) {
            users.retain(|u| {
                u.user_id.as_str().to_lowercase().contains(&term)
                    || u.name.to_lowercase().contains(&term)
            });
        }
        Ok(users)
    }

    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let root = self.root.clone();
        let filter = filter.clone();
        Self::blocking(move || {
            let mut projects = Vec::new();
            for id in list_project_ids(&root)? {
                let git = open_project(&root.join(format!("{id}.git")), &id)?;
                let (project, _) = read_project(&git, &id)?;
                if filter.matches(&project) {
                    projects.push(project);
                }
                if filter.limit.is_some_and(|limit| projects.len() >= limit) {
                    break;
                }
            }
            Ok(projects)
        })
        .await
    }

    async fn get_project(&self, project: &ProjectId) -> Result<Project, StoreError> {
        let id = project.clone();
        self.with_repo(project, move |git| Ok(read_project(git, &id)?.0))
            .await
    }

    async fn create_project(&self, request: &NewProject) -> Result<Project, StoreError> {
        if request.name.trim().is_empty() {
            return Err(StoreError::InvalidRequest("project name is required".into()));
        }
        let root = self.root.clone();
        let record = ProjectRecord {
            name: request.name.clone(),
            description: request.description.clone(),
            tags: request.tags.clone(),
            project_type: request.project_type,
        };
        let project = Self::blocking(move || {
            std::fs::create_dir_all(&root).map_err(|e| {
                StoreError::Internal(format!("cannot create {}: {e}", root.display()))
            })?;
            let id = allocate_project_id(&root, &record.name)?;
            let git = Git::init_bare(&root.join(format!("{id}.git")))?;
            write_json_ref(&git, PROJECT_REF, &record, None)?;
            Ok(read_project(&git, &id)?.0)
        })
        .await?;
        info!(project = %project.project_id, "created project repository");
        Ok(project)
    }

    async fn update_project(
        &self,
        project: &ProjectId,
        update: &ProjectUpdate,
    ) -> Result<Project, StoreError> {
        let id = project.clone();
        let update = update.clone();
        self.with_repo(project, move |git| {
            let (record, blob): (ProjectRecord, Oid) = read_json_ref(git, PROJECT_REF)?
                .ok_or_else(|| StoreError::NotFound(format!("project {id} has no metadata")))?;
            let next = ProjectRecord {
                name: update.name.unwrap_or(record.name),
                description: update.description.unwrap_or(record.description),
                tags: update.tags.unwrap_or(record.tags),
                project_type: record.project_type,
            };
            write_json_ref(git, PROJECT_REF, &next, Some(&blob))?;
            Ok(read_project(git, &id)?.0)
        })
        .await
    }

    async fn delete_project(&self, project: &ProjectId) -> Result<(), StoreError> {
        let path = self.repo_path(project);
        let id = project.clone();
        Self::blocking(move || {
            open_project(&path, &id)?;
            std::fs::remove_dir_all(&path)
                .map_err(|e| StoreError::Internal(format!("cannot delete {}: {e}", path.display())))
        })
        .await?;
        info!(project = %project, "deleted project repository");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Branches
    // -------------------------------------------------------------------------

    async fn list_branches(
        &self,
        project: &ProjectId,
        prefix: &str,
    ) -> Result<Vec<Branch>, StoreError> {
        let prefix = format!("{}{prefix}", RefName::HEADS);
        self.with_repo(project, move |git| {
            Ok(git
                .list_refs_by_prefix(&prefix)?
                .into_iter()
                .filter_map(|entry| {
                    let name = entry.name.strip_prefix(RefName::HEADS)?.to_string();
                    Some(Branch {
                        name,
                        head: entry.oid,
                    })
                })
                .collect())
        })
        .await
    }

    async fn branch_head(
        &self,
        project: &ProjectId,
        branch: &str,
    ) -> Result<Option<Oid>, StoreError> {
        let refname = branch_ref(branch)?;
        self.with_repo(project, move |git| Ok(git.try_resolve_ref(&refname)?))
            .await
    }

    async fn create_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        at: &Oid,
    ) -> Result<(), StoreError> {
        let refname = branch_ref(branch)?;
        let at = at.clone();
        let name = branch.to_string();
        self.with_repo(project, move |git| {
            git.commit_info(&at)?;
            git.update_ref_cas(&refname, &at, None, "sdlc: create branch")
                .map_err(|e| match e {
                    GitError::CasFailed { .. } => StoreError::AlreadyExists(format!("branch {name}")),
                    other => other.into(),
                })
        })
        .await?;
        debug!(project = %project, branch, "created branch");
        Ok(())
    }

    async fn delete_branch(&self, project: &ProjectId, branch: &str) -> Result<(), StoreError> {
        let refname = branch_ref(branch)?;
        let name = branch.to_string();
        self.with_repo(project, move |git| {
            let head = git
                .try_resolve_ref(&refname)?
                .ok_or_else(|| StoreError::NotFound(format!("branch {name}")))?;
            Ok(git.delete_ref_cas(&refname, &head)?)
        })
        .await?;
        debug!(project = %project, branch, "deleted branch");
        Ok(())
    }

    async fn reset_branch(
        &self,
        project: &ProjectId,
        branch: &str,
        to: &Oid,
        expected: &Oid,
    ) -> Result<(), StoreError> {
        let refname = branch_ref(branch)?;
        let (to, expected) = (to.clone(), expected.clone());
        self.with_repo(project, move |git| {
            git.commit_info(&to)?;
            Ok(git.update_ref_cas(&refname, &to, Some(&expected), "sdlc: reset branch")?)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------

    async fn list_files(
        &self,
        project: &ProjectId,
        revision: &Oid,
        dir: &str,
    ) -> Result<Vec<String>, StoreError> {
        let (revision, dir) = (revision.clone(), dir.to_string());
        self.with_repo(project, move |git| Ok(git.list_files(&revision, &dir)?))
            .await
    }

    async fn read_file(
        &self,
        project: &ProjectId,
        revision: &Oid,
        path: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let (revision, path) = (revision.clone(), path.to_string());
        self.with_repo(project, move |git| Ok(git.read_file(&revision, &path)?))
            .await
    }

    async fn commit(
        &self,
        project: &ProjectId,
        request: CommitRequest,
    ) -> Result<Revision, StoreError> {
        let author = self.author();
        let branch = request.branch.clone();
        let revision = self
            .with_repo(project, move |git| {
                let commit = commit_blocking(git, &author, request)?;
                Ok(to_revision(git.commit_info(&commit)?))
            })
            .await?;
        debug!(project = %project, branch, revision = %revision.id, "committed changes");
        Ok(revision)
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    async fn get_revision(
        &self,
        project: &ProjectId,
        revision: &Oid,
    ) -> Result<Revision, StoreError> {
        let revision = revision.clone();
        self.with_repo(project, move |git| Ok(to_revision(git.commit_info(&revision)?)))
            .await
    }

    async fn revision_parents(
        &self,
        project: &ProjectId,
        revision: &Oid,
    ) -> Result<Vec<Oid>, StoreError> {
        let revision = revision.clone();
        self.with_repo(project, move |git| Ok(git.commit_info(&revision)?.parents))
            .await
    }

    async fn list_revisions(
        &self,
        project: &ProjectId,
        from: &Oid,
        path: Option<&str>,
        query: &RevisionQuery,
    ) -> Result<Vec<Revision>, StoreError> {
        let from = from.clone();
        let path = path.map(str::to_string);
        let query = query.clone();
        self.with_repo(project, move |git| {
            let commits = git.log(&from, path.as_deref(), query.limit, |c| {
                query.contains(&c.committer_time)
            })?;
            Ok(commits.into_iter().map(to_revision).collect())
        })
        .await
    }

    async fn merge_base(
        &self,
        project: &ProjectId,
        a: &Oid,
        b: &Oid,
    ) -> Result<Option<Oid>, StoreError> {
        let (a, b) = (a.clone(), b.clone());
        self.with_repo(project, move |git| Ok(git.merge_base(&a, &b)?))
            .await
    }

    async fn diff(
        &self,
        project: &ProjectId,
        from: &Oid,
        to: &Oid,
    ) -> Result<Vec<FileDiff>, StoreError> {
        let (from, to) = (from.clone(), to.clone());
        self.with_repo(project, move |git| {
            Ok(git
                .diff_commits(&from, &to)?
                .into_iter()
                .map(|delta| FileDiff {
                    kind: match delta.kind {
                        DeltaKind::Added => FileDiffKind::Added,
                        DeltaKind::Deleted => FileDiffKind::Deleted,
                        DeltaKind::Modified => FileDiffKind::Modified,
                        DeltaKind::Renamed => FileDiffKind::Renamed,
                    },
                    old_path: delta.old_path,
                    new_path: delta.new_path,
                })
                .collect())
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Merge requests
    // -------------------------------------------------------------------------

    async fn list_merge_requests(
        &self,
        project: &ProjectId,
        query: &MergeRequestQuery,
    ) -> Result<Vec<MergeRequest>, StoreError> {
        let query = query.clone();
        self.with_repo(project, move |git| {
            Ok(list_reviews(git)?
                .iter()
                .map(ReviewRecord::to_merge_request)
                .filter(|mr| query.matches(mr))
                .collect())
        })
        .await
    }

    async fn get_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<MergeRequest, StoreError> {
        let id = id.to_string();
        self.with_repo(project, move |git| Ok(read_review(git, &id)?.0.to_merge_request()))
            .await
    }

    async fn create_merge_request(
        &self,
        project: &ProjectId,
        request: &NewMergeRequest,
    ) -> Result<MergeRequest, StoreError> {
        let request = request.clone();
        let author = self.user.clone();
        let record = self
            .with_repo(project, move |git| {
                for branch in [&request.source_branch, &request.target_branch] {
                    if git.try_resolve_ref(&branch_ref(branch)?)?.is_none() {
                        return Err(StoreError::NotFound(format!("branch {branch}")));
                    }
                }
                let now = Utc::now();
                create_review(git, |id| ReviewRecord {
                    id,
                    source_branch: request.source_branch.clone(),
                    target_branch: request.target_branch.clone(),
                    title: request.title.clone(),
                    description: request.description.clone(),
                    labels: request.labels.clone(),
                    author: author.clone(),
                    state: ReviewState::Open,
                    created_at: now,
                    updated_at: now,
                    closed_at: None,
                    merged_at: None,
                    merge_commit: None,
                    approvers: Vec::new(),
                })
            })
            .await?;
        info!(project = %project, review = %record.id, "created review");
        Ok(record.to_merge_request())
    }

    async fn update_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
        update: &MergeRequestUpdate,
    ) -> Result<MergeRequest, StoreError> {
        let id = id.to_string();
        let update = update.clone();
        self.with_repo(project, move |git| {
            let (mut record, blob) = read_review(git, &id)?;
            let now = Utc::now();
            match update.state_event {
                Some(MergeRequestStateEvent::Close) => {
                    if record.state != ReviewState::Open {
                        return Err(StoreError::Conflict(format!("review {id} is not open")));
                    }
                    record.state = ReviewState::Closed;
                    record.closed_at = Some(now);
                }
                Some(MergeRequestStateEvent::Reopen) => {
                    if record.state != ReviewState::Closed {
                        return Err(StoreError::Conflict(format!("review {id} is not closed")));
                    }
                    record.state = ReviewState::Open;
                    record.closed_at = None;
                }
                None => {}
            }
            if let Some(title) = update.title {
                record.title = title;
            }
            if let Some(description) = update.description {
                record.description = description;
            }
            if let Some(labels) = update.labels {
                record.labels = labels;
            }
            record.updated_at = now;
            write_json_ref(git, &review_ref(&id)?, &record, Some(&blob))?;
            Ok(record.to_merge_request())
        })
        .await
    }

    async fn merge_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
        message: &str,
        expected_source_head: &Oid,
    ) -> Result<MergeRequest, StoreError> {
        let author = self.author();
        let id = id.to_string();
        let message = message.to_string();
        let expected = expected_source_head.clone();
        let record = self
            .with_repo(project, move |git| {
                merge_blocking(git, &author, &id, &message, &expected)
            })
            .await?;
        info!(project = %project, review = %record.id, "merged review");
        Ok(record.to_merge_request())
    }

    async fn approve_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let user = self.user.clone();
        self.with_repo(project, move |git| {
            let (mut record, blob) = read_review(git, &id)?;
            if record.state != ReviewState::Open {
                return Err(StoreError::Conflict(format!("review {id} is not open")));
            }
            if record.approvers.iter().any(|u| u.user_id == user.user_id) {
                return Ok(());
            }
            record.approvers.push(user);
            write_json_ref(git, &review_ref(&id)?, &record, Some(&blob))
        })
        .await
    }

    async fn unapprove_merge_request(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let user = self.user.user_id.clone();
        self.with_repo(project, move |git| {
            let (mut record, blob) = read_review(git, &id)?;
            let before = record.approvers.len();
            record.approvers.retain(|u| u.user_id != user);
            if record.approvers.len() == before {
                return Ok(());
            }
            write_json_ref(git, &review_ref(&id)?, &record, Some(&blob))
        })
        .await
    }

    async fn merge_request_approvers(
        &self,
        project: &ProjectId,
        id: &str,
    ) -> Result<Vec<User>, StoreError> {
        let id = id.to_string();
        self.with_repo(project, move |git| Ok(read_review(git, &id)?.0.approvers))
            .await
    }

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    async fn list_tags(&self, project: &ProjectId, prefix: &str) -> Result<Vec<Tag>, StoreError> {
        let prefix = prefix.to_string();
        self.with_repo(project, move |git| {
            Ok(git
                .list_tags(&prefix)?
                .into_iter()
                .map(|t| Tag {
                    name: t.name,
                    target: t.target,
                    message: t.message,
                })
                .collect())
        })
        .await
    }

    async fn create_tag(
        &self,
        project: &ProjectId,
        name: &str,
        target: &Oid,
        message: &str,
    ) -> Result<Tag, StoreError> {
        let author = self.author();
        let tag = Tag {
            name: name.to_string(),
            target: target.clone(),
            message: Some(message.to_string()),
        };
        let created = tag.clone();
        self.with_repo(project, move |git| {
            git.create_tag(&created.name, &created.target, message_or_name(&created), &author)?;
            Ok(())
        })
        .await?;
        info!(project = %project, tag = name, "created tag");
        Ok(tag)
    }
}

/// Annotated tags need a message; fall back to the tag name.
fn message_or_name(tag: &Tag) -> &str {
    match tag.message.as_deref() {
        Some(message) if !message.trim().is_empty() => message,
        _ => &tag.name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(id: &str) -> User {
        User {
            user_id: UserId::new(id).unwrap(),
            name: id.to_string(),
        }
    }

    async fn setup() -> (TempDir, FileSystemStore, ProjectId) {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path(), user("alice"));
        let project = store
            .create_project(&NewProject {
                name: "Trade Model".into(),
                description: "trades".into(),
                project_type: ProjectType::Managed,
                group_id: "org.example".into(),
                artifact_id: "trade-model".into(),
                tags: vec!["finance".into()],
            })
            .await
            .unwrap();
        (dir, store, project.project_id)
    }

    fn create(path: &str, content: &str) -> FileChange {
        FileChange::Create {
            path: path.into(),
            content: content.as_bytes().to_vec(),
        }
    }

    async fn commit(store: &FileSystemStore, project: &ProjectId, branch: &str, change: FileChange) -> Revision {
        let head = store.branch_head(project, branch).await.unwrap();
        store
            .commit(
                project,
                CommitRequest {
                    branch: branch.into(),
                    expected_head: head,
                    start_point: None,
                    message: "change".into(),
                    changes: vec![change],
                },
            )
            .await
            .unwrap()
    }

    mod projects {
        use super::*;

        #[tokio::test]
        async fn create_get_update_delete() {
            let (_dir, store, id) = setup().await;
            assert_eq!(id.as_str(), "trade-model");

            let project = store.get_project(&id).await.unwrap();
            assert_eq!(project.name, "Trade Model");
            assert_eq!(project.default_branch, "master");

            let updated = store
                .update_project(
                    &id,
                    &ProjectUpdate {
                        description: Some("new".into()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(updated.description, "new");
            assert_eq!(updated.tags, vec!["finance".to_string()]);

            store.delete_project(&id).await.unwrap();
            assert!(matches!(store.get_project(&id).await, Err(StoreError::NotFound(_))));
        }

        #[tokio::test]
        async fn duplicate_names_get_distinct_ids() {
            let (_dir, store, first) = setup().await;
            let second = store
                .create_project(&NewProject {
                    name: "Trade Model".into(),
                    description: String::new(),
                    project_type: ProjectType::Managed,
                    group_id: "org.example".into(),
                    artifact_id: "trade-model".into(),
                    tags: vec![],
                })
                .await
                .unwrap();
            assert_ne!(first, second.project_id);
            assert_eq!(second.project_id.as_str(), "trade-model-2");

            let tagged = store
                .list_projects(&ProjectFilter {
                    tags: vec!["finance".into()],
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(tagged.len(), 1);
        }

        #[test]
        fn slugs() {
            assert_eq!(slugify("My  Project!"), "my-project");
            assert_eq!(slugify("***"), "project");
        }
    }

    mod content {
        use super::*;

        #[tokio::test]
        async fn commits_and_reads() {
            let (_dir, store, id) = setup().await;
            let first = commit(&store, &id, "master", create("a/one.json", "1")).await;
            assert_eq!(first.author_name, "alice");

            let files = store.list_files(&id, &first.id, "").await.unwrap();
            assert_eq!(files, vec!["a/one.json".to_string()]);
            assert_eq!(
                store.read_file(&id, &first.id, "a/one.json").await.unwrap(),
                Some(b"1".to_vec())
            );

            let stale = store
                .commit(
                    &id,
                    CommitRequest {
                        branch: "master".into(),
                        expected_head: Some(Oid::new("0".repeat(40)).unwrap()),
                        start_point: None,
                        message: "stale".into(),
                        changes: vec![create("b.json", "2")],
                    },
                )
                .await;
            assert!(matches!(stale, Err(StoreError::Conflict(_))));

            let duplicate = store
                .commit(
                    &id,
                    CommitRequest {
                        branch: "master".into(),
                        expected_head: None,
                        start_point: None,
                        message: "dup".into(),
                        changes: vec![create("a/one.json", "x")],
                    },
                )
                .await;
            assert!(matches!(duplicate, Err(StoreError::InvalidRequest(_))));
        }

        #[tokio::test]
        async fn moves_keep_content() {
            let (_dir, store, id) = setup().await;
            commit(&store, &id, "master", create("a/one.json", "1")).await;
            let moved = commit(
                &store,
                &id,
                "master",
                FileChange::Move {
                    from: "a/one.json".into(),
                    to: "b/one.json".into(),
                    content: None,
                },
            )
            .await;
            assert_eq!(
                store.list_files(&id, &moved.id, "").await.unwrap(),
                vec!["b/one.json".to_string()]
            );
        }

        #[tokio::test]
        async fn start_point_rebuilds_branch() {
            let (_dir, store, id) = setup().await;
            let base = commit(&store, &id, "master", create("f.json", "0")).await;
            store.create_branch(&id, "workspace/alice/w", &base.id).await.unwrap();
            let ws = commit(&store, &id, "workspace/alice/w", create("w.json", "w")).await;
            let upstream = commit(&store, &id, "master", create("m.json", "m")).await;

            let rebuilt = store
                .commit(
                    &id,
                    CommitRequest {
                        branch: "workspace/alice/w".into(),
                        expected_head: Some(ws.id.clone()),
                        start_point: Some(upstream.id.clone()),
                        message: "replay".into(),
                        changes: vec![create("w.json", "w")],
                    },
                )
                .await
                .unwrap();
            let files = store.list_files(&id, &rebuilt.id, "").await.unwrap();
            assert_eq!(files, vec!["f.json", "m.json", "w.json"]);
            assert_eq!(
                store.merge_base(&id, &rebuilt.id, &upstream.id).await.unwrap(),
                Some(upstream.id)
            );
        }
    }

    mod branches {
        use super::*;

        #[tokio::test]
        async fn lifecycle() {
            let (_dir, store, id) = setup().await;
            let base = commit(&store, &id, "master", create("f.json", "0")).await;

            store.create_branch(&id, "group/g1", &base.id).await.unwrap();
            assert!(matches!(
                store.create_branch(&id, "group/g1", &base.id).await,
                Err(StoreError::AlreadyExists(_))
            ));
            let listed = store.list_branches(&id, "group/").await.unwrap();
            assert_eq!(listed, vec![Branch { name: "group/g1".into(), head: base.id.clone() }]);

            let next = commit(&store, &id, "master", create("g.json", "1")).await;
            assert!(matches!(
                store.reset_branch(&id, "group/g1", &next.id, &next.id).await,
                Err(StoreError::Conflict(_))
            ));
            store.reset_branch(&id, "group/g1", &next.id, &base.id).await.unwrap();
            assert_eq!(store.branch_head(&id, "group/g1").await.unwrap(), Some(next.id));

            store.delete_branch(&id, "group/g1").await.unwrap();
            assert!(matches!(
                store.delete_branch(&id, "group/g1").await,
                Err(StoreError::NotFound(_))
            ));
        }
    }

    mod reviews {
        use super::*;

        #[tokio::test]
        async fn open_approve_merge() {
            let (_dir, store, id) = setup().await;
            let base = commit(&store, &id, "master", create("f.json", "0")).await;
            store.create_branch(&id, "workspace/alice/w", &base.id).await.unwrap();
            let ws = commit(&store, &id, "workspace/alice/w", create("w.json", "w")).await;

            let mr = store
                .create_merge_request(
                    &id,
                    &NewMergeRequest {
                        source_branch: "workspace/alice/w".into(),
                        target_branch: "master".into(),
                        title: "add w".into(),
                        description: String::new(),
                        labels: vec![],
                    },
                )
                .await
                .unwrap();
            assert_eq!(mr.id, "1");
            assert_eq!(mr.state, ReviewState::Open);

            store.approve_merge_request(&id, &mr.id).await.unwrap();
            store.approve_merge_request(&id, &mr.id).await.unwrap();
            assert_eq!(store.merge_request_approvers(&id, &mr.id).await.unwrap().len(), 1);

            let merged = store
                .merge_merge_request(&id, &mr.id, "merge w", &ws.id)
                .await
                .unwrap();
            assert_eq!(merged.state, ReviewState::Committed);
            let merge_commit = merged.merge_commit.unwrap();
            assert_eq!(store.branch_head(&id, "master").await.unwrap(), Some(merge_commit));
            assert_eq!(store.branch_head(&id, "workspace/alice/w").await.unwrap(), None);
        }

        #[tokio::test]
        async fn close_and_reopen() {
            let (_dir, store, id) = setup().await;
            let base = commit(&store, &id, "master", create("f.json", "0")).await;
            store.create_branch(&id, "group/g", &base.id).await.unwrap();
            let mr = store
                .create_merge_request(
                    &id,
                    &NewMergeRequest {
                        source_branch: "group/g".into(),
                        target_branch: "master".into(),
                        title: "t".into(),
                        description: String::new(),
                        labels: vec![],
                    },
                )
                .await
                .unwrap();

            let close = MergeRequestUpdate {
                state_event: Some(MergeRequestStateEvent::Close),
                ..Default::default()
            };
            let closed = store.update_merge_request(&id, &mr.id, &close).await.unwrap();
            assert_eq!(closed.state, ReviewState::Closed);
            assert!(closed.closed_at.is_some());
            assert!(matches!(
                store.update_merge_request(&id, &mr.id, &close).await,
                Err(StoreError::Conflict(_))
            ));

            let reopen = MergeRequestUpdate {
                state_event: Some(MergeRequestStateEvent::Reopen),
                ..Default::default()
            };
            assert_eq!(
                store.update_merge_request(&id, &mr.id, &reopen).await.unwrap().state,
                ReviewState::Open
            );
            assert!(matches!(
                store.get_merge_request(&id, "nope").await,
                Err(StoreError::NotFound(_))
            ));
        }
    }

    mod users_and_tags {
        use super::*;

        #[tokio::test]
        async fn users_from_workspaces() {
            let (_dir, store, id) = setup().await;
            let base = commit(&store, &id, "master", create("f.json", "0")).await;
            store.create_branch(&id, "workspace/bob/w", &base.id).await.unwrap();

            let users = store.list_users(None).await.unwrap();
            let ids: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
            assert_eq!(ids, vec!["alice", "bob"]);
            assert_eq!(store.list_users(Some("BO")).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn tags() {
            let (_dir, store, id) = setup().await;
            let base = commit(&store, &id, "master", create("f.json", "0")).await;
            store.create_tag(&id, "release-1.0.0", &base.id, "notes").await.unwrap();
            assert!(matches!(
                store.create_tag(&id, "release-1.0.0", &base.id, "again").await,
                Err(StoreError::AlreadyExists(_))
            ));
            let tags = store.list_tags(&id, "release-").await.unwrap();
            assert_eq!(tags.len(), 1);
            assert_eq!(tags[0].message.as_deref(), Some("notes"));
        }
    }
}
