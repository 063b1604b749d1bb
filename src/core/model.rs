//! core::model
//!
//! Domain records exchanged between the service layer and API clients.
//!
//! All records serialize as camelCase JSON. Request payloads live next to
//! the records they create or modify.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{EntityPath, Oid, ProjectId, UserId, VersionId, VersionType, WorkspaceId};
use super::workspace::{
    WorkspaceAccessType, WorkspaceSource, WorkspaceSpecification, WorkspaceType,
};

/// JSON object holding an entity's content.
pub type EntityContent = Map<String, Value>;

// =============================================================================
// Users and projects
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: UserId,
    pub name: String,
}

/// How a project is managed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectType {
    /// Fully managed by this server (structure, versions, reviews).
    #[default]
    Managed,
    /// Hosted inside a repository that is also used for other content.
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub project_type: ProjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    pub default_branch: String,
}

/// Request to create a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_type: ProjectType,
    pub group_id: String,
    pub artifact_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update of a project's descriptive fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ProjectUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.tags.is_none()
    }
}

/// Project listing filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFilter {
    pub search: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

impl ProjectFilter {
    /// Whether a project passes the search and tag criteria.
    pub fn matches(&self, project: &Project) -> bool {
        let search_ok = self.search.as_deref().is_none_or(|term| {
            project
                .name
                .to_lowercase()
                .contains(&term.to_lowercase())
        });
        let tags_ok = self.tags.iter().all(|tag| project.tags.contains(tag));
        search_ok && tags_ok
    }
}

// =============================================================================
// Workspaces
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(rename = "type")]
    pub workspace_type: WorkspaceType,
    pub access_type: WorkspaceAccessType,
    pub source: WorkspaceSource,
}

impl Workspace {
    pub fn from_spec(project_id: &ProjectId, spec: &WorkspaceSpecification) -> Self {
        Self {
            project_id: project_id.clone(),
            workspace_id: spec.id.clone(),
            user_id: spec.user.clone(),
            workspace_type: spec.workspace_type,
            access_type: spec.access_type,
            source: spec.source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceUpdateStatus {
    /// The workspace already contained the latest source changes.
    NoOp,
    /// The workspace was rebuilt on top of the source head.
    Updated,
    /// Conflicting changes; a conflict resolution workspace was created.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceUpdateReport {
    pub status: WorkspaceUpdateStatus,
    pub workspace_merge_base_revision_id: Option<Oid>,
    pub workspace_revision_id: Option<Oid>,
}

// =============================================================================
// Revisions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: Oid,
    pub author_name: String,
    pub authored_timestamp: DateTime<Utc>,
    pub committer_name: String,
    pub committed_timestamp: DateTime<Utc>,
    pub message: String,
}

/// Time window and size limit for revision listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl RevisionQuery {
    /// Whether a commit time falls inside the window.
    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| *time >= since) && self.until.is_none_or(|until| *time <= until)
    }
}

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub path: EntityPath,
    pub classifier_path: String,
    pub content: EntityContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityChangeType {
    Create,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    #[serde(rename = "type")]
    pub change_type: EntityChangeType,
    pub entity_path: EntityPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<EntityContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_entity_path: Option<EntityPath>,
}

impl EntityChange {
    pub fn create(path: EntityPath, classifier_path: &str, content: EntityContent) -> Self {
        Self {
            change_type: EntityChangeType::Create,
            entity_path: path,
            classifier_path: Some(classifier_path.to_string()),
            content: Some(content),
            new_entity_path: None,
        }
    }

    pub fn modify(path: EntityPath, classifier_path: &str, content: EntityContent) -> Self {
        Self {
            change_type: EntityChangeType::Modify,
            ..Self::create(path, classifier_path, content)
        }
    }

    pub fn delete(path: EntityPath) -> Self {
        Self {
            change_type: EntityChangeType::Delete,
            entity_path: path,
            classifier_path: None,
            content: None,
            new_entity_path: None,
        }
    }

    pub fn rename(path: EntityPath, new_path: EntityPath) -> Self {
        Self {
            change_type: EntityChangeType::Rename,
            new_entity_path: Some(new_path),
            ..Self::delete(path)
        }
    }
}

/// Request to apply a batch of entity changes to a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChangesRequest {
    pub message: String,
    pub entity_changes: Vec<EntityChange>,
    /// Expected workspace head; the request fails if the workspace moved.
    #[serde(default)]
    pub revision_id: Option<Oid>,
}

/// Create-or-update payload for a single entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub message: String,
    pub classifier_path: String,
    pub content: EntityContent,
    #[serde(default)]
    pub revision_id: Option<Oid>,
}

/// Criteria for entity listings.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub classifier_paths: Vec<String>,
    pub packages: Vec<String>,
    pub include_sub_packages: bool,
    pub name: Option<String>,
}

impl EntityFilter {
    pub fn matches_path(&self, path: &EntityPath) -> bool {
        let package_ok = self.packages.is_empty()
            || self
                .packages
                .iter()
                .any(|pkg| path.in_package(pkg, self.include_sub_packages));
        let name_ok = self
            .name
            .as_deref()
            .is_none_or(|name| path.name().contains(name));
        package_ok && name_ok
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        let classifier_ok = self.classifier_paths.is_empty()
            || self.classifier_paths.contains(&entity.classifier_path);
        classifier_ok && self.matches_path(&entity.path)
    }
}

// =============================================================================
// Reviews
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Open,
    Closed,
    Committed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub project_id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub workspace_type: WorkspaceType,
    pub source: WorkspaceSource,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub author: Option<User>,
    pub state: ReviewState,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub committed_at: Option<DateTime<Utc>>,
    pub commit_revision_id: Option<Oid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub workspace_id: WorkspaceId,
    #[serde(default = "default_workspace_type")]
    pub workspace_type: WorkspaceType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_workspace_type() -> WorkspaceType {
    WorkspaceType::User
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReview {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQuery {
    pub state: Option<ReviewState>,
    pub workspace_id: Option<WorkspaceId>,
    pub workspace_type: Option<WorkspaceType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewApproval {
    pub approved_by: Vec<User>,
}

// =============================================================================
// Versions and patches
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: VersionId,
    pub project_id: ProjectId,
    pub revision_id: Oid,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVersion {
    pub version_type: VersionType,
    #[serde(default)]
    pub revision_id: Option<Oid>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub project_id: ProjectId,
    pub patch_release_version_id: VersionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatch {
    pub source_version_id: VersionId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePatch {
    #[serde(default)]
    pub notes: String,
}

// =============================================================================
// Comparisons
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDiff {
    pub entity_change_type: EntityChangeType,
    pub old_path: Option<EntityPath>,
    pub new_path: Option<EntityPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub from_revision_id: Oid,
    pub to_revision_id: Oid,
    pub deltas: Vec<EntityDiff>,
    pub project_configuration_updated: bool,
}
