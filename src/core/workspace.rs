//! core::workspace
//!
//! Workspace specifications and their mapping onto branch names.
//!
//! # Branch Layout
//!
//! | type  | access              | branch                   |
//! |-------|---------------------|--------------------------|
//! | user  | workspace           | `workspace/<user>/<ws>`  |
//! | user  | conflict resolution | `resolution/<user>/<ws>` |
//! | user  | backup              | `backup/<user>/<ws>`     |
//! | group | workspace           | `group/<ws>`             |
//! | group | conflict resolution | `group-resolution/<ws>`  |
//! | group | backup              | `group-backup/<ws>`      |
//!
//! Workspaces sourced from a patch carry a `patch-<x.y.z>/` prefix. Patch
//! branches themselves are `patch/<x.y.z>`; the project branch is `master`.
//!
//! # Example
//!
//! ```
//! use sdlc_server::core::types::{UserId, WorkspaceId};
//! use sdlc_server::core::workspace::{WorkspaceSource, WorkspaceSpecification};
//!
//! let spec = WorkspaceSpecification::user(
//!     WorkspaceId::new("ws1").unwrap(),
//!     UserId::new("alice").unwrap(),
//!     WorkspaceSource::Project,
//! );
//! let branch = spec.branch_name();
//! assert_eq!(branch.as_str(), "workspace/alice/ws1");
//! assert_eq!(WorkspaceSpecification::parse_branch(branch.as_str()), Some(spec));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{BranchName, TypeError, UserId, VersionId, WorkspaceId};

/// The project's main branch.
pub const DEFAULT_BRANCH: &str = "master";

/// Prefix of patch branches.
pub const PATCH_BRANCH_PREFIX: &str = "patch/";

/// Prefix of workspaces created from a patch.
const PATCH_WORKSPACE_PREFIX: &str = "patch-";

/// Whether a workspace belongs to one user or is shared by the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceType {
    User,
    Group,
}

/// Which of the branches backing a workspace is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceAccessType {
    Workspace,
    ConflictResolution,
    Backup,
}

impl WorkspaceAccessType {
    fn branch_segment(self, kind: WorkspaceType) -> &'static str {
        match (kind, self) {
            (WorkspaceType::User, Self::Workspace) => "workspace",
            (WorkspaceType::User, Self::ConflictResolution) => "resolution",
            (WorkspaceType::User, Self::Backup) => "backup",
            (WorkspaceType::Group, Self::Workspace) => "group",
            (WorkspaceType::Group, Self::ConflictResolution) => "group-resolution",
            (WorkspaceType::Group, Self::Backup) => "group-backup",
        }
    }

    fn from_branch_segment(segment: &str) -> Option<(WorkspaceType, Self)> {
        Some(match segment {
            "workspace" => (WorkspaceType::User, Self::Workspace),
            "resolution" => (WorkspaceType::User, Self::ConflictResolution),
            "backup" => (WorkspaceType::User, Self::Backup),
            "group" => (WorkspaceType::Group, Self::Workspace),
            "group-resolution" => (WorkspaceType::Group, Self::ConflictResolution),
            "group-backup" => (WorkspaceType::Group, Self::Backup),
            _ => return None,
        })
    }
}

/// The branch a workspace is created from and merged back into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceSource {
    /// The project's default branch.
    Project,
    /// A patch release branch.
    Patch {
        #[serde(rename = "patchReleaseVersionId")]
        version: VersionId,
    },
}

impl WorkspaceSource {
    /// Source for patch `version`.
    pub fn patch(version: VersionId) -> Self {
        Self::Patch { version }
    }

    /// The patch version, if this is a patch source.
    pub fn patch_version(&self) -> Option<VersionId> {
        match self {
            Self::Project => None,
            Self::Patch { version } => Some(*version),
        }
    }

    /// The branch backing this source.
    pub fn branch_name(&self) -> BranchName {
        match self {
            Self::Project => BranchName::from_validated_parts(DEFAULT_BRANCH.to_string()),
            Self::Patch { version } => patch_branch_name(version),
        }
    }

    fn workspace_prefix(&self) -> String {
        match self {
            Self::Project => String::new(),
            Self::Patch { version } => format!("{PATCH_WORKSPACE_PREFIX}{version}/"),
        }
    }
}

impl fmt::Display for WorkspaceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => f.write_str("project"),
            Self::Patch { version } => write!(f, "patch {version}"),
        }
    }
}

/// Branch name of the patch for `version`.
pub fn patch_branch_name(version: &VersionId) -> BranchName {
    // Versions only contain digits and dots
    BranchName::from_validated_parts(format!("{PATCH_BRANCH_PREFIX}{version}"))
}

/// Parse a patch branch name back into its version.
pub fn parse_patch_branch(name: &str) -> Option<VersionId> {
    name.strip_prefix(PATCH_BRANCH_PREFIX)?.parse().ok()
}

/// Fully identifies one branch backing a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceSpecification {
    pub id: WorkspaceId,
    pub workspace_type: WorkspaceType,
    pub access_type: WorkspaceAccessType,
    pub source: WorkspaceSource,
    /// Owner of a user workspace; always `None` for group workspaces.
    pub user: Option<UserId>,
}

impl WorkspaceSpecification {
    /// A user workspace.
    pub fn user(id: WorkspaceId, user: UserId, source: WorkspaceSource) -> Self {
        Self {
            id,
            workspace_type: WorkspaceType::User,
            access_type: WorkspaceAccessType::Workspace,
            source,
            user: Some(user),
        }
    }

    /// A group workspace.
    pub fn group(id: WorkspaceId, source: WorkspaceSource) -> Self {
        Self {
            id,
            workspace_type: WorkspaceType::Group,
            access_type: WorkspaceAccessType::Workspace,
            source,
            user: None,
        }
    }

    /// Build a specification of the given type, attaching `user` only for
    /// user workspaces.
    pub fn of_type(
        id: WorkspaceId,
        workspace_type: WorkspaceType,
        user: &UserId,
        source: WorkspaceSource,
    ) -> Self {
        match workspace_type {
            WorkspaceType::User => Self::user(id, user.clone(), source),
            WorkspaceType::Group => Self::group(id, source),
        }
    }

    /// The same workspace addressed through another access type.
    pub fn with_access(&self, access_type: WorkspaceAccessType) -> Self {
        Self {
            access_type,
            ..self.clone()
        }
    }

    /// The branch backing this specification.
    pub fn branch_name(&self) -> BranchName {
        let segment = self.access_type.branch_segment(self.workspace_type);
        let prefix = self.source.workspace_prefix();
        // Every component is a validated single ref component
        let name = match &self.user {
            Some(user) if self.workspace_type == WorkspaceType::User => {
                format!("{prefix}{segment}/{user}/{}", self.id)
            }
            _ => format!("{prefix}{segment}/{}", self.id),
        };
        BranchName::from_validated_parts(name)
    }

    /// The branch this workspace was created from.
    pub fn source_branch(&self) -> BranchName {
        self.source.branch_name()
    }

    /// Branch prefix matching every workspace of the given kind in `source`,
    /// restricted to `user` when given.
    pub fn branch_prefix(
        workspace_type: WorkspaceType,
        access_type: WorkspaceAccessType,
        source: &WorkspaceSource,
        user: Option<&UserId>,
    ) -> String {
        let segment = access_type.branch_segment(workspace_type);
        let prefix = source.workspace_prefix();
        match (workspace_type, user) {
            (WorkspaceType::User, Some(user)) => format!("{prefix}{segment}/{user}/"),
            _ => format!("{prefix}{segment}/"),
        }
    }

    /// Parse a branch name produced by [`Self::branch_name`].
    ///
    /// Returns `None` for branches that do not back a workspace.
    pub fn parse_branch(name: &str) -> Option<Self> {
        let (source, rest) = match name.strip_prefix(PATCH_WORKSPACE_PREFIX) {
            Some(tail) => {
                let (version, rest) = tail.split_once('/')?;
                (WorkspaceSource::patch(version.parse().ok()?), rest)
            }
            None => (WorkspaceSource::Project, name),
        };

        let (segment, rest) = rest.split_once('/')?;
        let (workspace_type, access_type) = WorkspaceAccessType::from_branch_segment(segment)?;

        let (user, id) = match workspace_type {
            WorkspaceType::User => {
                let (user, id) = rest.split_once('/')?;
                (Some(UserId::new(user).ok()?), id)
            }
            WorkspaceType::Group => (None, rest),
        };

        Some(Self {
            id: WorkspaceId::new(id).ok()?,
            workspace_type,
            access_type,
            source,
            user,
        })
    }
}

impl fmt::Display for WorkspaceSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.branch_name())
    }
}

impl TryFrom<&WorkspaceSpecification> for BranchName {
    type Error = TypeError;

    fn try_from(spec: &WorkspaceSpecification) -> Result<Self, Self::Error> {
        BranchName::new(spec.branch_name().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(id: &str) -> WorkspaceId {
        WorkspaceId::new(id).unwrap()
    }

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    mod branch_names {
        use super::*;

        #[test]
        fn user_branches() {
            let spec = WorkspaceSpecification::user(ws("w1"), alice(), WorkspaceSource::Project);
            assert_eq!(spec.branch_name().as_str(), "workspace/alice/w1");
            assert_eq!(
                spec.with_access(WorkspaceAccessType::ConflictResolution)
                    .branch_name()
                    .as_str(),
                "resolution/alice/w1"
            );
            assert_eq!(
                spec.with_access(WorkspaceAccessType::Backup).branch_name().as_str(),
                "backup/alice/w1"
            );
        }

        #[test]
        fn group_branches() {
            let spec = WorkspaceSpecification::group(ws("shared"), WorkspaceSource::Project);
            assert_eq!(spec.branch_name().as_str(), "group/shared");
            assert_eq!(
                spec.with_access(WorkspaceAccessType::ConflictResolution)
                    .branch_name()
                    .as_str(),
                "group-resolution/shared"
            );
            assert_eq!(
                spec.with_access(WorkspaceAccessType::Backup).branch_name().as_str(),
                "group-backup/shared"
            );
        }

        #[test]
        fn patch_prefix() {
            let source = WorkspaceSource::patch(VersionId::new(1, 0, 1));
            let spec = WorkspaceSpecification::user(ws("fix"), alice(), source);
            assert_eq!(spec.branch_name().as_str(), "patch-1.0.1/workspace/alice/fix");
            assert_eq!(spec.source_branch().as_str(), "patch/1.0.1");
        }

        #[test]
        fn branch_names_are_valid_refs() {
            let spec = WorkspaceSpecification::group(ws("a.b-c_d"), WorkspaceSource::Project);
            assert!(BranchName::try_from(&spec).is_ok());
        }

        #[test]
        fn prefixes() {
            let user = alice();
            assert_eq!(
                WorkspaceSpecification::branch_prefix(
                    WorkspaceType::User,
                    WorkspaceAccessType::Workspace,
                    &WorkspaceSource::Project,
                    Some(&user)
                ),
                "workspace/alice/"
            );
            assert_eq!(
                WorkspaceSpecification::branch_prefix(
                    WorkspaceType::User,
                    WorkspaceAccessType::Workspace,
                    &WorkspaceSource::Project,
                    None
                ),
                "workspace/"
            );
            assert_eq!(
                WorkspaceSpecification::branch_prefix(
                    WorkspaceType::Group,
                    WorkspaceAccessType::Workspace,
                    &WorkspaceSource::patch(VersionId::new(2, 1, 1)),
                    Some(&user)
                ),
                "patch-2.1.1/group/"
            );
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn round_trips() {
            let source = WorkspaceSource::patch(VersionId::new(3, 2, 1));
            let specs = [
                WorkspaceSpecification::user(ws("w"), alice(), WorkspaceSource::Project),
                WorkspaceSpecification::group(ws("g"), WorkspaceSource::Project)
                    .with_access(WorkspaceAccessType::Backup),
                WorkspaceSpecification::user(ws("p"), alice(), source)
                    .with_access(WorkspaceAccessType::ConflictResolution),
                WorkspaceSpecification::group(ws("pg"), source),
            ];
            for spec in specs {
                let parsed = WorkspaceSpecification::parse_branch(spec.branch_name().as_str());
                assert_eq!(parsed, Some(spec));
            }
        }

        #[test]
        fn unrelated_branches() {
            for name in [
                "master",
                "patch/1.0.1",
                "feature/x",
                "workspace/alice",
                "patch-x/group/w",
                "workspace/alice/w/extra",
            ] {
                assert_eq!(WorkspaceSpecification::parse_branch(name), None, "{name}");
            }
        }

        #[test]
        fn patch_branches() {
            assert_eq!(parse_patch_branch("patch/1.2.3"), Some(VersionId::new(1, 2, 3)));
            assert_eq!(parse_patch_branch("patch/x"), None);
            assert_eq!(parse_patch_branch("master"), None);
        }
    }

    #[test]
    fn source_serialization() {
        let json = serde_json::to_value(WorkspaceSource::patch(VersionId::new(1, 0, 1))).unwrap();
        assert_eq!(json["type"], "PATCH");
        assert_eq!(json["patchReleaseVersionId"], "1.0.1");
        let json = serde_json::to_value(WorkspaceSource::Project).unwrap();
        assert_eq!(json["type"], "PROJECT");
    }
}
