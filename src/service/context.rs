//! service::context
//!
//! Where a read or write happens: the project branch, a patch branch, a
//! workspace branch, or a released version.

use std::fmt;
use std::str::FromStr;

use crate::core::types::{BranchName, Oid, VersionId};
use crate::core::workspace::{WorkspaceAccessType, WorkspaceSource, WorkspaceSpecification};

use super::errors::SdlcError;

/// The branch or release a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceContext {
    Project,
    Patch(VersionId),
    Workspace(WorkspaceSpecification),
    Version(VersionId),
}

impl SourceContext {
    /// Context of a workspace source (project or patch).
    pub fn from_source(source: WorkspaceSource) -> Self {
        match source {
            WorkspaceSource::Project => SourceContext::Project,
            WorkspaceSource::Patch { version } => SourceContext::Patch(version),
        }
    }

    /// The branch backing this context; `None` for versions.
    pub fn branch(&self) -> Option<BranchName> {
        match self {
            SourceContext::Project => Some(WorkspaceSource::Project.branch_name()),
            SourceContext::Patch(version) => Some(WorkspaceSource::patch(*version).branch_name()),
            SourceContext::Workspace(spec) => Some(spec.branch_name()),
            SourceContext::Version(_) => None,
        }
    }

    /// The workspace specification, for workspace contexts.
    pub fn workspace(&self) -> Option<&WorkspaceSpecification> {
        match self {
            SourceContext::Workspace(spec) => Some(spec),
            _ => None,
        }
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceContext::Project => f.write_str("project"),
            SourceContext::Patch(version) => write!(f, "patch {version}"),
            SourceContext::Workspace(spec) => {
                let kind = match spec.access_type {
                    WorkspaceAccessType::Workspace => "workspace",
                    WorkspaceAccessType::ConflictResolution => "conflict resolution of workspace",
                    WorkspaceAccessType::Backup => "backup of workspace",
                };
                write!(f, "{kind} {}", spec.id)?;
                if let Some(version) = spec.source.patch_version() {
                    write!(f, " (patch {version})")?;
                }
                Ok(())
            }
            SourceContext::Version(version) => write!(f, "version {version}"),
        }
    }
}

/// A revision named by id or by alias.
///
/// `HEAD`, `LATEST` and `CURRENT` name the head of the context's branch;
/// `BASE` names a workspace's merge base with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSelector {
    Head,
    Base,
    Id(Oid),
}

impl FromStr for RevisionSelector {
    type Err = SdlcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HEAD" | "LATEST" | "CURRENT" => Ok(RevisionSelector::Head),
            "BASE" => Ok(RevisionSelector::Base),
            _ => Oid::new(s)
                .map(RevisionSelector::Id)
                .map_err(|_| SdlcError::invalid(format!("invalid revision '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{UserId, WorkspaceId};

    #[test]
    fn aliases() {
        for alias in ["HEAD", "latest", "Current"] {
            assert_eq!(alias.parse::<RevisionSelector>().unwrap(), RevisionSelector::Head);
        }
        assert_eq!("base".parse::<RevisionSelector>().unwrap(), RevisionSelector::Base);
        let sha = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(
            sha.parse::<RevisionSelector>().unwrap(),
            RevisionSelector::Id(Oid::new(sha).unwrap())
        );
        assert!("tip".parse::<RevisionSelector>().is_err());
    }

    #[test]
    fn context_branches() {
        let v: VersionId = "1.2.3".parse().unwrap();
        assert_eq!(SourceContext::Project.branch().unwrap().as_str(), "master");
        assert_eq!(SourceContext::Patch(v).branch().unwrap().as_str(), "patch/1.2.3");
        assert!(SourceContext::Version(v).branch().is_none());

        let spec = WorkspaceSpecification::user(
            WorkspaceId::new("w1").unwrap(),
            UserId::new("alice").unwrap(),
            WorkspaceSource::patch(v),
        );
        let ctx = SourceContext::Workspace(spec.with_access(WorkspaceAccessType::Backup));
        assert_eq!(ctx.branch().unwrap().as_str(), "patch-1.2.3/backup/alice/w1");
        assert_eq!(ctx.to_string(), "backup of workspace w1 (patch 1.2.3)");
        assert_eq!(
            SourceContext::from_source(WorkspaceSource::patch(v)),
            SourceContext::Patch(v)
        );
    }
}
