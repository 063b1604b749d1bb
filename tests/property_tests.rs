//! Property-based tests for core domain types.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use proptest::prelude::*;

use sdlc_server::core::types::{BranchName, EntityPath, UserId, VersionId, VersionType, WorkspaceId};
use sdlc_server::core::workspace::{
    parse_patch_branch, patch_branch_name, WorkspaceAccessType, WorkspaceSource,
    WorkspaceSpecification, WorkspaceType,
};

/// Strategy for valid workspace ids.
fn workspace_id() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9_-]{0,30}"
}

/// Strategy for valid user ids (login names).
fn user_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,20}[a-z0-9]".prop_filter("no '..' or '.lock'", |s| {
        !s.contains("..") && !s.ends_with(".lock")
    })
}

fn version() -> impl Strategy<Value = VersionId> {
    (0u32..100, 0u32..100, 0u32..100).prop_map(|(a, b, c)| VersionId::new(a, b, c))
}

fn source() -> impl Strategy<Value = WorkspaceSource> {
    prop_oneof![
        Just(WorkspaceSource::Project),
        version().prop_map(WorkspaceSource::patch),
    ]
}

fn access_type() -> impl Strategy<Value = WorkspaceAccessType> {
    prop_oneof![
        Just(WorkspaceAccessType::Workspace),
        Just(WorkspaceAccessType::ConflictResolution),
        Just(WorkspaceAccessType::Backup),
    ]
}

fn specification() -> impl Strategy<Value = WorkspaceSpecification> {
    (workspace_id(), user_id(), any::<bool>(), source(), access_type()).prop_map(
        |(id, user, group, source, access)| {
            let id = WorkspaceId::new(id).unwrap();
            let spec = if group {
                WorkspaceSpecification::group(id, source)
            } else {
                WorkspaceSpecification::user(id, UserId::new(user).unwrap(), source)
            };
            spec.with_access(access)
        },
    )
}

proptest! {
    /// Every workspace branch is a valid Git branch and parses back to the
    /// same specification.
    #[test]
    fn workspace_branches_identify_their_workspace(spec in specification()) {
        let branch = spec.branch_name();
        prop_assert!(BranchName::new(branch.as_str()).is_ok(), "{}", branch);
        prop_assert_eq!(WorkspaceSpecification::parse_branch(branch.as_str()), Some(spec));
    }

    /// Branches of different workspaces never collide.
    #[test]
    fn distinct_specifications_have_distinct_branches(a in specification(), b in specification()) {
        if a != b {
            prop_assert_ne!(a.branch_name(), b.branch_name());
        }
    }

    /// The workspace listing prefix matches exactly the workspaces of that kind.
    #[test]
    fn branch_prefix_selects_owned_workspaces(spec in specification()) {
        let prefix = WorkspaceSpecification::branch_prefix(
            spec.workspace_type,
            spec.access_type,
            &spec.source,
            spec.user.as_ref(),
        );
        prop_assert!(spec.branch_name().as_str().starts_with(&prefix));

        let other_type = match spec.workspace_type {
            WorkspaceType::User => WorkspaceType::Group,
            WorkspaceType::Group => WorkspaceType::User,
        };
        let other = WorkspaceSpecification::branch_prefix(
            other_type,
            spec.access_type,
            &spec.source,
            spec.user.as_ref(),
        );
        prop_assert!(!spec.branch_name().as_str().starts_with(&other));
    }

    #[test]
    fn version_text_and_tags(v in version()) {
        prop_assert_eq!(v.to_string().parse::<VersionId>().unwrap(), v);
        prop_assert_eq!(VersionId::from_tag_name(&v.to_tag_name()), Some(v));
        prop_assert_eq!(parse_patch_branch(patch_branch_name(&v).as_str()), Some(v));
    }

    /// Version ordering is numeric, and every bump moves strictly forward.
    #[test]
    fn next_version_is_greater(v in version()) {
        for kind in [VersionType::Major, VersionType::Minor, VersionType::Patch] {
            let next = v.next(kind).unwrap();
            prop_assert!(next > v);
            prop_assert!(next.to_string() != v.to_string());
        }
        prop_assert_eq!(v.next(VersionType::Major).unwrap().minor(), 0);
        prop_assert_eq!(v.next(VersionType::Minor).unwrap().patch(), 0);
    }

    #[test]
    fn malformed_versions_rejected(s in "[0-9.a-z-]{0,12}") {
        let parts: Vec<&str> = s.split('.').collect();
        let well_formed = parts.len() == 3
            && parts
                .iter()
                .all(|p| p.chars().all(|c| c.is_ascii_digit()) && p.parse::<u32>().is_ok());
        prop_assert_eq!(s.parse::<VersionId>().is_ok(), well_formed);
    }

    /// Package and name recompose the entity path.
    #[test]
    fn entity_path_parts(segments in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,10}", 1..5)) {
        let text = segments.join("::");
        let path = EntityPath::new(text.as_str()).unwrap();
        prop_assert_eq!(path.name(), segments.last().unwrap().as_str());
        let rebuilt = EntityPath::from_parts(path.package(), path.name()).unwrap();
        prop_assert_eq!(rebuilt, path.clone());
        if let Some(package) = path.package() {
            prop_assert!(path.in_package(package, false));
            prop_assert!(path.in_package(segments[0].as_str(), true));
        }
    }

    /// A trailing '.' is never a valid ref component.
    #[test]
    fn trailing_dot_ids_rejected(id in workspace_id(), user in user_id()) {
        let id = format!("{id}.");
        prop_assert!(WorkspaceId::new(id.as_str()).is_err());
        let name = format!("{user}.");
        prop_assert!(UserId::new(name).is_err());
    }

    #[test]
    fn workspace_ids_are_single_ref_components(s in "\\PC{0,20}") {
        if let Ok(id) = WorkspaceId::new(s.as_str()) {
            prop_assert!(!id.as_str().contains('/'));
            let name = format!("workspace/{id}");
            prop_assert!(BranchName::new(name).is_ok());
        }
    }
}
