//! store
//!
//! The backend seam: Git-level primitives over local bare repositories or a
//! GitLab instance.
//!
//! # Architecture
//!
//! The service layer talks to [`ProjectStore`] only. Concrete stores are
//! obtained from the [`Backend`] chosen by [`create_backend`], one per
//! request caller.
//!
//! - [`FileSystemStore`] - bare repositories driven through [`crate::git`]
//! - [`GitLabStore`] - GitLab REST API v4

mod factory;
mod filesystem;
mod gitlab;
mod traits;

pub use factory::{create_backend, Backend, FileSystemBackend, GitLabBackend};
pub use filesystem::FileSystemStore;
pub use gitlab::GitLabStore;
pub use traits::{
    Branch, CommitRequest, FileChange, FileDiff, FileDiffKind, MergeRequest, MergeRequestQuery,
    MergeRequestStateEvent, MergeRequestUpdate, NewMergeRequest, ProjectStore, StoreError, Tag,
};
