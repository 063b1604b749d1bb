//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **ONLY doorway** to Git. All repository reads and writes
//! of the filesystem backend flow through this interface. No other module
//! should import `git2`, and nothing shells out to the git CLI.
//!
//! # Responsibilities
//!
//! - Opening and initializing bare repositories
//! - Ref operations (read, CAS update, delete, prefix listing)
//! - Tree reads (file at path, recursive listings)
//! - Commit creation from file changes, without a working directory
//! - Ancestry queries (merge-base, is-ancestor) and three-way merges
//! - History walks and rename-aware tree diffs
//! - Annotated tags
//!
//! # Invariants
//!
//! - All ref updates use CAS (compare-and-swap) semantics
//! - No other module calls git2 directly
//! - All operations return strong types (Oid, RefName)
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("/srv/sdlc/p1.git"))?;
//!
//! let head = git.resolve_ref("refs/heads/master")?;
//! let files = git.list_files(&head, "entities")?;
//!
//! // CAS update (fails if ref changed since read)
//! git.update_ref_cas(
//!     "refs/heads/workspace/alice/w1",
//!     &head,
//!     None,
//!     "sdlc: create workspace"
//! )?;
//! ```

mod interface;

pub use interface::{
    CommitAuthor, CommitInfo, DeltaKind, Git, GitError, RefEntry, TagEntry, TreeChange, TreeDelta,
};
