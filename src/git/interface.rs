//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module provides the **single doorway** to all Git operations on the
//! filesystem backend. All repository reads and writes flow through this
//! interface, which returns strong types and normalizes errors into typed
//! failure categories.
//!
//! # Architecture
//!
//! The `Git` struct wraps one bare repository. Nothing outside this module
//! imports `git2`. This keeps:
//!
//! - Consistent error handling across all Git operations
//! - Strong type guarantees at the boundary
//! - CAS (compare-and-swap) semantics for all ref mutations
//!
//! Commits are built directly from trees (no index, no working directory),
//! so the same code serves every branch of a project concurrently.
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: Path is not a Git repository
//! - [`GitError::RefNotFound`]: Requested ref does not exist
//! - [`GitError::CasFailed`]: Compare-and-swap precondition failed
//! - [`GitError::AlreadyExists`]: Ref or tag to create already exists
//! - [`GitError::MergeConflict`]: Three-way merge produced conflicts
//!
//! # Example
//!
//! ```ignore
//! use sdlc_server::git::{Git, TreeChange, CommitAuthor};
//!
//! let git = Git::open(Path::new("/srv/sdlc/p1.git"))?;
//! let head = git.resolve_ref("refs/heads/master")?;
//! let commit = git.commit_changes(
//!     Some(&head),
//!     &[TreeChange::upsert("project.json", b"{}".to_vec())],
//!     "update configuration",
//!     &CommitAuthor::new("alice", "alice@sdlc.local"),
//! )?;
//! git.update_ref_cas("refs/heads/master", &commit, Some(&head), "sdlc: commit")?;
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::types::{Oid, RefName, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Path is not a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Compare-and-swap precondition failed.
    ///
    /// The ref's current value does not match the expected value, meaning
    /// another request changed it since it was read.
    #[error("CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        /// The ref being updated
        refname: String,
        /// The expected old value
        expected: String,
        /// The actual current value
        actual: String,
    },

    /// A ref or tag that must be created already exists.
    #[error("already exists: {name}")]
    AlreadyExists {
        /// The ref or tag name
        name: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The invalid OID string
        oid: String,
    },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName {
        /// Description of the problem
        message: String,
    },

    /// Three-way merge produced conflicting paths.
    #[error("merge conflict in {}", paths.join(", "))]
    MergeConflict {
        /// Paths with conflicts
        paths: Vec<String>,
    },

    /// Permission or filesystem error.
    #[error("repository access error: {message}")]
    AccessError {
        /// Description of the error
        message: String,
    },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") || context.contains("ref") {
                    GitError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    GitError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            git2::ErrorCode::Exists => GitError::AlreadyExists {
                name: context.to_string(),
            },
            git2::ErrorCode::Modified => GitError::CasFailed {
                refname: context.to_string(),
                expected: "<unchanged>".to_string(),
                actual: "<modified concurrently>".to_string(),
            },
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::AccessError {
                message: format!("repository is locked: {}", err.message()),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        GitError::from_git2(err, "")
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            other => GitError::InvalidRefName {
                message: other.to_string(),
            },
        }
    }
}

/// A ref with its name and target OID.
///
/// Used when enumerating refs in a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    /// The full ref name
    pub name: RefName,
    /// The OID the ref points to (peeled to a commit when possible)
    pub oid: Oid,
}

/// A tag with its peeled target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Short tag name (without `refs/tags/`)
    pub name: String,
    /// The commit the tag points to
    pub target: Oid,
    /// Annotation message, for annotated tags
    pub message: Option<String>,
}

/// Information about a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// The commit OID
    pub oid: Oid,
    /// Full commit message
    pub message: String,
    /// Author name
    pub author_name: String,
    /// Author email
    pub author_email: String,
    /// Author timestamp
    pub author_time: DateTime<Utc>,
    /// Committer name
    pub committer_name: String,
    /// Committer timestamp
    pub committer_time: DateTime<Utc>,
    /// Parent commits, in order
    pub parents: Vec<Oid>,
}

/// Name and email recorded on commits and tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl CommitAuthor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn signature(&self) -> Result<git2::Signature<'static>, GitError> {
        git2::Signature::now(&self.name, &self.email)
            .map_err(|e| GitError::from_git2(e, "signature"))
    }
}

/// A single file change applied when building a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    /// Create or replace the file at `path`.
    Upsert { path: String, content: Vec<u8> },
    /// Remove the file at `path`.
    Remove { path: String },
}

impl TreeChange {
    pub fn upsert(path: impl Into<String>, content: Vec<u8>) -> Self {
        TreeChange::Upsert {
            path: path.into(),
            content,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        TreeChange::Remove { path: path.into() }
    }
}

/// Kind of change between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Added,
    Deleted,
    Modified,
    Renamed,
}

/// One file-level difference between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDelta {
    pub kind: DeltaKind,
    /// Path in the old tree (`None` for additions)
    pub old_path: Option<String>,
    /// Path in the new tree (`None` for deletions)
    pub new_path: Option<String>,
}

/// The Git interface.
///
/// This is the **single point of interaction** with Git. All repository
/// reads and writes flow through this interface.
///
/// # CAS Semantics
///
/// All ref mutation operations use compare-and-swap (CAS) semantics. An
/// update only succeeds if the ref's current value matches the expected
/// value; the final write is checked again by libgit2 so a concurrent
/// writer cannot slip in between the check and the update.
pub struct Git {
    /// The underlying git2 repository
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

fn to_git2_oid(oid: &Oid) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(oid.as_str()).map_err(|e| GitError::from_git2(e, oid.as_str()))
}

fn from_git2_oid(oid: git2::Oid) -> Result<Oid, GitError> {
    Oid::new(oid.to_string()).map_err(GitError::from)
}

fn to_datetime(time: git2::Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.seconds(), 0).unwrap_or(DateTime::UNIX_EPOCH)
}

impl Git {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Open an existing repository.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if `path` is not a repository
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::open(path).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => GitError::NotARepo {
                path: path.to_path_buf(),
            },
            _ => GitError::from_git2(e, &path.display().to_string()),
        })?;
        Ok(Self { repo })
    }

    /// Initialize a new bare repository.
    ///
    /// # Errors
    ///
    /// - [`GitError::AlreadyExists`] if `path` already exists
    pub fn init_bare(path: &Path) -> Result<Self, GitError> {
        if path.exists() {
            return Err(GitError::AlreadyExists {
                name: path.display().to_string(),
            });
        }
        let repo = git2::Repository::init_bare(path)
            .map_err(|e| GitError::from_git2(e, &path.display().to_string()))?;
        Ok(Self { repo })
    }

    /// Path of the repository directory.
    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    // =========================================================================
    // Ref Resolution
    // =========================================================================

    /// Resolve a ref to the commit it points to.
    ///
    /// This peels through symbolic refs and annotated tags.
    ///
    /// # Errors
    ///
    /// - [`GitError::RefNotFound`] if the ref doesn't exist
    pub fn resolve_ref(&self, refname: &str) -> Result<Oid, GitError> {
        let reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;

        let oid = reference
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, refname))?
            .id();

        from_git2_oid(oid)
    }

    /// Resolve a ref, returning None if it doesn't exist.
    pub fn try_resolve_ref(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.resolve_ref(refname) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::RefNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve a ref to its direct target without peeling.
    ///
    /// Use this for refs that point to blobs (metadata refs).
    pub fn try_resolve_ref_to_object(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.repo.find_reference(refname) {
            Ok(reference) => {
                let resolved = reference.resolve().unwrap_or(reference);
                let oid = resolved.target().ok_or_else(|| GitError::Internal {
                    message: format!("ref {} has no target", refname),
                })?;
                Ok(Some(from_git2_oid(oid)?))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }

    /// Check if a ref exists.
    pub fn ref_exists(&self, refname: &str) -> bool {
        self.repo.find_reference(refname).is_ok()
    }

    // =========================================================================
    // Ref Enumeration
    // =========================================================================

    /// List all refs matching a prefix.
    ///
    /// Refs pointing to commits are peeled; refs pointing to other objects
    /// (metadata blobs) report their direct target.
    pub fn list_refs_by_prefix(&self, prefix: &str) -> Result<Vec<RefEntry>, GitError> {
        let pattern = format!("{}*", prefix);
        let refs = self
            .repo
            .references_glob(&pattern)
            .map_err(|e| GitError::from_git2(e, prefix))?;

        let mut entries = Vec::new();
        for reference in refs {
            let reference = reference.map_err(|e| GitError::from_git2(e, prefix))?;

            // Skip refs with non-UTF8 or invalid names
            let Some(ref_name) = reference.name().and_then(|n| RefName::new(n).ok()) else {
                continue;
            };

            let target = match reference.peel_to_commit() {
                Ok(commit) => Some(commit.id()),
                Err(_) => reference.target(),
            };
            let Some(oid) = target.and_then(|t| Oid::new(t.to_string()).ok()) else {
                continue;
            };

            entries.push(RefEntry {
                name: ref_name,
                oid,
            });
        }

        entries.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(entries)
    }

    // =========================================================================
    // CAS Ref Operations
    // =========================================================================

    /// Update a ref with compare-and-swap semantics.
    ///
    /// The update only succeeds if the ref's current value matches `expected_old`.
    /// If `expected_old` is `None`, the ref must not exist (create case).
    ///
    /// # Errors
    ///
    /// - [`GitError::CasFailed`] if the current value doesn't match expected
    pub fn update_ref_cas(
        &self,
        refname: &str,
        new_oid: &Oid,
        expected_old: Option<&Oid>,
        message: &str,
    ) -> Result<(), GitError> {
        let current = self.try_resolve_ref_raw(refname)?;

        match (expected_old, current.as_ref()) {
            (Some(expected), Some(actual)) if expected.as_str() != actual => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected.to_string(),
                    actual: actual.clone(),
                });
            }
            (Some(expected), None) => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected.to_string(),
                    actual: "<none>".to_string(),
                });
            }
            (None, Some(actual)) => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: "<none>".to_string(),
                    actual: actual.clone(),
                });
            }
            _ => {}
        }

        let oid = to_git2_oid(new_oid)?;
        let result = match expected_old {
            // libgit2 re-checks the old value under the ref lock
            Some(expected) => {
                self.repo
                    .reference_matching(refname, oid, true, to_git2_oid(expected)?, message)
            }
            None => self.repo.reference(refname, oid, false, message),
        };

        result.map(|_| ()).map_err(|e| match e.code() {
            git2::ErrorCode::Exists | git2::ErrorCode::Modified => GitError::CasFailed {
                refname: refname.to_string(),
                expected: expected_old.map_or("<none>".to_string(), |o| o.to_string()),
                actual: "<modified concurrently>".to_string(),
            },
            _ => GitError::from_git2(e, refname),
        })
    }

    /// Delete a ref with compare-and-swap semantics.
    ///
    /// # Errors
    ///
    /// - [`GitError::CasFailed`] if the current value doesn't match expected
    /// - [`GitError::RefNotFound`] if the ref doesn't exist
    pub fn delete_ref_cas(&self, refname: &str, expected_old: &Oid) -> Result<(), GitError> {
        match self.try_resolve_ref_raw(refname)? {
            None => {
                return Err(GitError::RefNotFound {
                    refname: refname.to_string(),
                });
            }
            Some(actual) if actual != expected_old.as_str() => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected_old.to_string(),
                    actual,
                });
            }
            _ => {}
        }

        let mut reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;

        reference
            .delete()
            .map_err(|e| GitError::from_git2(e, refname))
    }

    /// Resolve a ref to its raw OID string, without peeling.
    fn try_resolve_ref_raw(&self, refname: &str) -> Result<Option<String>, GitError> {
        Ok(self
            .try_resolve_ref_to_object(refname)?
            .map(|oid| oid.to_string()))
    }

    // =========================================================================
    // Ancestry Queries
    // =========================================================================

    /// Find the merge base (common ancestor) of two commits.
    ///
    /// Returns `None` if there is no common ancestor.
    pub fn merge_base(&self, oid1: &Oid, oid2: &Oid) -> Result<Option<Oid>, GitError> {
        match self.repo.merge_base(to_git2_oid(oid1)?, to_git2_oid(oid2)?) {
            Ok(oid) => Ok(Some(from_git2_oid(oid)?)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, "merge-base")),
        }
    }

    /// Check if `ancestor` is an ancestor of `descendant`.
    ///
    /// Returns true if ancestor == descendant (a commit is its own ancestor).
    pub fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
        if ancestor == descendant {
            return Ok(true);
        }
        self.repo
            .graph_descendant_of(to_git2_oid(descendant)?, to_git2_oid(ancestor)?)
            .map_err(|e| GitError::from_git2(e, "graph"))
    }

    // =========================================================================
    // Blob Operations
    // =========================================================================

    /// Write content as a blob and return its OID.
    pub fn write_blob(&self, content: &[u8]) -> Result<Oid, GitError> {
        let oid = self
            .repo
            .blob(content)
            .map_err(|e| GitError::from_git2(e, "blob"))?;
        from_git2_oid(oid)
    }

    /// Read a blob by OID.
    ///
    /// # Errors
    ///
    /// - [`GitError::ObjectNotFound`] if the blob doesn't exist
    pub fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>, GitError> {
        let blob = self
            .repo
            .find_blob(to_git2_oid(oid)?)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        Ok(blob.content().to_vec())
    }

    // =========================================================================
    // Tree Reads
    // =========================================================================

    fn commit_tree(&self, commit: &Oid) -> Result<git2::Tree<'_>, GitError> {
        self.repo
            .find_commit(to_git2_oid(commit)?)
            .and_then(|c| c.tree())
            .map_err(|e| GitError::from_git2(e, commit.as_str()))
    }

    /// Read the file at `path` in `commit`'s tree.
    ///
    /// Returns `None` if there is no file at that path.
    pub fn read_file(&self, commit: &Oid, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let tree = self.commit_tree(commit)?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(GitError::from_git2(e, path)),
        };
        if entry.kind() != Some(git2::ObjectType::Blob) {
            return Ok(None);
        }
        let blob = self
            .repo
            .find_blob(entry.id())
            .map_err(|e| GitError::from_git2(e, path))?;
        Ok(Some(blob.content().to_vec()))
    }

    /// List all files under `dir` (recursively) in `commit`'s tree.
    ///
    /// Paths are relative to the repository root. An empty `dir` lists the
    /// whole tree; a missing directory yields an empty list.
    pub fn list_files(&self, commit: &Oid, dir: &str) -> Result<Vec<String>, GitError> {
        let root = self.commit_tree(commit)?;
        let dir = dir.trim_matches('/');

        let (tree, prefix) = if dir.is_empty() {
            (root, String::new())
        } else {
            let entry = match root.get_path(Path::new(dir)) {
                Ok(entry) => entry,
                Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(GitError::from_git2(e, dir)),
            };
            if entry.kind() != Some(git2::ObjectType::Tree) {
                return Ok(Vec::new());
            }
            let tree = self
                .repo
                .find_tree(entry.id())
                .map_err(|e| GitError::from_git2(e, dir))?;
            (tree, format!("{dir}/"))
        };

        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |parent, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{prefix}{parent}{name}"));
                }
            }
            git2::TreeWalkResult::Ok
        })
        .map_err(|e| GitError::from_git2(e, "tree walk"))?;

        files.sort();
        Ok(files)
    }

    // =========================================================================
    // Commit Creation
    // =========================================================================

    fn empty_tree(&self) -> Result<git2::Tree<'_>, GitError> {
        let oid = self
            .repo
            .treebuilder(None)
            .and_then(|builder| builder.write())
            .map_err(|e| GitError::from_git2(e, "empty tree"))?;
        self.repo
            .find_tree(oid)
            .map_err(|e| GitError::from_git2(e, "empty tree"))
    }

    /// Create a commit applying `changes` on top of `parent`.
    ///
    /// Without a parent the commit is a root commit built from an empty tree.
    /// No ref is moved; callers publish the commit with [`Self::update_ref_cas`].
    pub fn commit_changes(
        &self,
        parent: Option<&Oid>,
        changes: &[TreeChange],
        message: &str,
        author: &CommitAuthor,
    ) -> Result<Oid, GitError> {
        let parent_commit = match parent {
            Some(oid) => Some(
                self.repo
                    .find_commit(to_git2_oid(oid)?)
                    .map_err(|e| GitError::from_git2(e, oid.as_str()))?,
            ),
            None => None,
        };
        let baseline = match &parent_commit {
            Some(commit) => commit
                .tree()
                .map_err(|e| GitError::from_git2(e, "parent tree"))?,
            None => self.empty_tree()?,
        };

        let mut builder = git2::build::TreeUpdateBuilder::new();
        for change in changes {
            match change {
                TreeChange::Upsert { path, content } => {
                    let blob = self
                        .repo
                        .blob(content)
                        .map_err(|e| GitError::from_git2(e, path))?;
                    builder.upsert(path.as_str(), blob, git2::FileMode::Blob);
                }
                TreeChange::Remove { path } => {
                    builder.remove(path.as_str());
                }
            }
        }
        let tree_oid = builder
            .create_updated(&self.repo, &baseline)
            .map_err(|e| GitError::from_git2(e, "tree update"))?;

        let parents: Vec<Oid> = parent.into_iter().cloned().collect();
        self.commit_tree_oid(&from_git2_oid(tree_oid)?, &parents, message, author)
    }

    /// Create a commit for an existing tree with the given parents.
    fn commit_tree_oid(
        &self,
        tree: &Oid,
        parents: &[Oid],
        message: &str,
        author: &CommitAuthor,
    ) -> Result<Oid, GitError> {
        let tree = self
            .repo
            .find_tree(to_git2_oid(tree)?)
            .map_err(|e| GitError::from_git2(e, tree.as_str()))?;
        let mut parent_commits = Vec::with_capacity(parents.len());
        for parent in parents {
            parent_commits.push(
                self.repo
                    .find_commit(to_git2_oid(parent)?)
                    .map_err(|e| GitError::from_git2(e, parent.as_str()))?,
            );
        }
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let signature = author.signature()?;
        let oid = self
            .repo
            .commit(None, &signature, &signature, message, &tree, &parent_refs)
            .map_err(|e| GitError::from_git2(e, "commit"))?;
        from_git2_oid(oid)
    }

    /// Merge `theirs` into `ours`, producing a merge commit.
    ///
    /// # Errors
    ///
    /// - [`GitError::MergeConflict`] listing the conflicting paths
    pub fn merge_commits(
        &self,
        ours: &Oid,
        theirs: &Oid,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<Oid, GitError> {
        let our_commit = self
            .repo
            .find_commit(to_git2_oid(ours)?)
            .map_err(|e| GitError::from_git2(e, ours.as_str()))?;
        let their_commit = self
            .repo
            .find_commit(to_git2_oid(theirs)?)
            .map_err(|e| GitError::from_git2(e, theirs.as_str()))?;

        let mut index = self
            .repo
            .merge_commits(&our_commit, &their_commit, None)
            .map_err(|e| GitError::from_git2(e, "merge"))?;

        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts().map_err(|e| GitError::from_git2(e, "merge"))? {
                let conflict = conflict.map_err(|e| GitError::from_git2(e, "merge"))?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.push(String::from_utf8_lossy(&entry.path).into_owned());
                }
            }
            return Err(GitError::MergeConflict { paths });
        }

        let tree = index
            .write_tree_to(&self.repo)
            .map_err(|e| GitError::from_git2(e, "merge tree"))?;
        self.commit_tree_oid(
            &from_git2_oid(tree)?,
            &[ours.clone(), theirs.clone()],
            message,
            author,
        )
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Get information about a commit.
    ///
    /// # Errors
    ///
    /// - [`GitError::ObjectNotFound`] if the commit doesn't exist
    pub fn commit_info(&self, oid: &Oid) -> Result<CommitInfo, GitError> {
        let commit = self
            .repo
            .find_commit(to_git2_oid(oid)?)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;

        let author = commit.author();
        let committer = commit.committer();
        let parents = commit
            .parent_ids()
            .map(from_git2_oid)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CommitInfo {
            oid: oid.clone(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            author_time: to_datetime(author.when()),
            committer_name: committer.name().unwrap_or("").to_string(),
            committer_time: to_datetime(committer.when()),
            parents,
        })
    }

    /// Walk history from `tip`, newest first.
    ///
    /// When `path` is given, only commits that changed a file at or under
    /// that path (compared with their first parent) are returned. The walk
    /// stops once `limit` commits have been collected.
    pub fn log(
        &self,
        tip: &Oid,
        path: Option<&str>,
        limit: Option<usize>,
        mut keep: impl FnMut(&CommitInfo) -> bool,
    ) -> Result<Vec<CommitInfo>, GitError> {
        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.push(to_git2_oid(tip)?)
            .map_err(|e| GitError::from_git2(e, tip.as_str()))?;

        let mut commits = Vec::new();
        for oid in walk {
            if limit.is_some_and(|max| commits.len() >= max) {
                break;
            }
            let oid = oid.map_err(|e| GitError::from_git2(e, "revwalk"))?;
            if let Some(path) = path {
                if !self.commit_touches(oid, path)? {
                    continue;
                }
            }
            let info = self.commit_info(&from_git2_oid(oid)?)?;
            if keep(&info) {
                commits.push(info);
            }
        }
        Ok(commits)
    }

    /// Whether `commit` changed anything at or under `path` relative to its
    /// first parent.
    fn commit_touches(&self, commit: git2::Oid, path: &str) -> Result<bool, GitError> {
        let commit = self
            .repo
            .find_commit(commit)
            .map_err(|e| GitError::from_git2(e, "commit"))?;
        let tree = commit
            .tree()
            .map_err(|e| GitError::from_git2(e, "commit tree"))?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(
                parent
                    .tree()
                    .map_err(|e| GitError::from_git2(e, "parent tree"))?,
            ),
            Err(_) => None,
        };

        let mut opts = git2::DiffOptions::new();
        opts.pathspec(path);
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))
            .map_err(|e| GitError::from_git2(e, "diff"))?;
        Ok(diff.deltas().len() > 0)
    }

    /// File-level differences between two commits, with rename detection.
    pub fn diff_commits(&self, from: &Oid, to: &Oid) -> Result<Vec<TreeDelta>, GitError> {
        let old_tree = self.commit_tree(from)?;
        let new_tree = self.commit_tree(to)?;

        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .map_err(|e| GitError::from_git2(e, "diff"))?;
        let mut find = git2::DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))
            .map_err(|e| GitError::from_git2(e, "diff renames"))?;

        let path_of = |file: git2::DiffFile<'_>| {
            file.path().map(|p| p.to_string_lossy().replace('\\', "/"))
        };

        let mut deltas = Vec::new();
        for delta in diff.deltas() {
            let (kind, old_path, new_path) = match delta.status() {
                git2::Delta::Added => (DeltaKind::Added, None, path_of(delta.new_file())),
                git2::Delta::Deleted => (DeltaKind::Deleted, path_of(delta.old_file()), None),
                git2::Delta::Renamed => (
                    DeltaKind::Renamed,
                    path_of(delta.old_file()),
                    path_of(delta.new_file()),
                ),
                git2::Delta::Modified | git2::Delta::Typechange => (
                    DeltaKind::Modified,
                    path_of(delta.old_file()),
                    path_of(delta.new_file()),
                ),
                // Copies are reported as additions of the new file
                git2::Delta::Copied => (DeltaKind::Added, None, path_of(delta.new_file())),
                _ => continue,
            };
            deltas.push(TreeDelta {
                kind,
                old_path,
                new_path,
            });
        }
        Ok(deltas)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Create an annotated tag pointing at `target`.
    ///
    /// # Errors
    ///
    /// - [`GitError::AlreadyExists`] if the tag exists
    pub fn create_tag(
        &self,
        name: &str,
        target: &Oid,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<(), GitError> {
        let refname = RefName::for_tag(name)?;
        if self.ref_exists(refname.as_str()) {
            return Err(GitError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let object = self
            .repo
            .find_object(to_git2_oid(target)?, Some(git2::ObjectType::Commit))
            .map_err(|e| GitError::from_git2(e, target.as_str()))?;
        let signature = author.signature()?;
        self.repo
            .tag(name, &object, &signature, message, false)
            .map_err(|e| GitError::from_git2(e, name))?;
        Ok(())
    }

    /// List tags whose names start with `prefix`.
    pub fn list_tags(&self, prefix: &str) -> Result<Vec<TagEntry>, GitError> {
        let mut tags = Vec::new();
        for entry in self.list_refs_by_prefix(&format!("{}{}", RefName::TAGS, prefix))? {
            let Some(name) = entry.name.strip_prefix(RefName::TAGS) else {
                continue;
            };
            let message = self
                .repo
                .find_reference(entry.name.as_str())
                .ok()
                .and_then(|r| r.peel_to_tag().ok())
                .and_then(|tag| tag.message().map(|m| m.trim_end().to_string()));
            tags.push(TagEntry {
                name: name.to_string(),
                target: entry.oid,
                message,
            });
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn author() -> CommitAuthor {
        CommitAuthor::new("Test User", "test@example.com")
    }

    fn repo() -> (TempDir, Git) {
        let dir = TempDir::new().unwrap();
        let git = Git::init_bare(&dir.path().join("repo.git")).unwrap();
        (dir, git)
    }

    fn commit(git: &Git, parent: Option<&Oid>, changes: &[TreeChange]) -> Oid {
        git.commit_changes(parent, changes, "test commit", &author())
            .unwrap()
    }

    mod opening {
        use super::*;

        #[test]
        fn open_missing_is_not_a_repo() {
            let dir = TempDir::new().unwrap();
            let result = Git::open(&dir.path().join("missing"));
            assert!(matches!(result, Err(GitError::NotARepo { .. })));
        }

        #[test]
        fn init_existing_path_fails() {
            let (dir, _git) = repo();
            let result = Git::init_bare(&dir.path().join("repo.git"));
            assert!(matches!(result, Err(GitError::AlreadyExists { .. })));
        }
    }

    mod trees {
        use super::*;

        #[test]
        fn commit_and_read_files() {
            let (_dir, git) = repo();
            let root = commit(
                &git,
                None,
                &[
                    TreeChange::upsert("a/b/one.json", b"1".to_vec()),
                    TreeChange::upsert("top.txt", b"top".to_vec()),
                ],
            );

            assert_eq!(git.read_file(&root, "a/b/one.json").unwrap(), Some(b"1".to_vec()));
            assert_eq!(git.read_file(&root, "missing").unwrap(), None);
            assert_eq!(git.read_file(&root, "a").unwrap(), None);
            assert_eq!(
                git.list_files(&root, "").unwrap(),
                vec!["a/b/one.json".to_string(), "top.txt".to_string()]
            );
            assert_eq!(git.list_files(&root, "a").unwrap(), vec!["a/b/one.json".to_string()]);
            assert!(git.list_files(&root, "nope").unwrap().is_empty());
        }

        #[test]
        fn removal_and_parents() {
            let (_dir, git) = repo();
            let first = commit(&git, None, &[TreeChange::upsert("x/f.json", b"1".to_vec())]);
            let second = commit(&git, Some(&first), &[TreeChange::remove("x/f.json")]);

            assert_eq!(git.read_file(&second, "x/f.json").unwrap(), None);
            assert!(git.list_files(&second, "").unwrap().is_empty());
            assert_eq!(git.commit_info(&second).unwrap().parents, vec![first]);
        }
    }

    mod refs {
        use super::*;

        #[test]
        fn cas_create_update_delete() {
            let (_dir, git) = repo();
            let first = commit(&git, None, &[TreeChange::upsert("f", b"1".to_vec())]);
            let second = commit(&git, Some(&first), &[TreeChange::upsert("f", b"2".to_vec())]);
            let name = "refs/heads/master";

            git.update_ref_cas(name, &first, None, "create").unwrap();
            assert!(matches!(
                git.update_ref_cas(name, &second, None, "create again"),
                Err(GitError::CasFailed { .. })
            ));
            assert!(matches!(
                git.update_ref_cas(name, &second, Some(&second), "stale"),
                Err(GitError::CasFailed { .. })
            ));
            git.update_ref_cas(name, &second, Some(&first), "advance").unwrap();
            assert_eq!(git.resolve_ref(name).unwrap(), second);

            assert!(matches!(
                git.delete_ref_cas(name, &first),
                Err(GitError::CasFailed { .. })
            ));
            git.delete_ref_cas(name, &second).unwrap();
            assert_eq!(git.try_resolve_ref(name).unwrap(), None);
        }

        #[test]
        fn list_by_prefix_sorted() {
            let (_dir, git) = repo();
            let c = commit(&git, None, &[TreeChange::upsert("f", b"1".to_vec())]);
            git.update_ref_cas("refs/heads/workspace/bob/w", &c, None, "").unwrap();
            git.update_ref_cas("refs/heads/workspace/alice/w", &c, None, "").unwrap();
            git.update_ref_cas("refs/heads/group/g", &c, None, "").unwrap();

            let names: Vec<String> = git
                .list_refs_by_prefix("refs/heads/workspace/")
                .unwrap()
                .into_iter()
                .map(|e| e.name.to_string())
                .collect();
            assert_eq!(
                names,
                vec!["refs/heads/workspace/alice/w", "refs/heads/workspace/bob/w"]
            );
        }

        #[test]
        fn blob_refs() {
            let (_dir, git) = repo();
            let blob = git.write_blob(b"{\"k\":1}").unwrap();
            git.update_ref_cas("refs/sdlc/project", &blob, None, "meta").unwrap();
            let target = git.try_resolve_ref_to_object("refs/sdlc/project").unwrap().unwrap();
            assert_eq!(git.read_blob(&target).unwrap(), b"{\"k\":1}".to_vec());
        }
    }

    mod history {
        use super::*;

        #[test]
        fn merge_base_and_ancestry() {
            let (_dir, git) = repo();
            let base = commit(&git, None, &[TreeChange::upsert("f", b"0".to_vec())]);
            let left = commit(&git, Some(&base), &[TreeChange::upsert("l", b"l".to_vec())]);
            let right = commit(&git, Some(&base), &[TreeChange::upsert("r", b"r".to_vec())]);

            assert_eq!(git.merge_base(&left, &right).unwrap(), Some(base.clone()));
            assert!(git.is_ancestor(&base, &left).unwrap());
            assert!(!git.is_ancestor(&left, &right).unwrap());
        }

        #[test]
        fn log_filters_by_path() {
            let (_dir, git) = repo();
            let c1 = commit(&git, None, &[TreeChange::upsert("a/x.json", b"1".to_vec())]);
            let c2 = commit(&git, Some(&c1), &[TreeChange::upsert("b/y.json", b"1".to_vec())]);
            let c3 = commit(&git, Some(&c2), &[TreeChange::upsert("a/x.json", b"2".to_vec())]);

            let all = git.log(&c3, None, None, |_| true).unwrap();
            assert_eq!(all.len(), 3);

            let touching_a: Vec<Oid> = git
                .log(&c3, Some("a"), None, |_| true)
                .unwrap()
                .into_iter()
                .map(|c| c.oid)
                .collect();
            assert_eq!(touching_a.len(), 2);
            assert!(touching_a.contains(&c1) && touching_a.contains(&c3));

            assert_eq!(git.log(&c3, None, Some(1), |_| true).unwrap().len(), 1);
        }

        #[test]
        fn diff_detects_changes() {
            let (_dir, git) = repo();
            let content = b"{\n  \"classifierPath\": \"meta::Class\",\n  \"content\": {\"a\": 1, \"b\": 2, \"c\": 3}\n}\n".to_vec();
            let c1 = commit(
                &git,
                None,
                &[
                    TreeChange::upsert("e/Old.json", content.clone()),
                    TreeChange::upsert("e/Mod.json", b"1".to_vec()),
                    TreeChange::upsert("e/Gone.json", b"x".to_vec()),
                ],
            );
            let c2 = commit(
                &git,
                Some(&c1),
                &[
                    TreeChange::remove("e/Old.json"),
                    TreeChange::upsert("e/New.json", content),
                    TreeChange::upsert("e/Mod.json", b"2".to_vec()),
                    TreeChange::remove("e/Gone.json"),
                    TreeChange::upsert("e/Added.json", b"+".to_vec()),
                ],
            );

            let deltas = git.diff_commits(&c1, &c2).unwrap();
            assert!(deltas.contains(&TreeDelta {
                kind: DeltaKind::Renamed,
                old_path: Some("e/Old.json".into()),
                new_path: Some("e/New.json".into()),
            }));
            assert!(deltas.iter().any(|d| d.kind == DeltaKind::Modified
                && d.new_path.as_deref() == Some("e/Mod.json")));
            assert!(deltas.iter().any(|d| d.kind == DeltaKind::Deleted
                && d.old_path.as_deref() == Some("e/Gone.json")));
            assert!(deltas.iter().any(|d| d.kind == DeltaKind::Added
                && d.new_path.as_deref() == Some("e/Added.json")));
        }

        #[test]
        fn merge_clean_and_conflicting() {
            let (_dir, git) = repo();
            let base = commit(&git, None, &[TreeChange::upsert("f", b"0".to_vec())]);
            let ours = commit(&git, Some(&base), &[TreeChange::upsert("a", b"a".to_vec())]);
            let theirs = commit(&git, Some(&base), &[TreeChange::upsert("b", b"b".to_vec())]);

            let merged = git.merge_commits(&ours, &theirs, "merge", &author()).unwrap();
            assert_eq!(git.commit_info(&merged).unwrap().parents, vec![ours.clone(), theirs]);
            assert_eq!(git.read_file(&merged, "b").unwrap(), Some(b"b".to_vec()));

            let clash = commit(&git, Some(&base), &[TreeChange::upsert("f", b"x".to_vec())]);
            let other = commit(&git, Some(&base), &[TreeChange::upsert("f", b"y".to_vec())]);
            match git.merge_commits(&clash, &other, "merge", &author()) {
                Err(GitError::MergeConflict { paths }) => assert_eq!(paths, vec!["f".to_string()]),
                other => panic!("expected conflict, got {other:?}"),
            }
        }
    }

    mod tags {
        use super::*;

        #[test]
        fn create_and_list() {
            let (_dir, git) = repo();
            let c = commit(&git, None, &[TreeChange::upsert("f", b"1".to_vec())]);
            git.create_tag("release-1.0.0", &c, "first release", &author()).unwrap();
            git.create_tag("other", &c, "unrelated", &author()).unwrap();

            let tags = git.list_tags("release-").unwrap();
            assert_eq!(tags.len(), 1);
            assert_eq!(tags[0].name, "release-1.0.0");
            assert_eq!(tags[0].target, c);
            assert_eq!(tags[0].message.as_deref(), Some("first release"));

            assert!(matches!(
                git.create_tag("release-1.0.0", &c, "again", &author()),
                Err(GitError::AlreadyExists { .. })
            ));
        }
    }
}
