//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`BranchName`] - Validated Git branch name
//! - [`Oid`] - Git object identifier (SHA)
//! - [`RefName`] - Validated Git reference name
//! - [`ProjectId`] - Identifier of a project in the backing store
//! - [`WorkspaceId`] - Name of a workspace within a project
//! - [`UserId`] - Identifier of a user
//! - [`VersionId`] - Semantic `major.minor.patch` release identifier
//! - [`EntityPath`] - `package::sub::Name` path of an entity
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, so a `WorkspaceId` can always be embedded in a
//! branch name and an `EntityPath` always maps to a file path.
//!
//! # Examples
//!
//! ```
//! use sdlc_server::core::types::{BranchName, EntityPath, RefName, VersionId};
//!
//! let branch = BranchName::new("workspace/alice/ws1").unwrap();
//! assert_eq!(RefName::for_branch(&branch).as_str(), "refs/heads/workspace/alice/ws1");
//!
//! let version: VersionId = "1.2.3".parse().unwrap();
//! assert_eq!(version.to_tag_name(), "release-1.2.3");
//!
//! let path = EntityPath::new("model::domain::Person").unwrap();
//! assert_eq!(path.package(), Some("model::domain"));
//! assert!(EntityPath::new("model::").is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("invalid workspace id: {0}")]
    InvalidWorkspaceId(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("invalid version id: {0}")]
    InvalidVersionId(String),

    #[error("invalid entity path: {0}")]
    InvalidEntityPath(String),
}

/// Implements the string conversions shared by every validated newtype.
macro_rules! string_newtype {
    ($ty:ident) => {
        impl $ty {
            /// Get the value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = TypeError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Check a name against Git's refname rules (see `git check-ref-format`).
///
/// Returns a description of the first violated rule.
fn check_ref_format(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".into());
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err("name cannot start or end with '/'".into());
    }
    if name.ends_with('.') {
        return Err("name cannot end with '.'".into());
    }
    if name.ends_with(".lock") {
        return Err("name cannot end with '.lock'".into());
    }
    for pattern in ["..", "@{", "//"] {
        if name.contains(pattern) {
            return Err(format!("name cannot contain '{pattern}'"));
        }
    }

    const INVALID_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];
    if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
        return Err(format!("name cannot contain '{c}'"));
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err("name cannot contain control characters".into());
    }

    for component in name.split('/') {
        if component.starts_with('.') {
            return Err("path component cannot start with '.'".into());
        }
        if component.ends_with(".lock") {
            return Err("path component cannot end with '.lock'".into());
        }
    }

    Ok(())
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules, must not start with
/// `-` and must not be exactly `@`.
///
/// # Example
///
/// ```
/// use sdlc_server::core::types::BranchName;
///
/// let name = BranchName::new("patch/1.0.1").unwrap();
/// assert_eq!(name.as_str(), "patch/1.0.1");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new("has space").is_err());
/// assert!(BranchName::new("@").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name == "@" {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be '@' (reserved)".into(),
            ));
        }
        if name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot start with '-'".into(),
            ));
        }
        check_ref_format(&name).map_err(TypeError::InvalidBranchName)?;
        Ok(Self(name))
    }

    /// Wrap a name assembled from already-validated components.
    pub(crate) fn from_validated_parts(name: String) -> Self {
        debug_assert!(check_ref_format(&name).is_ok(), "invalid branch name {name}");
        Self(name)
    }
}

string_newtype!(BranchName);

/// A Git object identifier (SHA-1 or SHA-256).
///
/// OIDs are normalized to lowercase for consistency.
///
/// # Example
///
/// ```
/// use sdlc_server::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// The OID is normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a valid hex OID.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        // SHA-1 is 40 hex chars, SHA-256 is 64
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Check if this is the zero/null OID.
    pub fn is_zero(&self) -> bool {
        self.0.chars().all(|c| c == '0')
    }

    /// Get an abbreviated form of the OID.
    ///
    /// Returns the first `len` characters. If `len` exceeds the OID length,
    /// returns the full OID.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }
}

string_newtype!(Oid);

/// A validated Git reference name.
///
/// # Example
///
/// ```
/// use sdlc_server::core::types::{BranchName, RefName};
///
/// let branch = BranchName::new("group/shared").unwrap();
/// assert_eq!(RefName::for_branch(&branch).as_str(), "refs/heads/group/shared");
/// assert_eq!(RefName::for_tag("release-1.0.0").unwrap().as_str(), "refs/tags/release-1.0.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Prefix of all branch refs.
    pub const HEADS: &'static str = "refs/heads/";

    /// Prefix of all tag refs.
    pub const TAGS: &'static str = "refs/tags/";

    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_ref_format(&name).map_err(TypeError::InvalidRefName)?;
        Ok(Self(name))
    }

    /// Create a ref name for a branch (`refs/heads/<branch>`).
    pub fn for_branch(branch: &BranchName) -> Self {
        // Branch names are validated with the same rules
        Self(format!("{}{}", Self::HEADS, branch.as_str()))
    }

    /// Create a ref name for a tag (`refs/tags/<tag>`).
    pub fn for_tag(tag: &str) -> Result<Self, TypeError> {
        Self::new(format!("{}{}", Self::TAGS, tag))
    }

    /// Strip a prefix from the ref name and return the remainder.
    ///
    /// Returns `None` if the ref doesn't start with the given prefix.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }

    /// Check if this ref is a branch ref.
    pub fn is_branch_ref(&self) -> bool {
        self.0.starts_with(Self::HEADS)
    }
}

string_newtype!(RefName);

/// Check that `value` is made of `[A-Za-z0-9_.-]` and does not start or end with `.`.
fn check_identifier(value: &str, max_len: usize) -> Result<(), String> {
    if value.is_empty() {
        return Err("cannot be empty".into());
    }
    if value.len() > max_len {
        return Err(format!("cannot be longer than {max_len} characters"));
    }
    if value.starts_with('.') {
        return Err("cannot start with '.'".into());
    }
    if value.ends_with('.') {
        return Err("cannot end with '.'".into());
    }
    if value.ends_with(".lock") {
        return Err("cannot end with '.lock'".into());
    }
    if value.contains("..") {
        return Err("cannot contain '..'".into());
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(format!("cannot contain '{c}'"));
    }
    Ok(())
}

/// Identifier of a project.
///
/// On GitLab this is the numeric project id; on the filesystem backend it is
/// the name of the bare repository directory (without `.git`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a new validated project id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        check_identifier(&id, 255).map_err(TypeError::InvalidProjectId)?;
        Ok(Self(id))
    }
}

string_newtype!(ProjectId);

/// Name of a workspace, unique per user (or per project for group workspaces).
///
/// # Example
///
/// ```
/// use sdlc_server::core::types::WorkspaceId;
///
/// assert!(WorkspaceId::new("feature_1").is_ok());
/// assert!(WorkspaceId::new("-bad").is_err());
/// assert!(WorkspaceId::new("has/slash").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Maximum length of a workspace id.
    pub const MAX_LEN: usize = 100;

    /// Create a new validated workspace id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.starts_with('-') {
            return Err(TypeError::InvalidWorkspaceId(
                "cannot start with '-'".into(),
            ));
        }
        check_identifier(&id, Self::MAX_LEN).map_err(TypeError::InvalidWorkspaceId)?;
        Ok(Self(id))
    }
}

string_newtype!(WorkspaceId);

/// Identifier of a user (GitLab username or local user name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new validated user id.
    ///
    /// User ids are embedded in workspace branch names, so they must be a
    /// single valid ref component.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.contains('/') {
            return Err(TypeError::InvalidUserId("cannot contain '/'".into()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidUserId(
                "cannot contain whitespace".into(),
            ));
        }
        if id.starts_with('-') {
            return Err(TypeError::InvalidUserId("cannot start with '-'".into()));
        }
        check_ref_format(&id).map_err(TypeError::InvalidUserId)?;
        Ok(Self(id))
    }
}

string_newtype!(UserId);

/// Which component of a version to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionType {
    Major,
    Minor,
    Patch,
}

/// A released version, `major.minor.patch`.
///
/// Versions order numerically component by component.
///
/// # Example
///
/// ```
/// use sdlc_server::core::types::{VersionId, VersionType};
///
/// let v: VersionId = "1.4.2".parse().unwrap();
/// assert_eq!(v.next(VersionType::Minor).unwrap().to_string(), "1.5.0");
/// assert!(v < "1.10.0".parse().unwrap());
/// assert_eq!(VersionId::from_tag_name("release-1.4.2"), Some(v));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    major: u32,
    minor: u32,
    patch: u32,
}

impl VersionId {
    /// Prefix of release tags.
    pub const TAG_PREFIX: &'static str = "release-";

    /// Create a version from its components.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// The version following this one for the given increment.
    ///
    /// Fails when the bumped component would overflow.
    pub fn next(&self, kind: VersionType) -> Result<Self, TypeError> {
        let bump = |n: u32| {
            n.checked_add(1).ok_or_else(|| {
                TypeError::InvalidVersionId(format!("no {kind:?} version follows {self}"))
            })
        };
        Ok(match kind {
            VersionType::Major => Self::new(bump(self.major)?, 0, 0),
            VersionType::Minor => Self::new(self.major, bump(self.minor)?, 0),
            VersionType::Patch => Self::new(self.major, self.minor, bump(self.patch)?),
        })
    }

    /// Name of the tag marking this release.
    pub fn to_tag_name(&self) -> String {
        format!("{}{}", Self::TAG_PREFIX, self)
    }

    /// Parse a release tag name; returns `None` for unrelated tags.
    pub fn from_tag_name(tag: &str) -> Option<Self> {
        tag.strip_prefix(Self::TAG_PREFIX)?.parse().ok()
    }
}

impl FromStr for VersionId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidVersionId(format!("'{s}' is not major.minor.patch"));
        let mut parts = s.split('.');
        let mut component = || -> Result<u32, TypeError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let version = Self::new(component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for VersionId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VersionId> for String {
    fn from(v: VersionId) -> Self {
        v.to_string()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Path of an entity: package segments and a name joined by `::`.
///
/// Each segment is `[A-Za-z0-9_$]+` and must not start with `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityPath(String);

impl EntityPath {
    /// Separator between package segments.
    pub const SEPARATOR: &'static str = "::";

    /// Create a new validated entity path.
    pub fn new(path: impl Into<String>) -> Result<Self, TypeError> {
        let path = path.into();
        for segment in path.split(Self::SEPARATOR) {
            Self::check_segment(segment)
                .map_err(|msg| TypeError::InvalidEntityPath(format!("'{path}': {msg}")))?;
        }
        Ok(Self(path))
    }

    /// Build a path from a package and a name.
    pub fn from_parts(package: Option<&str>, name: &str) -> Result<Self, TypeError> {
        match package {
            Some(pkg) if !pkg.is_empty() => Self::new(format!("{pkg}{}{name}", Self::SEPARATOR)),
            _ => Self::new(name),
        }
    }

    /// Check whether a string is a valid package path.
    pub fn is_valid_package(package: &str) -> bool {
        package
            .split(Self::SEPARATOR)
            .all(|segment| Self::check_segment(segment).is_ok())
    }

    fn check_segment(segment: &str) -> Result<(), &'static str> {
        if segment.is_empty() {
            return Err("empty segment");
        }
        if segment.starts_with('$') {
            return Err("segment cannot start with '$'");
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err("segment may only contain letters, digits, '_' and '$'");
        }
        Ok(())
    }

    /// The package part, or `None` for a top-level entity.
    pub fn package(&self) -> Option<&str> {
        self.0.rsplit_once(Self::SEPARATOR).map(|(pkg, _)| pkg)
    }

    /// The simple name.
    pub fn name(&self) -> &str {
        self.0
            .rsplit_once(Self::SEPARATOR)
            .map_or(self.0.as_str(), |(_, name)| name)
    }

    /// Package and name segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR)
    }

    /// Whether this entity lives in `package`, or in one of its sub-packages
    /// when `include_sub_packages` is set.
    pub fn in_package(&self, package: &str, include_sub_packages: bool) -> bool {
        match self.package() {
            Some(pkg) if pkg == package => true,
            Some(pkg) if include_sub_packages => pkg
                .strip_prefix(package)
                .is_some_and(|rest| rest.starts_with(Self::SEPARATOR)),
            _ => false,
        }
    }
}

string_newtype!(EntityPath);
