//! structure::layout
//!
//! Mapping between entity paths and repository file paths.

use super::{ProjectConfiguration, StructureError};
use crate::core::types::EntityPath;

/// File extension of entity files.
const ENTITY_FILE_EXTENSION: &str = ".json";

/// A known project structure version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectStructure {
    version: u32,
}

impl ProjectStructure {
    /// The structure version given to new projects.
    pub const LATEST_VERSION: u32 = 1;

    /// Look up a structure version.
    pub fn new(version: u32) -> Result<Self, StructureError> {
        if version > Self::LATEST_VERSION {
            return Err(StructureError::UnknownVersion(version));
        }
        Ok(Self { version })
    }

    pub fn latest() -> Self {
        Self {
            version: Self::LATEST_VERSION,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Directory holding entity files for a project with this structure.
    pub fn entity_root(&self, artifact_id: &str) -> String {
        match self.version {
            0 => "entities".to_string(),
            _ => format!("{artifact_id}-entities/src/main/resources/entities"),
        }
    }

    /// The entity layout of a configured project.
    pub fn layout(config: &ProjectConfiguration) -> Result<EntityLayout, StructureError> {
        let structure = Self::new(config.project_structure_version)?;
        Ok(EntityLayout {
            root: structure.entity_root(&config.artifact_id),
        })
    }
}

/// Resolved location of entity files within a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLayout {
    root: String,
}

impl EntityLayout {
    /// Layout rooted at an explicit directory.
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Entity root directory, without a trailing slash.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Repository path of an entity's file.
    pub fn file_path(&self, path: &EntityPath) -> String {
        let relative: Vec<&str> = path.segments().collect();
        format!("{}/{}{ENTITY_FILE_EXTENSION}", self.root, relative.join("/"))
    }

    /// Directory of a package, for scoped listings.
    pub fn package_dir(&self, package: &str) -> String {
        let relative: Vec<&str> = package.split(EntityPath::SEPARATOR).collect();
        format!("{}/{}", self.root, relative.join("/"))
    }

    /// Entity path of a repository file, or `None` for files outside the
    /// entity root or with an unexpected shape.
    pub fn entity_path(&self, file: &str) -> Option<EntityPath> {
        let relative = file.strip_prefix(&self.root)?.strip_prefix('/')?;
        let relative = relative.strip_suffix(ENTITY_FILE_EXTENSION)?;
        let joined = relative.split('/').collect::<Vec<_>>().join(EntityPath::SEPARATOR);
        EntityPath::new(joined).ok()
    }

    /// Whether a repository file is an entity file under this layout.
    pub fn is_entity_file(&self, file: &str) -> bool {
        self.entity_path(file).is_some()
    }

    /// Where `file` lands under `target`, when it is an entity file here.
    pub fn relocate(&self, file: &str, target: &EntityLayout) -> Option<String> {
        self.entity_path(file).map(|path| target.file_path(&path))
    }
}
