//! structure
//!
//! Project structure: where files live in a project's repository and how
//! they are serialized.
//!
//! # Layout
//!
//! Every project has a `project.json` at the repository root holding its
//! [`ProjectConfiguration`]. The configuration's structure version selects
//! the entity root:
//!
//! - version 0: `entities/`
//! - version 1: `<artifactId>-entities/src/main/resources/entities/`
//!
//! An entity `a::b::Name` is stored at `<root>/a/b/Name.json` as a JSON
//! object `{ "classifierPath": ..., "content": ... }`.
//!
//! # Example
//!
//! ```
//! use sdlc_server::core::types::{EntityPath, ProjectId};
//! use sdlc_server::structure::{ProjectConfiguration, ProjectStructure};
//!
//! let config = ProjectConfiguration::new(
//!     ProjectId::new("p1").unwrap(),
//!     "org.finos",
//!     "trade-model",
//! );
//! let layout = ProjectStructure::layout(&config).unwrap();
//! let path = EntityPath::new("model::Trade").unwrap();
//! assert_eq!(
//!     layout.file_path(&path),
//!     "trade-model-entities/src/main/resources/entities/model/Trade.json"
//! );
//! ```

mod configuration;
mod entity;
mod layout;

use thiserror::Error;

pub use configuration::{
    ProjectConfiguration, ProjectConfigurationUpdate, ProjectDependency, PROJECT_CONFIG_FILE,
};
pub use entity::{decode_entity, encode_entity};
pub use layout::{EntityLayout, ProjectStructure};

/// Errors from project structure handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    /// The configuration names a structure version this server does not know.
    #[error("unknown project structure version {0}")]
    UnknownVersion(u32),

    /// Structure versions can only move forward.
    #[error("cannot change project structure version from {from} to {to}")]
    Downgrade { from: u32, to: u32 },

    /// The project configuration is malformed or inconsistent.
    #[error("invalid project configuration: {0}")]
    InvalidConfiguration(String),

    /// An entity file could not be parsed or produced.
    #[error("invalid entity file {path}: {message}")]
    InvalidEntityFile { path: String, message: String },
}
