//! structure::configuration
//!
//! The `project.json` file describing a project's identity, structure
//! version, and dependencies.

use serde::{Deserialize, Serialize};

use super::{ProjectStructure, StructureError};
use crate::core::types::{ProjectId, VersionId};

/// Repository path of the project configuration file.
pub const PROJECT_CONFIG_FILE: &str = "project.json";

/// A dependency on a released version of another project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDependency {
    /// `groupId:artifactId` of the dependency.
    pub project_id: String,
    pub version_id: VersionId,
}

impl ProjectDependency {
    fn validate(&self) -> Result<(), StructureError> {
        let (group, artifact) = self.project_id.split_once(':').ok_or_else(|| {
            StructureError::InvalidConfiguration(format!(
                "dependency '{}' must be groupId:artifactId",
                self.project_id
            ))
        })?;
        check_group_id(group)?;
        check_artifact_id(artifact)
    }
}

/// Contents of `project.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfiguration {
    pub project_structure_version: u32,
    pub project_id: ProjectId,
    pub group_id: String,
    pub artifact_id: String,
    #[serde(default)]
    pub project_dependencies: Vec<ProjectDependency>,
}

fn check_group_id(group_id: &str) -> Result<(), StructureError> {
    let valid = !group_id.is_empty()
        && group_id.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(StructureError::InvalidConfiguration(format!(
            "invalid groupId '{group_id}'"
        )))
    }
}

fn check_artifact_id(artifact_id: &str) -> Result<(), StructureError> {
    let mut chars = artifact_id.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StructureError::InvalidConfiguration(format!(
            "invalid artifactId '{artifact_id}'"
        )))
    }
}

impl ProjectConfiguration {
    /// Configuration for a new project at the latest structure version.
    pub fn new(project_id: ProjectId, group_id: &str, artifact_id: &str) -> Self {
        Self {
            project_structure_version: ProjectStructure::LATEST_VERSION,
            project_id,
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            project_dependencies: Vec::new(),
        }
    }

    /// Check identifiers, structure version, and dependencies.
    pub fn validate(&self) -> Result<(), StructureError> {
        ProjectStructure::new(self.project_structure_version)?;
        check_group_id(&self.group_id)?;
        check_artifact_id(&self.artifact_id)?;

        let own_id = self.coordinates();
        let mut seen = std::collections::HashSet::new();
        for dependency in &self.project_dependencies {
            dependency.validate()?;
            if dependency.project_id == own_id {
                return Err(StructureError::InvalidConfiguration(
                    "a project cannot depend on itself".into(),
                ));
            }
            if !seen.insert(dependency.project_id.as_str()) {
                return Err(StructureError::InvalidConfiguration(format!(
                    "duplicate dependency on '{}'",
                    dependency.project_id
                )));
            }
        }
        Ok(())
    }

    /// `groupId:artifactId` of this project.
    pub fn coordinates(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }

    /// Parse `project.json` contents.
    pub fn from_file_content(bytes: &[u8]) -> Result<Self, StructureError> {
        let config: Self = serde_json::from_slice(bytes).map_err(|e| {
            StructureError::InvalidConfiguration(format!("{PROJECT_CONFIG_FILE}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to `project.json` contents.
    pub fn to_file_content(&self) -> Result<Vec<u8>, StructureError> {
        let mut bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| StructureError::InvalidConfiguration(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Requested changes to a project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfigurationUpdate {
    pub project_structure_version: Option<u32>,
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub project_dependencies_to_add: Vec<ProjectDependency>,
    #[serde(default)]
    pub project_dependencies_to_remove: Vec<ProjectDependency>,
}

impl ProjectConfigurationUpdate {
    pub fn is_empty(&self) -> bool {
        self.project_structure_version.is_none()
            && self.group_id.is_none()
            && self.artifact_id.is_none()
            && self.project_dependencies_to_add.is_empty()
            && self.project_dependencies_to_remove.is_empty()
    }

    /// Apply this update to `current`, producing the new configuration.
    ///
    /// # Errors
    ///
    /// - [`StructureError::Downgrade`] for a lower structure version
    /// - [`StructureError::UnknownVersion`] for an unsupported one
    /// - [`StructureError::InvalidConfiguration`] when removing a dependency
    ///   that is not present, or when the result fails validation
    pub fn apply(
        &self,
        current: &ProjectConfiguration,
    ) -> Result<ProjectConfiguration, StructureError> {
        let mut next = current.clone();

        if let Some(version) = self.project_structure_version {
            if version < current.project_structure_version {
                return Err(StructureError::Downgrade {
                    from: current.project_structure_version,
                    to: version,
                });
            }
            ProjectStructure::new(version)?;
            next.project_structure_version = version;
        }
        if let Some(group_id) = &self.group_id {
            next.group_id = group_id.clone();
        }
        if let Some(artifact_id) = &self.artifact_id {
            next.artifact_id = artifact_id.clone();
        }

        for removed in &self.project_dependencies_to_remove {
            let before = next.project_dependencies.len();
            next.project_dependencies.retain(|d| d != removed);
            if next.project_dependencies.len() == before {
                return Err(StructureError::InvalidConfiguration(format!(
                    "dependency {}:{} is not present",
                    removed.project_id, removed.version_id
                )));
            }
        }
        next.project_dependencies
            .extend(self.project_dependencies_to_add.iter().cloned());
        next.project_dependencies
            .sort_by(|a, b| (&a.project_id, a.version_id).cmp(&(&b.project_id, b.version_id)));

        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ProjectConfiguration {
        ProjectConfiguration::new(ProjectId::new("p1").unwrap(), "org.example", "model")
    }

    fn dep(id: &str, version: &str) -> ProjectDependency {
        ProjectDependency {
            project_id: id.to_string(),
            version_id: version.parse().unwrap(),
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn new_configuration_is_valid() {
            assert!(base().validate().is_ok());
            assert_eq!(base().project_structure_version, 1);
        }

        #[test]
        fn identifiers() {
            let mut config = base();
            config.group_id = "org..example".into();
            assert!(config.validate().is_err());

            let mut config = base();
            config.artifact_id = "Model".into();
            assert!(config.validate().is_err());

            let mut config = base();
            config.artifact_id = "-model".into();
            assert!(config.validate().is_err());
        }

        #[test]
        fn dependencies() {
            let mut config = base();
            config.project_dependencies = vec![dep("org.other:lib", "1.0.0")];
            assert!(config.validate().is_ok());

            config.project_dependencies.push(dep("org.other:lib", "2.0.0"));
            assert!(config.validate().is_err());

            let mut config = base();
            config.project_dependencies = vec![dep("org.example:model", "1.0.0")];
            assert!(config.validate().is_err());

            let mut config = base();
            config.project_dependencies = vec![dep("no-colon", "1.0.0")];
            assert!(config.validate().is_err());
        }
    }

    mod file_format {
        use super::*;

        #[test]
        fn camel_case_keys() {
            let bytes = base().to_file_content().unwrap();
            let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value["projectStructureVersion"], 1);
            assert_eq!(value["groupId"], "org.example");
            assert_eq!(value["artifactId"], "model");
            assert_eq!(value["projectId"], "p1");
            assert!(bytes.ends_with(b"\n"));
        }

        #[test]
        fn rejects_invalid_content() {
            assert!(ProjectConfiguration::from_file_content(b"{}").is_err());
            assert!(ProjectConfiguration::from_file_content(b"not json").is_err());
            let bytes = br#"{"projectStructureVersion":9,"projectId":"p","groupId":"g","artifactId":"a"}"#;
            assert_eq!(
                ProjectConfiguration::from_file_content(bytes),
                Err(StructureError::UnknownVersion(9))
            );
        }
    }

    mod updates {
        use super::*;

        #[test]
        fn changes_identity() {
            let update = ProjectConfigurationUpdate {
                group_id: Some("org.new".into()),
                artifact_id: Some("renamed".into()),
                ..Default::default()
            };
            let next = update.apply(&base()).unwrap();
            assert_eq!(next.coordinates(), "org.new:renamed");
        }

        #[test]
        fn rejects_downgrade() {
            let update = ProjectConfigurationUpdate {
                project_structure_version: Some(0),
                ..Default::default()
            };
            assert_eq!(
                update.apply(&base()),
                Err(StructureError::Downgrade { from: 1, to: 0 })
            );
        }

        #[test]
        fn upgrades_structure() {
            let mut current = base();
            current.project_structure_version = 0;
            let update = ProjectConfigurationUpdate {
                project_structure_version: Some(1),
                ..Default::default()
            };
            assert_eq!(update.apply(&current).unwrap().project_structure_version, 1);
        }

        #[test]
        fn dependency_add_and_remove() {
            let mut current = base();
            current.project_dependencies = vec![dep("org.a:x", "1.0.0")];

            let update = ProjectConfigurationUpdate {
                project_dependencies_to_add: vec![dep("org.a:x", "2.0.0"), dep("org.b:y", "1.0.0")],
                project_dependencies_to_remove: vec![dep("org.a:x", "1.0.0")],
                ..Default::default()
            };
            let next = update.apply(&current).unwrap();
            assert_eq!(
                next.project_dependencies,
                vec![dep("org.a:x", "2.0.0"), dep("org.b:y", "1.0.0")]
            );

            let missing = ProjectConfigurationUpdate {
                project_dependencies_to_remove: vec![dep("org.c:z", "1.0.0")],
                ..Default::default()
            };
            assert!(missing.apply(&current).is_err());
        }
    }
}
