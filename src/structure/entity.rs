//! structure::entity
//!
//! Serialization of entities to and from their JSON files.
//!
//! The entity content may carry `package` and `name` properties. When present
//! they must agree with the entity path; when absent they are filled in on
//! write so that every stored file is self-describing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StructureError;
use crate::core::model::{Entity, EntityContent};
use crate::core::types::EntityPath;

const PACKAGE_KEY: &str = "package";
const NAME_KEY: &str = "name";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityFile {
    classifier_path: String,
    content: EntityContent,
}

fn invalid(path: &EntityPath, message: impl Into<String>) -> StructureError {
    StructureError::InvalidEntityFile {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Check the `package`/`name` properties of `content` against `path`.
fn check_identity(path: &EntityPath, content: &EntityContent) -> Result<(), StructureError> {
    if let Some(value) = content.get(PACKAGE_KEY) {
        let expected = path.package().unwrap_or("");
        if value.as_str() != Some(expected) {
            return Err(invalid(
                path,
                format!("content package {value} does not match '{expected}'"),
            ));
        }
    }
    if let Some(value) = content.get(NAME_KEY) {
        if value.as_str() != Some(path.name()) {
            return Err(invalid(
                path,
                format!("content name {value} does not match '{}'", path.name()),
            ));
        }
    }
    Ok(())
}

/// Serialize an entity into file contents.
///
/// # Errors
///
/// Returns [`StructureError::InvalidEntityFile`] if the classifier path is
/// empty or the content's `package`/`name` disagree with the entity path.
pub fn encode_entity(entity: &Entity) -> Result<Vec<u8>, StructureError> {
    if entity.classifier_path.trim().is_empty() {
        return Err(invalid(&entity.path, "classifier path is required"));
    }
    check_identity(&entity.path, &entity.content)?;

    let mut content = entity.content.clone();
    if let Some(package) = entity.path.package() {
        content
            .entry(PACKAGE_KEY)
            .or_insert_with(|| Value::String(package.to_string()));
    }
    content
        .entry(NAME_KEY)
        .or_insert_with(|| Value::String(entity.path.name().to_string()));

    let file = EntityFile {
        classifier_path: entity.classifier_path.clone(),
        content,
    };
    let mut bytes =
        serde_json::to_vec_pretty(&file).map_err(|e| invalid(&entity.path, e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse file contents into the entity at `path`.
///
/// # Errors
///
/// Returns [`StructureError::InvalidEntityFile`] for malformed JSON or a
/// content identity that disagrees with the file location.
pub fn decode_entity(path: EntityPath, bytes: &[u8]) -> Result<Entity, StructureError> {
    let file: EntityFile =
        serde_json::from_slice(bytes).map_err(|e| invalid(&path, e.to_string()))?;
    check_identity(&path, &file.content)?;
    Ok(Entity {
        path,
        classifier_path: file.classifier_path,
        content: file.content,
    })
}
