//! Structural validation of a raw configuration tree.
//!
//! Runs before the typed deserialization so that a tree that would
//! silently drop sections is rejected with a message naming the file
//! and the offending key. Unknown keys are left alone.

use crate::error::{ErrorCode, GatewayError, Result};
use serde_json::Value;
use std::path::Path;

const OBJECT_SECTIONS: &[&str] = &["http", "ssh", "security", "transport", "logging"];

/// Validate the shape of a parsed tree. Only structure is checked here;
/// value-level constraints live in the typed layer.
pub fn validate_tree(tree: &Value, path: &Path) -> Result<()> {
    let obj = tree.as_object().ok_or_else(|| {
        invalid(path, "configuration root must be an object".to_string())
    })?;

    for section in OBJECT_SECTIONS {
        if let Some(value) = obj.get(*section) {
            if !value.is_object() {
                return Err(invalid(path, format!("'{section}' must be an object")));
            }
        }
    }

    if let Some(resources) = obj.get("resources") {
        let resources = resources
            .as_object()
            .ok_or_else(|| invalid(path, "'resources' must be an object".to_string()))?;
        if let Some(loaders) = resources.get("loaders") {
            let loaders = loaders
                .as_array()
                .ok_or_else(|| invalid(path, "'resources.loaders' must be an array".to_string()))?;
            for (index, loader) in loaders.iter().enumerate() {
                validate_loader(loader, index, path)?;
            }
        }
    }

    Ok(())
}

fn validate_loader(loader: &Value, index: usize, path: &Path) -> Result<()> {
    let obj = loader
        .as_object()
        .ok_or_else(|| invalid(path, format!("loaders[{index}] must be an object")))?;

    let id = obj.get("id").and_then(Value::as_str).unwrap_or("");
    if id.is_empty() {
        return Err(invalid(
            path,
            format!("loaders[{index}] requires a non-empty string 'id'"),
        ));
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("local") => {
            let has_files = obj
                .get("files")
                .and_then(Value::as_array)
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            let has_dir = obj.get("directory").and_then(Value::as_str).is_some();
            if !has_files && !has_dir {
                return Err(invalid(
                    path,
                    format!("local loader '{id}' requires a non-empty 'files' list or a 'directory'"),
                ));
            }
        }
        Some("remote") => {
            let base_url = obj.get("baseUrl").and_then(Value::as_str).unwrap_or("");
            if base_url.is_empty() {
                return Err(invalid(
                    path,
                    format!("remote loader '{id}' requires a non-empty 'baseUrl'"),
                ));
            }
        }
        Some(other) => {
            return Err(invalid(
                path,
                format!("loader '{id}' has unknown type '{other}' (expected local or remote)"),
            ));
        }
        None => {
            return Err(invalid(
                path,
                format!("loader '{id}' is missing the 'type' discriminator"),
            ));
        }
    }

    Ok(())
}

fn invalid(path: &Path, message: String) -> GatewayError {
    GatewayError::new(
        ErrorCode::ConfigValidationFailed,
        format!("{}: {message}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn check(tree: Value) -> Result<()> {
        validate_tree(&tree, &PathBuf::from("test.json"))
    }

    #[test]
    fn sections_must_be_objects() {
        assert!(check(json!({"http": {}})).is_ok());
        assert!(check(json!({"http": 5})).is_err());
        assert!(check(json!({"logging": "debug"})).is_err());
        assert!(check(json!([])).is_err());
    }

    #[test]
    fn unknown_top_level_keys_are_preserved() {
        assert!(check(json!({"future_section": {"anything": 1}})).is_ok());
    }

    #[test]
    fn loader_entries_are_checked() {
        assert!(check(json!({"resources": {"loaders": [
            {"type": "local", "id": "a", "files": ["r.json"]}
        ]}}))
        .is_ok());

        // Missing id.
        assert!(check(json!({"resources": {"loaders": [
            {"type": "local", "files": ["r.json"]}
        ]}}))
        .is_err());

        // Local without files or directory.
        assert!(check(json!({"resources": {"loaders": [
            {"type": "local", "id": "a"}
        ]}}))
        .is_err());

        // Remote without baseUrl.
        assert!(check(json!({"resources": {"loaders": [
            {"type": "remote", "id": "b"}
        ]}}))
        .is_err());

        // Unknown type.
        assert!(check(json!({"resources": {"loaders": [
            {"type": "ftp", "id": "c"}
        ]}}))
        .is_err());
    }
}
