//! Local file loader.
//!
//! Reads resource definitions from configured files and/or a directory.
//! JSON and YAML are parsed by extension; an array is many resources,
//! an object is one. Failures are collected per file and partial
//! results are still returned.

use crate::config::{LoaderConfig, LoaderFilter};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::resource::identifier::LoaderType;
use crate::resource::loader::{LoadOutcome, ResourceLoader};
use crate::resource::Resource;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalFileLoader {
    id: String,
    files: Vec<PathBuf>,
    directory: Option<PathBuf>,
    filter: Option<LoaderFilter>,
    name_regex: Option<Regex>,
}

impl LocalFileLoader {
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        let LoaderConfig::Local {
            id,
            files,
            directory,
            filter,
        } = config
        else {
            return Err(GatewayError::config("not a local loader declaration"));
        };

        let name_regex = match filter.as_ref().and_then(|f| f.name_regex.as_deref()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ConfigValidationFailed,
                    format!("loader '{id}': invalid nameRegex: {e}"),
                )
            })?),
            None => None,
        };

        Ok(Self {
            id: id.clone(),
            files: files.clone(),
            directory: directory.clone(),
            filter: filter.clone(),
            name_regex,
        })
    }

    fn candidate_files(&self) -> Vec<PathBuf> {
        let mut files = self.files.clone();
        if let Some(dir) = &self.directory {
            if let Ok(entries) = std::fs::read_dir(dir) {
                let mut found: Vec<PathBuf> = entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension()
                            .and_then(|e| e.to_str())
                            .map(|e| matches!(e, "json" | "yaml" | "yml"))
                            .unwrap_or(false)
                    })
                    .collect();
                found.sort();
                files.extend(found);
            }
        }
        files
    }

    fn parse_file(path: &Path) -> Result<Vec<Resource>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::new(
                ErrorCode::ResourceLoadFailed,
                format!("cannot read {}: {e}", path.display()),
            )
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let value: Value = match ext.as_str() {
            "json" => serde_json::from_str(&content).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceLoadFailed,
                    format!("{}: invalid JSON: {e}", path.display()),
                )
            })?,
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceLoadFailed,
                    format!("{}: invalid YAML: {e}", path.display()),
                )
            })?,
            // Source-code resource files are refused, matching the
            // config loader's posture.
            "js" | "ts" | "mjs" | "cjs" => {
                return Err(GatewayError::new(
                    ErrorCode::ConfigUnsupportedFormat,
                    format!(
                        "{}: source-code resource files are not evaluated",
                        path.display()
                    ),
                ))
            }
            other => {
                return Err(GatewayError::new(
                    ErrorCode::ConfigUnsupportedFormat,
                    format!("{}: unsupported resource format '{other}'", path.display()),
                ))
            }
        };

        Self::definitions_from_value(value, path)
    }

    /// Arrays hold many resources; a lone object is one.
    fn definitions_from_value(value: Value, path: &Path) -> Result<Vec<Resource>> {
        let raw_items = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            _ => {
                return Err(GatewayError::new(
                    ErrorCode::ResourceInvalidDefinition,
                    format!("{}: expected an object or an array", path.display()),
                ))
            }
        };

        let mut resources = Vec::with_capacity(raw_items.len());
        for (index, item) in raw_items.into_iter().enumerate() {
            let resource: Resource = serde_json::from_value(item).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceInvalidDefinition,
                    format!("{}[{index}]: {e}", path.display()),
                )
            })?;
            resources.push(resource);
        }
        Ok(resources)
    }

    fn passes_filter(&self, resource: &Resource) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        if !filter.types.is_empty()
            && !filter
                .types
                .iter()
                .any(|t| t == resource.resource_type.as_str())
        {
            return false;
        }
        if !filter.groups.is_empty() {
            let group = resource.metadata.group.as_deref().unwrap_or("");
            if !filter.groups.iter().any(|g| g == group) {
                return false;
            }
        }
        if !filter.tags.is_empty()
            && !filter
                .tags
                .iter()
                .any(|t| resource.metadata.tags.iter().any(|rt| rt == t))
        {
            return false;
        }
        if filter.enabled_only && !resource.enabled {
            return false;
        }
        if let Some(re) = &self.name_regex {
            if !re.is_match(&resource.name) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl ResourceLoader for LocalFileLoader {
    fn id(&self) -> &str {
        &self.id
    }

    fn loader_type(&self) -> LoaderType {
        LoaderType::Local
    }

    async fn load(&self) -> LoadOutcome {
        let mut outcome = LoadOutcome {
            success: true,
            ..Default::default()
        };

        for path in self.candidate_files() {
            match Self::parse_file(&path) {
                Ok(resources) => {
                    debug!(
                        loader = %self.id,
                        file = %path.display(),
                        count = resources.len(),
                        "loaded resource definitions"
                    );
                    outcome
                        .resources
                        .extend(resources.into_iter().filter(|r| self.passes_filter(r)));
                }
                Err(err) => {
                    outcome.success = false;
                    outcome.errors.push(err);
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn loader_for(files: Vec<PathBuf>, filter: Option<LoaderFilter>) -> LocalFileLoader {
        LocalFileLoader::from_config(&LoaderConfig::Local {
            id: "default".to_string(),
            files,
            directory: None,
            filter,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn loads_array_and_object_files() {
        let dir = TempDir::new().unwrap();
        let many = dir.path().join("many.json");
        fs::write(
            &many,
            r#"[
                {"id": "web-01", "name": "Web", "type": "ssh-host",
                 "connection": {"host": "web-01.internal"}},
                {"id": "api", "name": "API", "type": "http-api",
                 "connection": {"baseUrl": "https://api.internal"}}
            ]"#,
        )
        .unwrap();
        let one = dir.path().join("one.yaml");
        fs::write(
            &one,
            "id: db-01\nname: DB\ntype: ssh-host\nconnection:\n  host: db.internal\n",
        )
        .unwrap();

        let loader = loader_for(vec![many, one], None);
        let outcome = loader.load().await;
        assert!(outcome.success);
        assert_eq!(outcome.resources.len(), 3);
    }

    #[tokio::test]
    async fn failed_file_still_yields_partial_results() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        fs::write(
            &good,
            r#"{"id": "web-01", "name": "Web", "type": "ssh-host",
                "connection": {"host": "web-01.internal"}}"#,
        )
        .unwrap();
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{definitely not json").unwrap();

        let loader = loader_for(vec![good, bad], None);
        let outcome = loader.load().await;
        assert!(!outcome.success);
        assert_eq!(outcome.resources.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn directory_scan_picks_up_definition_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"id": "a", "name": "A", "type": "ssh-host", "connection": {"host": "a"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loader = LocalFileLoader::from_config(&LoaderConfig::Local {
            id: "dir".to_string(),
            files: vec![],
            directory: Some(dir.path().to_path_buf()),
            filter: None,
        })
        .unwrap();
        let outcome = loader.load().await;
        assert!(outcome.success);
        assert_eq!(outcome.resources.len(), 1);
    }

    #[tokio::test]
    async fn filters_apply_to_loaded_definitions() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("resources.json");
        fs::write(
            &file,
            r#"[
                {"id": "web-01", "name": "prod-web", "type": "ssh-host", "enabled": true,
                 "connection": {"host": "w"}, "metadata": {"tags": ["prod"]}},
                {"id": "web-02", "name": "dev-web", "type": "ssh-host", "enabled": false,
                 "connection": {"host": "w2"}, "metadata": {"tags": ["dev"]}},
                {"id": "api", "name": "prod-api", "type": "http-api",
                 "connection": {"baseUrl": "https://x"}, "metadata": {"tags": ["prod"]}}
            ]"#,
        )
        .unwrap();

        let loader = loader_for(
            vec![file.clone()],
            Some(LoaderFilter {
                types: vec!["ssh-host".to_string()],
                enabled_only: true,
                name_regex: Some("^prod-".to_string()),
                ..Default::default()
            }),
        );
        let outcome = loader.load().await;
        assert_eq!(outcome.resources.len(), 1);
        assert_eq!(outcome.resources[0].id, "web-01");

        let loader = loader_for(
            vec![file],
            Some(LoaderFilter {
                tags: vec!["prod".to_string()],
                ..Default::default()
            }),
        );
        let outcome = loader.load().await;
        assert_eq!(outcome.resources.len(), 2);
    }

    #[tokio::test]
    async fn source_code_resource_files_are_refused() {
        let dir = TempDir::new().unwrap();
        let js = dir.path().join("resources.js");
        fs::write(&js, "module.exports = []").unwrap();

        let loader = loader_for(vec![js], None);
        let outcome = loader.load().await;
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].code, ErrorCode::ConfigUnsupportedFormat);
    }
}
