//! Resource model: the typed entities the registry stores and the tool
//! adapters dispatch against.
//!
//! A resource is a logical backend endpoint produced by a loader,
//! mutated only through the registry, and destroyed only when the
//! registry is replaced on reload.

use crate::error::{ErrorCode, GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod credential;
pub mod identifier;
pub mod loader;
pub mod registry;

pub use credential::resolve_credential;
pub use identifier::{LoaderType, ResourceIdentifier};
pub use registry::ResourceRegistry;

/// Discriminated resource type. `database` and `kubernetes` are
/// reserved: they parse and register but no tool targets them yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "ssh-host")]
    SshHost,
    #[serde(rename = "http-api")]
    HttpApi,
    #[serde(rename = "database")]
    Database,
    #[serde(rename = "kubernetes")]
    Kubernetes,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::SshHost => "ssh-host",
            ResourceType::HttpApi => "http-api",
            ResourceType::Database => "database",
            ResourceType::Kubernetes => "kubernetes",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub security: SecurityInfo,
    #[serde(default)]
    pub auth: AuthRecord,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Type-specific connection settings, flattened. Which fields are
/// mandatory is decided by `resource_type`; see [`Resource::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub default_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    /// `env://NAME` or `file://PATH`, resolved on every use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Identifiers of resources this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Resource {
    /// Validate the definition: id alphabet and per-type mandatory
    /// connection fields.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(GatewayError::new(
                ErrorCode::ResourceInvalidDefinition,
                format!(
                    "resource id '{}' must be lowercase alphanumerics plus '-' or '_'",
                    self.id
                ),
            ));
        }

        match self.resource_type {
            ResourceType::SshHost => {
                if self.connection.host.as_deref().unwrap_or("").is_empty() {
                    return Err(GatewayError::new(
                        ErrorCode::ResourceInvalidDefinition,
                        format!("ssh-host resource '{}' requires connection.host", self.id),
                    ));
                }
            }
            ResourceType::HttpApi => {
                if self.connection.base_url.as_deref().unwrap_or("").is_empty() {
                    return Err(GatewayError::new(
                        ErrorCode::ResourceInvalidDefinition,
                        format!("http-api resource '{}' requires connection.baseUrl", self.id),
                    ));
                }
            }
            // Reserved types only need a well-formed id.
            ResourceType::Database | ResourceType::Kubernetes => {}
        }

        Ok(())
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ssh_resource(id: &str) -> Resource {
        serde_json::from_value(json!({
            "id": id,
            "name": "Web 01",
            "type": "ssh-host",
            "capabilities": ["ssh.exec"],
            "connection": {"host": "web-01.internal", "port": 22, "username": "deploy"}
        }))
        .unwrap()
    }

    #[test]
    fn ssh_resource_requires_host() {
        let mut res = ssh_resource("web-01");
        assert!(res.validate().is_ok());
        res.connection.host = None;
        assert!(res.validate().is_err());
    }

    #[test]
    fn http_resource_requires_base_url() {
        let res: Resource = serde_json::from_value(json!({
            "id": "billing-api",
            "name": "Billing",
            "type": "http-api"
        }))
        .unwrap();
        let err = res.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceInvalidDefinition);
    }

    #[test]
    fn id_alphabet_is_enforced() {
        let mut res = ssh_resource("web-01");
        res.id = "Web 01".to_string();
        assert!(res.validate().is_err());
        res.id = "web_01-a2".to_string();
        assert!(res.validate().is_ok());
    }

    #[test]
    fn timestamps_default_when_absent() {
        let res = ssh_resource("web-01");
        assert!(res.created_at <= Utc::now());
        assert!(res.enabled);
    }

    #[test]
    fn capability_lookup() {
        let res = ssh_resource("web-01");
        assert!(res.has_capability("ssh.exec"));
        assert!(!res.has_capability("http.request"));
    }
}
