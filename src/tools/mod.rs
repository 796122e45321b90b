//! The MCP tool surface: names, JSON Schemas, and typed arguments.
//!
//! Five tools are exposed: direct-mode `http_request` and `ssh_exec`,
//! their resource-mode siblings, and `list_resources`. The resource-mode
//! adapters live in [`adapter`].

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub mod adapter;

pub const HTTP_REQUEST: &str = "http_request";
pub const HTTP_REQUEST_RESOURCE: &str = "http_request_resource";
pub const SSH_EXEC: &str = "ssh_exec";
pub const SSH_EXEC_RESOURCE: &str = "ssh_exec_resource";
pub const LIST_RESOURCES: &str = "list_resources";

/// Capability tokens gating resource-mode dispatch.
pub const CAP_HTTP_REQUEST: &str = "http.request";
pub const CAP_SSH_EXEC: &str = "ssh.exec";

/// Direct-mode HTTP arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpRequestArgs {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Resource-mode HTTP arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpRequestResourceArgs {
    pub resource: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Direct-mode SSH arguments. `commands` is accepted as an alias for
/// `command`.
#[derive(Debug, Clone, Deserialize)]
pub struct SshExecArgs {
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(alias = "commands")]
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Resource-mode SSH arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct SshExecResourceArgs {
    pub resource: String,
    #[serde(alias = "commands")]
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// `list_resources` arguments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResourcesArgs {
    #[serde(default)]
    pub filter: Option<ListResourcesFilter>,
    #[serde(default)]
    pub pagination: Option<ListResourcesPagination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResourcesFilter {
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default, rename = "loaderType")]
    pub loader_type: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResourcesPagination {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

/// The `tools/list` payload: every exposed tool with its input schema.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": HTTP_REQUEST,
            "description": "Issue an HTTP request to an arbitrary URL",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "method": {"type": "string", "description": "HTTP method, default GET"},
                    "url": {"type": "string", "description": "Absolute http(s) URL"},
                    "headers": {"type": "object", "additionalProperties": {"type": "string"}},
                    "body": {"type": "string"},
                    "timeout": {"type": "number", "description": "Timeout in milliseconds"}
                },
                "required": ["url"]
            }
        }),
        json!({
            "name": HTTP_REQUEST_RESOURCE,
            "description": "Issue an HTTP request against a registered http-api resource",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "resource": {"type": "string", "description": "Resource identifier (type://loaderType/loaderId/resourceId)"},
                    "method": {"type": "string"},
                    "path": {"type": "string", "description": "Path joined onto the resource baseUrl"},
                    "headers": {"type": "object", "additionalProperties": {"type": "string"}},
                    "body": {"type": "string"},
                    "timeout": {"type": "number"}
                },
                "required": ["resource"]
            }
        }),
        json!({
            "name": SSH_EXEC,
            "description": "Run a command on a remote host over SSH",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "host": {"type": "string", "description": "host, host:port or [ipv6]:port"},
                    "username": {"type": "string"},
                    "password": {"type": "string"},
                    "command": {"type": "string"},
                    "timeout": {"type": "number"}
                },
                "required": ["host", "username", "password", "command"]
            }
        }),
        json!({
            "name": SSH_EXEC_RESOURCE,
            "description": "Run a command on a registered ssh-host resource",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "resource": {"type": "string"},
                    "command": {"type": "string"},
                    "timeout": {"type": "number"}
                },
                "required": ["resource", "command"]
            }
        }),
        json!({
            "name": LIST_RESOURCES,
            "description": "List registered resources with optional filter and pagination",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "filter": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string"},
                            "loaderType": {"type": "string", "enum": ["local", "remote"]},
                            "capabilities": {"type": "array", "items": {"type": "string"}},
                            "labels": {"type": "object", "additionalProperties": {"type": "string"}}
                        }
                    },
                    "pagination": {
                        "type": "object",
                        "properties": {
                            "limit": {"type": "number", "minimum": 1, "maximum": 1000},
                            "offset": {"type": "number", "minimum": 0}
                        }
                    }
                }
            }
        }),
    ]
}
