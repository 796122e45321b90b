//! Configuration module for Omnigate.
//!
//! Handles layered resolution (CLI > environment > default search paths),
//! multi-format parsing, structural validation, and hot-reloading of the
//! configuration tree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub mod resolve;
pub mod validation;
pub mod watcher;

pub use resolve::{resolve_config, ConfigMeta, ConfigSource, ResolveOptions};
pub use watcher::{ConfigHandle, ConfigWatcher, WatchOptions};

/// The full configuration tree. Every section is optional in the file;
/// missing sections fall back to built-in defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
}

/// Outbound HTTP behavior (executor + remote loader defaults).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SshConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
    #[serde(default = "default_idle_linger_ms")]
    pub idle_linger_ms: u64,
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_interval_ms: u64,
    /// Optional algorithm negotiation lists. When absent the wire
    /// client's library defaults are used.
    #[serde(default)]
    pub algorithms: Option<SshAlgorithms>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct SshAlgorithms {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    #[serde(default)]
    pub kex: Vec<String>,
    #[serde(default)]
    pub cipher: Vec<String>,
    #[serde(default)]
    pub hmac: Vec<String>,
    #[serde(default)]
    pub hostkey: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default)]
    pub skip_tls_verification: bool,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default)]
    pub allow_local_connections: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub validators: ValidatorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_rate_burst")]
    pub burst: u32,
}

/// Operator-supplied security predicate composition.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ValidatorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: ValidatorStrategy,
    /// Path to a declarative pattern file (one regex per line).
    #[serde(default)]
    pub patterns_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorStrategy {
    #[default]
    Append,
    Prepend,
    Override,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default)]
    pub sse: SseBindConfig,
    #[serde(default)]
    pub http: HttpBindConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Stdio,
    Sse,
    Http,
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            "sse" => Ok(TransportMode::Sse),
            "http" | "streamable-http" => Ok(TransportMode::Http),
            other => Err(format!("unknown transport mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SseBindConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_sse_port")]
    pub port: u16,
    #[serde(default = "default_sse_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_sse_post_endpoint")]
    pub post_endpoint: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HttpBindConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// When true, a non-matching `Origin` header is rejected instead of
    /// merely logged (DNS-rebinding defense).
    #[serde(default)]
    pub reject_unknown_origin: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ResourcesConfig {
    #[serde(default)]
    pub loaders: Vec<LoaderConfig>,
}

/// One loader declaration. `type` discriminates the variant.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoaderConfig {
    Local {
        id: String,
        #[serde(default)]
        files: Vec<PathBuf>,
        #[serde(default)]
        directory: Option<PathBuf>,
        #[serde(default)]
        filter: Option<LoaderFilter>,
    },
    Remote {
        id: String,
        #[serde(rename = "baseUrl")]
        base_url: String,
        #[serde(default)]
        auth: Option<RemoteAuthConfig>,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_cache_ttl_ms")]
        cache_ttl_ms: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default)]
        allow_localhost: bool,
        #[serde(default)]
        allow_private_ips: bool,
        #[serde(default = "default_max_response_bytes")]
        max_response_bytes: usize,
    },
}

impl LoaderConfig {
    pub fn id(&self) -> &str {
        match self {
            LoaderConfig::Local { id, .. } => id,
            LoaderConfig::Remote { id, .. } => id,
        }
    }
}

/// Declarative filter applied to loaded resource definitions.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct LoaderFilter {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub enabled_only: bool,
    #[serde(default, rename = "nameRegex")]
    pub name_regex: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteAuthConfig {
    Basic { username: String, password: String },
    Bearer { token: String },
    Apikey { header: String, key: String },
}

// Default functions: one tiny fn per default so serde attributes and
// the Default impls share them.
fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}
fn default_retry_cap_ms() -> u64 {
    5_000
}
fn default_max_redirects() -> usize {
    5
}
fn default_pool_max() -> usize {
    8
}
fn default_idle_linger_ms() -> u64 {
    60_000
}
fn default_keepalive_ms() -> u64 {
    15_000
}
fn default_allowed_content_types() -> Vec<String> {
    vec![
        "application/json".to_string(),
        "application/x-www-form-urlencoded".to_string(),
        "text/plain".to_string(),
        "application/xml".to_string(),
        "text/xml".to_string(),
    ]
}
fn default_max_request_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_max_response_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_rate_per_minute() -> u32 {
    600
}
fn default_rate_burst() -> u32 {
    60
}
fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_sse_port() -> u16 {
    3001
}
fn default_sse_endpoint() -> String {
    "/sse".to_string()
}
fn default_sse_post_endpoint() -> String {
    "/message".to_string()
}
fn default_http_port() -> u16 {
    3002
}
fn default_http_endpoint() -> String {
    "/mcp".to_string()
}
fn default_session_ttl_ms() -> u64 {
    30 * 60 * 1000
}
fn default_sweep_interval_ms() -> u64 {
    60_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_cache_ttl_ms() -> u64 {
    60_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            pool_max: default_pool_max(),
            idle_linger_ms: default_idle_linger_ms(),
            keepalive_interval_ms: default_keepalive_ms(),
            algorithms: None,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            skip_tls_verification: false,
            allowed_content_types: default_allowed_content_types(),
            max_request_bytes: default_max_request_bytes(),
            max_response_bytes: default_max_response_bytes(),
            allow_local_connections: false,
            rate_limit: RateLimitConfig::default(),
            validators: ValidatorsConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rate_per_minute(),
            burst: default_rate_burst(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            sse: SseBindConfig::default(),
            http: HttpBindConfig::default(),
        }
    }
}

impl Default for SseBindConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_sse_port(),
            endpoint: default_sse_endpoint(),
            post_endpoint: default_sse_post_endpoint(),
        }
    }
}

impl Default for HttpBindConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_http_port(),
            endpoint: default_http_endpoint(),
            session_ttl_ms: default_session_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            allowed_origins: Vec::new(),
            reject_unknown_origin: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// True when the operator's environment marks this a production
/// deployment; forces HTTPS and certificate verification on every
/// outbound TLS path regardless of `skip_tls_verification`.
pub fn production_mode() -> bool {
    for var in ["MCP_ENV", "NODE_ENV"] {
        if let Ok(v) = std::env::var(var) {
            if v.eq_ignore_ascii_case("production") {
                return true;
            }
        }
    }
    false
}
