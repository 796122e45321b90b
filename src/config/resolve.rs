//! Layered configuration resolution.
//!
//! Precedence per load: CLI-supplied path, then the `MCP_CONFIG`
//! environment variable, then default candidate paths
//! (cwd → user config dir → system config dir). The built-in defaults
//! are deep-merged under the file tree, and environment-variable
//! overrides are re-applied last so they always win over file values.

use crate::config::Config;
use crate::error::{ErrorCode, GatewayError, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Where the effective configuration file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    Default,
    None,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Cli => "cli",
            ConfigSource::Env => "env",
            ConfigSource::Default => "default",
            ConfigSource::None => "none",
        }
    }
}

/// Returned alongside every successful load.
#[derive(Debug, Clone)]
pub struct ConfigMeta {
    pub source: ConfigSource,
    pub path: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Environment lookup, injectable so tests never mutate process state.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

#[derive(Clone)]
pub struct ResolveOptions {
    /// `--config` path; wins outright when loadable.
    pub cli_path: Option<PathBuf>,
    /// When false, an unreadable/invalid CLI or env path is fatal
    /// instead of falling through to the next tier.
    pub allow_fallback: bool,
    /// Directories searched in order during the default pass. `None`
    /// means cwd → user config dir → `/etc`.
    pub search_dirs: Option<Vec<PathBuf>>,
    pub env: EnvLookup,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            cli_path: None,
            allow_fallback: true,
            search_dirs: None,
            env: process_env(),
        }
    }
}

impl std::fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("cli_path", &self.cli_path)
            .field("allow_fallback", &self.allow_fallback)
            .field("search_dirs", &self.search_dirs)
            .finish()
    }
}

/// Basenames probed in each search directory, in order. The JS family
/// is recognized for compatibility with sibling gateways but refused at
/// parse time; see [`parse_file`].
pub const CANDIDATE_BASENAMES: &[&str] = &[
    "mcp.config.json",
    "mcp.config.yaml",
    "mcp.config.yml",
    "mcp.config.js",
    "mcp.config.mjs",
    "mcp.config.cjs",
];

/// The ordered default candidate paths for this process.
pub fn default_candidates(search_dirs: Option<&[PathBuf]>) -> Vec<PathBuf> {
    let dirs: Vec<PathBuf> = match search_dirs {
        Some(dirs) => dirs.to_vec(),
        None => {
            let mut dirs = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                dirs.push(cwd);
            }
            if let Some(user) = dirs::config_dir() {
                dirs.push(user.join("mcp"));
            }
            dirs.push(PathBuf::from("/etc/mcp"));
            dirs
        }
    };

    let mut candidates = Vec::new();
    for dir in dirs {
        for base in CANDIDATE_BASENAMES {
            candidates.push(dir.join(base));
        }
    }
    candidates
}

/// Resolve the effective configuration. On success the returned meta
/// names an existing, readable file that parsed and validated.
pub fn resolve_config(opts: &ResolveOptions) -> Result<(Config, ConfigMeta)> {
    let started = Instant::now();

    // Tier 1: CLI.
    if let Some(path) = &opts.cli_path {
        match load_tree(path) {
            Ok(tree) => {
                let config = finalize(tree, &opts.env)?;
                return Ok((config, meta(ConfigSource::Cli, path, started)));
            }
            Err(err) if !opts.allow_fallback => return Err(err),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "CLI config unusable, falling back");
            }
        }
    }

    // Tier 2: environment.
    if let Some(raw) = (opts.env)("MCP_CONFIG") {
        let path = PathBuf::from(raw);
        match load_tree(&path) {
            Ok(tree) => {
                let config = finalize(tree, &opts.env)?;
                return Ok((config, meta(ConfigSource::Env, &path, started)));
            }
            Err(err) if !opts.allow_fallback => return Err(err),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "MCP_CONFIG unusable, falling back");
            }
        }
    }

    // Tier 3: default search, first candidate that parses and validates.
    for candidate in default_candidates(opts.search_dirs.as_deref()) {
        if !candidate.is_file() {
            continue;
        }
        match load_tree(&candidate) {
            Ok(tree) => {
                let config = finalize(tree, &opts.env)?;
                return Ok((config, meta(ConfigSource::Default, &candidate, started)));
            }
            Err(err) => {
                debug!(path = %candidate.display(), error = %err, "skipping default candidate");
            }
        }
    }

    Err(
        GatewayError::new(ErrorCode::ConfigFileNotFound, "no usable configuration file found")
            .with_suggestion("pass --config <path> or set MCP_CONFIG")
            .with_suggestion("create mcp.config.json in the working directory")
            .recoverable(),
    )
}

/// Built-in defaults with environment overrides applied; the degraded
/// state when no file resolves and the caller chooses to continue.
pub fn builtin_config(env: &EnvLookup) -> Result<Config> {
    let mut tree = serde_json::to_value(Config::default())?;
    apply_env_overrides(&mut tree, env);
    typed(tree)
}

fn meta(source: ConfigSource, path: &Path, started: Instant) -> ConfigMeta {
    ConfigMeta {
        source,
        path: Some(path.to_path_buf()),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Read + parse + structurally validate one file into a raw tree.
fn load_tree(path: &Path) -> Result<Value> {
    let tree = parse_file(path)?;
    super::validation::validate_tree(&tree, path)?;
    Ok(tree)
}

/// Parse a config file, dispatching on extension.
///
/// JS-family configs are refused rather than evaluated: executing
/// source text at config-load time is not something this gateway does.
pub fn parse_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::new(
            ErrorCode::ConfigFileNotFound,
            format!("cannot read {}: {e}", path.display()),
        )
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| {
            GatewayError::new(
                ErrorCode::ConfigParseError,
                format!("{}: invalid JSON: {e}", path.display()),
            )
        }),
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
            GatewayError::new(
                ErrorCode::ConfigParseError,
                format!("{}: invalid YAML: {e}", path.display()),
            )
        }),
        "js" | "mjs" | "cjs" => Err(GatewayError::new(
            ErrorCode::ConfigUnsupportedFormat,
            format!(
                "{}: JS config files are not evaluated; convert to JSON or YAML",
                path.display()
            ),
        )
        .with_suggestion("rewrite the exported object as mcp.config.json")),
        other => Err(GatewayError::new(
            ErrorCode::ConfigUnsupportedFormat,
            format!("{}: unsupported config format '{other}'", path.display()),
        )),
    }
}

/// Defaults ← file tree ← env overrides, then typed deserialization.
fn finalize(file_tree: Value, env: &EnvLookup) -> Result<Config> {
    let mut tree = serde_json::to_value(Config::default())?;
    deep_merge(&mut tree, file_tree);
    apply_env_overrides(&mut tree, env);
    typed(tree)
}

fn typed(tree: Value) -> Result<Config> {
    serde_json::from_value(tree).map_err(|e| {
        GatewayError::new(
            ErrorCode::ConfigValidationFailed,
            format!("configuration does not match the expected shape: {e}"),
        )
    })
}

/// Deep-merge `overlay` into `base`: maps recurse, scalars and arrays
/// replace. Unknown keys in the overlay are preserved.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn set_path(tree: &mut Value, path: &[&str], value: Value) {
    let mut cursor = tree;
    for key in &path[..path.len() - 1] {
        if !cursor.get(*key).map(Value::is_object).unwrap_or(false) {
            cursor[*key] = json!({});
        }
        cursor = cursor.get_mut(*key).expect("just inserted");
    }
    cursor[path[path.len() - 1]] = value;
}

fn env_bool(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "TRUE" | "yes" | "on")
}

fn csv(raw: &str) -> Value {
    Value::Array(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    )
}

/// Re-apply recognized environment variables onto the tree. Runs after
/// the file merge so the environment always wins over file values.
pub fn apply_env_overrides(tree: &mut Value, env: &EnvLookup) {
    if let Some(v) = env("MCP_TRANSPORT") {
        set_path(tree, &["transport", "mode"], json!(v.to_ascii_lowercase()));
    }
    if let Some(v) = env("LOG_LEVEL") {
        set_path(tree, &["logging", "level"], json!(v));
    }

    if let Some(v) = env("MCP_SSE_HOST") {
        set_path(tree, &["transport", "sse", "host"], json!(v));
    }
    if let Some(v) = env("MCP_SSE_PORT").and_then(|v| v.parse::<u16>().ok()) {
        set_path(tree, &["transport", "sse", "port"], json!(v));
    }
    if let Some(v) = env("MCP_SSE_ENDPOINT") {
        set_path(tree, &["transport", "sse", "endpoint"], json!(v));
    }
    if let Some(v) = env("MCP_SSE_POST_ENDPOINT") {
        set_path(tree, &["transport", "sse", "post_endpoint"], json!(v));
    }

    if let Some(v) = env("MCP_HTTP_HOST") {
        set_path(tree, &["transport", "http", "host"], json!(v));
    }
    if let Some(v) = env("MCP_HTTP_PORT").and_then(|v| v.parse::<u16>().ok()) {
        set_path(tree, &["transport", "http", "port"], json!(v));
    }
    if let Some(v) = env("MCP_HTTP_ENDPOINT") {
        set_path(tree, &["transport", "http", "endpoint"], json!(v));
    }

    if let Some(v) = env("MCP_SSH_ALGORITHMS_ENABLED") {
        set_path(tree, &["ssh", "algorithms", "enabled"], json!(env_bool(&v)));
    }
    if let Some(v) = env("MCP_SSH_ALGORITHMS_FALLBACK") {
        set_path(
            tree,
            &["ssh", "algorithms", "fallback_on_error"],
            json!(env_bool(&v)),
        );
    }
    for (var, field) in [
        ("MCP_SSH_KEX_ALGORITHMS", "kex"),
        ("MCP_SSH_CIPHER_ALGORITHMS", "cipher"),
        ("MCP_SSH_HMAC_ALGORITHMS", "hmac"),
        ("MCP_SSH_HOSTKEY_ALGORITHMS", "hostkey"),
    ] {
        if let Some(v) = env(var) {
            set_path(tree, &["ssh", "algorithms", field], csv(&v));
        }
    }

    if let Some(v) = env("MCP_SECURITY_VALIDATORS_ENABLED") {
        set_path(
            tree,
            &["security", "validators", "enabled"],
            json!(env_bool(&v)),
        );
    }
    if let Some(v) = env("MCP_SECURITY_VALIDATORS_STRATEGY") {
        set_path(
            tree,
            &["security", "validators", "strategy"],
            json!(v.to_ascii_lowercase()),
        );
    }
    if let Some(v) = env("MCP_SECURITY_VALIDATORS") {
        set_path(tree, &["security", "validators", "patterns_file"], json!(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn fixed_env(pairs: &[(&str, &str)]) -> EnvLookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |key: &str| map.get(key).cloned())
    }

    fn empty_env() -> EnvLookup {
        fixed_env(&[])
    }

    #[test]
    fn deep_merge_recurses_maps_and_replaces_scalars() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "list": [1, 2], "keep": true});
        deep_merge(&mut base, json!({"a": {"y": 9, "z": 3}, "list": [7]}));
        assert_eq!(base["a"]["x"], 1);
        assert_eq!(base["a"]["y"], 9);
        assert_eq!(base["a"]["z"], 3);
        assert_eq!(base["list"], json!([7]));
        assert_eq!(base["keep"], true);
    }

    #[test]
    fn default_search_finds_cwd_candidate() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("mcp.config.json"),
            r#"{"logging": {"level": "error"}}"#,
        )
        .unwrap();

        let opts = ResolveOptions {
            search_dirs: Some(vec![dir.path().to_path_buf()]),
            env: empty_env(),
            ..Default::default()
        };
        let (config, meta) = resolve_config(&opts).unwrap();
        assert_eq!(meta.source, ConfigSource::Default);
        assert_eq!(meta.path.unwrap(), dir.path().join("mcp.config.json"));
        assert_eq!(config.logging.level, "error");
    }

    #[test]
    fn cli_beats_env_when_both_valid() {
        let dir = TempDir::new().unwrap();
        let cli = dir.path().join("cli.json");
        let env_file = dir.path().join("env.json");
        fs::write(&cli, r#"{"logging": {"level": "warn"}}"#).unwrap();
        fs::write(&env_file, r#"{"logging": {"level": "debug"}}"#).unwrap();

        let opts = ResolveOptions {
            cli_path: Some(cli.clone()),
            search_dirs: Some(vec![]),
            env: fixed_env(&[("MCP_CONFIG", env_file.to_str().unwrap())]),
            ..Default::default()
        };
        let (config, meta) = resolve_config(&opts).unwrap();
        assert_eq!(meta.source, ConfigSource::Cli);
        assert_eq!(meta.path.unwrap(), cli);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn broken_cli_path_is_fatal_without_fallback() {
        let opts = ResolveOptions {
            cli_path: Some(PathBuf::from("/definitely/not/here.json")),
            allow_fallback: false,
            search_dirs: Some(vec![]),
            env: empty_env(),
        };
        let err = resolve_config(&opts).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigFileNotFound);
    }

    #[test]
    fn broken_cli_path_falls_through_to_env() {
        let dir = TempDir::new().unwrap();
        let env_file = dir.path().join("env.json");
        fs::write(&env_file, r#"{"logging": {"level": "trace"}}"#).unwrap();

        let opts = ResolveOptions {
            cli_path: Some(PathBuf::from("/definitely/not/here.json")),
            allow_fallback: true,
            search_dirs: Some(vec![]),
            env: fixed_env(&[("MCP_CONFIG", env_file.to_str().unwrap())]),
        };
        let (config, meta) = resolve_config(&opts).unwrap();
        assert_eq!(meta.source, ConfigSource::Env);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("mcp.config.json"),
            r#"{"transport": {"mode": "stdio", "sse": {"port": 4000}}}"#,
        )
        .unwrap();

        let opts = ResolveOptions {
            search_dirs: Some(vec![dir.path().to_path_buf()]),
            env: fixed_env(&[("MCP_TRANSPORT", "sse"), ("MCP_SSE_PORT", "5005")]),
            ..Default::default()
        };
        let (config, _) = resolve_config(&opts).unwrap();
        assert_eq!(config.transport.mode, crate::config::TransportMode::Sse);
        assert_eq!(config.transport.sse.port, 5005);
    }

    #[test]
    fn js_configs_are_refused_not_evaluated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.config.js");
        fs::write(&path, "export default { logging: { level: 'x' } }").unwrap();
        let err = parse_file(&path).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigUnsupportedFormat);
    }

    #[test]
    fn unparseable_candidate_is_skipped_in_default_pass() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("mcp.config.json"), "{not json").unwrap();
        fs::write(
            dir.path().join("mcp.config.yaml"),
            "logging:\n  level: warn\n",
        )
        .unwrap();

        let opts = ResolveOptions {
            search_dirs: Some(vec![dir.path().to_path_buf()]),
            env: empty_env(),
            ..Default::default()
        };
        let (config, meta) = resolve_config(&opts).unwrap();
        assert_eq!(meta.source, ConfigSource::Default);
        assert_eq!(meta.path.unwrap(), dir.path().join("mcp.config.yaml"));
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn no_candidates_yields_structured_error() {
        let opts = ResolveOptions {
            search_dirs: Some(vec![]),
            env: empty_env(),
            ..Default::default()
        };
        let err = resolve_config(&opts).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigFileNotFound);
        assert!(err.recoverable);
    }

    #[test]
    fn ssh_algorithm_env_lists_are_split() {
        let mut tree = serde_json::to_value(Config::default()).unwrap();
        let env = fixed_env(&[
            ("MCP_SSH_ALGORITHMS_ENABLED", "true"),
            ("MCP_SSH_KEX_ALGORITHMS", "curve25519-sha256, ecdh-sha2-nistp256"),
        ]);
        apply_env_overrides(&mut tree, &env);
        let config: Config = serde_json::from_value(tree).unwrap();
        let algos = config.ssh.algorithms.unwrap();
        assert!(algos.enabled);
        assert_eq!(algos.kex.len(), 2);
        assert_eq!(algos.kex[0], "curve25519-sha256");
    }
}
