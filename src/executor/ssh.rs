//! SSH command execution.
//!
//! The executor owns host parsing, security pre-checks, the keyed
//! connection pool, timeout enforcement and output caps. The wire
//! client behind it is an external collaborator injected through the
//! [`SshConnector`] trait; [`SubprocessConnector`] drives the system
//! `ssh` binary for key/agent auth, and embedding hosts supply richer
//! connectors (password auth, custom kex) through the same seam.

use crate::config::{ConfigHandle, SshAlgorithms};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::security::SecurityValidator;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SshError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("algorithm negotiation failed: {0}")]
    Negotiation(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    fn is_negotiation(&self) -> bool {
        matches!(self, SshError::Negotiation(_))
    }
}

impl From<SshError> for GatewayError {
    fn from(err: SshError) -> Self {
        let code = match &err {
            SshError::Connect(_) => ErrorCode::ConnectionFailed,
            SshError::Auth(_) => ErrorCode::AuthenticationFailed,
            SshError::Negotiation(_) => ErrorCode::ConnectionFailed,
            SshError::ChannelClosed(_) => ErrorCode::ExecutionFailed,
            SshError::Io(_) => ErrorCode::ConnectionFailed,
        };
        GatewayError::new(code, err.to_string()).with_cause(err)
    }
}

/// Authentication material for one connection. The secret is resolved
/// immediately before use and never stored in resource records.
#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    KeyFile(String),
    Agent,
}

impl SshAuth {
    fn material(&self) -> &str {
        match self {
            SshAuth::Password(secret) => secret,
            SshAuth::KeyFile(path) => path,
            SshAuth::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

#[derive(Debug, Clone)]
pub struct SshExecSpec {
    /// `host`, `host:port`, or `[ipv6]:port`.
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub auth: SshAuth,
    pub command: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// One live connection. Implementations are not assumed thread-safe;
/// the pool hands a session to exactly one caller at a time.
#[async_trait]
pub trait SshSession: Send {
    async fn exec(
        &mut self,
        command: &str,
        max_output_bytes: usize,
    ) -> std::result::Result<ExecOutput, SshError>;

    async fn is_alive(&self) -> bool;

    async fn close(&mut self);
}

/// The wire-client seam. `algorithms` carries the operator's kex /
/// cipher / hmac / hostkey lists when negotiation is enabled; `None`
/// means library defaults.
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(
        &self,
        target: &SshTarget,
        algorithms: Option<&SshAlgorithms>,
    ) -> std::result::Result<Box<dyn SshSession>, SshError>;
}

#[derive(Hash, PartialEq, Eq, Clone)]
struct PoolKey {
    host: String,
    port: u16,
    username: String,
    /// SHA-256 fingerprint of the credential material, so rotated
    /// secrets never reuse a stale connection.
    fingerprint: String,
}

struct IdleSession {
    session: Box<dyn SshSession>,
    last_used: Instant,
}

pub struct SshExecutor {
    config: ConfigHandle,
    validator: Arc<SecurityValidator>,
    connector: Arc<dyn SshConnector>,
    pool: Mutex<HashMap<PoolKey, Vec<IdleSession>>>,
}

impl SshExecutor {
    pub fn new(
        config: ConfigHandle,
        validator: Arc<SecurityValidator>,
        connector: Arc<dyn SshConnector>,
    ) -> Self {
        Self {
            config,
            validator,
            connector,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Execute one command on a remote host.
    pub async fn execute(&self, spec: &SshExecSpec) -> Result<ExecOutput> {
        let config = self.config.get();

        let (host, parsed_port) = parse_host_port(&spec.host)?;
        let port = spec.port.or(parsed_port).unwrap_or(22);

        self.validator
            .check_ssh_host(&host)
            .map_err(|reason| GatewayError::new(ErrorCode::SecurityViolation, reason))?;
        self.validator
            .check_command(&spec.command)
            .map_err(|reason| GatewayError::new(ErrorCode::SecurityViolation, reason))?;

        let target = SshTarget {
            host,
            port,
            username: spec.username.clone(),
            auth: spec.auth.clone(),
        };
        let key = pool_key(&target);
        let keepalive = Duration::from_millis(config.ssh.keepalive_interval_ms);
        let mut session = self
            .checkout(&key, &target, config.ssh.algorithms.as_ref(), keepalive)
            .await?;

        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(config.ssh.timeout_ms));
        let max_output = config.security.max_response_bytes;

        let started = Instant::now();
        match tokio::time::timeout(timeout, session.exec(&spec.command, max_output)).await {
            Ok(Ok(mut output)) => {
                output.duration_ms = started.elapsed().as_millis() as u64;
                self.checkin(key, session).await;
                Ok(output)
            }
            Ok(Err(err)) => {
                // Failed channel: abandon the connection.
                session.close().await;
                Err(err.into())
            }
            Err(_) => {
                // Timed out: cancel the channel, never reuse it.
                session.close().await;
                Err(GatewayError::timeout(format!(
                    "command exceeded {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Take an alive pooled connection or open a new one, honoring the
    /// algorithm-negotiation config with a single fallback retry.
    /// Entries idle past the keepalive interval are probed before
    /// reuse; fresher ones are trusted.
    async fn checkout(
        &self,
        key: &PoolKey,
        target: &SshTarget,
        algorithms: Option<&SshAlgorithms>,
        keepalive: Duration,
    ) -> Result<Box<dyn SshSession>> {
        self.prune_idle().await;

        {
            let mut pool = self.pool.lock().await;
            if let Some(idle) = pool.get_mut(key) {
                while let Some(entry) = idle.pop() {
                    crate::metrics::SSH_POOL_CONNECTIONS.dec();
                    let fresh = entry.last_used.elapsed() < keepalive;
                    if fresh || entry.session.is_alive().await {
                        debug!(host = %target.host, "reusing pooled SSH connection");
                        return Ok(entry.session);
                    }
                }
            }
        }

        let negotiated = algorithms.filter(|a| a.enabled);
        match self.connector.connect(target, negotiated).await {
            Ok(session) => Ok(session),
            Err(err)
                if err.is_negotiation()
                    && negotiated.map(|a| a.fallback_on_error).unwrap_or(false) =>
            {
                warn!(
                    host = %target.host,
                    "algorithm negotiation failed, retrying with library defaults: {err}"
                );
                self.connector
                    .connect(target, None)
                    .await
                    .map_err(GatewayError::from)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn checkin(&self, key: PoolKey, session: Box<dyn SshSession>) {
        let pool_max = self.config.get().ssh.pool_max;
        let mut pool = self.pool.lock().await;
        let idle = pool.entry(key).or_default();
        if idle.len() < pool_max {
            idle.push(IdleSession {
                session,
                last_used: Instant::now(),
            });
            crate::metrics::SSH_POOL_CONNECTIONS.inc();
        } else {
            let mut session = session;
            session.close().await;
        }
    }

    /// Close idle connections past the configured linger.
    async fn prune_idle(&self) {
        let linger = Duration::from_millis(self.config.get().ssh.idle_linger_ms);
        let mut pool = self.pool.lock().await;
        for idle in pool.values_mut() {
            let mut kept = Vec::with_capacity(idle.len());
            for mut entry in idle.drain(..) {
                if entry.last_used.elapsed() > linger {
                    entry.session.close().await;
                    crate::metrics::SSH_POOL_CONNECTIONS.dec();
                } else {
                    kept.push(entry);
                }
            }
            *idle = kept;
        }
    }

    /// Drop every pooled connection (shutdown path).
    pub async fn drain(&self) {
        let mut pool = self.pool.lock().await;
        for (_, idle) in pool.drain() {
            for mut entry in idle {
                entry.session.close().await;
                crate::metrics::SSH_POOL_CONNECTIONS.dec();
            }
        }
        info!("SSH pool drained");
    }
}

fn pool_key(target: &SshTarget) -> PoolKey {
    let mut hasher = Sha256::new();
    hasher.update(target.auth.material().as_bytes());
    let digest = hasher.finalize();
    let fingerprint = digest[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    PoolKey {
        host: target.host.clone(),
        port: target.port,
        username: target.username.clone(),
        fingerprint,
    }
}

/// Accepts `host`, `host:port` and `[ipv6]:port`. A bare IPv6 literal
/// (more than one colon, no brackets) is a host with no port.
pub fn parse_host_port(input: &str) -> Result<(String, Option<u16>)> {
    let input = input.trim();
    if input.is_empty() {
        return Err(GatewayError::invalid_params("empty host"));
    }

    if let Some(rest) = input.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| GatewayError::invalid_params(format!("unclosed bracket in '{input}'")))?;
        if host.is_empty() {
            return Err(GatewayError::invalid_params("empty bracketed host"));
        }
        return match tail {
            "" => Ok((host.to_string(), None)),
            t => {
                let port = t
                    .strip_prefix(':')
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(|| {
                        GatewayError::invalid_params(format!("invalid port in '{input}'"))
                    })?;
                Ok((host.to_string(), Some(port)))
            }
        };
    }

    match input.matches(':').count() {
        0 => Ok((input.to_string(), None)),
        1 => {
            let (host, port) = input.split_once(':').expect("one colon");
            if host.is_empty() {
                return Err(GatewayError::invalid_params(format!("empty host in '{input}'")));
            }
            let port = port.parse::<u16>().map_err(|_| {
                GatewayError::invalid_params(format!("invalid port in '{input}'"))
            })?;
            Ok((host.to_string(), Some(port)))
        }
        _ => Ok((input.to_string(), None)),
    }
}

/// Drives the system `ssh` binary, one process per command. Supports
/// key-file and agent auth; password auth needs an embedded client and
/// is refused here so it fails loudly instead of hanging on a prompt.
pub struct SubprocessConnector;

#[async_trait]
impl SshConnector for SubprocessConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        algorithms: Option<&SshAlgorithms>,
    ) -> std::result::Result<Box<dyn SshSession>, SshError> {
        if matches!(target.auth, SshAuth::Password(_)) {
            return Err(SshError::Auth(
                "password auth requires an embedded SSH client; use a key file or the agent"
                    .to_string(),
            ));
        }
        Ok(Box::new(SubprocessSession {
            target: target.clone(),
            algorithms: algorithms.cloned(),
            closed: false,
        }))
    }
}

struct SubprocessSession {
    target: SshTarget,
    algorithms: Option<SshAlgorithms>,
    closed: bool,
}

impl SubprocessSession {
    fn command(&self, remote_command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(self.target.port.to_string());
        if let SshAuth::KeyFile(path) = &self.target.auth {
            cmd.arg("-i").arg(path);
        }
        if let Some(algos) = &self.algorithms {
            if !algos.kex.is_empty() {
                cmd.arg("-o").arg(format!("KexAlgorithms={}", algos.kex.join(",")));
            }
            if !algos.cipher.is_empty() {
                cmd.arg("-o").arg(format!("Ciphers={}", algos.cipher.join(",")));
            }
            if !algos.hmac.is_empty() {
                cmd.arg("-o").arg(format!("MACs={}", algos.hmac.join(",")));
            }
            if !algos.hostkey.is_empty() {
                cmd.arg("-o")
                    .arg(format!("HostKeyAlgorithms={}", algos.hostkey.join(",")));
            }
        }
        cmd.arg(format!("{}@{}", self.target.username, self.target.host))
            .arg(remote_command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn truncate_output(bytes: &[u8], cap: usize) -> String {
    let slice = if bytes.len() > cap { &bytes[..cap] } else { bytes };
    String::from_utf8_lossy(slice).into_owned()
}

#[async_trait]
impl SshSession for SubprocessSession {
    async fn exec(
        &mut self,
        command: &str,
        max_output_bytes: usize,
    ) -> std::result::Result<ExecOutput, SshError> {
        let output = self.command(command).output().await?;
        let exit_code = output.status.code().unwrap_or(-1);

        // The ssh client reserves 255 for its own failures.
        if exit_code == 255 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Permission denied") {
                return Err(SshError::Auth(stderr.trim().to_string()));
            }
            if stderr.contains("no matching") {
                return Err(SshError::Negotiation(stderr.trim().to_string()));
            }
            return Err(SshError::Connect(stderr.trim().to_string()));
        }

        Ok(ExecOutput {
            stdout: truncate_output(&output.stdout, max_output_bytes),
            stderr: truncate_output(&output.stderr, max_output_bytes),
            exit_code,
            duration_ms: 0,
        })
    }

    async fn is_alive(&self) -> bool {
        !self.closed
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
