//! Error types for Omnigate.
//!
//! Every failure surfaced by the gateway carries a numeric code from a
//! stable range (1000s configuration, 2000s connection, 3000s resource,
//! 4000s protocol, 5000s system, 6000s execution) so the wire format
//! stays identical across implementations, plus a category, severity,
//! correlation id and optional structured context / operator suggestions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Stable numeric error codes, grouped by thousands-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // 1000s: configuration
    ConfigFileNotFound = 1000,
    ConfigParseError = 1001,
    ConfigValidationFailed = 1002,
    ConfigCircularReference = 1003,
    ConfigUnsupportedFormat = 1004,

    // 2000s: connection
    ConnectionFailed = 2000,
    ConnectionTimeout = 2001,
    AuthenticationFailed = 2002,
    TlsError = 2003,
    PoolExhausted = 2004,

    // 3000s: resource
    ResourceNotFound = 3000,
    ResourceInvalidDefinition = 3001,
    ResourceLoadFailed = 3002,
    ResourceAccessDenied = 3003,
    ResourceDisabled = 3004,

    // 4000s: protocol
    ProtocolInvalidMessage = 4000,
    ProtocolUnsupportedMethod = 4001,
    ProtocolVersionMismatch = 4002,

    // 5000s: system
    Internal = 5000,
    OutOfMemory = 5001,
    ShuttingDown = 5002,
    DependencyUnavailable = 5003,

    // 6000s: execution
    ExecutionFailed = 6000,
    ExecutionTimeout = 6001,
    ExecutionPermissionDenied = 6002,
    ExecutionInvalidParameters = 6003,
    SecurityViolation = 6004,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn category(self) -> ErrorCategory {
        match self.code() / 1000 {
            1 => ErrorCategory::Configuration,
            2 => ErrorCategory::Connection,
            3 => ErrorCategory::Resource,
            4 => ErrorCategory::Protocol,
            5 => ErrorCategory::System,
            _ => ErrorCategory::Execution,
        }
    }

    /// Wire-stable SCREAMING_SNAKE_CASE name of this code.
    pub fn kind(self) -> &'static str {
        match self {
            ErrorCode::ConfigFileNotFound => "CONFIG_FILE_NOT_FOUND",
            ErrorCode::ConfigParseError => "CONFIG_PARSE_ERROR",
            ErrorCode::ConfigValidationFailed => "CONFIG_VALIDATION_FAILED",
            ErrorCode::ConfigCircularReference => "CONFIG_CIRCULAR_REFERENCE",
            ErrorCode::ConfigUnsupportedFormat => "CONFIG_UNSUPPORTED_FORMAT",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::TlsError => "TLS_ERROR",
            ErrorCode::PoolExhausted => "POOL_EXHAUSTED",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::ResourceInvalidDefinition => "RESOURCE_INVALID_DEFINITION",
            ErrorCode::ResourceLoadFailed => "RESOURCE_LOAD_FAILED",
            ErrorCode::ResourceAccessDenied => "RESOURCE_ACCESS_DENIED",
            ErrorCode::ResourceDisabled => "RESOURCE_DISABLED",
            ErrorCode::ProtocolInvalidMessage => "PROTOCOL_INVALID_MESSAGE",
            ErrorCode::ProtocolUnsupportedMethod => "PROTOCOL_UNSUPPORTED_METHOD",
            ErrorCode::ProtocolVersionMismatch => "PROTOCOL_VERSION_MISMATCH",
            ErrorCode::Internal => "INTERNAL_ERROR",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
            ErrorCode::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::ExecutionTimeout => "EXECUTION_TIMEOUT",
            ErrorCode::ExecutionPermissionDenied => "EXECUTION_PERMISSION_DENIED",
            ErrorCode::ExecutionInvalidParameters => "EXECUTION_INVALID_PARAMETERS",
            ErrorCode::SecurityViolation => "SECURITY_VIOLATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Configuration,
    Connection,
    Resource,
    Protocol,
    System,
    Execution,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::System => "system",
            ErrorCategory::Execution => "execution",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// The gateway error. Constructed through [`GatewayError::new`] and the
/// builder-style `with_*` methods; predictable failures are returned,
/// never panicked.
#[derive(Debug)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub context: Option<Value>,
    pub suggestions: Vec<String>,
    pub recoverable: bool,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {}",
            self.code.code(),
            self.code.kind(),
            self.message
        )
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            context: None,
            suggestions: Vec::new(),
            recoverable: false,
            cause: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Transient failures worth retrying under the configured policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::DependencyUnavailable
        )
    }

    /// Structured payload carried in the `data` field of a JSON-RPC
    /// error envelope, and in JSON output mode.
    pub fn to_wire(&self) -> Value {
        let mut obj = json!({
            "code": self.code.code(),
            "kind": self.code.kind(),
            "message": self.message,
            "category": self.category(),
            "severity": self.severity,
            "timestamp": self.timestamp.to_rfc3339(),
            "correlationId": self.correlation_id.to_string(),
            "recoverable": self.recoverable,
        });
        if let Some(ctx) = &self.context {
            obj["context"] = ctx.clone();
        }
        if !self.suggestions.is_empty() {
            // CLI mode prints at most three; the wire carries the same cap.
            let capped: Vec<&String> = self.suggestions.iter().take(3).collect();
            obj["suggestions"] = json!(capped);
        }
        obj
    }

    // Shorthand constructors for the common cases.

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigValidationFailed, message)
    }

    pub fn resource_not_found(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("resource not found: {identifier}"),
        )
        .with_context(json!({ "identifier": identifier }))
        .with_suggestion("check `list_resources` for the registered identifiers")
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionPermissionDenied, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionInvalidParameters, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message).with_severity(Severity::Critical)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionTimeout, message)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::new(ErrorCode::Internal, format!("I/O error: {err}")).with_cause(err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::new(
            ErrorCode::ProtocolInvalidMessage,
            format!("JSON error: {err}"),
        )
        .with_cause(err)
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::new(ErrorCode::ConfigParseError, format!("YAML error: {err}")).with_cause(err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::ConnectionTimeout
        } else if err.is_connect() {
            ErrorCode::ConnectionFailed
        } else {
            ErrorCode::ExecutionFailed
        };
        GatewayError::new(code, format!("HTTP error: {err}")).with_cause(err)
    }
}

impl From<notify::Error> for GatewayError {
    fn from(err: notify::Error) -> Self {
        GatewayError::new(ErrorCode::Internal, format!("watcher error: {err}")).with_cause(err)
    }
}
