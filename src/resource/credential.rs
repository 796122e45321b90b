//! Credential reference resolution.
//!
//! References are indirections into the operating system — the process
//! environment (`env://NAME`) or a file (`file://PATH`) — resolved on
//! every use. Secrets are never cached inside resource records.

use crate::error::{ErrorCode, GatewayError, Result};

/// Resolve a credential reference to its secret value.
pub fn resolve_credential(reference: &str) -> Result<String> {
    if let Some(name) = reference.strip_prefix("env://") {
        if name.is_empty() {
            return Err(bad_ref(reference, "empty variable name"));
        }
        return std::env::var(name).map_err(|_| {
            GatewayError::new(
                ErrorCode::ResourceAccessDenied,
                format!("credential variable '{name}' is not set"),
            )
            .with_suggestion(format!("export {name}=<secret> in the gateway's environment"))
        });
    }

    if let Some(path) = reference.strip_prefix("file://") {
        if path.is_empty() {
            return Err(bad_ref(reference, "empty file path"));
        }
        return std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceAccessDenied,
                    format!("cannot read credential file '{path}': {e}"),
                )
            });
    }

    Err(bad_ref(reference, "unknown scheme"))
}

fn bad_ref(reference: &str, why: &str) -> GatewayError {
    GatewayError::new(
        ErrorCode::ResourceAccessDenied,
        format!("invalid credential reference '{reference}': {why}"),
    )
    .with_suggestion("use env://NAME or file://PATH")
}
