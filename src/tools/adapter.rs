//! Resource-mode tool adapters.
//!
//! An adapter rewrites a resource-mode call into the equivalent
//! direct-mode call: it parses and resolves the identifier, gates on the
//! required capability, resolves the credential reference, and fills in
//! transport details from the resource record. Adapters never mutate the
//! record and never touch a backend when a gate fails.

use crate::error::{ErrorCode, GatewayError, Result};
use crate::executor::http::HttpRequestSpec;
use crate::executor::ssh::{SshAuth, SshExecSpec};
use crate::resource::credential::resolve_credential;
use crate::resource::registry::Resolution;
use crate::resource::{Resource, ResourceRegistry};
use crate::tools::{
    HttpRequestResourceArgs, SshExecResourceArgs, CAP_HTTP_REQUEST, CAP_SSH_EXEC,
};
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// Resolve + gate a resource for one capability. Shared by both
/// adapters; nothing downstream runs when this fails.
fn resolve_gated(
    registry: &ResourceRegistry,
    identifier: &str,
    capability: &str,
) -> Result<Arc<Resource>> {
    let resource = match registry.resolve(identifier) {
        Resolution::Found(resource) => resource,
        Resolution::NotFound { reason } => {
            return Err(GatewayError::resource_not_found(identifier)
                .with_context(json!({ "reason": reason })))
        }
    };

    if !resource.enabled {
        return Err(GatewayError::new(
            ErrorCode::ResourceDisabled,
            format!("resource {identifier} is disabled"),
        ));
    }

    if !resource.has_capability(capability) {
        return Err(GatewayError::permission_denied(format!(
            "resource {identifier} lacks the '{capability}' capability"
        ))
        .with_context(json!({
            "identifier": identifier,
            "required": capability,
            "present": resource.capabilities,
        })));
    }

    Ok(resource)
}

fn resolve_token(resource: &Resource) -> Result<Option<String>> {
    match &resource.auth.credential_ref {
        Some(reference) => resolve_credential(reference).map(Some),
        None => Ok(None),
    }
}

/// Rewrite `http_request_resource` arguments into a direct
/// [`HttpRequestSpec`].
pub fn http_request_from_resource(
    registry: &ResourceRegistry,
    args: &HttpRequestResourceArgs,
) -> Result<HttpRequestSpec> {
    let resource = resolve_gated(registry, &args.resource, CAP_HTTP_REQUEST)?;

    let base_url = resource
        .connection
        .base_url
        .as_deref()
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ResourceInvalidDefinition,
                format!("resource {} has no baseUrl", args.resource),
            )
        })?;
    let base = Url::parse(base_url).map_err(|e| {
        GatewayError::new(
            ErrorCode::ResourceInvalidDefinition,
            format!("resource {} baseUrl is invalid: {e}", args.resource),
        )
    })?;

    let url = match args.path.as_deref() {
        Some(path) if !path.is_empty() => {
            // Join relative to the base; a leading slash is relative to
            // the authority, which is what callers expect.
            base.join(path).map_err(|e| {
                GatewayError::invalid_params(format!("cannot join path '{path}': {e}"))
            })?
        }
        _ => base,
    };

    // Default headers sit under caller headers: the caller wins.
    let mut headers = resource.connection.default_headers.clone();
    for (name, value) in &args.headers {
        headers.remove_entry_case_insensitive(name);
        headers.insert(name.clone(), value.clone());
    }

    // Bearer injection only when a token resolved and the caller did
    // not set Authorization themselves.
    if let Some(token) = resolve_token(&resource)? {
        let caller_set_auth = headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("authorization"));
        if !caller_set_auth {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
    }

    Ok(HttpRequestSpec {
        method: args.method.clone(),
        url: url.to_string(),
        headers,
        body: args.body.clone(),
        timeout_ms: args.timeout,
    })
}

/// Rewrite `ssh_exec_resource` arguments into a direct [`SshExecSpec`].
pub fn ssh_exec_from_resource(
    registry: &ResourceRegistry,
    args: &SshExecResourceArgs,
) -> Result<SshExecSpec> {
    let resource = resolve_gated(registry, &args.resource, CAP_SSH_EXEC)?;

    let host = resource.connection.host.clone().ok_or_else(|| {
        GatewayError::new(
            ErrorCode::ResourceInvalidDefinition,
            format!("resource {} has no host", args.resource),
        )
    })?;
    let username = resource.connection.username.clone().ok_or_else(|| {
        GatewayError::new(
            ErrorCode::ResourceInvalidDefinition,
            format!("resource {} has no username", args.resource),
        )
    })?;

    let secret = resolve_token(&resource)?.ok_or_else(|| {
        GatewayError::new(
            ErrorCode::ResourceAccessDenied,
            format!("resource {} has no credentialRef", args.resource),
        )
        .with_suggestion("set auth.credentialRef to env://NAME or file://PATH")
    })?;

    Ok(SshExecSpec {
        host,
        port: resource.connection.port,
        username,
        auth: SshAuth::Password(secret),
        command: args.command.clone(),
        timeout_ms: args.timeout,
    })
}

trait CaseInsensitiveRemove {
    fn remove_entry_case_insensitive(&mut self, name: &str);
}

impl CaseInsensitiveRemove for std::collections::HashMap<String, String> {
    fn remove_entry_case_insensitive(&mut self, name: &str) {
        let existing: Vec<String> = self
            .keys()
            .filter(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .collect();
        for key in existing {
            self.remove(&key);
        }
    }
}
