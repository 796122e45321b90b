//! The MCP dispatcher.
//!
//! One JSON-RPC 2.0 router serves every transport: envelopes are
//! classified (request / notification / response), batches produce
//! batched responses, and tool calls fan out to the direct executors or
//! the resource-mode adapters. No transport re-implements any method.

use crate::config::ConfigHandle;
use crate::error::{ErrorCode, GatewayError, Result};
use crate::executor::http::HttpExecutor;
use crate::executor::ssh::{SshAuth, SshExecSpec, SshExecutor};
use crate::executor::HttpRequestSpec;
use crate::resource::registry::{ListFilter, Pagination};
use crate::resource::{ResourceRegistry, ResourceType};
use crate::security::mask_sensitive;
use crate::tools;
use crate::tools::adapter;
use crate::types::{
    classify, MessageKind, RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct Dispatcher {
    #[allow(dead_code)]
    config: ConfigHandle,
    registry: Arc<ResourceRegistry>,
    http: Arc<HttpExecutor>,
    ssh: Arc<SshExecutor>,
}

impl Dispatcher {
    pub fn new(
        config: ConfigHandle,
        registry: Arc<ResourceRegistry>,
        http: Arc<HttpExecutor>,
        ssh: Arc<SshExecutor>,
    ) -> Self {
        Self {
            config,
            registry,
            http,
            ssh,
        }
    }

    pub fn registry(&self) -> Arc<ResourceRegistry> {
        self.registry.clone()
    }

    /// Handle one decoded envelope, single or batch. `None` means
    /// nothing goes back on the wire (notifications only).
    pub async fn handle_envelope(&self, value: Value) -> Option<Value> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Some(serde_json::to_value(invalid_request(None)).expect("serialize"));
                }
                // Requests inside one batch are processed in order, so
                // responses appear in dispatch order.
                let mut responses = Vec::new();
                for item in items {
                    if let Some(response) = self.handle_message(item).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
            other => self.handle_message(other).await,
        }
    }

    /// Handle a single message. Responses addressed to us (client
    /// replies) are absorbed; notifications run for their effects.
    pub async fn handle_message(&self, value: Value) -> Option<Value> {
        match classify(&value) {
            MessageKind::Request => {
                let request: RpcRequest = match serde_json::from_value(value) {
                    Ok(request) => request,
                    Err(_) => return Some(to_value(invalid_request(None))),
                };
                let response = self.dispatch(request).await;
                Some(to_value(response))
            }
            MessageKind::Notification => {
                if let Ok(request) = serde_json::from_value::<RpcRequest>(value) {
                    self.handle_notification(&request);
                }
                None
            }
            MessageKind::Response => {
                debug!("absorbing client response envelope");
                None
            }
            MessageKind::Invalid => {
                let id = value.get("id").cloned();
                Some(to_value(invalid_request(id)))
            }
        }
    }

    fn handle_notification(&self, request: &RpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => debug!("client reports initialized"),
            "notifications/cancelled" => debug!("client cancelled a request"),
            other => debug!(method = other, "ignoring notification"),
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let method = request.method.clone();
        let id = request.id.clone();
        debug!(method = %method, "dispatching request");

        let response = match method.as_str() {
            "initialize" => self.initialize(&request),
            "ping" => RpcResponse::success(id.clone(), json!({})),
            "tools/list" => {
                RpcResponse::success(id.clone(), json!({ "tools": tools::tool_definitions() }))
            }
            "tools/call" => match self.tools_call(&request).await {
                Ok(result) => RpcResponse::success(id.clone(), result),
                Err(err) => error_response(id.clone(), err),
            },
            _ => RpcResponse::failure(
                id.clone(),
                METHOD_NOT_FOUND,
                format!("method not found: {method}"),
            ),
        };

        let status = if response.error.is_some() { "error" } else { "ok" };
        crate::metrics::MCP_REQUESTS_TOTAL
            .with_label_values(&[method.as_str(), status])
            .inc();
        response
    }

    fn initialize(&self, request: &RpcRequest) -> RpcResponse {
        let client = request
            .params()
            .get("clientInfo")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        info!(client = %client, "client initializing");

        RpcResponse::success(
            request.id.clone(),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "omnigate",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }

    async fn tools_call(&self, request: &RpcRequest) -> Result<Value> {
        let params = request.params();
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_params("tools/call requires a tool name"))?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        debug!(tool = %name, arguments = %mask_sensitive(&arguments), "tool call");

        let outcome = match name.as_str() {
            tools::HTTP_REQUEST => self.call_http_direct(arguments).await,
            tools::HTTP_REQUEST_RESOURCE => self.call_http_resource(arguments).await,
            tools::SSH_EXEC => self.call_ssh_direct(arguments).await,
            tools::SSH_EXEC_RESOURCE => self.call_ssh_resource(arguments).await,
            tools::LIST_RESOURCES => self.call_list_resources(arguments),
            other => Err(GatewayError::invalid_params(format!("unknown tool: {other}"))),
        };

        let status = if outcome.is_ok() { "ok" } else { "error" };
        crate::metrics::TOOL_EXECUTIONS_TOTAL
            .with_label_values(&[name.as_str(), status])
            .inc();

        outcome.map(tool_content)
    }

    async fn call_http_direct(&self, arguments: Value) -> Result<Value> {
        let args: tools::HttpRequestArgs = parse_args(arguments)?;
        let spec = HttpRequestSpec {
            method: args.method,
            url: args.url,
            headers: args.headers,
            body: args.body,
            timeout_ms: args.timeout,
        };
        let response = self.http.execute(&spec).await?;
        Ok(json!({
            "statusCode": response.status_code,
            "responseHeaders": response.response_headers,
            "responseBody": response.response_body,
            "durationMs": response.duration_ms,
        }))
    }

    async fn call_http_resource(&self, arguments: Value) -> Result<Value> {
        let args: tools::HttpRequestResourceArgs = parse_args(arguments)?;
        // The adapter performs every gate before any backend I/O.
        let spec = adapter::http_request_from_resource(&self.registry, &args)?;
        let response = self.http.execute(&spec).await?;
        Ok(json!({
            "statusCode": response.status_code,
            "responseHeaders": response.response_headers,
            "responseBody": response.response_body,
            "durationMs": response.duration_ms,
        }))
    }

    async fn call_ssh_direct(&self, arguments: Value) -> Result<Value> {
        let args: tools::SshExecArgs = parse_args(arguments)?;
        let spec = SshExecSpec {
            host: args.host,
            port: None,
            username: args.username,
            auth: SshAuth::Password(args.password),
            command: args.command,
            timeout_ms: args.timeout,
        };
        let output = self.ssh.execute(&spec).await?;
        Ok(json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exitCode": output.exit_code,
            "durationMs": output.duration_ms,
        }))
    }

    async fn call_ssh_resource(&self, arguments: Value) -> Result<Value> {
        let args: tools::SshExecResourceArgs = parse_args(arguments)?;
        let spec = adapter::ssh_exec_from_resource(&self.registry, &args)?;
        let output = self.ssh.execute(&spec).await?;
        Ok(json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exitCode": output.exit_code,
            "durationMs": output.duration_ms,
        }))
    }

    fn call_list_resources(&self, arguments: Value) -> Result<Value> {
        let args: tools::ListResourcesArgs = parse_args(arguments)?;

        let mut filter = ListFilter::default();
        if let Some(f) = args.filter {
            if let Some(t) = f.resource_type {
                filter.resource_type = Some(
                    serde_json::from_value::<ResourceType>(Value::String(t.clone())).map_err(
                        |_| GatewayError::invalid_params(format!("unknown resource type: {t}")),
                    )?,
                );
            }
            if let Some(l) = f.loader_type {
                filter.loader_type =
                    Some(serde_json::from_value(Value::String(l.clone())).map_err(|_| {
                        GatewayError::invalid_params(format!("unknown loader type: {l}"))
                    })?);
            }
            filter.capabilities = f.capabilities;
            filter.labels = f.labels;
        }

        let pagination = args
            .pagination
            .map(|p| Pagination {
                limit: p.limit,
                offset: p.offset,
            })
            .unwrap_or_default();

        let listing = self.registry.list(&filter, pagination);
        let resources: Vec<Value> = listing
            .resources
            .iter()
            .map(|r| serde_json::to_value(r.as_ref()).unwrap_or(Value::Null))
            .collect();

        Ok(json!({
            "resources": resources,
            "total": listing.total,
            "filteredCount": listing.filtered_count,
        }))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| GatewayError::invalid_params(format!("invalid tool arguments: {e}")))
}

/// Wrap a tool result in MCP content blocks.
fn tool_content(result: Value) -> Value {
    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
    json!({ "content": [ { "type": "text", "text": text } ] })
}

fn invalid_request(id: Option<Value>) -> RpcResponse {
    RpcResponse::failure(id, INVALID_REQUEST, "invalid request")
}

fn to_value(response: RpcResponse) -> Value {
    serde_json::to_value(response).expect("response serializes")
}

/// Map a gateway error onto the JSON-RPC envelope: parameter problems
/// become -32602, everything else -32603 with the typed payload in
/// `data`.
fn error_response(id: Option<Value>, err: GatewayError) -> RpcResponse {
    warn!(code = err.code.code(), "tool call failed: {err}");
    let rpc_code = match err.code {
        ErrorCode::ExecutionInvalidParameters => INVALID_PARAMS,
        _ => INTERNAL_ERROR,
    };
    RpcResponse::failure_with_data(id, rpc_code, err.message.clone(), Some(err.to_wire()))
}


#[cfg(test)]
mod tests {
    use super::testing::test_dispatcher;
    use super::*;
    use crate::resource::identifier::{LoaderType, ResourceIdentifier};
    use crate::resource::Resource;

    fn register_host(dispatcher: &Dispatcher, capabilities: Vec<&str>) -> String {
        std::env::set_var("OMNIGATE_DISPATCH_TEST_SECRET", "s3cret");
        let resource: Resource = serde_json::from_value(json!({
            "id": "web-01",
            "name": "Web",
            "type": "ssh-host",
            "capabilities": capabilities,
            "connection": {"host": "web-01.example.com", "username": "deploy"},
            "auth": {"credentialRef": "env://OMNIGATE_DISPATCH_TEST_SECRET"}
        }))
        .unwrap();
        let ident = ResourceIdentifier::new("ssh-host", LoaderType::Local, "default", "web-01");
        dispatcher.registry().register(&ident, resource, false).unwrap();
        ident.canonical()
    }

    #[tokio::test]
    async fn initialize_returns_protocol_and_server_info() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"clientInfo": {"name": "test"}}
            }))
            .await
            .unwrap();
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "omnigate");
    }

    #[tokio::test]
    async fn tools_list_exposes_five_tools() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn unknown_method_returns_32601() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({"jsonrpc": "2.0", "id": 3, "method": "prompts/list"}))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn batch_produces_ordered_batched_responses() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!([
                {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": 2, "method": "tools/list"}
            ]))
            .await
            .unwrap();
        let batch = response.as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["id"], 1);
        assert_eq!(batch[1]["id"], 2);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let dispatcher = test_dispatcher();
        let response = dispatcher.handle_envelope(json!([])).await.unwrap();
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn malformed_envelope_is_invalid_request() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({"jsonrpc": "2.0", "id": 7}))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn ssh_exec_resource_runs_through_adapter() {
        let dispatcher = test_dispatcher();
        let ident = register_host(&dispatcher, vec!["ssh.exec"]);
        let response = dispatcher
            .handle_envelope(json!({
                "jsonrpc": "2.0", "id": 5, "method": "tools/call",
                "params": {"name": "ssh_exec_resource",
                           "arguments": {"resource": ident, "command": "uptime"}}
            }))
            .await
            .unwrap();
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("uptime"));
    }

    #[tokio::test]
    async fn capability_mismatch_yields_6000_range_error() {
        let dispatcher = test_dispatcher();
        let ident = register_host(&dispatcher, vec!["ssh.exec"]);
        let response = dispatcher
            .handle_envelope(json!({
                "jsonrpc": "2.0", "id": 6, "method": "tools/call",
                "params": {"name": "http_request_resource",
                           "arguments": {"resource": ident}}
            }))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        assert_eq!(response["error"]["data"]["code"], 6002);
        assert_eq!(response["error"]["data"]["category"], "execution");
    }

    #[tokio::test]
    async fn ssh_commands_alias_works_end_to_end() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({
                "jsonrpc": "2.0", "id": 8, "method": "tools/call",
                "params": {"name": "ssh_exec",
                           "arguments": {"host": "web-01.example.com", "username": "u",
                                         "password": "p", "commands": "df -h"}}
            }))
            .await
            .unwrap();
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("df -h"));
    }

    #[tokio::test]
    async fn list_resources_reports_counts() {
        let dispatcher = test_dispatcher();
        register_host(&dispatcher, vec!["ssh.exec"]);
        let response = dispatcher
            .handle_envelope(json!({
                "jsonrpc": "2.0", "id": 9, "method": "tools/call",
                "params": {"name": "list_resources",
                           "arguments": {"filter": {"type": "ssh-host"}}}
            }))
            .await
            .unwrap();
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["total"], 1);
        assert_eq!(payload["filteredCount"], 1);
        assert_eq!(payload["resources"][0]["id"], "web-01");
    }

    #[tokio::test]
    async fn missing_tool_name_is_invalid_params() {
        let dispatcher = test_dispatcher();
        let response = dispatcher
            .handle_envelope(json!({
                "jsonrpc": "2.0", "id": 10, "method": "tools/call", "params": {}
            }))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }
}
