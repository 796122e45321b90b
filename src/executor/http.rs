//! Direct HTTP execution.
//!
//! One pre-flight pipeline serves both direct-mode and resource-mode
//! calls: URL safety, header validation, body caps and the content-type
//! allowlist all run before a request leaves the process. Transport
//! failures and 5xx responses are retried with exponential backoff per
//! the configured policy; 4xx responses are never retried.

use crate::config::{production_mode, ConfigHandle};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::executor::backoff_delay;
use crate::security::{is_spoofable_header, SecurityValidator};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Per-header-value size cap.
const MAX_HEADER_VALUE_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HttpResponseData {
    pub status_code: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: String,
    pub duration_ms: u64,
}

pub struct HttpExecutor {
    config: ConfigHandle,
    validator: Arc<SecurityValidator>,
}

impl HttpExecutor {
    pub fn new(config: ConfigHandle, validator: Arc<SecurityValidator>) -> Self {
        Self { config, validator }
    }

    /// Execute one HTTP request under the live policy snapshot.
    pub async fn execute(&self, spec: &HttpRequestSpec) -> Result<HttpResponseData> {
        let config = self.config.get();
        let url = self.preflight(spec, &config.security)?;

        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(config.http.timeout_ms));
        let client = self.build_client(timeout, config.http.max_redirects, &config.security)?;

        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match self
                .send_once(&client, spec, &url, config.security.max_response_bytes)
                .await
            {
                Ok(mut data) => {
                    data.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(data);
                }
                Err(err) if err.is_retryable() && attempt < config.http.max_retries => {
                    let delay = backoff_delay(
                        config.http.retry_base_ms,
                        2.0,
                        attempt,
                        config.http.retry_cap_ms,
                    );
                    warn!(attempt, "HTTP request failed, retrying in {delay:?}: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// All checks that must pass before any bytes leave the process.
    fn preflight(
        &self,
        spec: &HttpRequestSpec,
        security: &crate::config::SecurityConfig,
    ) -> Result<Url> {
        let url = Url::parse(&spec.url).map_err(|e| {
            GatewayError::invalid_params(format!("invalid URL '{}': {e}", spec.url))
        })?;

        if production_mode() && url.scheme() != "https" {
            return Err(GatewayError::new(
                ErrorCode::SecurityViolation,
                "HTTPS is required in production",
            ));
        }

        self.validator
            .check_url(&url)
            .map_err(|reason| GatewayError::new(ErrorCode::SecurityViolation, reason))?;

        for (name, value) in &spec.headers {
            if value.len() > MAX_HEADER_VALUE_BYTES {
                return Err(GatewayError::invalid_params(format!(
                    "header '{name}' exceeds {MAX_HEADER_VALUE_BYTES} bytes"
                )));
            }
            if value.chars().any(|c| c == '\r' || c == '\n' || (c.is_control() && c != '\t')) {
                return Err(GatewayError::new(
                    ErrorCode::SecurityViolation,
                    format!("header '{name}' contains control characters"),
                ));
            }
            if is_spoofable_header(name) {
                warn!(header = %name, "passing through spoofable forwarding header");
            }
        }

        if let Some(body) = &spec.body {
            if body.len() > security.max_request_bytes {
                return Err(GatewayError::invalid_params(format!(
                    "request body exceeds {} bytes",
                    security.max_request_bytes
                )));
            }
            if let Some(content_type) = header_value(&spec.headers, "content-type") {
                let base = content_type
                    .split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase();
                if !security
                    .allowed_content_types
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(&base))
                {
                    return Err(GatewayError::new(
                        ErrorCode::SecurityViolation,
                        format!("content-type '{base}' is not on the allowlist"),
                    ));
                }
            }
        }

        Ok(url)
    }

    fn build_client(
        &self,
        timeout: Duration,
        max_redirects: usize,
        security: &crate::config::SecurityConfig,
    ) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(max_redirects));

        // The skip toggle is inert in production.
        if security.skip_tls_verification && !production_mode() {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| GatewayError::internal(format!("HTTP client build failed: {e}")))
    }

    async fn send_once(
        &self,
        client: &reqwest::Client,
        spec: &HttpRequestSpec,
        url: &Url,
        max_response_bytes: usize,
    ) -> Result<HttpResponseData> {
        let method: reqwest::Method = spec
            .method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| GatewayError::invalid_params(format!("invalid method '{}'", spec.method)))?;

        let mut request = client.request(method, url.clone());
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::timeout(format!("request to {url} timed out"))
            } else {
                GatewayError::from(e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::new(
                ErrorCode::ConnectionFailed,
                format!("upstream returned {status}"),
            )
            .recoverable()
            .with_context(json!({ "statusCode": status.as_u16() })));
        }

        if let Some(declared) = response.content_length() {
            if declared as usize > max_response_bytes {
                return Err(too_large(max_response_bytes, declared as usize));
            }
        }

        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(GatewayError::from)? {
            if body.len() + chunk.len() > max_response_bytes {
                return Err(too_large(max_response_bytes, body.len() + chunk.len()));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status = status.as_u16(), bytes = body.len(), "HTTP response");
        Ok(HttpResponseData {
            status_code: status.as_u16(),
            response_headers,
            response_body: String::from_utf8_lossy(&body).into_owned(),
            duration_ms: 0,
        })
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn too_large(cap: usize, observed: usize) -> GatewayError {
    GatewayError::new(
        ErrorCode::ExecutionFailed,
        format!("response exceeds {cap} bytes (observed {observed})"),
    )
}
