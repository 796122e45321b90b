//! Remote resource loader.
//!
//! Fetches a resource catalog from an HTTP(S) endpoint. The URL is
//! security-checked before any request goes out, the response is bounded
//! both by `Content-Length` and observed body size, transport errors and
//! 5xx responses are retried with exponential backoff (4xx never is),
//! and a TTL cache short-circuits repeat fetches.

use crate::config::{production_mode, LoaderConfig, RemoteAuthConfig};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::executor::backoff_delay;
use crate::resource::identifier::LoaderType;
use crate::resource::loader::{LoadOutcome, ResourceLoader};
use crate::resource::Resource;
use crate::security::{is_local_host, RESTRICTED_PORTS};
use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

struct CacheEntry {
    fetched_at: Instant,
    resources: Vec<Resource>,
}

pub struct RemoteResourceLoader {
    id: String,
    base_url: Url,
    auth: Option<RemoteAuthConfig>,
    headers: HashMap<String, String>,
    cache_ttl: Duration,
    max_retries: u32,
    allow_localhost: bool,
    allow_private_ips: bool,
    max_response_bytes: usize,
    client: reqwest::Client,
    cache: DashMap<String, CacheEntry>,
}

impl RemoteResourceLoader {
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        let LoaderConfig::Remote {
            id,
            base_url,
            auth,
            headers,
            cache_ttl_ms,
            max_retries,
            allow_localhost,
            allow_private_ips,
            max_response_bytes,
        } = config
        else {
            return Err(GatewayError::config("not a remote loader declaration"));
        };

        let url = Url::parse(base_url).map_err(|e| {
            GatewayError::new(
                ErrorCode::ConfigValidationFailed,
                format!("loader '{id}': invalid baseUrl '{base_url}': {e}"),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::internal(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            id: id.clone(),
            base_url: url,
            auth: auth.clone(),
            headers: headers.clone(),
            cache_ttl: Duration::from_millis(*cache_ttl_ms),
            max_retries: *max_retries,
            allow_localhost: *allow_localhost,
            allow_private_ips: *allow_private_ips,
            max_response_bytes: *max_response_bytes,
            client,
            cache: DashMap::new(),
        })
    }

    /// Pre-flight checks on the catalog URL; nothing is fetched when
    /// these fail.
    fn check_url(&self) -> Result<()> {
        let url = &self.base_url;
        match url.scheme() {
            "https" => {}
            "http" if !production_mode() => {}
            "http" => {
                return Err(GatewayError::new(
                    ErrorCode::SecurityViolation,
                    format!("loader '{}': HTTPS is required in production", self.id),
                ))
            }
            other => {
                return Err(GatewayError::new(
                    ErrorCode::SecurityViolation,
                    format!("loader '{}': scheme '{other}' is not allowed", self.id),
                ))
            }
        }

        let host = url.host_str().unwrap_or("");
        let local = is_local_host(host);
        if local {
            let is_loopback = host.eq_ignore_ascii_case("localhost")
                || host.starts_with("127.")
                || host == "::1"
                || host == "[::1]";
            if is_loopback && !self.allow_localhost {
                return Err(GatewayError::new(
                    ErrorCode::SecurityViolation,
                    format!("loader '{}': localhost catalog URLs are disabled", self.id),
                ));
            }
            if !is_loopback && !self.allow_private_ips {
                return Err(GatewayError::new(
                    ErrorCode::SecurityViolation,
                    format!("loader '{}': private-network catalog URLs are disabled", self.id),
                ));
            }
        }

        if let Some(port) = url.port() {
            if RESTRICTED_PORTS.contains(&port) {
                return Err(GatewayError::new(
                    ErrorCode::SecurityViolation,
                    format!("loader '{}': destination port {port} is restricted", self.id),
                ));
            }
        }
        Ok(())
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match &self.auth {
            Some(RemoteAuthConfig::Basic { username, password }) => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                headers.push(("Authorization".to_string(), format!("Basic {encoded}")));
            }
            Some(RemoteAuthConfig::Bearer { token }) => {
                headers.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
            Some(RemoteAuthConfig::Apikey { header, key }) => {
                headers.push((header.clone(), key.clone()));
            }
            None => {}
        }
        headers
    }

    async fn fetch_once(&self) -> Result<Vec<Resource>> {
        let mut request = self.client.get(self.base_url.clone());
        for (name, value) in self.auth_headers() {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(GatewayError::from)?;
        let status = response.status();

        if status.is_server_error() {
            return Err(GatewayError::new(
                ErrorCode::ConnectionFailed,
                format!("catalog fetch returned {status}"),
            )
            .recoverable());
        }
        if !status.is_success() {
            // 4xx: definitive, never retried.
            return Err(GatewayError::new(
                ErrorCode::ResourceLoadFailed,
                format!("catalog fetch returned {status}"),
            ));
        }

        if let Some(declared) = response.content_length() {
            if declared as usize > self.max_response_bytes {
                return Err(self.too_large(declared as usize));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        // Observed-length enforcement, independent of Content-Length.
        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(GatewayError::from)? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(self.too_large(body.len() + chunk.len()));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8(body).map_err(|e| {
            GatewayError::new(
                ErrorCode::ResourceLoadFailed,
                format!("catalog body is not UTF-8: {e}"),
            )
        })?;

        let yaml = content_type.contains("yaml") || self.base_url.path().ends_with(".yaml")
            || self.base_url.path().ends_with(".yml");
        let value: Value = if yaml {
            serde_yaml::from_str(&text).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceLoadFailed,
                    format!("catalog YAML parse failed: {e}"),
                )
            })?
        } else {
            serde_json::from_str(&text).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceLoadFailed,
                    format!("catalog JSON parse failed: {e}"),
                )
            })?
        };

        let raw_items = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            _ => {
                return Err(GatewayError::new(
                    ErrorCode::ResourceLoadFailed,
                    "catalog must be an object or an array",
                ))
            }
        };

        let mut resources = Vec::with_capacity(raw_items.len());
        for (index, item) in raw_items.into_iter().enumerate() {
            let resource: Resource = serde_json::from_value(item).map_err(|e| {
                GatewayError::new(
                    ErrorCode::ResourceInvalidDefinition,
                    format!("catalog entry [{index}]: {e}"),
                )
            })?;
            resources.push(resource);
        }
        Ok(resources)
    }

    fn too_large(&self, observed: usize) -> GatewayError {
        GatewayError::new(
            ErrorCode::ResourceLoadFailed,
            format!(
                "catalog response exceeds {} bytes (observed {observed})",
                self.max_response_bytes
            ),
        )
    }

    async fn fetch_with_retries(&self) -> Result<Vec<Resource>> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once().await {
                Ok(resources) => return Ok(resources),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff_delay(200, 2.0, attempt, 5_000);
                    warn!(
                        loader = %self.id,
                        attempt,
                        "catalog fetch failed, retrying in {delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl ResourceLoader for RemoteResourceLoader {
    fn id(&self) -> &str {
        &self.id
    }

    fn loader_type(&self) -> LoaderType {
        LoaderType::Remote
    }

    async fn load(&self) -> LoadOutcome {
        if let Err(err) = self.check_url() {
            return LoadOutcome {
                success: false,
                resources: Vec::new(),
                errors: vec![err],
            };
        }

        let key = self.base_url.to_string();
        if let Some(entry) = self.cache.get(&key) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                debug!(loader = %self.id, "catalog cache hit");
                return LoadOutcome {
                    success: true,
                    resources: entry.resources.clone(),
                    errors: Vec::new(),
                };
            }
        }

        match self.fetch_with_retries().await {
            Ok(resources) => {
                self.cache.insert(
                    key,
                    CacheEntry {
                        fetched_at: Instant::now(),
                        resources: resources.clone(),
                    },
                );
                LoadOutcome {
                    success: true,
                    resources,
                    errors: Vec::new(),
                }
            }
            Err(err) => LoadOutcome {
                success: false,
                resources: Vec::new(),
                errors: vec![err],
            },
        }
    }

    async fn refresh(&self) -> LoadOutcome {
        self.cache.clear();
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader_config(base_url: &str) -> LoaderConfig {
        LoaderConfig::Remote {
            id: "catalog".to_string(),
            base_url: base_url.to_string(),
            auth: None,
            headers: HashMap::new(),
            cache_ttl_ms: 60_000,
            max_retries: 2,
            allow_localhost: true,
            allow_private_ips: false,
            max_response_bytes: 1024 * 1024,
        }
    }

    fn catalog_body() -> serde_json::Value {
        serde_json::json!([
            {"id": "api-1", "name": "API 1", "type": "http-api",
             "capabilities": ["http.request"],
             "connection": {"baseUrl": "https://api1.example.com"}}
        ])
    }

    #[tokio::test]
    async fn fetches_and_caches_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalog.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .expect(1) // Second load must be served from cache.
            .mount(&server)
            .await;

        let loader = RemoteResourceLoader::from_config(&loader_config(&format!(
            "{}/catalog.json",
            server.uri()
        )))
        .unwrap();

        let first = loader.load().await;
        assert!(first.success);
        assert_eq!(first.resources.len(), 1);

        let second = loader.load().await;
        assert!(second.success);
        assert_eq!(second.resources.len(), 1);
    }

    #[tokio::test]
    async fn refresh_bypasses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .expect(2)
            .mount(&server)
            .await;

        let loader =
            RemoteResourceLoader::from_config(&loader_config(&server.uri())).unwrap();
        assert!(loader.load().await.success);
        assert!(loader.refresh().await.success);
    }

    #[tokio::test]
    async fn retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .expect(1)
            .mount(&server)
            .await;

        let loader =
            RemoteResourceLoader::from_config(&loader_config(&server.uri())).unwrap();
        let outcome = loader.load().await;
        assert!(outcome.success);
        assert_eq!(outcome.resources.len(), 1);
    }

    #[tokio::test]
    async fn does_not_retry_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1) // A retry would fail this expectation.
            .mount(&server)
            .await;

        let loader =
            RemoteResourceLoader::from_config(&loader_config(&server.uri())).unwrap();
        let outcome = loader.load().await;
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].code, ErrorCode::ResourceLoadFailed);
    }

    #[tokio::test]
    async fn response_size_cap_is_enforced() {
        let server = MockServer::start().await;
        let huge = "x".repeat(4096);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(huge))
            .mount(&server)
            .await;

        let mut config = loader_config(&server.uri());
        if let LoaderConfig::Remote {
            max_response_bytes, ..
        } = &mut config
        {
            *max_response_bytes = 1024;
        }
        let loader = RemoteResourceLoader::from_config(&config).unwrap();
        let outcome = loader.load().await;
        assert!(!outcome.success);
        assert!(outcome.errors[0].message.contains("exceeds"));
    }

    #[tokio::test]
    async fn localhost_is_rejected_unless_allowed() {
        let server = MockServer::start().await;
        let mut config = loader_config(&server.uri());
        if let LoaderConfig::Remote {
            allow_localhost, ..
        } = &mut config
        {
            *allow_localhost = false;
        }
        let loader = RemoteResourceLoader::from_config(&config).unwrap();
        let outcome = loader.load().await;
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].code, ErrorCode::SecurityViolation);
    }

    #[tokio::test]
    async fn bearer_auth_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = loader_config(&server.uri());
        if let LoaderConfig::Remote { auth, .. } = &mut config {
            *auth = Some(RemoteAuthConfig::Bearer {
                token: "sekrit".to_string(),
            });
        }
        let loader = RemoteResourceLoader::from_config(&config).unwrap();
        assert!(loader.load().await.success);
    }

    #[tokio::test]
    async fn yaml_catalog_parses_by_content_type() {
        let server = MockServer::start().await;
        let yaml = "- id: api-1\n  name: API 1\n  type: http-api\n  connection:\n    baseUrl: https://api1.example.com\n";
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(yaml, "application/yaml"),
            )
            .mount(&server)
            .await;

        let loader =
            RemoteResourceLoader::from_config(&loader_config(&server.uri())).unwrap();
        let outcome = loader.load().await;
        assert!(outcome.success, "{:?}", outcome.errors);
        assert_eq!(outcome.resources.len(), 1);
    }
}
