//! Common test utilities for integration tests.

use omnigate::bootstrap::{build_with_connector, Gateway};
use omnigate::config::Config;
use omnigate::executor::ssh::SubprocessConnector;
use std::sync::Arc;

/// Gateway wired for tests: local connections allowed so wiremock
/// backends on 127.0.0.1 are reachable. The SSH connector is the
/// subprocess collaborator; tests that must not touch a backend rely on
/// the gates rejecting the call before any connector use.
pub async fn test_gateway() -> Gateway {
    test_gateway_with(|_| {}).await
}

#[allow(dead_code)]
pub async fn test_gateway_with(mutate: impl FnOnce(&mut Config)) -> Gateway {
    let mut config = Config::default();
    config.security.allow_local_connections = true;
    mutate(&mut config);
    build_with_connector(config, Arc::new(SubprocessConnector))
        .await
        .expect("gateway builds")
}

/// Register one resource straight into the gateway's registry.
#[allow(dead_code)]
pub fn register_resource(gateway: &Gateway, definition: serde_json::Value) -> String {
    let resource: omnigate::resource::Resource =
        serde_json::from_value(definition).expect("valid resource definition");
    let loader_type = omnigate::resource::LoaderType::Local;
    let ident = omnigate::resource::ResourceIdentifier::new(
        resource.resource_type.as_str(),
        loader_type,
        "default",
        resource.id.clone(),
    );
    gateway
        .registry
        .register(&ident, resource, false)
        .expect("registers");
    ident.canonical()
}
