//! Wiring: build the gateway's object graph from a config snapshot.
//!
//! The same assembly runs at startup and on every config reload; the
//! reload path rebuilds the loader set, reruns them, and swaps the
//! registry contents atomically while the executors keep reading the
//! live config through their shared handle.

use crate::config::{Config, ConfigHandle};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::executor::http::HttpExecutor;
use crate::executor::ssh::{SshConnector, SshExecutor, SubprocessConnector};
use crate::resource::loader::{build_loaders, load_all};
use crate::resource::ResourceRegistry;
use crate::security::SecurityValidator;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Gateway {
    pub config: ConfigHandle,
    pub registry: Arc<ResourceRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub ssh: Arc<SshExecutor>,
}

/// Build the gateway with the default wire-client collaborator.
pub async fn build(config: Config) -> Result<Gateway> {
    build_with_connector(config, Arc::new(SubprocessConnector)).await
}

/// Build the gateway with an injected SSH connector (embedding hosts,
/// tests).
pub async fn build_with_connector(
    config: Config,
    connector: Arc<dyn SshConnector>,
) -> Result<Gateway> {
    let handle = ConfigHandle::new(config);
    let snapshot = handle.get();

    let validator = Arc::new(SecurityValidator::from_config(&snapshot.security));
    let registry = Arc::new(ResourceRegistry::new());
    populate_registry(&registry, &snapshot).await;

    let http = Arc::new(HttpExecutor::new(handle.clone(), validator.clone()));
    let ssh = Arc::new(SshExecutor::new(handle.clone(), validator, connector));
    let dispatcher = Arc::new(Dispatcher::new(
        handle.clone(),
        registry.clone(),
        http,
        ssh.clone(),
    ));

    Ok(Gateway {
        config: handle,
        registry,
        dispatcher,
        ssh,
    })
}

/// Run the configured loaders and atomically replace the registry
/// contents. Used at startup and by the reload path.
pub async fn populate_registry(registry: &ResourceRegistry, config: &Config) {
    let loaders = build_loaders(&config.resources);
    if loaders.is_empty() {
        info!("no resource loaders configured");
    }
    let (entries, errors) = load_all(&loaders).await;
    for err in &errors {
        warn!("loader error: {err}");
    }
    let count = entries.len();
    let rejected = registry.replace_all(entries);
    for err in rejected {
        warn!("rejected resource definition: {err}");
    }
    info!(resources = count, "registry populated");
}
