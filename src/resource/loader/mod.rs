//! Resource loaders.
//!
//! A loader produces resource definitions from an external source.
//! Both concrete loaders share one contract: `load` returns whatever
//! could be produced plus the per-item errors, `validate` checks a
//! single definition, `refresh` drops any cache and loads again.

use crate::config::{LoaderConfig, ResourcesConfig};
use crate::error::GatewayError;
use crate::resource::identifier::{LoaderType, ResourceIdentifier};
use crate::resource::Resource;
use async_trait::async_trait;
use tracing::warn;

pub mod local;
pub mod remote;

pub use local::LocalFileLoader;
pub use remote::RemoteResourceLoader;

/// Result of one loader run. `success` is false iff any source failed,
/// but partial results are still returned.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub success: bool,
    pub resources: Vec<Resource>,
    pub errors: Vec<GatewayError>,
}

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    fn id(&self) -> &str;

    fn loader_type(&self) -> LoaderType;

    async fn load(&self) -> LoadOutcome;

    fn validate(&self, resource: &Resource) -> crate::error::Result<()> {
        resource.validate()
    }

    /// Drop caches and load fresh. Loaders without caches just load.
    async fn refresh(&self) -> LoadOutcome {
        self.load().await
    }
}

/// Build the loader set declared in the config.
pub fn build_loaders(config: &ResourcesConfig) -> Vec<Box<dyn ResourceLoader>> {
    let mut loaders: Vec<Box<dyn ResourceLoader>> = Vec::new();
    for declaration in &config.loaders {
        match declaration {
            LoaderConfig::Local { .. } => match LocalFileLoader::from_config(declaration) {
                Ok(loader) => loaders.push(Box::new(loader)),
                Err(err) => warn!(loader = declaration.id(), "skipping loader: {err}"),
            },
            LoaderConfig::Remote { .. } => match RemoteResourceLoader::from_config(declaration) {
                Ok(loader) => loaders.push(Box::new(loader)),
                Err(err) => warn!(loader = declaration.id(), "skipping loader: {err}"),
            },
        }
    }
    loaders
}

/// Run every loader and produce the registry entries, with canonical
/// identifiers derived from each resource's type and the loader that
/// produced it.
pub async fn load_all(
    loaders: &[Box<dyn ResourceLoader>],
) -> (Vec<(ResourceIdentifier, Resource)>, Vec<GatewayError>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for loader in loaders {
        let outcome = loader.load().await;
        for err in outcome.errors {
            warn!(loader = loader.id(), "load error: {err}");
            errors.push(err);
        }
        for resource in outcome.resources {
            let ident = ResourceIdentifier::new(
                resource.resource_type.as_str(),
                loader.loader_type(),
                loader.id(),
                resource.id.clone(),
            );
            entries.push((ident, resource));
        }
    }
    (entries, errors)
}
