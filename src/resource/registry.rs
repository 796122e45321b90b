//! In-memory resource registry with atomic snapshot replacement.
//!
//! Readers always observe a consistent snapshot: the registry keeps its
//! indexed state in an immutable inner structure behind an `ArcSwap`,
//! and every mutation builds the next snapshot before swapping it in.
//! On config reload the whole registry is rebuilt and swapped, never
//! mutated in place.

use crate::error::{ErrorCode, GatewayError, Result};
use crate::resource::identifier::{LoaderType, ResourceIdentifier};
use crate::resource::{Resource, ResourceType};
use arc_swap::ArcSwap;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

/// Typed change notification delivered to registry watchers.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub identifier: String,
    pub resource: Option<Arc<Resource>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Outcome of [`ResourceRegistry::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(Arc<Resource>),
    NotFound { reason: String },
}

impl Resolution {
    pub fn found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn into_resource(self) -> Option<Arc<Resource>> {
        match self {
            Resolution::Found(r) => Some(r),
            Resolution::NotFound { .. } => None,
        }
    }
}

/// Predicate filter for [`ResourceRegistry::list`]. All present clauses
/// must match; `capabilities` requires every listed capability.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub resource_type: Option<ResourceType>,
    pub loader_type: Option<LoaderType>,
    pub capabilities: Vec<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Clamp to the supported window: limit ∈ [1, 1000], offset ≥ 0.
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 1000),
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub resources: Vec<Arc<Resource>>,
    pub total: usize,
    pub filtered_count: usize,
}

#[derive(Default, Clone)]
struct RegistryInner {
    records: HashMap<String, Arc<Resource>>,
    /// Registration order, for stable listings.
    order: Vec<String>,
    by_type: HashMap<ResourceType, BTreeSet<String>>,
    by_loader: HashMap<LoaderType, BTreeSet<String>>,
    by_group: HashMap<String, BTreeSet<String>>,
    by_label: HashMap<(String, String), BTreeSet<String>>,
    by_tag: HashMap<String, BTreeSet<String>>,
}

impl RegistryInner {
    fn insert(&mut self, key: String, ident: &ResourceIdentifier, resource: Arc<Resource>) {
        if !self.records.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.index(&key, ident, &resource);
        self.records.insert(key, resource);
    }

    fn index(&mut self, key: &str, ident: &ResourceIdentifier, resource: &Resource) {
        self.by_type
            .entry(resource.resource_type)
            .or_default()
            .insert(key.to_string());
        self.by_loader
            .entry(ident.loader_type)
            .or_default()
            .insert(key.to_string());
        if let Some(group) = &resource.metadata.group {
            self.by_group
                .entry(group.clone())
                .or_default()
                .insert(key.to_string());
        }
        for (name, value) in &resource.labels {
            self.by_label
                .entry((name.clone(), value.clone()))
                .or_default()
                .insert(key.to_string());
        }
        for tag in &resource.metadata.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn remove_entry(&mut self, key: &str) -> Option<Arc<Resource>> {
        let resource = self.records.remove(key)?;
        self.order.retain(|k| k != key);
        for set in self.by_type.values_mut() {
            set.remove(key);
        }
        for set in self.by_loader.values_mut() {
            set.remove(key);
        }
        for set in self.by_group.values_mut() {
            set.remove(key);
        }
        for set in self.by_label.values_mut() {
            set.remove(key);
        }
        for set in self.by_tag.values_mut() {
            set.remove(key);
        }
        Some(resource)
    }

    fn matches(&self, key: &str, resource: &Resource, filter: &ListFilter) -> bool {
        if let Some(t) = filter.resource_type {
            if resource.resource_type != t {
                return false;
            }
        }
        if let Some(l) = filter.loader_type {
            if !self
                .by_loader
                .get(&l)
                .map(|set| set.contains(key))
                .unwrap_or(false)
            {
                return false;
            }
        }
        for capability in &filter.capabilities {
            if !resource.has_capability(capability) {
                return false;
            }
        }
        for (name, value) in &filter.labels {
            if resource.labels.get(name) != Some(value) {
                return false;
            }
        }
        true
    }
}

pub struct ResourceRegistry {
    inner: ArcSwap<RegistryInner>,
    /// Serializes writers; readers never take it.
    write_lock: Mutex<()>,
    events: broadcast::Sender<ChangeEvent>,
    generation: AtomicU64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: ArcSwap::from_pointee(RegistryInner::default()),
            write_lock: Mutex::new(()),
            events,
            generation: AtomicU64::new(0),
        }
    }

    /// Subscribe to typed change events. Slow subscribers may observe
    /// `Lagged` and should re-list.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.load().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Register a resource under its canonical identifier. Duplicate
    /// identifiers are rejected unless `overwrite` is set.
    pub fn register(
        &self,
        ident: &ResourceIdentifier,
        resource: Resource,
        overwrite: bool,
    ) -> Result<()> {
        resource.validate()?;
        let key = ident.canonical();

        let _guard = self.write_lock.lock().expect("registry write lock");
        let mut next = (**self.inner.load()).clone();

        let existed = next.records.contains_key(&key);
        if existed && !overwrite {
            return Err(GatewayError::new(
                ErrorCode::ResourceInvalidDefinition,
                format!("identifier already registered: {key}"),
            )
            .with_suggestion("pass overwrite to replace the existing record"));
        }

        let resource = Arc::new(resource);
        next.insert(key.clone(), ident, resource.clone());
        self.swap(next);

        self.emit(
            if existed {
                ChangeKind::Updated
            } else {
                ChangeKind::Added
            },
            key,
            Some(resource),
        );
        Ok(())
    }

    /// O(1) lookup by canonical identifier string.
    pub fn resolve(&self, identifier: &str) -> Resolution {
        let ident = match ResourceIdentifier::parse(identifier) {
            Ok(ident) => ident,
            Err(err) => {
                return Resolution::NotFound {
                    reason: err.message,
                }
            }
        };
        match self.inner.load().records.get(&ident.canonical()) {
            Some(resource) => Resolution::Found(resource.clone()),
            None => Resolution::NotFound {
                reason: format!("no resource registered under {identifier}"),
            },
        }
    }

    /// Filtered, paginated listing in registration order.
    pub fn list(&self, filter: &ListFilter, pagination: Pagination) -> ListResult {
        let pagination = pagination.clamped();
        let inner = self.inner.load();

        let matching: Vec<&String> = inner
            .order
            .iter()
            .filter(|key| {
                inner
                    .records
                    .get(*key)
                    .map(|r| inner.matches(key, r, filter))
                    .unwrap_or(false)
            })
            .collect();

        let filtered_count = matching.len();
        let resources = matching
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .filter_map(|key| inner.records.get(key).cloned())
            .collect();

        ListResult {
            resources,
            total: inner.records.len(),
            filtered_count,
        }
    }

    /// Replace a registered resource, bumping `updated_at`.
    pub fn update(&self, identifier: &str, mut resource: Resource) -> Result<()> {
        resource.validate()?;
        let ident = ResourceIdentifier::parse(identifier)?;
        let key = ident.canonical();

        let _guard = self.write_lock.lock().expect("registry write lock");
        let mut next = (**self.inner.load()).clone();
        if !next.records.contains_key(&key) {
            return Err(GatewayError::resource_not_found(key));
        }
        resource.updated_at = Utc::now();
        let resource = Arc::new(resource);
        next.remove_entry(&key);
        next.insert(key.clone(), &ident, resource.clone());
        self.swap(next);
        self.emit(ChangeKind::Updated, key, Some(resource));
        Ok(())
    }

    /// Remove a resource. Fails when live dependents exist, unless
    /// `force` is set.
    pub fn remove(&self, identifier: &str, force: bool) -> Result<()> {
        let ident = ResourceIdentifier::parse(identifier)?;
        let key = ident.canonical();

        let _guard = self.write_lock.lock().expect("registry write lock");
        let dependents = self.dependents_keys(&key);
        if !dependents.is_empty() && !force {
            return Err(GatewayError::new(
                ErrorCode::ResourceAccessDenied,
                format!(
                    "resource {key} has {} dependent(s): {}",
                    dependents.len(),
                    dependents.join(", ")
                ),
            )
            .with_suggestion("pass force=true to remove anyway"));
        }

        let mut next = (**self.inner.load()).clone();
        if next.remove_entry(&key).is_none() {
            return Err(GatewayError::resource_not_found(key));
        }
        self.swap(next);
        self.emit(ChangeKind::Removed, key, None);
        Ok(())
    }

    pub fn enable(&self, identifier: &str) -> Result<()> {
        self.set_enabled(identifier, true)
    }

    pub fn disable(&self, identifier: &str) -> Result<()> {
        self.set_enabled(identifier, false)
    }

    fn set_enabled(&self, identifier: &str, enabled: bool) -> Result<()> {
        let ident = ResourceIdentifier::parse(identifier)?;
        let key = ident.canonical();

        let _guard = self.write_lock.lock().expect("registry write lock");
        let mut next = (**self.inner.load()).clone();
        let current = next
            .records
            .get(&key)
            .ok_or_else(|| GatewayError::resource_not_found(key.clone()))?;
        let mut updated = (**current).clone();
        updated.enabled = enabled;
        updated.updated_at = Utc::now();
        let updated = Arc::new(updated);
        next.remove_entry(&key);
        next.insert(key.clone(), &ident, updated.clone());
        self.swap(next);
        self.emit(ChangeKind::Updated, key, Some(updated));
        Ok(())
    }

    /// Resources this one depends on, resolved through
    /// `metadata.dependencies` edges.
    pub fn dependencies_of(&self, identifier: &str) -> Result<Vec<Arc<Resource>>> {
        let inner = self.inner.load();
        let record = inner
            .records
            .get(identifier)
            .ok_or_else(|| GatewayError::resource_not_found(identifier))?;
        Ok(record
            .metadata
            .dependencies
            .iter()
            .filter_map(|dep| inner.records.get(dep).cloned())
            .collect())
    }

    /// Resources that declare a dependency on this one.
    pub fn dependents_of(&self, identifier: &str) -> Result<Vec<Arc<Resource>>> {
        let inner = self.inner.load();
        if !inner.records.contains_key(identifier) {
            return Err(GatewayError::resource_not_found(identifier));
        }
        Ok(inner
            .records
            .iter()
            .filter(|(_, r)| r.metadata.dependencies.iter().any(|d| d == identifier))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn dependents_keys(&self, identifier: &str) -> Vec<String> {
        self.inner
            .load()
            .records
            .iter()
            .filter(|(_, r)| r.metadata.dependencies.iter().any(|d| d == identifier))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Atomically replace the entire registry from a fresh loader run.
    /// Invalid entries are skipped and returned as errors; readers see
    /// either the old or the new registry, never a half-built one.
    pub fn replace_all(
        &self,
        entries: Vec<(ResourceIdentifier, Resource)>,
    ) -> Vec<GatewayError> {
        let mut errors = Vec::new();
        let mut next = RegistryInner::default();
        for (ident, resource) in entries {
            if let Err(err) = resource.validate() {
                errors.push(err);
                continue;
            }
            next.insert(ident.canonical(), &ident, Arc::new(resource));
        }

        let _guard = self.write_lock.lock().expect("registry write lock");
        let count = next.records.len();
        self.swap(next);
        debug!(resources = count, "registry replaced");
        errors
    }

    fn swap(&self, next: RegistryInner) {
        self.inner.store(Arc::new(next));
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, kind: ChangeKind, identifier: String, resource: Option<Arc<Resource>>) {
        let _ = self.events.send(ChangeEvent {
            kind,
            identifier,
            resource,
        });
    }
}
