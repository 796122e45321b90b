//! Configuration hot-reload using notify and arc-swap.
//!
//! The watcher observes the effective configuration file, every default
//! candidate path, and their parent directories (editors replace files
//! atomically, so the rename lands on the directory). Events are
//! debounced; each fire re-runs the full precedence resolution. A valid
//! result is swapped in atomically and announced through `on_apply`; a
//! failed reload is reported through `on_error` while the previous tree
//! stays live.

use crate::config::resolve::{default_candidates, resolve_config, ConfigMeta, ResolveOptions};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebouncedEvent};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared handle to the live configuration. Reads are lock-free and
/// return a consistent snapshot; the watcher swaps the pointer on a
/// successful reload.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn get(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    pub fn store(&self, config: Config) {
        self.inner.store(Arc::new(config));
    }
}

pub type ApplyCallback = Box<dyn Fn(Arc<Config>, ConfigMeta) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(GatewayError) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Debounce window for filesystem events. Clamped to a 200 ms floor
    /// so half-written files settle before the reload fires.
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
        }
    }
}

/// Running watcher. Dropping it stops both the filesystem watcher and
/// the reloader task.
pub struct ConfigWatcher {
    handle: ConfigHandle,
    reload_tx: mpsc::UnboundedSender<()>,
    task: tokio::task::JoinHandle<()>,
    // Dropping the debouncer unwatches everything.
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::FileIdMap,
    >,
}

impl ConfigWatcher {
    /// Start watching. `handle` already holds the currently effective
    /// tree; reloads run the same resolution as startup.
    pub fn spawn(
        resolve_opts: ResolveOptions,
        effective_path: Option<PathBuf>,
        handle: ConfigHandle,
        options: WatchOptions,
        on_apply: ApplyCallback,
        on_error: ErrorCallback,
    ) -> Result<Self> {
        let (reload_tx, mut reload_rx) = mpsc::unbounded_channel::<()>();

        let debounce = options.debounce.max(Duration::from_millis(200));
        let event_tx = reload_tx.clone();
        let mut debouncer = new_debouncer(
            debounce,
            None,
            move |result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>| {
                match result {
                    Ok(events) if !events.is_empty() => {
                        // All events inside the window collapse into one
                        // reload attempt.
                        let _ = event_tx.send(());
                    }
                    Ok(_) => {}
                    Err(errors) => {
                        for e in errors {
                            warn!("file watcher error: {e}");
                        }
                    }
                }
            },
        )?;

        // Watch the effective file, every candidate, and parent dirs.
        let mut watched: HashSet<PathBuf> = HashSet::new();
        let mut targets: Vec<PathBuf> = Vec::new();
        if let Some(path) = effective_path {
            targets.push(path);
        }
        targets.extend(default_candidates(resolve_opts.search_dirs.as_deref()));
        if let Some(cli) = &resolve_opts.cli_path {
            targets.push(cli.clone());
        }

        for target in targets {
            if target.is_file() && watched.insert(target.clone()) {
                if let Err(e) = debouncer.watcher().watch(&target, RecursiveMode::NonRecursive) {
                    debug!(path = %target.display(), "cannot watch file: {e}");
                }
            }
            if let Some(parent) = target.parent() {
                let parent = parent.to_path_buf();
                if parent.is_dir() && watched.insert(parent.clone()) {
                    if let Err(e) = debouncer.watcher().watch(&parent, RecursiveMode::NonRecursive)
                    {
                        debug!(path = %parent.display(), "cannot watch directory: {e}");
                    }
                }
            }
        }

        // Single reloader task: the serializer that keeps concurrent
        // reloads from racing.
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            while reload_rx.recv().await.is_some() {
                // Collapse any backlog that arrived while reloading.
                while reload_rx.try_recv().is_ok() {}

                match resolve_config(&resolve_opts) {
                    Ok((config, meta)) => {
                        task_handle.store(config);
                        let snapshot = task_handle.get();
                        info!(
                            source = meta.source.as_str(),
                            path = ?meta.path,
                            "configuration reloaded"
                        );
                        crate::metrics::CONFIG_RELOADS_TOTAL.inc();
                        on_apply(snapshot, meta);
                    }
                    Err(err) => {
                        warn!("configuration reload failed, keeping previous tree: {err}");
                        crate::metrics::CONFIG_RELOAD_ERRORS.inc();
                        on_error(err);
                    }
                }
            }
        });

        Ok(Self {
            handle,
            reload_tx,
            task,
            _debouncer: debouncer,
        })
    }

    pub fn handle(&self) -> ConfigHandle {
        self.handle.clone()
    }

    /// Force a reload outside the filesystem path (tests, SIGHUP-style
    /// triggers).
    pub fn trigger_reload(&self) {
        let _ = self.reload_tx.send(());
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve::EnvLookup;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn empty_env() -> EnvLookup {
        Arc::new(|_| None)
    }

    fn opts_for(dir: &TempDir) -> ResolveOptions {
        ResolveOptions {
            search_dirs: Some(vec![dir.path().to_path_buf()]),
            env: empty_env(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reload_applies_new_tree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.config.json");
        fs::write(&path, r#"{"logging": {"level": "info"}}"#).unwrap();

        let opts = opts_for(&dir);
        let (config, meta) = resolve_config(&opts).unwrap();
        let handle = ConfigHandle::new(config);

        let (applied_tx, mut applied_rx) = mpsc::unbounded_channel();
        let watcher = ConfigWatcher::spawn(
            opts,
            meta.path,
            handle.clone(),
            WatchOptions {
                debounce: Duration::from_millis(200),
            },
            Box::new(move |config, _meta| {
                let _ = applied_tx.send(config.logging.level.clone());
            }),
            Box::new(|_| {}),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, r#"{"logging": {"level": "error"}}"#).unwrap();

        let level = tokio::time::timeout(Duration::from_secs(5), applied_rx.recv())
            .await
            .expect("reload timed out")
            .unwrap();
        assert_eq!(level, "error");
        assert_eq!(handle.get().logging.level, "error");
        drop(watcher);
    }

    #[tokio::test]
    async fn invalid_rewrite_keeps_previous_tree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.config.json");
        fs::write(&path, r#"{"logging": {"level": "info"}}"#).unwrap();

        let opts = opts_for(&dir);
        let (config, meta) = resolve_config(&opts).unwrap();
        let handle = ConfigHandle::new(config);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let errors_clone = errors.clone();
        let watcher = ConfigWatcher::spawn(
            opts,
            meta.path,
            handle.clone(),
            WatchOptions {
                debounce: Duration::from_millis(200),
            },
            Box::new(|_, _| {}),
            Box::new(move |err| {
                errors_clone.lock().unwrap().push(err.to_string());
                let _ = error_tx.send(());
            }),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, "{broken json").unwrap();

        tokio::time::timeout(Duration::from_secs(5), error_rx.recv())
            .await
            .expect("error callback timed out");

        // Previous tree is still live.
        assert_eq!(handle.get().logging.level, "info");
        assert!(!errors.lock().unwrap().is_empty());
        drop(watcher);
    }

    #[tokio::test]
    async fn manual_trigger_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.config.json");
        fs::write(&path, r#"{"logging": {"level": "info"}}"#).unwrap();

        let opts = opts_for(&dir);
        let (config, meta) = resolve_config(&opts).unwrap();
        let handle = ConfigHandle::new(config);

        let (applied_tx, mut applied_rx) = mpsc::unbounded_channel();
        let watcher = ConfigWatcher::spawn(
            opts,
            meta.path,
            handle.clone(),
            WatchOptions::default(),
            Box::new(move |_, meta| {
                let _ = applied_tx.send(meta.source);
            }),
            Box::new(|_| {}),
        )
        .unwrap();

        fs::write(&path, r#"{"logging": {"level": "debug"}}"#).unwrap();
        watcher.trigger_reload();

        tokio::time::timeout(Duration::from_secs(5), applied_rx.recv())
            .await
            .expect("apply timed out");
        assert_eq!(handle.get().logging.level, "debug");
    }
}
