//! Omnigate — MCP gateway for SSH and HTTP backends.
//!
//! Speaks the Model Context Protocol over stdio, SSE, or
//! streamable-HTTP and dispatches tool calls to remote shell hosts and
//! HTTP endpoints, either ad-hoc or through registered resources.

use anyhow::Context;
use clap::{Parser, Subcommand};
use omnigate::config::resolve::{builtin_config, process_env, resolve_config, ResolveOptions};
use omnigate::config::watcher::{ConfigWatcher, WatchOptions};
use omnigate::config::{Config, TransportMode};
use omnigate::transport::{SseTransport, StdioTransport, StreamableHttpTransport, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "omnigate")]
#[command(about = "MCP gateway for SSH and HTTP backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (highest-precedence tier)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport override (stdio, sse, http)
    #[arg(short, long)]
    transport: Option<TransportMode>,

    /// Watch the configuration for changes and hot-reload
    #[arg(long)]
    watch: bool,

    /// Fail instead of falling back when --config or MCP_CONFIG is
    /// unusable
    #[arg(long)]
    strict_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default)
    Serve,

    /// Validate a configuration file and exit
    Validate {
        /// Configuration file to validate
        config: PathBuf,
    },

    /// Print the resources produced by the configured loaders
    Resources,
}

fn init_tracing(level: &str) {
    // Stdout belongs to the stdio transport; every human-readable line
    // goes to stderr regardless of transport.
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn ci_mode() -> bool {
    std::env::var("CI").map(|v| v == "true").unwrap_or(false)
}

fn load_config(cli: &Cli) -> anyhow::Result<(Config, omnigate::config::ConfigMeta, ResolveOptions)> {
    let opts = ResolveOptions {
        cli_path: cli.config.clone(),
        allow_fallback: !cli.strict_config,
        search_dirs: None,
        env: process_env(),
    };

    match resolve_config(&opts) {
        Ok((config, meta)) => Ok((config, meta, opts)),
        Err(err) if ci_mode() => {
            // CI treats config-load failure as fatal.
            Err(anyhow::anyhow!("{err}"))
        }
        Err(err) => {
            warn!("no usable configuration, continuing with built-in defaults: {err}");
            let config = builtin_config(&opts.env)
                .map_err(|e| anyhow::anyhow!("built-in defaults are unusable: {e}"))?;
            let meta = omnigate::config::ConfigMeta {
                source: omnigate::config::ConfigSource::None,
                path: None,
                duration_ms: 0,
            };
            Ok((config, meta, opts))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { ref config }) => {
            init_tracing("warn");
            let opts = ResolveOptions {
                cli_path: Some(config.clone()),
                allow_fallback: false,
                search_dirs: Some(vec![]),
                env: process_env(),
            };
            match resolve_config(&opts) {
                Ok((_, meta)) => {
                    println!(
                        "OK: {} ({} ms)",
                        meta.path.unwrap_or_default().display(),
                        meta.duration_ms
                    );
                    Ok(())
                }
                Err(err) => {
                    eprintln!("invalid: {err}");
                    for suggestion in err.suggestions.iter().take(3) {
                        eprintln!("  hint: {suggestion}");
                    }
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Resources) => {
            let (mut config, _, _) = load_config(&cli)?;
            init_tracing(&config.logging.level.clone());
            apply_cli_overrides(&mut config, &cli);
            let gateway = omnigate::bootstrap::build(config).await?;
            let listing = gateway.registry.list(
                &omnigate::resource::registry::ListFilter::default(),
                omnigate::resource::registry::Pagination::default(),
            );
            for resource in listing.resources {
                println!(
                    "{}\t{}\t{}\t[{}]",
                    resource.id,
                    resource.resource_type,
                    if resource.enabled { "enabled" } else { "disabled" },
                    resource.capabilities.join(", ")
                );
            }
            info!(total = listing.total, "resources listed");
            Ok(())
        }
        Some(Commands::Serve) | None => {
            let (mut config, meta, opts) = load_config(&cli)?;
            init_tracing(&config.logging.level.clone());
            apply_cli_overrides(&mut config, &cli);
            info!(
                source = meta.source.as_str(),
                path = ?meta.path,
                "configuration resolved"
            );
            serve(cli, config, meta, opts).await
        }
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(mode) = cli.transport {
        config.transport.mode = mode;
    }
}

async fn serve(
    cli: Cli,
    config: Config,
    meta: omnigate::config::ConfigMeta,
    opts: ResolveOptions,
) -> anyhow::Result<()> {
    let gateway = omnigate::bootstrap::build(config).await?;

    // Hot reload: rebuild loaders and swap the registry atomically on
    // every applied tree; a rejected tree leaves everything as-is.
    let watch_enabled = cli.watch
        || std::env::var("MCP_WATCH_CONFIG")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);
    let _watcher = if watch_enabled {
        let registry = gateway.registry.clone();
        let watcher = ConfigWatcher::spawn(
            opts,
            meta.path.clone(),
            gateway.config.clone(),
            WatchOptions::default(),
            Box::new(move |config, meta| {
                info!(source = meta.source.as_str(), "applying reloaded configuration");
                let registry = registry.clone();
                tokio::spawn(async move {
                    omnigate::bootstrap::populate_registry(&registry, &config).await;
                });
            }),
            Box::new(|err| {
                warn!("config reload rejected: {err}");
            }),
        )
        .context("cannot start config watcher")?;
        Some(watcher)
    } else {
        None
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let snapshot = gateway.config.get();
    let transport: Box<dyn Transport> = match snapshot.transport.mode {
        TransportMode::Stdio => Box::new(StdioTransport::new(gateway.dispatcher.clone())),
        TransportMode::Sse => Box::new(SseTransport::new(
            gateway.dispatcher.clone(),
            snapshot.transport.sse.clone(),
        )),
        TransportMode::Http => Box::new(StreamableHttpTransport::new(
            gateway.dispatcher.clone(),
            snapshot.transport.http.clone(),
        )),
    };
    info!(transport = transport.name(), "gateway starting");

    let shutdown_rx = shutdown_tx.subscribe();
    let server = tokio::spawn(async move { transport.serve(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    gateway.ssh.drain().await;

    match server.await {
        Ok(Ok(())) => {
            info!("clean shutdown");
            Ok(())
        }
        Ok(Err(err)) => {
            error!("transport failed: {err}");
            std::process::exit(1);
        }
        Err(join_err) => {
            error!("transport task panicked: {join_err}");
            std::process::exit(1);
        }
    }
}
