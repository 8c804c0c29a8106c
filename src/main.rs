#![forbid(unsafe_code)]

//! `botkeeper` server binary.
//!
//! Loads configuration, opens the script library, starts the cache sweeper
//! and file watcher, and serves the HTTP API until a shutdown signal
//! arrives. All live sessions are stopped before exit.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use botkeeper::bridge::BridgeConnector;
use botkeeper::config::GlobalConfig;
use botkeeper::game::viewer::HttpViewerFactory;
use botkeeper::http;
use botkeeper::scripts::cache::spawn_sweeper;
use botkeeper::scripts::program::TomlScriptLoader;
use botkeeper::scripts::store::FsScriptStore;
use botkeeper::scripts::watcher::ScriptWatcher;
use botkeeper::state::AppState;
use botkeeper::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "botkeeper", about = "Game agent session supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the configuration.
    #[arg(long)]
    http_port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("botkeeper server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => {
            info!("no config file given; using defaults");
            GlobalConfig::default()
        }
    };
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    info!(http_port = config.http_port, bridge = %config.game.bridge_addr, "configuration loaded");

    // ── Script library ──────────────────────────────────
    let store = Arc::new(FsScriptStore::new(&config.scripts.root)?);
    let library_root = store.root().to_owned();

    let connector = Arc::new(BridgeConnector::new(
        config.game.bridge_addr.clone(),
        config.request_timeout(),
    ));
    let sweep_interval = config.sweep_interval();
    let watch = config.scripts.watch;

    let state = Arc::new(AppState::new(
        config,
        connector,
        Arc::new(HttpViewerFactory),
        store,
        Arc::new(TomlScriptLoader),
    ));

    // ── Background tasks ────────────────────────────────
    let ct = CancellationToken::new();
    let sweeper = spawn_sweeper(Arc::clone(&state.scripts), sweep_interval, ct.clone());

    let _watcher = if watch {
        match ScriptWatcher::start(&library_root, Arc::clone(&state.scripts)) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(%err, "script watcher unavailable; relying on sweeps");
                None
            }
        }
    } else {
        None
    };

    // ── HTTP API ────────────────────────────────────────
    let http_ct = ct.clone();
    let http_state = Arc::clone(&state);
    let server = tokio::spawn(async move {
        if let Err(err) = http::serve(http_state, http_ct).await {
            error!(%err, "http server failed");
        }
    });

    info!("botkeeper ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    state.stop_all().await;

    let _ = tokio::join!(server, sweeper);
    info!("botkeeper shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
