//! HALO Service - pairing and connection host with an HTTP control channel.
//!
//! Run with: `cargo run -p halo-service`

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use halo_core::registry::RegistryClient;
use halo_core::{BleAdapter, ReconciliationEngine, ScanStart};
use halo_service::{AppState, Config, api, ws};
use halo_store::Store;

/// HALO Service - pairs and reconnects HALO peripherals.
#[derive(Parser, Debug)]
#[command(name = "halo-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Settings database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Do not open a scan session at startup.
    #[arg(long)]
    no_scan: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("halo_service=info".parse()?)
                .add_directive("halo_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if args.no_scan {
        config.radio.scan_on_start = false;
    }
    config.validate()?;

    info!("Opening settings store at {:?}", config.storage.path);
    let store = Arc::new(Mutex::new(Store::open(&config.storage.path)?));

    let adapter = Arc::new(BleAdapter::new().await?);
    let engine = ReconciliationEngine::new(adapter, store, config.engine_config())?;
    engine.start().await;

    if config.radio.scan_on_start {
        match engine.start_scan(None).await? {
            ScanStart::Started => info!("Scanning for devices"),
            ScanStart::Deferred => info!("Adapter not ready, scan will start when it is"),
        }
    }

    let registry = match &config.registry {
        Some(registry) => Some(RegistryClient::new(&registry.url)?),
        None => None,
    };

    let bind = config.server.bind.clone();
    let state = AppState::new(engine.clone(), config, registry);

    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Starting server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
