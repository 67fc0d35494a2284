//! curator server binary.

use anyhow::{Context, Result};
use clap::Parser;
use curator_core::config::AppConfig;
use curator_core::{Clock, SystemClock};
use curator_server::scheduler::spawn_scheduler;
use curator_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENV_PREFIX: &str = "CURATOR_";

/// curatord - CMS asset lifecycle and reconciliation server
#[derive(Parser, Debug)]
#[command(name = "curatord")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CURATOR_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the TOML file (optional) and `CURATOR_*`
/// environment variables.
fn load_config(path: &str, has_env_config: bool) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = Path::new(path).exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: curatord --config /path/to/config.toml\n  \
             2. Environment variables: CURATOR_SERVER__BIND=0.0.0.0:8080 \
             CURATOR_ADMIN__TOKEN_HASH=<sha256 hex> curatord\n\n\
             See config/server.example.toml for example configuration."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    Ok(config)
}

fn env_config_present() -> bool {
    std::env::vars().any(|(key, _)| key.starts_with(ENV_PREFIX) && key != "CURATOR_CONFIG")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("curator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config, env_config_present())?;

    curator_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let blobs = curator_storage::from_config(&config.storage, clock.clone())
        .await
        .context("failed to initialize storage")?;
    blobs
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = blobs.backend_name(), "Blob store initialized");

    let metadata = curator_metadata::from_config(&config.metadata, config.public_url.resolver())
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), blobs, metadata, clock);

    let recovered = state
        .lifecycle
        .reconciler
        .recover_interrupted_runs()
        .await
        .context("failed to recover interrupted sweep runs")?;
    if recovered > 0 {
        tracing::warn!(recovered, "Interrupted sweep runs marked as failed");
    }

    let scheduler = spawn_scheduler(state.clone())?;

    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested, stopping sweeps");
            shutdown.cancel();
        })
        .await?;

    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    Ok(())
}
