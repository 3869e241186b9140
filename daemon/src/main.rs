//! matte gateway daemon

use anyhow::{Context, Result};
use clap::Parser;
use matte_gateway::{Gateway, GatewayConfig, Role, metrics, server};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// matte gateway - background removal with a covert tunnel
#[derive(Parser, Debug)]
#[command(name = "matted")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "matte.toml")]
    config: String,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("matte gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = GatewayConfig::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config))?;
    info!("Loaded configuration from {}", args.config);

    let gateway = Arc::new(Gateway::from_config(&config)?);
    let credentials = gateway.credentials();
    info!("{} credentials loaded", credentials.len());
    if credentials.is_empty() {
        warn!("No credentials configured, every request will get 401");
    } else if !credentials.has_role(Role::Covert) {
        warn!("No covert credential configured, tunnel disabled");
    }

    // Start metrics server
    let metrics_handle = metrics::start_server(&config.monitoring);

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    let app = server::router(gateway, &config.server);

    tokio::select! {
        result = server::serve(listener, app) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    // Cleanup
    metrics_handle.abort();

    Ok(())
}
