use anyhow::{Context, Result};
use clap::Parser;
use omnis_bouncer::config::BouncerConfig;
use omnis_bouncer::{AdmissionClient, Housekeeper};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "omnis-bouncer")]
#[command(about = "Standalone housekeeper for the waiting-room admission backend")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bouncer.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Address to serve Prometheus metrics on, e.g. 0.0.0.0:9100
    #[arg(long)]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("loading configuration from {:?}", args.config);
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading configuration file {:?}", args.config))?;
    let config = BouncerConfig::from_yaml(&raw)?;

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    if let Some(addr) = &args.metrics_addr {
        info!(addr, "starting Prometheus metrics server");
        if let Err(e) = omnis_bouncer::metrics::start_metrics_server(addr) {
            warn!("failed to start metrics server: {e}. continuing without metrics.");
        }
    }

    let client = Arc::new(AdmissionClient::new(config).await?);
    client.ensure_initialized().await?;

    info!("starting housekeeper");
    let housekeeper = Arc::new(Housekeeper::new(client));
    let handle = housekeeper.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, stopping housekeeper");
    handle.shutdown().await;

    Ok(())
}
