//! Dockhand daemon - keeps the image cache in sync and monitors containers.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use dockhand::{
    Config, Orchestrator,
    catalog::HalCatalogClient,
    store::{InMemoryApplicationRepository, InMemoryImageStore},
};

#[derive(Debug, Parser)]
#[command(name = "dockhand", version, about = "Image reconciliation and container monitoring")]
struct Cli {
    /// Root URL of the orchestrator API (overrides DOCKHAND_BASE_URL).
    #[arg(long)]
    base_url: Option<Url>,

    /// Seconds between reconciliation ticks and container polls.
    #[arg(long, allow_negative_numbers = true)]
    interval: Option<i64>,

    /// Emit logs as JSON.
    #[arg(long, env = "DOCKHAND_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockhand=info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = Config::from_env_with_base_url(cli.base_url)?;
    if let Some(interval) = cli.interval {
        config.orchestrator.set_monitor_interval_secs(interval)?;
    }

    let catalog = HalCatalogClient::new(
        config.orchestrator.base_url.clone(),
        config.orchestrator.request_timeout(),
    )?;
    let applications = Arc::new(InMemoryApplicationRepository::new());

    let mut orchestrator = Orchestrator::new(
        config.orchestrator,
        Arc::new(catalog),
        Arc::new(InMemoryImageStore::new()),
        applications.clone(),
        applications,
    )?;
    orchestrator.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    orchestrator.shutdown().await;

    Ok(())
}
