use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_metadata::{
    config::Config,
    database::Database,
    icons::IconRefresher,
    ingestor::UsbIdsIngestor,
    resolver::MetadataResolver,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "usb-metadata")]
#[command(version)]
#[command(about = "Resolves vendor, product and icon metadata for USB device ids")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Rebuild the usb.ids registry database and exit
    #[arg(long)]
    update_usb_ids: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("usb_metadata={},tower_http=trace", cli.log_level)
    } else {
        format!("usb_metadata={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting USB metadata service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    info!("Using database: {}", config.storage.database_url);
    let database = Database::new(&config.storage).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let ingestor = Arc::new(UsbIdsIngestor::new(
        database.pool(),
        config.ingestion.usb_ids_url.clone(),
        config.remote.request_timeout,
    )?);

    if cli.update_usb_ids {
        let stats = ingestor.run().await?;
        info!(
            "Done: {} vendors and {} products imported",
            stats.vendors, stats.products
        );
        return Ok(());
    }

    if let Some(interval) = config.ingestion.refresh_interval {
        info!(
            "Refreshing the USB id registry every {}",
            humantime::format_duration(interval)
        );
        ingestor.clone().spawn_periodic_refresh(interval);
    }

    let resolver = MetadataResolver::from_config(&config, &database)?;
    if let Err(e) = resolver.icons().ensure_storage_dirs().await {
        error!(
            "Failed to create icon directory {}: {}",
            config.storage.icon_dir.display(),
            e
        );
    }

    let state = AppState {
        resolver: Arc::new(resolver),
        refresher: IconRefresher::new(
            config.storage.icon_dir.clone(),
            config.icons.refresh_branch.clone(),
        ),
        webhook_secret: config.hooks.webhook_secret.clone(),
    };
    if state.webhook_secret.is_none() {
        info!("No webhook secret configured; icon refresh hooks are disabled");
    }

    let web_server = WebServer::new(&config, state)?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}
