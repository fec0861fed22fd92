use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dataspace_exchange::server::{build_router, AppState};
use dataspace_exchange::{
    AppConfig, Database, EcosystemService, HttpContractGateway, NegotiationService,
};

#[derive(Parser)]
#[command(name = "exchange-server")]
#[command(about = "Data-exchange marketplace backend: bilateral negotiations and ecosystems")]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides the port from the config file.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if Path::new(&args.config).exists() {
        AppConfig::load_with_env_overrides(&args.config)
            .with_context(|| format!("loading config from {}", args.config))?
    } else {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let db = Database::new(&config.database.url)
        .await
        .context("opening database")?;

    let timeout = Duration::from_secs(config.contracts.timeout_seconds.unwrap_or(10));
    let gateway = Arc::new(HttpContractGateway::new(&config.contracts.endpoint, timeout)?);

    let state = AppState {
        negotiations: NegotiationService::new(db.clone(), gateway.clone()),
        ecosystems: EcosystemService::new(db, gateway),
    };
    let router = build_router(state);

    let address = config.get_server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    tracing::info!(%address, contracts = %config.contracts.endpoint, "exchange server listening");

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
