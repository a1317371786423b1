use std::sync::Arc;

use clap::Parser;
use kuma_api::cli::Cli;
use kuma_api::{app_router, AppConfig, AppState};
use kuma_core::SyncService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kuma_api=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env_with_overrides(&cli.env_overrides())?);
    tracing::info!("Starting kuma-api with config: {:?}", config);

    let sync = SyncService::open(&config.database).await?;
    let state = AppState::new(config, sync)?;
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("kuma-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
