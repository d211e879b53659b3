use anyhow::Context;

use stockroom_infra::InventoryConfig;
use stockroom_observability::tracing::{LogFormat, init};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal outside local development.
    let _ = dotenvy::dotenv();

    let config = InventoryConfig::load().context("failed to load configuration")?;
    init(LogFormat::parse(&config.log.format).unwrap_or_default());
    config.warn_insecure_defaults();

    let (app, services) = stockroom_api::app::build_app_with_services(&config).await?;

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(address = %listener.local_addr()?, environment = %config.environment, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    services.shutdown();
    Ok(())
}
