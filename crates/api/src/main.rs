use std::sync::Arc;

use anyhow::Context;

use warehousing_api::app::{build_app, services::AppServices};
use warehousing_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    warehousing_observability::init(config.log_format);

    let services = AppServices::from_config(&config).await?;
    if config.seed_demo {
        services.seed_demo().await?;
    }
    services.log_inventory_report().await?;

    let app = build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
