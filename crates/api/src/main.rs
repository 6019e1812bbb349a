use anyhow::Result;
use civic_api::{build_app_with_config, ApiConfig};
use civic_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("civic_api");

    let config = ApiConfig::from_env();
    let bind = config.bind.clone();
    let kb_root = config.kb_root.display().to_string();

    let app = build_app_with_config(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, kb_root = %kb_root, "civic navigator api started");

    axum::serve(listener, app).await?;
    Ok(())
}
