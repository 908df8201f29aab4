use anyhow::Result;
use fleethub::{api::ApiServer, config::Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting fleethub coordination hub");

    let config = Config::load()?;
    let api_server = ApiServer::new(&config)?;

    if let Err(e) = api_server.run().await {
        tracing::error!("API server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
