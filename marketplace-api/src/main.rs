//! Coordinator HTTP API binary (component 5). Thin wrapper around
//! the `marketplace_api` library so `marketplace-cli serve` can embed the
//! same server without duplicating its wiring.

use marketplace_api::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    marketplace_api::run(Config::from_env()?).await
}
