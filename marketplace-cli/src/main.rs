//! Operator CLI for the marketplace coordinator: `serve` embeds the same
//! server `marketplace-api` runs standalone, while `health`/`status` talk
//! to a running instance over HTTP the way an operator would with `curl`.

use clap::{Parser, Subcommand};
use marketplace_api::config::Config;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "marketplace-cli")]
#[command(about = "Operate the decentralized job marketplace coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator HTTP API in this process (reads the same
    /// environment variables as the `marketplace-api` binary).
    Serve,
    /// Query `/health` on a running coordinator.
    Health {
        #[arg(long, default_value = "http://127.0.0.1:3001")]
        base_url: String,
    },
    /// Fetch a task's current status from a running coordinator.
    Status {
        task_id: Uuid,
        /// Caller address, forwarded as the `address` query parameter so
        /// results are redacted the same way the HTTP API redacts them for
        /// non-creators.
        #[arg(long)]
        address: Option<String>,
        #[arg(long, default_value = "http://127.0.0.1:3001")]
        base_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => marketplace_api::run(Config::from_env()?).await,
        Commands::Health { base_url } => health(&base_url).await,
        Commands::Status {
            task_id,
            address,
            base_url,
        } => status(&base_url, task_id, address.as_deref()).await,
    }
}

async fn health(base_url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{base_url}/health"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn status(base_url: &str, task_id: Uuid, address: Option<&str>) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let mut request = client.get(format!("{base_url}/tasks/{task_id}"));
    if let Some(addr) = address {
        request = request.query(&[("address", addr)]);
    }
    let body: serde_json::Value = request.send().await?.error_for_status()?.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
