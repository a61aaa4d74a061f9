//! Library surface for the coordinator HTTP API, split out of `main.rs` so
//! `marketplace-cli`'s `serve` subcommand can embed the same server the
//! standalone binary runs, rather than re-deriving the wiring.

pub mod config;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use coordinator_core::{
    ChannelEscrowAdapter, DispatcherConfig, EscrowAdapter, EscrowBackendKind, IdentityAdapter,
    IdentityBackendKind, InMemoryStore, MarketplaceCoordinator, OnchainEscrowAdapter,
    OnchainIdentityAdapter, SettlementDispatcher, SimulatedEscrowAdapter, SimulatedIdentityAdapter,
    Store,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

/// Builds the store/adapter/dispatcher/coordinator stack, runs startup
/// recovery, and serves the REST API until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    info!(port = config.port, escrow_backend = ?config.escrow_backend, "starting marketplace-api");

    let store: Arc<dyn Store> = build_store(&config).await?;
    let escrow: Arc<dyn EscrowAdapter> = build_escrow_adapter(&config);
    let identity: Arc<dyn IdentityAdapter> = build_identity_adapter(&config);

    let dispatcher = SettlementDispatcher::spawn(
        store.clone(),
        escrow.clone(),
        identity.clone(),
        DispatcherConfig {
            max_concurrent_settlements: config.max_concurrent_settlements,
            escrow_retry_max: config.escrow_retry_max,
            escrow_retry_base_ms: config.escrow_retry_base_ms,
            ..DispatcherConfig::default()
        },
        256,
    );

    let coordinator = Arc::new(MarketplaceCoordinator::new(store, escrow, identity, dispatcher));
    coordinator.recover_on_startup().await?;

    let app = routes::router(AppState { coordinator });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    if config.store_uri.is_some() {
        warn!(
            "STORE_URI is configured but this build does not enable coordinator-core's \
             `postgres` feature; falling back to the in-memory store. Rebuild with \
             `--features coordinator-core/postgres` for durable storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

fn build_escrow_adapter(config: &Config) -> Arc<dyn EscrowAdapter> {
    match config.escrow_backend {
        EscrowBackendKind::Onchain => Arc::new(OnchainEscrowAdapter {
            rpc_url: config.escrow_rpc.clone().unwrap_or_default(),
            contract_address: config.escrow_contract.clone().unwrap_or_default(),
            chain_id: config.escrow_chain_id.unwrap_or_default(),
        }),
        EscrowBackendKind::Channel => Arc::new(ChannelEscrowAdapter {
            channel_endpoint: config.escrow_rpc.clone().unwrap_or_default(),
        }),
        EscrowBackendKind::Simulated => Arc::new(SimulatedEscrowAdapter::new()),
    }
}

fn build_identity_adapter(config: &Config) -> Arc<dyn IdentityAdapter> {
    match config.identity_backend() {
        IdentityBackendKind::Onchain => Arc::new(OnchainIdentityAdapter {
            backend_url: config.identity_backend_url.clone().unwrap_or_default(),
            parent_namespace: config.identity_parent_namespace.clone().unwrap_or_default(),
        }),
        IdentityBackendKind::Simulated => Arc::new(SimulatedIdentityAdapter::new()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight work");
}
