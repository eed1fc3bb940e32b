mod batches;
mod config;
mod error;
mod lookup;
mod manage;
mod routes;
mod state;

use anyhow::Context;
use rns_bulk::{EthersRnsClient, NetworkConfig, RnsClient, WorkflowConfig};
use std::sync::Arc;

use crate::config::{init_tracing, ServiceConfig};
use crate::routes::create_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let service = ServiceConfig::from_env()?;
    init_tracing(service.json_logs);

    let network = NetworkConfig::from_env()?;
    let workflow = WorkflowConfig::from_env()?;
    let client = Arc::new(EthersRnsClient::new(&network, &workflow)?);

    tracing::info!(
        network = network.network.name(),
        chain_id = network.network.chain_id(),
        wallet = ?client.sender(),
        "Starting RNS bulk service"
    );

    let state = AppState::new(client, workflow).with_retention(service.batch_retention);
    state.seed_owned().await;

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(service.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", service.bind_addr))?;

    tracing::info!(addr = %service.bind_addr, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
