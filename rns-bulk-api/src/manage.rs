use axum::{extract::State, routing::post, Json, Router};
use ethers::types::Address;
use rns_bulk::{BatchOutcome, RnsClient};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::lookup::DomainsRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddressRecord {
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Deserialize)]
pub struct SetAddressRequest {
    pub records: Vec<AddressRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SetResolverRequest {
    pub names: Vec<String>,
    pub resolver: Address,
}

/// Create routes for names the service wallet already owns
pub fn manage_routes<C: RnsClient + 'static>() -> Router<AppState<C>> {
    Router::new()
        .route("/manage/renew", post(renew::<C>))
        .route("/manage/address", post(set_address::<C>))
        .route("/manage/resolver", post(set_resolver::<C>))
}

async fn renew<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<DomainsRequest>,
) -> ApiResult<Json<BatchOutcome>> {
    let requests = req.into_requests(state.chain().sender())?;
    let outcome = state.orchestrator.renew(requests).await?;
    Ok(Json(outcome))
}

async fn set_address<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<SetAddressRequest>,
) -> ApiResult<Json<BatchOutcome>> {
    if req.records.is_empty() {
        return Err(ApiError::BadRequest("at least one record is required".into()));
    }
    let targets = req.records.into_iter().map(|r| (r.name, r.address)).collect();
    let outcome = state.orchestrator.set_addresses(targets).await?;
    Ok(Json(outcome))
}

async fn set_resolver<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<SetResolverRequest>,
) -> ApiResult<Json<BatchOutcome>> {
    let outcome = state
        .orchestrator
        .set_resolver(req.names, req.resolver)
        .await?;
    Ok(Json(outcome))
}
