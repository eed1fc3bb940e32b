use axum::{extract::State, Json};
use futures::future::join_all;
use rns_bulk::rns::{fqdn, normalize_label};
use rns_bulk::types::MAX_YEARS;
use rns_bulk::{AvailabilityState, CostQuote, DomainRequest, DomainRow, OwnedDomain, RnsClient};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// One name in a batch request
#[derive(Debug, Clone, Deserialize)]
pub struct DomainInput {
    pub name: String,
    #[serde(default = "default_years")]
    pub years: u64,
}

fn default_years() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct DomainsRequest {
    pub domains: Vec<DomainInput>,
}

impl DomainsRequest {
    /// Requests owned by `owner`; an empty list or a duration outside
    /// `1..=MAX_YEARS` is rejected
    pub fn into_requests(self, owner: ethers::types::Address) -> ApiResult<Vec<DomainRequest>> {
        if self.domains.is_empty() {
            return Err(ApiError::BadRequest("at least one domain is required".into()));
        }
        self.domains
            .iter()
            .map(|d| {
                if !(1..=MAX_YEARS).contains(&d.years) {
                    return Err(ApiError::BadRequest(format!(
                        "{}: years must be between 1 and {MAX_YEARS}",
                        d.name
                    )));
                }
                Ok(DomainRequest::for_years(&d.name, d.years, owner)?)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub name: String,
    pub fqdn: String,
    pub availability: AvailabilityState,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub domains: Vec<DomainRow>,
    pub quote: CostQuote,
}

#[derive(Debug, Serialize)]
pub struct OwnedDomainsResponse {
    pub owner: ethers::types::Address,
    pub domains: Vec<OwnedDomain>,
}

/// Check whether a single name can be registered
pub async fn check_availability<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<AvailabilityRequest>,
) -> Json<AvailabilityResponse> {
    let name = normalize_label(&req.name);
    let availability = state.orchestrator.availability().check(&name).await;

    Json(AvailabilityResponse {
        fqdn: fqdn(&name),
        name,
        availability,
    })
}

/// Check every name concurrently
pub async fn check_rows<C: RnsClient + 'static>(
    state: &AppState<C>,
    requests: Vec<DomainRequest>,
) -> Vec<DomainRow> {
    let availability = state.orchestrator.availability();
    let checks = requests.iter().map(|r| availability.check(&r.name));
    let states = join_all(checks).await;

    requests
        .into_iter()
        .zip(states)
        .map(|(request, availability)| DomainRow {
            request,
            availability,
        })
        .collect()
}

/// Price a registration batch; priced only when every name is available
pub async fn quote_registration<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<DomainsRequest>,
) -> ApiResult<Json<QuoteResponse>> {
    let requests = req.into_requests(state.chain().sender())?;
    let rows = check_rows(&state, requests).await;
    let quote = state.orchestrator.cost().registration_cost(&rows).await;

    Ok(Json(QuoteResponse {
        domains: rows,
        quote,
    }))
}

/// Price a renewal batch
pub async fn quote_renewal<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<DomainsRequest>,
) -> ApiResult<Json<QuoteResponse>> {
    let requests = req.into_requests(state.chain().sender())?;
    let quote = state.orchestrator.cost().renewal_cost(&requests).await;

    // renewals target owned names; availability is not consulted
    let domains = requests.into_iter().map(DomainRow::unchecked).collect();
    Ok(Json(QuoteResponse { domains, quote }))
}

/// Names the service wallet registered and still owns
pub async fn owned_domains<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
) -> ApiResult<Json<OwnedDomainsResponse>> {
    let owner = state.chain().sender();
    let domains = state.index.owned_domains(owner).await?;

    state
        .orchestrator
        .availability()
        .set_owned(domains.iter().map(|d| d.name.clone()));

    Ok(Json(OwnedDomainsResponse { owner, domains }))
}
