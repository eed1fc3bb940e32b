use axum::{
    routing::{get, post},
    Router,
};
use rns_bulk::RnsClient;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::batches::batch_routes;
use crate::lookup::{check_availability, owned_domains, quote_registration, quote_renewal};
use crate::manage::manage_routes;
use crate::state::AppState;

/// Build the application router with all routes
pub fn create_router<C: RnsClient + 'static>(state: AppState<C>) -> Router {
    Router::new()
        .route("/availability", post(check_availability::<C>))
        .route("/quote/registration", post(quote_registration::<C>))
        .route("/quote/renewal", post(quote_renewal::<C>))
        .route("/domains", get(owned_domains::<C>))
        .merge(batch_routes::<C>())
        .merge(manage_routes::<C>())
        // Health check endpoint
        .route("/health", get(health_check))
        // Ready check endpoint
        .route("/ready", get(ready_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_check() -> &'static str {
    "OK"
}

/// Ready check handler
async fn ready_check() -> &'static str {
    "READY"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use ethers::types::{Address, U256};
    use rns_bulk::mock::MockChain;
    use rns_bulk::types::{RegistrationRecord, YEAR_SECS};
    use rns_bulk::{SessionPhase, WorkflowConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn setup() -> (Arc<MockChain>, AppState<MockChain>) {
        let chain = Arc::new(MockChain::new());
        chain.set_allowance(U256::exp10(24));
        let state = AppState::new(chain.clone(), WorkflowConfig::default());
        (chain, state)
    }

    async fn send(state: &AppState<MockChain>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Wait for a batch to reach `phase`; a batch stuck elsewhere trips the timeout
    async fn wait_for_phase(state: &AppState<MockChain>, id: Uuid, phase: SessionPhase) {
        let entry = state.batch(id).await.unwrap();
        let mut status = entry.status.clone();
        let waited = tokio::time::timeout(Duration::from_secs(3600), status.wait_for(|s| s.phase == phase)).await;
        assert_ok!(assert_ok!(waited));
    }

    #[tokio::test]
    async fn test_health() {
        let (_, state) = setup();
        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_availability() {
        let (chain, state) = setup();
        chain.set_owner("taken", Address::repeat_byte(7));

        let (status, body) = send(&state, "POST", "/availability", Some(json!({ "name": "Alice.rsk" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "alice");
        assert_eq!(body["fqdn"], "alice.rsk");
        assert_eq!(body["availability"], "available");

        let (_, body) = send(&state, "POST", "/availability", Some(json!({ "name": "taken" }))).await;
        assert_eq!(body["availability"], "unavailable");
    }

    #[tokio::test]
    async fn test_quote_prices_only_available_batches() {
        let (chain, state) = setup();

        let domains = json!({ "domains": [{ "name": "alice" }, { "name": "bob", "years": 2 }] });
        let (status, body) = send(&state, "POST", "/quote/registration", Some(domains)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quote"]["status"], "priced");
        assert_eq!(body["domains"].as_array().unwrap().len(), 2);

        chain.set_owner("bob", Address::repeat_byte(7));
        let calls_before = chain.calls().len();
        let domains = json!({ "domains": [{ "name": "alice" }, { "name": "bob" }] });
        let (_, body) = send(&state, "POST", "/quote/registration", Some(domains)).await;
        assert_eq!(body["quote"]["status"], "not_all_available");
        assert_eq!(body["domains"][1]["availability"], "unavailable");
        // only availability lookups, no pricing call
        assert!(chain.calls()[calls_before..]
            .iter()
            .all(|c| !matches!(c, rns_bulk::mock::MockCall::RegistrationCost(_))));
    }

    #[tokio::test]
    async fn test_empty_domain_list_is_rejected() {
        let (_, state) = setup();
        let (status, body) = send(&state, "POST", "/quote/renewal", Some(json!({ "domains": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");
    }

    #[tokio::test]
    async fn test_out_of_range_years_are_rejected() {
        let (chain, state) = setup();

        for years in [0u64, 1_000_000_000_000] {
            let domains = json!({ "domains": [{ "name": "alice", "years": years }] });
            for uri in ["/quote/registration", "/quote/renewal", "/batches/register", "/manage/renew"] {
                let (status, body) = send(&state, "POST", uri, Some(domains.clone())).await;
                assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} with {years} years");
                assert_eq!(body["kind"], "bad_request");
            }
        }
        assert_eq!(chain.external_call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_batch_runs_to_confirmation() {
        let (chain, state) = setup();

        let domains = json!({ "domains": [{ "name": "alice" }, { "name": "bob" }] });
        let (status, body) = send(&state, "POST", "/batches/register", Some(domains)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

        wait_for_phase(&state, id, SessionPhase::Confirmed).await;
        assert_eq!(chain.owner_of("alice"), chain.sender());
        assert_eq!(chain.owner_of("bob"), chain.sender());

        let (status, body) = send(&state, "GET", &format!("/batches/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "confirmed");
        assert_eq!(body["outcome"]["domains"][0]["success"], true);

        // confirmed batches are final
        let (status, _) = send(&state, "POST", &format!("/batches/{id}/retry"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&state, "DELETE", &format!("/batches/{id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_register_rejects_taken_names_upfront() {
        let (chain, state) = setup();
        chain.set_owner("bob", Address::repeat_byte(7));

        let domains = json!({ "domains": [{ "name": "alice" }, { "name": "bob" }] });
        let (status, body) = send(&state, "POST", "/batches/register", Some(domains)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "precondition");
        assert!(chain.commits().is_empty());
        assert!(state.batches.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_can_be_retried() {
        let (chain, state) = setup();
        chain.revert_register(Some("boom"));

        let domains = json!({ "domains": [{ "name": "alice" }] });
        let (_, body) = send(&state, "POST", "/batches/register", Some(domains)).await;
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        wait_for_phase(&state, id, SessionPhase::Failed).await;

        let (_, body) = send(&state, "GET", &format!("/batches/{id}"), None).await;
        assert_eq!(body["phase"], "failed");
        assert_eq!(body["error"]["kind"], "protocol_revert");

        chain.revert_register(None);
        let (status, _) = send(&state, "POST", &format!("/batches/{id}/retry"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_phase(&state, id, SessionPhase::Confirmed).await;
        // the retry reused the original commitment
        assert_eq!(chain.commits().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_stops_waiting_batch() {
        let (chain, state) = setup();
        chain.set_min_age(Duration::from_secs(3600 * 24));

        let domains = json!({ "domains": [{ "name": "alice" }] });
        let (_, body) = send(&state, "POST", "/batches/register", Some(domains)).await;
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

        wait_for_phase(&state, id, SessionPhase::AwaitingMaturity).await;

        let (status, _) = send(&state, "DELETE", &format!("/batches/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        wait_for_phase(&state, id, SessionPhase::Abandoned).await;
        assert!(chain.register_calls().is_empty());
    }

    async fn create(state: &AppState<MockChain>, name: &str) -> Uuid {
        let domains = json!({ "domains": [{ "name": name }] });
        let (status, body) = send(state, "POST", "/batches/register", Some(domains)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        body["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_batches_are_evicted_after_retention() {
        let (chain, state) = setup();
        let state = state.with_retention(Duration::ZERO);

        let finished = create(&state, "alice").await;
        wait_for_phase(&state, finished, SessionPhase::Confirmed).await;
        // the background task releases the session once it has logged the outcome
        let entry = state.batch(finished).await.unwrap();
        drop(entry.session.lock().await);

        chain.set_min_age(Duration::from_secs(3600 * 24));
        let running = create(&state, "bob").await;
        wait_for_phase(&state, running, SessionPhase::AwaitingMaturity).await;

        let (status, _) = send(&state, "GET", &format!("/batches/{finished}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // a batch still held by its workflow survives later inserts
        let latest = create(&state, "carol").await;
        let batches = state.batches.read().await;
        assert!(batches.contains_key(&running));
        assert!(batches.contains_key(&latest));
        assert_eq!(batches.len(), 2);
    }

    #[tokio::test]
    async fn test_seeded_owned_names_are_unavailable() {
        let (chain, state) = setup();
        // registered by the wallet, registry not updated yet
        chain.push_history(RegistrationRecord {
            name: "carol".into(),
            duration_secs: YEAR_SECS,
            registered_at: 1_700_000_000,
        });

        let (_, body) = send(&state, "POST", "/availability", Some(json!({ "name": "carol" }))).await;
        assert_eq!(body["availability"], "available");

        state.seed_owned().await;
        let (_, body) = send(&state, "POST", "/availability", Some(json!({ "name": "carol" }))).await;
        assert_eq!(body["availability"], "unavailable");
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let (_, state) = setup();
        let (status, body) = send(&state, "GET", &format!("/batches/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_manage_routes() {
        let (chain, state) = setup();
        chain.set_owner("alice", chain.sender());

        let body = json!({ "names": ["alice"], "resolver": format!("{:?}", Address::zero()) });
        let (status, body) = send(&state, "POST", "/manage/resolver", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["recoverable"], false);

        let resolver = Address::repeat_byte(0x11);
        let body = json!({ "names": ["alice"], "resolver": format!("{:?}", resolver) });
        let (status, body) = send(&state, "POST", "/manage/resolver", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["domains"][0]["success"], true);
        assert_eq!(chain.resolver_of("alice"), resolver);

        let (status, _) = send(&state, "POST", "/manage/address", Some(json!({ "records": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let renew = json!({ "domains": [{ "name": "alice", "years": 1 }] });
        let (status, body) = send(&state, "POST", "/manage/renew", Some(renew)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["domains"][0]["name"], "alice");
    }
}
