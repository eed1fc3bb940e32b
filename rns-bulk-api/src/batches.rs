use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rns_bulk::{BatchStatus, RegistrationSession, RnsClient, SessionPhase};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::lookup::{check_rows, DomainsRequest};
use crate::state::{AppState, BatchEntry};

#[derive(Debug, Serialize)]
pub struct BatchCreated {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct BatchView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: BatchStatus,
}

impl BatchView {
    fn new(id: Uuid, entry: &BatchEntry) -> Self {
        Self {
            id,
            created_at: entry.created_at,
            status: entry.status.borrow().clone(),
        }
    }
}

/// Create batch routes
pub fn batch_routes<C: RnsClient + 'static>() -> Router<AppState<C>> {
    Router::new()
        .route("/batches/register", post(create_batch::<C>))
        .route("/batches/:id", get(get_batch::<C>).delete(abandon_batch::<C>))
        .route("/batches/:id/retry", post(retry_batch::<C>))
}

/// Run the registration workflow for a locked session in the background
fn spawn_registration<C: RnsClient + 'static>(
    state: &AppState<C>,
    id: Uuid,
    mut session: OwnedMutexGuard<RegistrationSession>,
) {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.register(&mut session).await {
            Ok(outcome) => tracing::info!(
                batch = %id,
                tx = ?outcome.tx_hash,
                failed = outcome.failed().count(),
                "Batch finished"
            ),
            Err(e) => tracing::warn!(
                batch = %id,
                error = %e,
                recoverable = e.is_recoverable(),
                "Batch stopped"
            ),
        }
    });
}

/// Validate a batch, store it and start registering
async fn create_batch<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Json(req): Json<DomainsRequest>,
) -> ApiResult<(StatusCode, Json<BatchCreated>)> {
    let requests = req.into_requests(state.chain().sender())?;
    let rows = check_rows(&state, requests).await;

    let session = state.orchestrator.new_session(rows);
    session.validate()?;

    let id = Uuid::new_v4();
    let entry = Arc::new(BatchEntry::new(session));
    let guard = entry.session.clone().lock_owned().await;
    state.insert_batch(id, entry).await;

    tracing::info!(batch = %id, "Batch accepted");
    spawn_registration(&state, id, guard);

    Ok((StatusCode::ACCEPTED, Json(BatchCreated { id })))
}

async fn get_batch<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BatchView>> {
    let entry = state.batch(id).await.ok_or(ApiError::NotFound(id))?;
    Ok(Json(BatchView::new(id, &entry)))
}

/// Resume a cancelled or failed batch
async fn retry_batch<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<BatchView>)> {
    let entry = state.batch(id).await.ok_or(ApiError::NotFound(id))?;
    let guard = entry
        .session
        .clone()
        .try_lock_owned()
        .map_err(|_| ApiError::Conflict(format!("batch {id} is still running")))?;

    match guard.phase() {
        SessionPhase::Cancelled | SessionPhase::Failed => {}
        phase => {
            return Err(ApiError::Conflict(format!(
                "batch {id} cannot be retried from {phase:?}"
            )))
        }
    }

    tracing::info!(batch = %id, "Retrying batch");
    spawn_registration(&state, id, guard);
    Ok((StatusCode::ACCEPTED, Json(BatchView::new(id, &entry))))
}

/// Abandon a batch; commitments already on chain expire unused
async fn abandon_batch<C: RnsClient + 'static>(
    State(state): State<AppState<C>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BatchView>> {
    let entry = state.batch(id).await.ok_or(ApiError::NotFound(id))?;
    if entry.status.borrow().phase == SessionPhase::Confirmed {
        return Err(ApiError::Conflict(format!("batch {id} is already confirmed")));
    }

    entry.abandon.abandon();
    // an idle session is moved now; a running one stops at its next step
    if let Ok(mut session) = entry.session.try_lock() {
        session.abandon();
    }

    tracing::info!(batch = %id, "Batch abandoned");
    Ok(Json(BatchView::new(id, &entry)))
}
