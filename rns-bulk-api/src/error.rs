use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rns_bulk::{BulkError, ErrorKind};
use serde::Serialize;

/// Error body returned by every route
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    recoverable: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("batch {0} not found")]
    NotFound(uuid::Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Bulk(#[from] BulkError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Bulk(BulkError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Bulk(BulkError::SignerBusy) => StatusCode::CONFLICT,
            ApiError::Bulk(e) => match e.kind() {
                ErrorKind::UserDeclined => StatusCode::CONFLICT,
                ErrorKind::Precondition => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::ProtocolRevert => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Bulk(e) => match e.kind() {
                ErrorKind::UserDeclined => "user_declined",
                ErrorKind::Precondition => "precondition",
                ErrorKind::Transient => "transient",
                ErrorKind::ProtocolRevert => "protocol_revert",
                ErrorKind::Internal => "internal",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, recoverable) = match &self {
            ApiError::Bulk(e) => (e.user_message(), e.is_recoverable()),
            other => (other.to_string(), false),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error,
            kind: self.kind(),
            recoverable,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
