//! Error taxonomy for the batching workflow and revert-reason decoding

use ethers::contract::ContractError;
use ethers::providers::{Middleware, ProviderError};
use serde::Serialize;
use std::time::Duration;

use crate::signing::SigningStep;

/// Taxonomy class of a [`BulkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UserDeclined,
    Precondition,
    Transient,
    ProtocolRevert,
    Internal,
}

/// Errors returned by the batching workflow.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// The signing request was rejected at the wallet confirmation step.
    #[error("{step} was declined in the wallet")]
    UserDeclined { step: SigningStep },
    /// The request was invalid and never reached the network.
    #[error("invalid request: {0}")]
    Precondition(String),
    /// The node could not be reached or returned a transport error.
    #[error("network error: {0}")]
    Transient(String),
    /// An external call did not complete in time.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// A contract call or transaction reverted.
    #[error("transaction reverted: {}", reason.as_deref().unwrap_or(raw.as_str()))]
    Revert {
        /// Decoded `Error(string)` reason, when present
        reason: Option<String>,
        /// Raw payload or status kept for diagnostics
        raw: String,
    },
    /// Another signing request is still outstanding.
    #[error("another signing request is already pending")]
    SignerBusy,
    /// The batching contract returned results that do not line up with the request.
    #[error("malformed batch results: {0}")]
    MalformedResults(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// A state transition was requested from the wrong phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The batch was abandoned while a step was in flight.
    #[error("batch abandoned")]
    Abandoned,
}

impl BulkError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        BulkError::Precondition(msg.into())
    }

    pub fn revert(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        BulkError::Revert {
            raw: reason.clone(),
            reason: Some(reason),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BulkError::UserDeclined { .. } | BulkError::Abandoned => ErrorKind::UserDeclined,
            BulkError::Precondition(_) | BulkError::SignerBusy => ErrorKind::Precondition,
            BulkError::Transient(_) | BulkError::Timeout { .. } => ErrorKind::Transient,
            BulkError::Revert { .. } => ErrorKind::ProtocolRevert,
            BulkError::MalformedResults(_)
            | BulkError::Config(_)
            | BulkError::InvalidState(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same step is safe and may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            BulkError::Abandoned => false,
            BulkError::SignerBusy => true,
            other => matches!(other.kind(), ErrorKind::UserDeclined | ErrorKind::Transient),
        }
    }

    /// Human-readable explanation, mapping known revert reasons
    pub fn user_message(&self) -> String {
        match self {
            BulkError::UserDeclined { step } => {
                format!("You declined the {step}. Nothing was lost; you can retry when ready.")
            }
            BulkError::Revert {
                reason: Some(reason),
                ..
            } => explain_revert(reason).unwrap_or_else(|| format!("Transaction failed: {reason}")),
            BulkError::Revert { raw, .. } => format!("Transaction failed ({raw})"),
            BulkError::Timeout { operation, .. } => {
                format!("The node did not answer {operation} in time. It is safe to retry.")
            }
            other => other.to_string(),
        }
    }
}

fn explain_revert(reason: &str) -> Option<String> {
    let lower = reason.to_lowercase();
    let message = if lower.contains("not available") || lower.contains("already registered") {
        "One of the names was taken before the registration went through."
    } else if lower.contains("allowance") {
        "The bulk manager is not allowed to spend enough RIF. Approve a larger amount and retry."
    } else if lower.contains("balance") {
        "Your RIF balance does not cover the registration cost."
    } else if lower.contains("reveal") || lower.contains("commitment") {
        "The commitment is not mature yet or was already used. Wait and retry."
    } else if lower.contains("resolver") {
        "The resolver address was rejected."
    } else if lower.contains("not owner") || lower.contains("not the owner") {
        "You do not own one of the selected names."
    } else {
        return None;
    };
    Some(message.to_string())
}

/// Classify an `ethers` contract error into the workflow taxonomy
pub fn classify_contract_error<M: Middleware>(err: ContractError<M>) -> BulkError {
    if let Some(reason) = err.decode_revert::<String>() {
        return BulkError::Revert {
            raw: reason.clone(),
            reason: Some(reason),
        };
    }
    if let Some(data) = err.as_revert() {
        return BulkError::Revert {
            reason: None,
            raw: format!("0x{}", hex::encode(data)),
        };
    }
    classify_message(err.to_string())
}

pub fn classify_provider_error(err: ProviderError) -> BulkError {
    classify_message(err.to_string())
}

fn classify_message(message: String) -> BulkError {
    let lower = message.to_lowercase();
    if lower.contains("user rejected") || lower.contains("user denied") {
        return BulkError::UserDeclined {
            step: SigningStep::Unknown,
        };
    }
    if lower.contains("execution reverted") || lower.contains("revert") {
        return BulkError::Revert {
            reason: None,
            raw: message,
        };
    }
    BulkError::Transient(message)
}
