//! Wallet confirmation gate and serialized transaction submission

use ethers::types::U256;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::BulkError;

/// Which write the wallet is being asked to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SigningStep {
    Approve,
    Commit { name: String },
    Register,
    Renew,
    SetAddress,
    SetResolver,
    /// Rejection reported by the node without step context
    Unknown,
}

impl fmt::Display for SigningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningStep::Approve => write!(f, "token approval"),
            SigningStep::Commit { name } => write!(f, "commitment for {name}"),
            SigningStep::Register => write!(f, "batch registration"),
            SigningStep::Renew => write!(f, "batch renewal"),
            SigningStep::SetAddress => write!(f, "address update"),
            SigningStep::SetResolver => write!(f, "resolver update"),
            SigningStep::Unknown => write!(f, "signing request"),
        }
    }
}

/// What is shown to the signer before a write goes out
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub step: SigningStep,
    pub summary: String,
    /// Token amount moved or approved, when the step involves one
    pub amount: Option<U256>,
}

/// Stand-in for the wallet's confirmation dialog
pub trait SigningGate: Send + Sync {
    /// Returns `false` when the signer rejects the request
    fn confirm(&self, request: &SigningRequest) -> impl Future<Output = bool> + Send;
}

/// Gate that signs everything, used by unattended services
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl SigningGate for AutoApprove {
    async fn confirm(&self, _request: &SigningRequest) -> bool {
        true
    }
}

/// Run an external call under a deadline
pub async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, BulkError>
where
    F: Future<Output = Result<T, BulkError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(BulkError::Timeout { operation, after }),
    }
}

/// Serializes signing requests through one wallet
///
/// Only one request may be outstanding. A second caller gets
/// [`BulkError::SignerBusy`] instead of queueing behind the first.
pub struct TxSigner<G> {
    gate: G,
    lock: Mutex<()>,
    confirmation_timeout: Duration,
}

impl<G: SigningGate> TxSigner<G> {
    pub fn new(gate: G, confirmation_timeout: Duration) -> Self {
        Self {
            gate,
            lock: Mutex::new(()),
            confirmation_timeout,
        }
    }

    /// Ask for confirmation, then send and wait for the transaction
    pub async fn submit<T, F>(
        &self,
        request: SigningRequest,
        operation: &'static str,
        send: F,
    ) -> Result<T, BulkError>
    where
        F: Future<Output = Result<T, BulkError>>,
    {
        let _guard = self.lock.try_lock().map_err(|_| BulkError::SignerBusy)?;

        if !self.gate.confirm(&request).await {
            tracing::info!(step = %request.step, "Signing request declined");
            return Err(BulkError::UserDeclined { step: request.step });
        }

        bounded(operation, self.confirmation_timeout, send).await
    }
}
