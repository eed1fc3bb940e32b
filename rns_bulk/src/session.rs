//! Session-scoped state of one registration batch
//!
//! All mutation goes through the named transitions below; every transition
//! publishes a [`BatchStatus`] snapshot on a watch channel.

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::commit_reveal::{CommitRevealBatch, Readiness};
use crate::error::{BulkError, ErrorKind};
use crate::types::{AvailabilityState, BatchOutcome, DomainRequest, DomainRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Draft,
    Approving,
    Committing,
    AwaitingMaturity,
    Submitting,
    Confirmed,
    Failed,
    /// A signing request was declined; commitments and approval are kept
    Cancelled,
    Abandoned,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Confirmed | SessionPhase::Abandoned)
    }

    fn can_move_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match next {
            Approving | Committing if matches!(self, Draft | Cancelled | Failed) => true,
            Committing => self == Approving,
            AwaitingMaturity => self == Committing,
            Submitting => self == AwaitingMaturity,
            Confirmed => self == Submitting,
            Failed | Cancelled | Abandoned => !self.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl From<&BulkError> for StatusError {
    fn from(err: &BulkError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message(),
            recoverable: err.is_recoverable(),
        }
    }
}

/// Snapshot of a session for observers
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub phase: SessionPhase,
    pub names: Vec<String>,
    pub committed: Vec<String>,
    pub approval_tx: Option<H256>,
    pub total_cost: Option<U256>,
    pub readiness: Option<Readiness>,
    pub outcome: Option<BatchOutcome>,
    pub error: Option<StatusError>,
}

/// Lets another task stop a session without holding it
#[derive(Clone)]
pub struct AbandonHandle(Arc<watch::Sender<bool>>);

impl AbandonHandle {
    fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn abandon(&self) {
        self.0.send_replace(true);
    }

    pub fn is_abandoned(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`AbandonHandle::abandon`] has been called
    pub async fn abandoned(&self) {
        let mut rx = self.0.subscribe();
        // the sender lives as long as self, so this cannot close
        let _ = rx.wait_for(|abandoned| *abandoned).await;
    }
}

pub struct RegistrationSession {
    rows: Vec<DomainRow>,
    batch: CommitRevealBatch,
    phase: SessionPhase,
    approval_tx: Option<H256>,
    total_cost: Option<U256>,
    readiness: Option<Readiness>,
    outcome: Option<BatchOutcome>,
    last_error: Option<StatusError>,
    status: watch::Sender<BatchStatus>,
    abandon: AbandonHandle,
}

impl RegistrationSession {
    /// `owner` is the address every commitment and registration is made for
    pub fn new(rows: Vec<DomainRow>, owner: Address) -> Self {
        let batch = CommitRevealBatch::new(owner);
        let initial = BatchStatus {
            phase: SessionPhase::Draft,
            names: rows.iter().map(|r| r.request.name.clone()).collect(),
            committed: Vec::new(),
            approval_tx: None,
            total_cost: None,
            readiness: None,
            outcome: None,
            error: None,
        };

        Self {
            rows,
            batch,
            phase: SessionPhase::Draft,
            approval_tx: None,
            total_cost: None,
            readiness: None,
            outcome: None,
            last_error: None,
            status: watch::channel(initial).0,
            abandon: AbandonHandle::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn rows(&self) -> &[DomainRow] {
        &self.rows
    }

    pub fn requests(&self) -> Vec<DomainRequest> {
        self.rows.iter().map(|r| r.request.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.request.name.clone()).collect()
    }

    pub fn owner(&self) -> Address {
        self.batch.owner()
    }

    pub fn batch(&self) -> &CommitRevealBatch {
        &self.batch
    }

    pub fn approval_tx(&self) -> Option<H256> {
        self.approval_tx
    }

    pub fn outcome(&self) -> Option<&BatchOutcome> {
        self.outcome.as_ref()
    }

    pub fn status(&self) -> BatchStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.status.subscribe()
    }

    pub fn abandon_handle(&self) -> AbandonHandle {
        self.abandon.clone()
    }

    /// Preconditions checked before anything touches the network
    pub fn validate(&self) -> Result<(), BulkError> {
        if self.rows.is_empty() {
            return Err(BulkError::precondition("no domains in the batch"));
        }

        let mut seen = HashSet::new();
        for row in &self.rows {
            let name = &row.request.name;
            if name.is_empty() {
                return Err(BulkError::precondition("empty domain name"));
            }
            if row.request.duration_secs == 0 {
                return Err(BulkError::precondition(format!("{name}: duration must be positive")));
            }
            if row.request.owner != self.owner() {
                return Err(BulkError::precondition(format!(
                    "{name}: owner differs from the batch owner"
                )));
            }
            match row.availability {
                AvailabilityState::Available => {}
                AvailabilityState::Unavailable => {
                    return Err(BulkError::precondition(format!("{name}.rsk is not available")));
                }
                AvailabilityState::Unknown => {
                    return Err(BulkError::precondition(format!(
                        "{name}.rsk has not been confirmed available yet"
                    )));
                }
            }
            if !seen.insert(name.as_str()) {
                return Err(BulkError::precondition(format!("{name} appears twice")));
            }
        }
        Ok(())
    }

    fn move_to(&mut self, next: SessionPhase) -> Result<(), BulkError> {
        if !self.phase.can_move_to(next) {
            return Err(BulkError::InvalidState(format!(
                "session cannot move from {:?} to {next:?}",
                self.phase
            )));
        }
        tracing::debug!(from = ?self.phase, to = ?next, "Session transition");
        self.phase = next;
        if !matches!(next, SessionPhase::Failed | SessionPhase::Cancelled) {
            self.last_error = None;
        }
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.status.send_replace(BatchStatus {
            phase: self.phase,
            names: self.names(),
            committed: self.batch.committed_names(),
            approval_tx: self.approval_tx,
            total_cost: self.total_cost,
            readiness: self.readiness,
            outcome: self.outcome.clone(),
            error: self.last_error.clone(),
        });
    }

    pub(crate) fn ensure_live(&self) -> Result<(), BulkError> {
        if self.abandon.is_abandoned() || self.phase == SessionPhase::Abandoned {
            return Err(BulkError::Abandoned);
        }
        if self.phase.is_terminal() {
            return Err(BulkError::InvalidState(format!(
                "session already {:?}",
                self.phase
            )));
        }
        Ok(())
    }

    pub(crate) fn batch_mut(&mut self) -> &mut CommitRevealBatch {
        &mut self.batch
    }

    pub(crate) fn record_cost(&mut self, total: U256) {
        self.total_cost = Some(total);
        self.publish();
    }

    pub(crate) fn start_approval(&mut self) -> Result<(), BulkError> {
        self.move_to(SessionPhase::Approving)
    }

    pub(crate) fn record_approval(&mut self, tx: H256) {
        self.approval_tx = Some(tx);
        self.publish();
    }

    pub(crate) fn start_commits(&mut self) -> Result<(), BulkError> {
        self.move_to(SessionPhase::Committing)
    }

    pub(crate) fn start_waiting(&mut self) -> Result<(), BulkError> {
        self.move_to(SessionPhase::AwaitingMaturity)
    }

    pub(crate) fn set_readiness(&mut self, readiness: Readiness) {
        self.readiness = Some(readiness);
        self.publish();
    }

    pub(crate) fn start_submit(&mut self) -> Result<(), BulkError> {
        self.move_to(SessionPhase::Submitting)
    }

    pub(crate) fn confirm(&mut self, outcome: BatchOutcome) -> Result<(), BulkError> {
        self.outcome = Some(outcome);
        self.move_to(SessionPhase::Confirmed)
    }

    /// Record a failed run; declines and abandonment get their own phases
    pub(crate) fn fail(&mut self, err: &BulkError) {
        let next = match err {
            BulkError::Abandoned => SessionPhase::Abandoned,
            e if e.kind() == ErrorKind::UserDeclined => SessionPhase::Cancelled,
            _ => SessionPhase::Failed,
        };
        self.last_error = Some(StatusError::from(err));
        if self.move_to(next).is_err() {
            // already terminal; keep the phase but surface the error
            self.publish();
        }
    }

    /// Stop the session for good
    ///
    /// Commitments already on chain cannot be withdrawn; they expire unused.
    pub fn abandon(&mut self) {
        self.abandon.abandon();
        if self.phase != SessionPhase::Abandoned && self.move_to(SessionPhase::Abandoned).is_ok() {
            tracing::info!(
                committed = self.batch.commitments().len(),
                "Registration session abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::YEAR_SECS;

    fn row(name: &str, owner: Address, availability: AvailabilityState) -> DomainRow {
        DomainRow {
            request: DomainRequest::new(name, YEAR_SECS, owner),
            availability,
        }
    }

    #[test]
    fn test_validate_rejects_unconfirmed_rows() {
        let owner = Address::repeat_byte(1);
        let unknown = RegistrationSession::new(
            vec![row("alice", owner, AvailabilityState::Unknown)],
            owner,
        );
        assert!(matches!(unknown.validate(), Err(BulkError::Precondition(_))));

        let taken = RegistrationSession::new(
            vec![row("alice", owner, AvailabilityState::Unavailable)],
            owner,
        );
        assert!(matches!(taken.validate(), Err(BulkError::Precondition(_))));

        let dup = RegistrationSession::new(
            vec![
                row("alice", owner, AvailabilityState::Available),
                row("Alice.rsk", owner, AvailabilityState::Available),
            ],
            owner,
        );
        assert!(dup.validate().is_err());

        assert!(RegistrationSession::new(vec![], owner).validate().is_err());
    }

    #[test]
    fn test_decline_cancels_and_can_restart() {
        let owner = Address::repeat_byte(1);
        let mut session =
            RegistrationSession::new(vec![row("alice", owner, AvailabilityState::Available)], owner);
        let mut status = session.subscribe();

        session.start_commits().unwrap();
        session.fail(&BulkError::UserDeclined {
            step: crate::signing::SigningStep::Register,
        });
        assert_eq!(session.phase(), SessionPhase::Cancelled);

        let snapshot = status.borrow_and_update().clone();
        assert_eq!(snapshot.phase, SessionPhase::Cancelled);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::UserDeclined);

        assert!(session.start_commits().is_ok());
    }

    #[test]
    fn test_abandon_is_terminal() {
        let owner = Address::repeat_byte(1);
        let mut session =
            RegistrationSession::new(vec![row("alice", owner, AvailabilityState::Available)], owner);
        let handle = session.abandon_handle();

        session.abandon();
        assert!(handle.is_abandoned());
        assert_eq!(session.phase(), SessionPhase::Abandoned);
        assert!(matches!(session.ensure_live(), Err(BulkError::Abandoned)));
        assert!(session.start_commits().is_err());
    }
}
