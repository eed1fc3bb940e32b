//! Commit-reveal orchestration for one batch of names
//!
//! Commits go out one at a time through the signer, each waiting for its
//! confirmation before the next (they share the sender nonce). Maturity is
//! polled by a background task owned by a [`PollHandle`]; dropping the handle
//! stops the polling.

use ethers::types::{Address, H256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::chain::FifsRegistrar;
use crate::commitment::{Commitment, generate_secret, make_commitment};
use crate::error::BulkError;
use crate::rns::normalize_label;
use crate::signing::{SigningGate, SigningRequest, SigningStep, TxSigner, bounded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPhase {
    Idle,
    Committing,
    AwaitingMaturity,
    Ready,
    Consumed,
    Failed,
}

impl CommitPhase {
    fn can_move_to(self, next: CommitPhase) -> bool {
        use CommitPhase::*;
        matches!(
            (self, next),
            (Idle | Failed | AwaitingMaturity | Ready, Committing)
                | (Committing, AwaitingMaturity | Failed)
                | (AwaitingMaturity, Ready)
                | (Ready, Consumed)
        )
    }
}

/// A commit run that stopped part way
///
/// The names in `committed` have live commitments; the rest still need one.
#[derive(Debug, thiserror::Error)]
#[error("committed {} name(s) before failing: {error}", committed.len())]
pub struct PartialCommit {
    pub committed: Vec<String>,
    #[source]
    pub error: BulkError,
}

/// Per-commitment maturity as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Pending { ready: usize, total: usize },
    Ready,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Give up once commitments have not matured for this long
    pub timeout: Duration,
    pub call_timeout: Duration,
}

/// Commitments of one batch and the phase they are in
#[derive(Debug)]
pub struct CommitRevealBatch {
    owner: Address,
    phase: CommitPhase,
    commitments: Vec<Commitment>,
}

impl CommitRevealBatch {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            phase: CommitPhase::Idle,
            commitments: Vec::new(),
        }
    }

    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    pub fn committed_names(&self) -> Vec<String> {
        self.commitments.iter().map(|c| c.label.clone()).collect()
    }

    /// Secret of the commitment made for `name`, matched on the normalized label
    pub fn secret_for(&self, name: &str) -> Option<[u8; 32]> {
        let label = normalize_label(name);
        self.commitments
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.secret)
    }

    fn transition(&mut self, next: CommitPhase) -> Result<(), BulkError> {
        if !self.phase.can_move_to(next) {
            return Err(BulkError::InvalidState(format!(
                "commit batch cannot move from {:?} to {next:?}",
                self.phase
            )));
        }
        tracing::debug!(from = ?self.phase, to = ?next, "Commit batch transition");
        self.phase = next;
        Ok(())
    }

    /// Commit every name in `names` that has no commitment yet
    ///
    /// Names that already have one (from an earlier, interrupted run) are
    /// skipped, so calling this again after a failure only fills the gaps.
    /// Returns the commitments created by this call.
    pub async fn commit<C, G>(
        &mut self,
        chain: &C,
        signer: &TxSigner<G>,
        names: &[String],
        call_timeout: Duration,
    ) -> Result<Vec<Commitment>, PartialCommit>
    where
        C: FifsRegistrar,
        G: SigningGate,
    {
        let missing: Vec<String> = names
            .iter()
            .map(|n| normalize_label(n))
            .filter(|n| self.secret_for(n).is_none())
            .collect();

        if names.is_empty() {
            return Err(self.partial(BulkError::precondition("no names to commit")));
        }
        if missing.is_empty() && !self.commitments.is_empty() {
            return Ok(Vec::new());
        }

        self.transition(CommitPhase::Committing)
            .map_err(|e| self.partial(e))?;

        let mut created = Vec::with_capacity(missing.len());
        for label in missing {
            match self.commit_one(chain, signer, &label, call_timeout).await {
                Ok(commitment) => {
                    self.commitments.push(commitment.clone());
                    created.push(commitment);
                }
                Err(error) => {
                    tracing::error!(name = %label, error = %error, "Commit failed, stopping batch");
                    self.phase = CommitPhase::Failed;
                    return Err(self.partial(error));
                }
            }
        }

        self.transition(CommitPhase::AwaitingMaturity)
            .map_err(|e| self.partial(e))?;
        Ok(created)
    }

    async fn commit_one<C, G>(
        &self,
        chain: &C,
        signer: &TxSigner<G>,
        label: &str,
        call_timeout: Duration,
    ) -> Result<Commitment, BulkError>
    where
        C: FifsRegistrar,
        G: SigningGate,
    {
        let secret = generate_secret();
        let hash = bounded(
            "makeCommitment",
            call_timeout,
            make_commitment(chain, label, self.owner, secret),
        )
        .await?;

        let request = SigningRequest {
            step: SigningStep::Commit {
                name: label.to_string(),
            },
            summary: format!("Commit to registering {label}.rsk"),
            amount: None,
        };
        let commit_tx = signer.submit(request, "commit", chain.commit(hash)).await?;
        tracing::info!(name = %label, commitment = ?hash, tx = ?commit_tx, "Commitment confirmed");

        Ok(Commitment {
            label: label.to_string(),
            secret,
            commitment_hash: hash,
            commit_tx,
        })
    }

    fn partial(&self, error: BulkError) -> PartialCommit {
        PartialCommit {
            committed: self.committed_names(),
            error,
        }
    }

    /// Start polling every outstanding commitment for maturity
    pub fn watch_readiness<C>(&self, chain: Arc<C>, settings: PollSettings) -> Result<PollHandle, BulkError>
    where
        C: FifsRegistrar + 'static,
    {
        match self.phase {
            CommitPhase::AwaitingMaturity => {}
            CommitPhase::Ready => return Ok(PollHandle::ready(settings.timeout)),
            other => {
                return Err(BulkError::InvalidState(format!(
                    "cannot poll readiness while {other:?}"
                )));
            }
        }

        let hashes = self.commitments.iter().map(|c| c.commitment_hash).collect();
        let (tx, rx) = watch::channel(Readiness::Pending {
            ready: 0,
            total: self.commitments.len(),
        });
        let task = tokio::spawn(poll_readiness(chain, hashes, settings, tx));

        Ok(PollHandle {
            rx,
            task: Some(task),
            timeout: settings.timeout,
        })
    }

    pub fn mark_ready(&mut self) -> Result<(), BulkError> {
        if self.phase == CommitPhase::Ready {
            return Ok(());
        }
        self.transition(CommitPhase::Ready)
    }

    /// Retire the commitments after they were revealed
    pub fn consume(&mut self) -> Result<Vec<Commitment>, BulkError> {
        self.transition(CommitPhase::Consumed)?;
        Ok(std::mem::take(&mut self.commitments))
    }
}

/// Single maturity check
pub async fn is_ready<C: FifsRegistrar>(chain: &C, commitment: H256) -> Result<bool, BulkError> {
    chain.can_reveal(commitment).await
}

async fn poll_readiness<C: FifsRegistrar>(
    chain: Arc<C>,
    mut outstanding: Vec<H256>,
    settings: PollSettings,
    tx: watch::Sender<Readiness>,
) {
    let total = outstanding.len();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut still_waiting = Vec::with_capacity(outstanding.len());
        for hash in outstanding {
            match bounded("canReveal", settings.call_timeout, is_ready(chain.as_ref(), hash)).await {
                Ok(true) => {}
                Ok(false) => still_waiting.push(hash),
                Err(e) => {
                    // an unanswered check counts as not mature yet
                    tracing::warn!(commitment = ?hash, error = %e, "Readiness check failed");
                    still_waiting.push(hash);
                }
            }
        }
        outstanding = still_waiting;

        if outstanding.is_empty() {
            tracing::info!(total, "All commitments can be revealed");
            tx.send_replace(Readiness::Ready);
            return;
        }
        if started.elapsed() >= settings.timeout {
            tracing::warn!(pending = outstanding.len(), total, "Gave up waiting for commitments");
            tx.send_replace(Readiness::TimedOut);
            return;
        }

        tracing::debug!(ready = total - outstanding.len(), total, "Waiting for commitments to mature");
        tx.send_replace(Readiness::Pending {
            ready: total - outstanding.len(),
            total,
        });
    }
}

/// Capability to observe and stop a readiness poller
///
/// The poller is aborted when the handle is cancelled or dropped.
pub struct PollHandle {
    rx: watch::Receiver<Readiness>,
    task: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl PollHandle {
    fn ready(timeout: Duration) -> Self {
        let (_tx, rx) = watch::channel(Readiness::Ready);
        Self {
            rx,
            task: None,
            timeout,
        }
    }

    pub fn current(&self) -> Readiness {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.rx.clone()
    }

    /// Wait until every commitment is mature or the poller gives up
    pub async fn wait(&mut self) -> Result<(), BulkError> {
        let settled = self
            .rx
            .wait_for(|r| !matches!(r, Readiness::Pending { .. }))
            .await
            .map(|r| *r);

        match settled {
            Ok(Readiness::Ready) => Ok(()),
            Ok(_) => Err(BulkError::Timeout {
                operation: "canReveal",
                after: self.timeout,
            }),
            // the poller stopped without a verdict
            Err(_) => Err(BulkError::Abandoned),
        }
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RnsClient;
    use crate::mock::{MockCall, MockChain};
    use crate::signing::AutoApprove;
    use tokio_test::assert_ok;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
            call_timeout: Duration::from_secs(45),
        }
    }

    fn signer() -> TxSigner<AutoApprove> {
        TxSigner::new(AutoApprove, Duration::from_secs(180))
    }

    #[tokio::test]
    async fn test_commits_are_sequential_and_in_order() {
        let chain = MockChain::new();
        let mut batch = CommitRevealBatch::new(chain.sender());

        let created = batch
            .commit(&chain, &signer(), &names(&["alice", "bob"]), Duration::from_secs(45))
            .await
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(batch.phase(), CommitPhase::AwaitingMaturity);
        assert_eq!(
            chain.commits(),
            vec![created[0].commitment_hash, created[1].commitment_hash]
        );
        assert_ne!(created[0].secret, created[1].secret);
        assert!(batch.secret_for("Alice.rsk").is_some());
    }

    #[tokio::test]
    async fn test_commit_failure_reports_partial_list() {
        let chain = MockChain::new();
        chain.fail_commit_at(1);
        let mut batch = CommitRevealBatch::new(chain.sender());

        let err = batch
            .commit(
                &chain,
                &signer(),
                &names(&["alice", "bob", "carol"]),
                Duration::from_secs(45),
            )
            .await
            .unwrap_err();

        assert_eq!(err.committed, vec!["alice".to_string()]);
        assert!(matches!(err.error, BulkError::Revert { .. }));
        assert_eq!(batch.phase(), CommitPhase::Failed);
        // carol was never attempted
        assert_eq!(chain.commits().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_only_commits_missing_names() {
        let chain = MockChain::new();
        chain.fail_commit_at(1);
        let mut batch = CommitRevealBatch::new(chain.sender());
        let all = names(&["alice", "bob"]);

        assert!(batch.commit(&chain, &signer(), &all, Duration::from_secs(45)).await.is_err());
        let alice_secret = batch.secret_for("alice");

        let created = batch
            .commit(&chain, &signer(), &all, Duration::from_secs(45))
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].label, "bob");
        assert_eq!(batch.secret_for("alice"), alice_secret);
        assert_eq!(batch.phase(), CommitPhase::AwaitingMaturity);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_follows_min_age() {
        let chain = Arc::new(MockChain::new());
        chain.set_min_age(Duration::from_secs(60));
        let mut batch = CommitRevealBatch::new(chain.sender());

        let created = batch
            .commit(chain.as_ref(), &signer(), &names(&["alice"]), Duration::from_secs(45))
            .await
            .unwrap();
        let hash = created[0].commitment_hash;
        let committed_at = Instant::now();

        assert!(!is_ready(chain.as_ref(), hash).await.unwrap());

        let mut handle = batch.watch_readiness(chain.clone(), settings()).unwrap();
        assert_ok!(handle.wait().await);
        assert!(committed_at.elapsed() >= Duration::from_secs(60));
        assert!(is_ready(chain.as_ref(), hash).await.unwrap());

        batch.mark_ready().unwrap();
        let consumed = batch.consume().unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(batch.phase(), CommitPhase::Consumed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_times_out() {
        let chain = Arc::new(MockChain::new());
        chain.set_min_age(Duration::from_secs(3600));
        let mut batch = CommitRevealBatch::new(chain.sender());
        batch
            .commit(chain.as_ref(), &signer(), &names(&["alice"]), Duration::from_secs(45))
            .await
            .unwrap();

        let mut handle = batch
            .watch_readiness(
                chain.clone(),
                PollSettings {
                    timeout: Duration::from_secs(30),
                    ..settings()
                },
            )
            .unwrap();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, BulkError::Timeout { operation: "canReveal", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let chain = Arc::new(MockChain::new());
        chain.set_min_age(Duration::from_secs(3600));
        let mut batch = CommitRevealBatch::new(chain.sender());
        batch
            .commit(chain.as_ref(), &signer(), &names(&["alice"]), Duration::from_secs(45))
            .await
            .unwrap();

        let handle = batch.watch_readiness(chain.clone(), settings()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();

        let checks = |chain: &MockChain| {
            chain
                .calls()
                .iter()
                .filter(|c| matches!(c, MockCall::CanReveal(_)))
                .count()
        };
        let before = checks(&chain);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(checks(&chain), before);
    }

    #[test]
    fn test_consume_requires_ready() {
        let mut batch = CommitRevealBatch::new(Address::zero());
        assert!(matches!(batch.consume(), Err(BulkError::InvalidState(_))));
    }
}
