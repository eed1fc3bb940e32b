//! Drives batch actions from precondition checks to confirmed per-domain outcomes
//!
//! Registration: validate, read price/allowance/balance together, approve if the
//! allowance is short, commit each name in turn, wait for maturity, submit
//! `bulkRegister` with the matching secrets, decode results. Renewals and record
//! updates follow the same approve/submit/decode path without commit-reveal.

use ethers::types::{Address, H256, U256};
use std::collections::HashSet;
use std::sync::Arc;

use crate::availability::AvailabilityResolver;
use crate::chain::RnsClient;
use crate::commit_reveal::{CommitPhase, Readiness};
use crate::config::WorkflowConfig;
use crate::cost::{CostAggregator, format_rif};
use crate::error::BulkError;
use crate::rns::{label_node, normalize_label};
use crate::session::RegistrationSession;
use crate::signing::{SigningGate, SigningRequest, SigningStep, TxSigner, bounded};
use crate::types::{AddressItem, BatchOutcome, DomainRequest, DomainRow, RegisterItem, RenewItem};

pub struct TransactionOrchestrator<C, G> {
    chain: Arc<C>,
    signer: TxSigner<G>,
    availability: Arc<AvailabilityResolver<C>>,
    cost: CostAggregator<C>,
    config: WorkflowConfig,
}

impl<C, G> TransactionOrchestrator<C, G>
where
    C: RnsClient + 'static,
    G: SigningGate,
{
    pub fn new(chain: Arc<C>, gate: G, config: WorkflowConfig) -> Self {
        Self {
            availability: Arc::new(AvailabilityResolver::new(chain.clone(), config.call_timeout)),
            cost: CostAggregator::new(chain.clone(), config.call_timeout),
            signer: TxSigner::new(gate, config.confirmation_timeout),
            chain,
            config,
        }
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn availability(&self) -> &Arc<AvailabilityResolver<C>> {
        &self.availability
    }

    pub fn cost(&self) -> &CostAggregator<C> {
        &self.cost
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Start a session for rows owned by the connected wallet
    pub fn new_session(&self, rows: Vec<DomainRow>) -> RegistrationSession {
        RegistrationSession::new(rows, self.chain.sender())
    }

    /// Run (or resume) a registration session
    ///
    /// A session left `Cancelled` or `Failed` can be passed in again: names
    /// that already have commitments are not re-committed and approval is
    /// skipped when the earlier one still covers the cost.
    pub async fn register(&self, session: &mut RegistrationSession) -> Result<BatchOutcome, BulkError> {
        match self.run_registration(session).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind(), "Registration batch stopped");
                session.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_registration(&self, session: &mut RegistrationSession) -> Result<BatchOutcome, BulkError> {
        session.ensure_live()?;
        session.validate()?;

        let requests = session.requests();
        let names = session.names();
        let owner = session.owner();

        let total = self
            .ensure_funds(session, self.cost.price_registration(&requests))
            .await?;
        tracing::info!(count = names.len(), total = %format_rif(total), "Registration priced");

        session.ensure_live()?;
        session.start_commits()?;
        let commit_result = {
            let batch = session.batch_mut();
            batch
                .commit(self.chain.as_ref(), &self.signer, &names, self.config.call_timeout)
                .await
        };
        if let Err(partial) = commit_result {
            tracing::warn!(committed = ?partial.committed, "Commit phase incomplete");
            return Err(partial.error);
        }

        session.start_waiting()?;
        self.wait_for_maturity(session).await?;
        session.batch_mut().mark_ready()?;

        session.ensure_live()?;
        session.start_submit()?;
        let items = requests
            .iter()
            .map(|request| {
                let secret = session.batch().secret_for(&request.name).ok_or_else(|| {
                    BulkError::InvalidState(format!("no commitment for {}", request.name))
                })?;
                Ok(RegisterItem {
                    name: request.name.clone(),
                    owner,
                    secret,
                    duration: U256::from(request.duration_secs),
                    addr: owner,
                })
            })
            .collect::<Result<Vec<_>, BulkError>>()?;

        let request = SigningRequest {
            step: SigningStep::Register,
            summary: format!("Register {} name(s) for {}", items.len(), format_rif(total)),
            amount: Some(total),
        };
        let receipt = self
            .signer
            .submit(request, "bulkRegister", self.chain.bulk_register(items))
            .await?;

        let outcome = BatchOutcome::new(&names, receipt)?;
        for name in outcome.succeeded() {
            self.availability.mark_registered(name);
        }
        for failed in outcome.failed() {
            tracing::warn!(name = %failed.name, reason = ?failed.error_message, "Registration item failed");
        }
        tracing::info!(
            tx = ?outcome.tx_hash,
            registered = outcome.succeeded().count(),
            failed = outcome.failed().count(),
            "Registration batch confirmed"
        );

        session.batch_mut().consume()?;
        session.confirm(outcome.clone())?;
        Ok(outcome)
    }

    /// Read price, allowance and balance together; approve when the allowance is short
    async fn ensure_funds<F>(&self, session: &mut RegistrationSession, price: F) -> Result<U256, BulkError>
    where
        F: std::future::Future<Output = Result<U256, BulkError>>,
    {
        let total = self.check_funds(price).await?;
        session.record_cost(total.cost);

        if total.allowance < total.cost {
            session.start_approval()?;
            let tx = self.approve(total.cost).await?;
            session.record_approval(tx);
        }
        Ok(total.cost)
    }

    async fn check_funds<F>(&self, price: F) -> Result<Funds, BulkError>
    where
        F: std::future::Future<Output = Result<U256, BulkError>>,
    {
        let sender = self.chain.sender();
        let spender = self.chain.bulk_manager_address();
        let timeout = self.config.call_timeout;

        let (cost, allowance, balance) = tokio::try_join!(
            price,
            bounded("allowance", timeout, self.chain.allowance(sender, spender)),
            bounded("balanceOf", timeout, self.chain.balance_of(sender)),
        )?;

        if balance < cost {
            return Err(BulkError::precondition(format!(
                "RIF balance {} does not cover the cost of {}",
                format_rif(balance),
                format_rif(cost)
            )));
        }
        Ok(Funds { cost, allowance })
    }

    /// Approve a multiple of `required` and wait for it to be mined
    async fn approve(&self, required: U256) -> Result<H256, BulkError> {
        let amount = required.saturating_mul(U256::from(self.config.approval_multiplier));
        let spender = self.chain.bulk_manager_address();
        let request = SigningRequest {
            step: SigningStep::Approve,
            summary: format!("Allow the bulk manager to spend {}", format_rif(amount)),
            amount: Some(amount),
        };

        let tx = self
            .signer
            .submit(request, "approve", self.chain.approve(spender, amount))
            .await?;
        tracing::info!(tx = ?tx, amount = %format_rif(amount), "Approval confirmed");
        Ok(tx)
    }

    async fn wait_for_maturity(&self, session: &mut RegistrationSession) -> Result<(), BulkError> {
        if session.batch().phase() == CommitPhase::AwaitingMaturity {
            let min_age = bounded(
                "minCommitmentAge",
                self.config.call_timeout,
                self.chain.min_commitment_age(),
            );
            match min_age.await {
                Ok(secs) => tracing::info!(
                    min_age_secs = secs,
                    commitments = session.batch().commitments().len(),
                    "Waiting for commitments to mature"
                ),
                Err(e) => tracing::warn!(error = %e, "Could not read minimum commitment age"),
            }
        }

        let abandon = session.abandon_handle();
        let handle = session
            .batch()
            .watch_readiness(self.chain.clone(), self.config.poll_settings())?;
        let mut progress = handle.subscribe();

        loop {
            let readiness = *progress.borrow_and_update();
            session.set_readiness(readiness);
            match readiness {
                Readiness::Ready => return Ok(()),
                Readiness::TimedOut => {
                    return Err(BulkError::Timeout {
                        operation: "canReveal",
                        after: self.config.maturity_timeout,
                    });
                }
                Readiness::Pending { .. } => {}
            }

            tokio::select! {
                _ = abandon.abandoned() => return Err(BulkError::Abandoned),
                changed = progress.changed() => {
                    if changed.is_err() {
                        return Err(BulkError::InvalidState("readiness poller stopped".into()));
                    }
                }
            }
        }
    }

    /// Renew already-owned names in one transaction
    pub async fn renew(&self, requests: Vec<DomainRequest>) -> Result<BatchOutcome, BulkError> {
        validate_names(requests.iter().map(|r| r.name.as_str()))?;
        if let Some(r) = requests.iter().find(|r| r.duration_secs == 0) {
            return Err(BulkError::precondition(format!("{}: duration must be positive", r.name)));
        }

        let funds = self.check_funds(self.cost.price_renewal(&requests)).await?;
        if funds.allowance < funds.cost {
            self.approve(funds.cost).await?;
        }

        let names: Vec<String> = requests.iter().map(|r| r.name.clone()).collect();
        let items = requests
            .iter()
            .map(|r| RenewItem {
                name: r.name.clone(),
                duration: U256::from(r.duration_secs),
            })
            .collect();
        let request = SigningRequest {
            step: SigningStep::Renew,
            summary: format!("Renew {} name(s) for {}", names.len(), format_rif(funds.cost)),
            amount: Some(funds.cost),
        };

        let receipt = self
            .signer
            .submit(request, "bulkRenew", self.chain.bulk_renew(items))
            .await?;
        let outcome = BatchOutcome::new(&names, receipt)?;
        tracing::info!(tx = ?outcome.tx_hash, renewed = outcome.succeeded().count(), "Renewal confirmed");
        Ok(outcome)
    }

    /// Point each name at an address; addresses must already be validated
    pub async fn set_addresses(&self, targets: Vec<(String, Address)>) -> Result<BatchOutcome, BulkError> {
        let names: Vec<String> = targets.iter().map(|(n, _)| normalize_label(n)).collect();
        validate_names(names.iter().map(String::as_str))?;

        let items = names
            .iter()
            .zip(&targets)
            .map(|(name, (_, target))| AddressItem {
                node: label_node(name),
                target: *target,
            })
            .collect();
        let request = SigningRequest {
            step: SigningStep::SetAddress,
            summary: format!("Update the address record of {} name(s)", names.len()),
            amount: None,
        };

        let receipt = self
            .signer
            .submit(request, "bulkSetAddress", self.chain.bulk_set_address(items))
            .await?;
        let outcome = BatchOutcome::new(&names, receipt)?;
        tracing::info!(tx = ?outcome.tx_hash, count = names.len(), "Address records updated");
        Ok(outcome)
    }

    pub async fn set_resolver(&self, names: Vec<String>, resolver: Address) -> Result<BatchOutcome, BulkError> {
        if resolver.is_zero() {
            return Err(BulkError::precondition("resolver address cannot be zero"));
        }
        let names: Vec<String> = names.iter().map(|n| normalize_label(n)).collect();
        validate_names(names.iter().map(String::as_str))?;

        let nodes: Vec<H256> = names.iter().map(|n| label_node(n)).collect();
        let request = SigningRequest {
            step: SigningStep::SetResolver,
            summary: format!("Set resolver {resolver:?} on {} name(s)", names.len()),
            amount: None,
        };

        let receipt = self
            .signer
            .submit(request, "bulkSetResolver", self.chain.bulk_set_resolver(nodes, resolver))
            .await?;
        let outcome = BatchOutcome::new(&names, receipt)?;
        tracing::info!(tx = ?outcome.tx_hash, resolver = ?resolver, "Resolver updated");
        Ok(outcome)
    }
}

struct Funds {
    cost: U256,
    allowance: U256,
}

fn validate_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), BulkError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(BulkError::precondition("empty domain name"));
        }
        if !seen.insert(name) {
            return Err(BulkError::precondition(format!("{name} appears twice")));
        }
    }
    if seen.is_empty() {
        return Err(BulkError::precondition("no domains in the batch"));
    }
    Ok(())
}
