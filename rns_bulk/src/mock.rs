//! In-memory chain implementing every collaborator trait
//!
//! Mirrors the observable behaviour of the deployed contracts closely enough
//! to drive the workflow end to end: the registrar matures commitments on the
//! tokio clock, pricing reverts for taken names, and `bulkRegister` only
//! succeeds for items whose secret matches a mature commitment.

use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::chain::{
    BulkManager, DomainRegistry, FifsRegistrar, PaymentToken, RegistrationHistory, RnsClient,
};
use crate::error::BulkError;
use crate::rns::{label_node, labelhash};
use crate::types::{
    AddressItem, BatchReceipt, RegisterItem, RegistrationRecord, RenewItem, outcomes_from_failures,
};

/// Default price of one name for any duration: 2 RIF
pub const DEFAULT_PRICE: u64 = 2_000_000_000_000_000_000;

/// A call the workflow made against the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Owner(H256),
    Available(String),
    MakeCommitment,
    Commit(H256),
    CanReveal(H256),
    MinCommitmentAge,
    BalanceOf,
    Allowance,
    Approve(U256),
    RegistrationCost(Vec<String>),
    RenewalCost(Vec<String>),
    BulkRegister(Vec<RegisterItem>),
    BulkRenew(Vec<RenewItem>),
    BulkSetAddress(Vec<AddressItem>),
    BulkSetResolver(Vec<H256>, Address),
    Registrations,
}

struct MockState {
    owners: HashMap<H256, Address>,
    resolvers: HashMap<H256, Address>,
    registrar_says: HashMap<String, bool>,
    registrar_reverts: bool,
    registry_fails: bool,
    prices: HashMap<String, U256>,
    allowance: U256,
    balance: U256,
    min_age: Duration,
    commitments: HashMap<H256, Instant>,
    used_commitments: HashSet<H256>,
    fail_commit_at: Option<usize>,
    commit_count: usize,
    item_failures: HashMap<String, String>,
    register_revert: Option<String>,
    history: Vec<RegistrationRecord>,
    calls: Vec<MockCall>,
    tx_counter: u64,
}

pub struct MockChain {
    sender: Address,
    manager: Address,
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            sender: Address::repeat_byte(0xaa),
            manager: Address::repeat_byte(0xbb),
            state: Mutex::new(MockState {
                owners: HashMap::new(),
                resolvers: HashMap::new(),
                registrar_says: HashMap::new(),
                registrar_reverts: false,
                registry_fails: false,
                prices: HashMap::new(),
                allowance: U256::zero(),
                balance: U256::from(DEFAULT_PRICE) * 1_000,
                min_age: Duration::from_secs(60),
                commitments: HashMap::new(),
                used_commitments: HashSet::new(),
                fail_commit_at: None,
                commit_count: 0,
                item_failures: HashMap::new(),
                register_revert: None,
                history: Vec::new(),
                calls: Vec::new(),
                tx_counter: 0,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_allowance(&self, amount: U256) {
        self.state().allowance = amount;
    }

    pub fn set_balance(&self, amount: U256) {
        self.state().balance = amount;
    }

    pub fn set_owner(&self, label: &str, owner: Address) {
        self.state().owners.insert(label_node(label), owner);
    }

    /// Override what the registrar's `available()` returns for a label
    pub fn set_registrar_available(&self, label: &str, available: bool) {
        self.state().registrar_says.insert(label.to_string(), available);
    }

    pub fn set_registrar_reverts(&self, reverts: bool) {
        self.state().registrar_reverts = reverts;
    }

    pub fn set_registry_fails(&self, fails: bool) {
        self.state().registry_fails = fails;
    }

    pub fn set_price(&self, label: &str, price: U256) {
        self.state().prices.insert(label.to_string(), price);
    }

    pub fn set_min_age(&self, age: Duration) {
        self.state().min_age = age;
    }

    /// Make the n-th commit (0-based) revert
    pub fn fail_commit_at(&self, n: usize) {
        self.state().fail_commit_at = Some(n);
    }

    /// Make a single item fail inside otherwise successful batches
    pub fn fail_item(&self, label: &str, reason: &str) {
        self.state()
            .item_failures
            .insert(label.to_string(), reason.to_string());
    }

    pub fn revert_register(&self, reason: Option<&str>) {
        self.state().register_revert = reason.map(str::to_string);
    }

    pub fn push_history(&self, record: RegistrationRecord) {
        self.state().history.push(record);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn allowance_now(&self) -> U256 {
        self.state().allowance
    }

    pub fn owner_of(&self, label: &str) -> Address {
        self.state()
            .owners
            .get(&label_node(label))
            .copied()
            .unwrap_or_default()
    }

    pub fn resolver_of(&self, label: &str) -> Address {
        self.state()
            .resolvers
            .get(&label_node(label))
            .copied()
            .unwrap_or_default()
    }

    pub fn approvals(&self) -> Vec<U256> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Approve(amount) => Some(amount),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<H256> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Commit(hash) => Some(hash),
                _ => None,
            })
            .collect()
    }

    pub fn register_calls(&self) -> Vec<Vec<RegisterItem>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::BulkRegister(items) => Some(items),
                _ => None,
            })
            .collect()
    }

    /// Number of calls that reached the chain at all
    pub fn external_call_count(&self) -> usize {
        self.state().calls.len()
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }
}

impl MockState {
    fn next_tx(&mut self) -> H256 {
        self.tx_counter += 1;
        H256::from_low_u64_be(self.tx_counter)
    }

    fn price_of(&self, label: &str) -> U256 {
        self.prices
            .get(label)
            .copied()
            .unwrap_or_else(|| U256::from(DEFAULT_PRICE))
    }

    fn is_owned(&self, label: &str) -> bool {
        self.owners
            .get(&label_node(label))
            .is_some_and(|owner| !owner.is_zero())
    }

    fn charge(&mut self, amount: U256) -> Result<(), BulkError> {
        if self.allowance < amount {
            return Err(BulkError::revert("ERC20: insufficient allowance"));
        }
        if self.balance < amount {
            return Err(BulkError::revert("ERC20: transfer amount exceeds balance"));
        }
        self.allowance -= amount;
        self.balance -= amount;
        Ok(())
    }
}

fn commitment_hash(label_hash: [u8; 32], owner: Address, secret: [u8; 32]) -> H256 {
    let mut packed = Vec::with_capacity(84);
    packed.extend_from_slice(&label_hash);
    packed.extend_from_slice(owner.as_bytes());
    packed.extend_from_slice(&secret);
    H256::from(keccak256(packed))
}

impl DomainRegistry for MockChain {
    async fn owner(&self, node: H256) -> Result<Address, BulkError> {
        self.record(MockCall::Owner(node));
        let state = self.state();
        if state.registry_fails {
            return Err(BulkError::Transient("registry unreachable".into()));
        }
        Ok(state.owners.get(&node).copied().unwrap_or_default())
    }
}

impl FifsRegistrar for MockChain {
    async fn available(&self, label: &str) -> Result<bool, BulkError> {
        self.record(MockCall::Available(label.to_string()));
        let state = self.state();
        if state.registrar_reverts {
            return Err(BulkError::Revert {
                reason: None,
                raw: "execution reverted".into(),
            });
        }
        Ok(state
            .registrar_says
            .get(label)
            .copied()
            .unwrap_or_else(|| !state.is_owned(label)))
    }

    async fn make_commitment(
        &self,
        label_hash: [u8; 32],
        owner: Address,
        secret: [u8; 32],
    ) -> Result<H256, BulkError> {
        self.record(MockCall::MakeCommitment);
        Ok(commitment_hash(label_hash, owner, secret))
    }

    async fn commit(&self, commitment: H256) -> Result<H256, BulkError> {
        self.record(MockCall::Commit(commitment));
        let mut state = self.state();
        let attempt = state.commit_count;
        state.commit_count += 1;
        if state.fail_commit_at == Some(attempt) {
            return Err(BulkError::revert("Existing commitment"));
        }
        state.commitments.insert(commitment, Instant::now());
        Ok(state.next_tx())
    }

    async fn can_reveal(&self, commitment: H256) -> Result<bool, BulkError> {
        self.record(MockCall::CanReveal(commitment));
        let state = self.state();
        Ok(state
            .commitments
            .get(&commitment)
            .is_some_and(|at| at.elapsed() >= state.min_age))
    }

    async fn min_commitment_age(&self) -> Result<u64, BulkError> {
        self.record(MockCall::MinCommitmentAge);
        Ok(self.state().min_age.as_secs())
    }
}

impl PaymentToken for MockChain {
    async fn balance_of(&self, _holder: Address) -> Result<U256, BulkError> {
        self.record(MockCall::BalanceOf);
        Ok(self.state().balance)
    }

    async fn allowance(&self, _owner: Address, _spender: Address) -> Result<U256, BulkError> {
        self.record(MockCall::Allowance);
        Ok(self.state().allowance)
    }

    async fn approve(&self, _spender: Address, amount: U256) -> Result<H256, BulkError> {
        self.record(MockCall::Approve(amount));
        let mut state = self.state();
        state.allowance = amount;
        Ok(state.next_tx())
    }
}

impl BulkManager for MockChain {
    fn bulk_manager_address(&self) -> Address {
        self.manager
    }

    async fn calculate_registration_cost(
        &self,
        names: Vec<String>,
        _durations: Vec<U256>,
    ) -> Result<U256, BulkError> {
        self.record(MockCall::RegistrationCost(names.clone()));
        let state = self.state();
        let mut total = U256::zero();
        for name in &names {
            if state.is_owned(name) {
                return Err(BulkError::revert("Not available"));
            }
            total += state.price_of(name);
        }
        Ok(total)
    }

    async fn calculate_renewal_cost(
        &self,
        names: Vec<String>,
        _durations: Vec<U256>,
    ) -> Result<U256, BulkError> {
        self.record(MockCall::RenewalCost(names.clone()));
        let state = self.state();
        Ok(names
            .iter()
            .fold(U256::zero(), |total, name| total + state.price_of(name)))
    }

    async fn bulk_register(&self, items: Vec<RegisterItem>) -> Result<BatchReceipt, BulkError> {
        self.record(MockCall::BulkRegister(items.clone()));
        let mut state = self.state();
        if let Some(reason) = state.register_revert.clone() {
            return Err(BulkError::revert(reason));
        }
        if items.is_empty() {
            return Err(BulkError::revert("Empty request"));
        }

        let mut failures = Vec::new();
        let mut total = U256::zero();
        for (index, item) in items.iter().enumerate() {
            let hash = commitment_hash(labelhash(&item.name), item.owner, item.secret);
            let mature = state
                .commitments
                .get(&hash)
                .is_some_and(|at| at.elapsed() >= state.min_age);

            if let Some(reason) = state.item_failures.get(&item.name) {
                failures.push((index, reason.clone()));
            } else if state.is_owned(&item.name) {
                failures.push((index, "Not available".to_string()));
            } else if !mature || state.used_commitments.contains(&hash) {
                failures.push((index, "Commitment not revealable".to_string()));
            } else {
                let price = state.price_of(&item.name);
                state.charge(price)?;
                total += price;
                state.owners.insert(label_node(&item.name), item.owner);
                state.used_commitments.insert(hash);
            }
        }

        let succeeded = items.len() - failures.len();
        Ok(BatchReceipt {
            tx_hash: state.next_tx(),
            results: outcomes_from_failures(items.len(), failures)?,
            registered_count: Some(U256::from(succeeded)),
            total_cost: Some(total),
        })
    }

    async fn bulk_renew(&self, items: Vec<RenewItem>) -> Result<BatchReceipt, BulkError> {
        self.record(MockCall::BulkRenew(items.clone()));
        let mut state = self.state();
        let mut failures = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if let Some(reason) = state.item_failures.get(&item.name) {
                failures.push((index, reason.clone()));
                continue;
            }
            let price = state.price_of(&item.name);
            state.charge(price)?;
        }
        Ok(BatchReceipt {
            tx_hash: state.next_tx(),
            results: outcomes_from_failures(items.len(), failures)?,
            registered_count: None,
            total_cost: None,
        })
    }

    async fn bulk_set_address(&self, items: Vec<AddressItem>) -> Result<BatchReceipt, BulkError> {
        self.record(MockCall::BulkSetAddress(items.clone()));
        let mut state = self.state();
        Ok(BatchReceipt {
            tx_hash: state.next_tx(),
            results: outcomes_from_failures(items.len(), Vec::new())?,
            registered_count: None,
            total_cost: None,
        })
    }

    async fn bulk_set_resolver(
        &self,
        nodes: Vec<H256>,
        resolver: Address,
    ) -> Result<BatchReceipt, BulkError> {
        self.record(MockCall::BulkSetResolver(nodes.clone(), resolver));
        let mut state = self.state();
        if resolver.is_zero() {
            return Err(BulkError::revert("Invalid resolver address"));
        }
        for node in &nodes {
            state.resolvers.insert(*node, resolver);
        }
        Ok(BatchReceipt {
            tx_hash: state.next_tx(),
            results: outcomes_from_failures(nodes.len(), Vec::new())?,
            registered_count: None,
            total_cost: None,
        })
    }
}

impl RegistrationHistory for MockChain {
    async fn registrations(&self, _user: Address) -> Result<Vec<RegistrationRecord>, BulkError> {
        self.record(MockCall::Registrations);
        Ok(self.state().history.clone())
    }
}

impl RnsClient for MockChain {
    fn sender(&self) -> Address {
        self.sender
    }
}
