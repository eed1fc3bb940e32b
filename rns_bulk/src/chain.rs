//! The on-chain collaborators the workflow talks to
//!
//! [`crate::client::EthersRnsClient`] implements these against the deployed
//! contracts; tests use an in-memory chain.

use ethers::types::{Address, H256, U256};
use std::future::Future;

use crate::error::BulkError;
use crate::types::{AddressItem, BatchReceipt, RegisterItem, RegistrationRecord, RenewItem};

/// RNS registry reads
pub trait DomainRegistry: Send + Sync {
    fn owner(&self, node: H256) -> impl Future<Output = Result<Address, BulkError>> + Send;
}

/// FIFS registrar: availability and the commit half of commit-reveal
pub trait FifsRegistrar: Send + Sync {
    fn available(&self, label: &str) -> impl Future<Output = Result<bool, BulkError>> + Send;

    /// The registrar's pure commitment function
    fn make_commitment(
        &self,
        label_hash: [u8; 32],
        owner: Address,
        secret: [u8; 32],
    ) -> impl Future<Output = Result<H256, BulkError>> + Send;

    /// Submit a commitment and wait for it to be mined; returns the tx hash
    fn commit(&self, commitment: H256) -> impl Future<Output = Result<H256, BulkError>> + Send;

    fn can_reveal(&self, commitment: H256) -> impl Future<Output = Result<bool, BulkError>> + Send;

    /// Minimum commitment age in seconds
    fn min_commitment_age(&self) -> impl Future<Output = Result<u64, BulkError>> + Send;
}

/// RIF token the registrations are paid in
pub trait PaymentToken: Send + Sync {
    fn balance_of(&self, holder: Address) -> impl Future<Output = Result<U256, BulkError>> + Send;

    fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256, BulkError>> + Send;

    /// Approve and wait for the transaction to be mined; returns the tx hash
    fn approve(
        &self,
        spender: Address,
        amount: U256,
    ) -> impl Future<Output = Result<H256, BulkError>> + Send;
}

/// The batching contract
pub trait BulkManager: Send + Sync {
    fn bulk_manager_address(&self) -> Address;

    fn calculate_registration_cost(
        &self,
        names: Vec<String>,
        durations: Vec<U256>,
    ) -> impl Future<Output = Result<U256, BulkError>> + Send;

    fn calculate_renewal_cost(
        &self,
        names: Vec<String>,
        durations: Vec<U256>,
    ) -> impl Future<Output = Result<U256, BulkError>> + Send;

    fn bulk_register(
        &self,
        items: Vec<RegisterItem>,
    ) -> impl Future<Output = Result<BatchReceipt, BulkError>> + Send;

    fn bulk_renew(
        &self,
        items: Vec<RenewItem>,
    ) -> impl Future<Output = Result<BatchReceipt, BulkError>> + Send;

    fn bulk_set_address(
        &self,
        items: Vec<AddressItem>,
    ) -> impl Future<Output = Result<BatchReceipt, BulkError>> + Send;

    fn bulk_set_resolver(
        &self,
        nodes: Vec<H256>,
        resolver: Address,
    ) -> impl Future<Output = Result<BatchReceipt, BulkError>> + Send;
}

/// Past `bulkRegister` calls made by a user
pub trait RegistrationHistory: Send + Sync {
    fn registrations(
        &self,
        user: Address,
    ) -> impl Future<Output = Result<Vec<RegistrationRecord>, BulkError>> + Send;
}

/// Everything the workflow needs from one wallet-connected client
pub trait RnsClient:
    DomainRegistry + FifsRegistrar + PaymentToken + BulkManager + RegistrationHistory
{
    /// Address transactions are sent from
    fn sender(&self) -> Address;
}
