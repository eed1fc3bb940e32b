//! Live client over the deployed RNS contracts

use ethers::abi::{AbiDecode, Detokenize};
use ethers::contract::{ContractCall, parse_log};
use ethers::prelude::*;
use ethers::signers::LocalWallet;
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{
    BulkManager, DomainRegistry, FifsRegistrar, PaymentToken, RegistrationHistory, RnsClient,
};
use crate::config::{NetworkConfig, WorkflowConfig};
use crate::error::{BulkError, classify_contract_error, classify_provider_error};
use crate::rns::{
    AddressRequest, BulkRegisterCall, BulkRegistrationFilter, FIFSRegistrar, OperationFailedFilter,
    RIFToken, RNSBulkManager, RNSRegistry, RegistrationRequest, RenewalRequest,
};
use crate::signing::bounded;
use crate::types::{
    AddressItem, BatchReceipt, RegisterItem, RegistrationRecord, RenewItem, outcomes_from_failures,
};

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Wallet-connected client for the registry, registrar, RIF token and bulk manager
pub struct EthersRnsClient {
    client: Arc<SignerClient>,
    registry: RNSRegistry<SignerClient>,
    registrar: FIFSRegistrar<SignerClient>,
    token: RIFToken<SignerClient>,
    manager: RNSBulkManager<SignerClient>,
    call_timeout: Duration,
    history_lookback_blocks: u64,
}

impl EthersRnsClient {
    pub fn new(network: &NetworkConfig, workflow: &WorkflowConfig) -> Result<Self, BulkError> {
        let private_key = network
            .private_key
            .as_deref()
            .ok_or_else(|| BulkError::Config("PRIVATE_KEY must be set to sign transactions".into()))?;

        let provider = Provider::<Http>::try_from(network.rpc_url.as_str())
            .map_err(|e| BulkError::Config(format!("invalid RPC_URL: {e}")))?;
        let wallet: LocalWallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| BulkError::Config(format!("invalid PRIVATE_KEY: {e}")))?;
        let wallet = wallet.with_chain_id(network.network.chain_id());

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contracts = network.contracts;

        tracing::info!(
            network = network.network.name(),
            rpc = %network.rpc_url,
            sender = ?client.address(),
            "RNS client ready"
        );

        Ok(Self {
            registry: RNSRegistry::new(contracts.registry, client.clone()),
            registrar: FIFSRegistrar::new(contracts.fifs_registrar, client.clone()),
            token: RIFToken::new(contracts.rif_token, client.clone()),
            manager: RNSBulkManager::new(contracts.bulk_manager, client.clone()),
            client,
            call_timeout: workflow.call_timeout,
            history_lookback_blocks: workflow.history_lookback_blocks,
        })
    }

    /// Native balance for gas, used by the terminal client's banner
    pub async fn gas_balance(&self) -> Result<U256, BulkError> {
        self.client
            .inner()
            .get_balance(self.client.address(), None)
            .await
            .map_err(classify_provider_error)
    }
}

async fn read<D: Detokenize>(call: ContractCall<SignerClient, D>) -> Result<D, BulkError> {
    call.call().await.map_err(classify_contract_error)
}

/// Send a transaction and wait for it to be mined
async fn send<D: Detokenize>(
    call: ContractCall<SignerClient, D>,
    operation: &'static str,
) -> Result<TransactionReceipt, BulkError> {
    let pending = call.send().await.map_err(classify_contract_error)?;
    let tx_hash = pending.tx_hash();
    tracing::info!(operation, tx = ?tx_hash, "Transaction sent");

    let receipt = pending
        .await
        .map_err(classify_provider_error)?
        .ok_or_else(|| BulkError::Revert {
            reason: None,
            raw: format!("{operation} transaction {tx_hash:?} was dropped"),
        })?;

    if receipt.status == Some(U64::zero()) {
        return Err(BulkError::Revert {
            reason: None,
            raw: format!("{operation} transaction {tx_hash:?} failed with status 0"),
        });
    }
    Ok(receipt)
}

/// Rebuild per-item results from the events the bulk manager emitted
///
/// Logs from any other address are ignored.
fn decode_receipt(
    manager: Address,
    receipt: &TransactionReceipt,
    len: usize,
) -> Result<BatchReceipt, BulkError> {
    let mut failures = Vec::new();
    let mut registered_count = None;
    let mut total_cost = None;

    for log in receipt.logs.iter().filter(|l| l.address == manager) {
        if let Ok(failed) = parse_log::<OperationFailedFilter>(log.clone()) {
            let index = usize::try_from(failed.index).map_err(|_| {
                BulkError::MalformedResults(format!("failure index {} out of range", failed.index))
            })?;
            failures.push((index, failed.reason));
        } else if let Ok(batch) = parse_log::<BulkRegistrationFilter>(log.clone()) {
            registered_count = Some(batch.count);
            total_cost = Some(batch.total_cost);
        }
    }

    Ok(BatchReceipt {
        tx_hash: receipt.transaction_hash,
        results: outcomes_from_failures(len, failures)?,
        registered_count,
        total_cost,
    })
}

/// Names and durations carried by a `bulkRegister` calldata payload
fn records_from_calldata(input: &[u8], registered_at: u64) -> Result<Vec<RegistrationRecord>, BulkError> {
    let call = BulkRegisterCall::decode(input)
        .map_err(|e| BulkError::MalformedResults(format!("not a bulkRegister call: {e}")))?;

    Ok(call
        .requests
        .into_iter()
        .map(|request| RegistrationRecord {
            name: request.name,
            duration_secs: u64::try_from(request.duration).unwrap_or(u64::MAX),
            registered_at,
        })
        .collect())
}

impl DomainRegistry for EthersRnsClient {
    async fn owner(&self, node: H256) -> Result<Address, BulkError> {
        read(self.registry.owner(node.0)).await
    }
}

impl FifsRegistrar for EthersRnsClient {
    async fn available(&self, label: &str) -> Result<bool, BulkError> {
        read(self.registrar.available(label.to_string())).await
    }

    async fn make_commitment(
        &self,
        label_hash: [u8; 32],
        owner: Address,
        secret: [u8; 32],
    ) -> Result<H256, BulkError> {
        read(self.registrar.make_commitment(label_hash, owner, secret))
            .await
            .map(H256::from)
    }

    async fn commit(&self, commitment: H256) -> Result<H256, BulkError> {
        let receipt = send(self.registrar.commit(commitment.0), "commit").await?;
        Ok(receipt.transaction_hash)
    }

    async fn can_reveal(&self, commitment: H256) -> Result<bool, BulkError> {
        read(self.registrar.can_reveal(commitment.0)).await
    }

    async fn min_commitment_age(&self) -> Result<u64, BulkError> {
        let age = read(self.registrar.min_commitment_age()).await?;
        Ok(age.low_u64())
    }
}

impl PaymentToken for EthersRnsClient {
    async fn balance_of(&self, holder: Address) -> Result<U256, BulkError> {
        read(self.token.balance_of(holder)).await
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, BulkError> {
        read(self.token.allowance(owner, spender)).await
    }

    async fn approve(&self, spender: Address, amount: U256) -> Result<H256, BulkError> {
        let receipt = send(self.token.approve(spender, amount), "approve").await?;
        Ok(receipt.transaction_hash)
    }
}

impl BulkManager for EthersRnsClient {
    fn bulk_manager_address(&self) -> Address {
        self.manager.address()
    }

    async fn calculate_registration_cost(
        &self,
        names: Vec<String>,
        durations: Vec<U256>,
    ) -> Result<U256, BulkError> {
        read(self.manager.calculate_registration_cost(names, durations)).await
    }

    async fn calculate_renewal_cost(
        &self,
        names: Vec<String>,
        durations: Vec<U256>,
    ) -> Result<U256, BulkError> {
        read(self.manager.calculate_renewal_cost(names, durations)).await
    }

    async fn bulk_register(&self, items: Vec<RegisterItem>) -> Result<BatchReceipt, BulkError> {
        let len = items.len();
        let requests = items
            .into_iter()
            .map(|i| RegistrationRequest {
                name: i.name,
                owner: i.owner,
                secret: i.secret,
                duration: i.duration,
                addr: i.addr,
            })
            .collect();
        let receipt = send(self.manager.bulk_register(requests), "bulkRegister").await?;
        decode_receipt(self.manager.address(), &receipt, len)
    }

    async fn bulk_renew(&self, items: Vec<RenewItem>) -> Result<BatchReceipt, BulkError> {
        let len = items.len();
        let requests = items
            .into_iter()
            .map(|i| RenewalRequest {
                name: i.name,
                duration: i.duration,
            })
            .collect();
        let receipt = send(self.manager.bulk_renew(requests), "bulkRenew").await?;
        decode_receipt(self.manager.address(), &receipt, len)
    }

    async fn bulk_set_address(&self, items: Vec<AddressItem>) -> Result<BatchReceipt, BulkError> {
        let len = items.len();
        let requests = items
            .into_iter()
            .map(|i| AddressRequest {
                node: i.node.0,
                target_address: i.target,
            })
            .collect();
        let receipt = send(self.manager.bulk_set_address(requests), "bulkSetAddress").await?;
        decode_receipt(self.manager.address(), &receipt, len)
    }

    async fn bulk_set_resolver(
        &self,
        nodes: Vec<H256>,
        resolver: Address,
    ) -> Result<BatchReceipt, BulkError> {
        let len = nodes.len();
        let nodes = nodes.into_iter().map(|n| n.0).collect();
        let receipt = send(
            self.manager.bulk_set_resolver(nodes, resolver),
            "bulkSetResolver",
        )
        .await?;
        decode_receipt(self.manager.address(), &receipt, len)
    }
}

impl RegistrationHistory for EthersRnsClient {
    /// `bulkRegister` calls found through `BulkRegistration` events in the lookback window
    async fn registrations(&self, user: Address) -> Result<Vec<RegistrationRecord>, BulkError> {
        let provider = self.client.inner();
        let latest = provider
            .get_block_number()
            .await
            .map_err(classify_provider_error)?;
        let from = latest.saturating_sub(U64::from(self.history_lookback_blocks));

        let events = self
            .manager
            .bulk_registration_filter()
            .from_block(from)
            .to_block(BlockNumber::Latest)
            .topic1(H256::from(user));
        let logs = bounded("getLogs", self.call_timeout, async {
            events.query_with_meta().await.map_err(classify_contract_error)
        })
        .await?;

        let mut records = Vec::new();
        for (_, meta) in logs {
            let tx = match provider.get_transaction(meta.transaction_hash).await {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(tx = ?meta.transaction_hash, error = %e, "Could not fetch registration tx");
                    continue;
                }
            };
            let registered_at = match provider.get_block(meta.block_number).await {
                Ok(Some(block)) => block.timestamp.low_u64(),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(block = %meta.block_number, error = %e, "Could not fetch block");
                    continue;
                }
            };

            match records_from_calldata(&tx.input, registered_at) {
                Ok(found) => records.extend(found),
                Err(e) => {
                    tracing::warn!(tx = ?meta.transaction_hash, error = %e, "Skipping registration tx");
                }
            }
        }

        Ok(records)
    }
}

impl RnsClient for EthersRnsClient {
    fn sender(&self) -> Address {
        self.client.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify_contract_error;
    use ethers::abi::{AbiEncode, Token};
    use ethers::contract::{ContractError, EthEvent};

    fn manager() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn failed_log(address: Address, index: u64, reason: &str) -> Log {
        Log {
            address,
            topics: vec![OperationFailedFilter::signature(), H256::from_low_u64_be(index)],
            data: ethers::abi::encode(&[Token::String(reason.to_string())]).into(),
            ..Default::default()
        }
    }

    fn registration_log(user: Address, count: u64, total: U256) -> Log {
        Log {
            address: manager(),
            topics: vec![BulkRegistrationFilter::signature(), H256::from(user)],
            data: ethers::abi::encode(&[Token::Uint(count.into()), Token::Uint(total)]).into(),
            ..Default::default()
        }
    }

    fn receipt(logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0x01),
            logs,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_receipt_maps_failures_to_items() {
        let total = U256::exp10(18) * 4;
        let receipt = receipt(vec![
            failed_log(manager(), 1, "Not available"),
            // same event shape from an unrelated contract
            failed_log(Address::repeat_byte(0xcc), 0, "spoofed"),
            registration_log(Address::repeat_byte(0xaa), 2, total),
        ]);

        let decoded = decode_receipt(manager(), &receipt, 3).unwrap();

        assert_eq!(decoded.tx_hash, H256::repeat_byte(0x01));
        let successes: Vec<_> = decoded.results.iter().map(|r| r.success).collect();
        assert_eq!(successes, vec![true, false, true]);
        assert_eq!(decoded.results[1].error_message, "Not available");
        assert!(decoded.results[0].error_message.is_empty());
        assert_eq!(decoded.registered_count, Some(U256::from(2)));
        assert_eq!(decoded.total_cost, Some(total));
    }

    #[test]
    fn test_decode_receipt_without_events_is_all_success() {
        let decoded = decode_receipt(manager(), &receipt(Vec::new()), 2).unwrap();
        assert!(decoded.results.iter().all(|r| r.success));
        assert_eq!(decoded.registered_count, None);
    }

    #[test]
    fn test_decode_receipt_rejects_index_past_batch() {
        let receipt = receipt(vec![failed_log(manager(), 5, "Not available")]);
        let err = decode_receipt(manager(), &receipt, 2).unwrap_err();
        assert!(matches!(err, BulkError::MalformedResults(_)));
    }

    #[test]
    fn test_records_from_bulk_register_calldata() {
        let call = BulkRegisterCall {
            requests: vec![
                RegistrationRequest {
                    name: "alice".into(),
                    owner: Address::repeat_byte(0xaa),
                    secret: [7u8; 32],
                    duration: U256::from(crate::types::YEAR_SECS),
                    addr: Address::repeat_byte(0xaa),
                },
                RegistrationRequest {
                    name: "bob".into(),
                    owner: Address::repeat_byte(0xaa),
                    secret: [8u8; 32],
                    duration: U256::MAX,
                    addr: Address::repeat_byte(0xaa),
                },
            ],
        };

        let records = records_from_calldata(&call.encode(), 1_700_000_000).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "alice");
        assert_eq!(records[0].duration_secs, crate::types::YEAR_SECS);
        assert_eq!(records[0].registered_at, 1_700_000_000);
        // durations past u64 are clamped rather than wrapped
        assert_eq!(records[1].duration_secs, u64::MAX);
    }

    #[test]
    fn test_records_from_other_calldata_is_malformed() {
        let err = records_from_calldata(&[0xde, 0xad, 0xbe, 0xef], 0).unwrap_err();
        assert!(matches!(err, BulkError::MalformedResults(_)));
    }

    #[test]
    fn test_classify_error_string_revert() {
        // Error(string) selector followed by the abi-encoded reason
        let mut payload = vec![0x08, 0xc3, 0x79, 0xa0];
        payload.extend(ethers::abi::encode(&[Token::String("Not available".into())]));
        let err: ContractError<Provider<Http>> = ContractError::Revert(payload.into());

        match classify_contract_error(err) {
            BulkError::Revert { reason, raw } => {
                assert_eq!(reason.as_deref(), Some("Not available"));
                assert_eq!(raw, "Not available");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_custom_revert_keeps_raw_bytes() {
        let err: ContractError<Provider<Http>> =
            ContractError::Revert(vec![0x12, 0x34, 0x56, 0x78].into());

        match classify_contract_error(err) {
            BulkError::Revert { reason, raw } => {
                assert_eq!(reason, None);
                assert_eq!(raw, "0x12345678");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_provider_failure_is_transient() {
        let err: ContractError<Provider<Http>> = ContractError::ProviderError {
            e: ProviderError::CustomError("connection refused".into()),
        };
        let classified = classify_contract_error(err);
        assert!(matches!(classified, BulkError::Transient(_)));
        assert!(classified.is_recoverable());
    }
}
