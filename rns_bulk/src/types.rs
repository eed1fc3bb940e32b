//! Requests, contract items and per-domain outcomes shared by every batch action

use ethers::types::{Address, H256, U256};
use serde::Serialize;

use crate::error::BulkError;
use crate::rns::normalize_label;

/// Seconds in one registration year as the registrar counts it
pub const YEAR_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest registration or renewal accepted from callers, in years
pub const MAX_YEARS: u64 = 100;

/// One row of a batch: a label, how long to hold it and who owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRequest {
    /// Label without the `.rsk` suffix
    pub name: String,
    pub duration_secs: u64,
    pub owner: Address,
}

impl DomainRequest {
    pub fn new(name: &str, duration_secs: u64, owner: Address) -> Self {
        Self {
            name: normalize_label(name),
            duration_secs,
            owner,
        }
    }

    /// Fails when `years * YEAR_SECS` does not fit a `u64`
    pub fn for_years(name: &str, years: u64, owner: Address) -> Result<Self, BulkError> {
        let duration_secs = years.checked_mul(YEAR_SECS).ok_or_else(|| {
            BulkError::precondition(format!("{years} years is not a representable duration"))
        })?;
        Ok(Self::new(name, duration_secs, owner))
    }
}

/// Registrability of a name as far as this session knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityState {
    /// Not checked yet, still being checked, or too short to check
    Unknown,
    Available,
    Unavailable,
}

/// A request row together with its current availability verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRow {
    pub request: DomainRequest,
    pub availability: AvailabilityState,
}

impl DomainRow {
    pub fn unchecked(request: DomainRequest) -> Self {
        Self {
            request,
            availability: AvailabilityState::Unknown,
        }
    }
}

/// Registration item as handed to the batching contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterItem {
    pub name: String,
    pub owner: Address,
    pub secret: [u8; 32],
    pub duration: U256,
    /// Address record set on the new name
    pub addr: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewItem {
    pub name: String,
    pub duration: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressItem {
    pub node: H256,
    pub target: Address,
}

/// Per-item result of a batched call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub index: usize,
    pub error_message: String,
}

/// What a confirmed batch transaction reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub tx_hash: H256,
    pub results: Vec<OperationOutcome>,
    /// `count` of the `BulkRegistration` event, when one was emitted
    pub registered_count: Option<U256>,
    pub total_cost: Option<U256>,
}

/// Per-item results reconstructed from `OperationFailed(index, reason)` events
///
/// Every index without a failure event succeeded.
pub fn outcomes_from_failures(
    len: usize,
    failures: impl IntoIterator<Item = (usize, String)>,
) -> Result<Vec<OperationOutcome>, BulkError> {
    let mut outcomes: Vec<OperationOutcome> = (0..len)
        .map(|index| OperationOutcome {
            success: true,
            index,
            error_message: String::new(),
        })
        .collect();

    for (index, reason) in failures {
        let slot = outcomes.get_mut(index).ok_or_else(|| {
            BulkError::MalformedResults(format!("failure index {index} out of range for {len} items"))
        })?;
        slot.success = false;
        slot.error_message = reason;
    }

    Ok(outcomes)
}

/// Check that results cover exactly `[0, len)` once each, and order them by index
pub fn order_outcomes(
    len: usize,
    mut results: Vec<OperationOutcome>,
) -> Result<Vec<OperationOutcome>, BulkError> {
    if results.len() != len {
        return Err(BulkError::MalformedResults(format!(
            "expected {len} results, got {}",
            results.len()
        )));
    }

    results.sort_by_key(|r| r.index);
    for (position, result) in results.iter().enumerate() {
        if result.index != position {
            return Err(BulkError::MalformedResults(format!(
                "result indices are not a permutation of 0..{len}"
            )));
        }
    }

    Ok(results)
}

/// Per-domain outcome of a batch, keyed back to the request names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainOutcome {
    pub name: String,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub tx_hash: H256,
    pub domains: Vec<DomainOutcome>,
    pub registered_count: Option<U256>,
}

impl BatchOutcome {
    /// Pair ordered results with the request names
    pub fn new(names: &[String], receipt: BatchReceipt) -> Result<Self, BulkError> {
        let results = order_outcomes(names.len(), receipt.results)?;
        let domains = names
            .iter()
            .zip(results)
            .map(|(name, result)| DomainOutcome {
                name: name.clone(),
                success: result.success,
                error_message: (!result.success).then_some(result.error_message),
            })
            .collect();

        Ok(Self {
            tx_hash: receipt.tx_hash,
            domains,
            registered_count: receipt.registered_count,
        })
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.domains
            .iter()
            .filter(|d| d.success)
            .map(|d| d.name.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DomainOutcome> {
        self.domains.iter().filter(|d| !d.success)
    }

    pub fn is_partial(&self) -> bool {
        self.failed().next().is_some()
    }
}

/// A `bulkRegister` call found in the event history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub name: String,
    pub duration_secs: u64,
    /// Unix timestamp of the block that included the call
    pub registered_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_from_failures() {
        let outcomes =
            outcomes_from_failures(3, vec![(1, "Not available".to_string())]).unwrap();
        assert_eq!(outcomes.len(), 3);
        for (i, o) in outcomes.iter().enumerate() {
            assert_eq!(o.index, i);
        }
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].error_message, "Not available");
        assert!(outcomes[2].success);
    }

    #[test]
    fn test_out_of_range_failure_is_malformed() {
        let err = outcomes_from_failures(2, vec![(2, "x".to_string())]).unwrap_err();
        assert!(matches!(err, BulkError::MalformedResults(_)));
    }

    #[test]
    fn test_order_outcomes_sorts_by_index() {
        let shuffled = vec![
            OperationOutcome { success: true, index: 2, error_message: String::new() },
            OperationOutcome { success: false, index: 0, error_message: "taken".into() },
            OperationOutcome { success: true, index: 1, error_message: String::new() },
        ];
        let ordered = order_outcomes(3, shuffled).unwrap();
        assert_eq!(ordered.len(), 3);
        for (i, r) in ordered.iter().enumerate() {
            assert_eq!(r.index, i);
        }
        assert!(!ordered[0].success);
    }

    #[test]
    fn test_order_outcomes_rejects_duplicates_and_short_results() {
        let dup = vec![
            OperationOutcome { success: true, index: 0, error_message: String::new() },
            OperationOutcome { success: true, index: 0, error_message: String::new() },
        ];
        assert!(order_outcomes(2, dup).is_err());
        assert!(order_outcomes(2, vec![]).is_err());
    }

    #[test]
    fn test_batch_outcome_keys_by_name() {
        let receipt = BatchReceipt {
            tx_hash: H256::zero(),
            results: outcomes_from_failures(2, vec![(1, "taken".to_string())]).unwrap(),
            registered_count: Some(U256::one()),
            total_cost: None,
        };
        let names = vec!["alice".to_string(), "bob".to_string()];
        let outcome = BatchOutcome::new(&names, receipt).unwrap();

        assert_eq!(outcome.succeeded().collect::<Vec<_>>(), vec!["alice"]);
        assert!(outcome.is_partial());
        assert_eq!(outcome.domains[1].error_message.as_deref(), Some("taken"));
    }

    #[test]
    fn test_domain_request_normalizes() {
        let req = DomainRequest::for_years(" Alice.rsk", 2, Address::zero()).unwrap();
        assert_eq!(req.name, "alice");
        assert_eq!(req.duration_secs, 2 * YEAR_SECS);
    }

    #[test]
    fn test_for_years_rejects_overflowing_duration() {
        let err = DomainRequest::for_years("alice", 1_000_000_000_000, Address::zero()).unwrap_err();
        assert!(matches!(err, BulkError::Precondition(_)));

        let max = DomainRequest::for_years("alice", u64::MAX / YEAR_SECS, Address::zero()).unwrap();
        assert_eq!(max.duration_secs, (u64::MAX / YEAR_SECS) * YEAR_SECS);
    }
}
