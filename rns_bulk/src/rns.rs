//! RNS (Rootstock Name Service) contract bindings and name hashing
//! Covers the registry, the FIFS registrar, the RIF token and the bulk manager

use ethers::prelude::*;
use ethers::utils::keccak256;

/// Top-level domain every label is registered under
pub const RNS_TLD: &str = "rsk";

// Generate contract bindings for the RNS Registry
abigen!(
    RNSRegistry,
    r#"[
        function owner(bytes32 node) external view returns (address)
    ]"#
);

// Generate contract bindings for the FIFS (first-in-first-served) registrar
abigen!(
    FIFSRegistrar,
    r#"[
        function available(string name) external view returns (bool)
        function makeCommitment(bytes32 label, address nameOwner, bytes32 secret) external pure returns (bytes32)
        function commit(bytes32 commitment) external
        function canReveal(bytes32 commitment) external view returns (bool)
        function minCommitmentAge() external view returns (uint256)
    ]"#
);

// Generate contract bindings for the RIF payment token
abigen!(
    RIFToken,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

// Generate contract bindings for the RNS Bulk Manager
abigen!(
    RNSBulkManager,
    r#"[
        struct RegistrationRequest { string name; address owner; bytes32 secret; uint256 duration; address addr; }
        struct RenewalRequest { string name; uint256 duration; }
        struct AddressRequest { bytes32 node; address targetAddress; }
        struct OperationResult { bool success; uint256 index; string errorMessage; }
        function fifsRegistrar() external view returns (address)
        function calculateRegistrationCost(string[] names, uint256[] durations) external view returns (uint256)
        function calculateRenewalCost(string[] names, uint256[] durations) external view returns (uint256)
        function bulkRegister(RegistrationRequest[] requests) external returns (OperationResult[])
        function bulkRenew(RenewalRequest[] requests) external returns (OperationResult[])
        function bulkSetAddress(AddressRequest[] requests) external
        function bulkSetResolver(bytes32[] nodes, address resolver) external
        event BulkRegistration(address indexed user, uint256 count, uint256 totalCost)
        event OperationFailed(uint256 indexed index, string reason)
    ]"#
);

/// Normalize user input to a bare label
/// e.g., "  Alice.RSK " -> "alice"
pub fn normalize_label(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    match lowered.strip_suffix(".rsk") {
        Some(label) => label.to_string(),
        None => lowered,
    }
}

/// Fully-qualified name for a label, e.g. "alice" -> "alice.rsk"
pub fn fqdn(label: &str) -> String {
    format!("{}.{}", normalize_label(label), RNS_TLD)
}

/// Calculate the namehash of an RNS name
/// e.g., namehash("alice.rsk") -> bytes32
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];

    if name.is_empty() {
        return node;
    }

    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&node);
        combined[32..].copy_from_slice(&label_hash);
        node = keccak256(combined);
    }

    node
}

/// Registry node for a label under the `.rsk` TLD
pub fn label_node(label: &str) -> H256 {
    H256::from(namehash(&fqdn(label)))
}

/// Calculate the labelhash (keccak256 of a label)
/// This is the encoding the FIFS registrar expects in `makeCommitment`
pub fn labelhash(label: &str) -> [u8; 32] {
    keccak256(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namehash_eth() {
        let hash = namehash("eth");
        let expected =
            hex::decode("93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae").unwrap();
        assert_eq!(hash.to_vec(), expected);
    }

    #[test]
    fn test_namehash_is_recursive() {
        let parent = namehash("rsk");
        let mut combined = parent.to_vec();
        combined.extend_from_slice(&labelhash("alice"));
        assert_eq!(namehash("alice.rsk"), keccak256(&combined));
    }

    #[test]
    fn test_namehash_empty_is_zero() {
        assert_eq!(namehash(""), [0u8; 32]);
    }

    #[test]
    fn test_labelhash() {
        let hash = labelhash("vitalik");
        let expected =
            hex::decode("af2caa1c2ca1d027f1ac823b529d0a67cd144264b2789fa2ea4d63a67c7103cc").unwrap();
        assert_eq!(hash.to_vec(), expected);
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Alice.RSK "), "alice");
        assert_eq!(normalize_label("bob"), "bob");
        assert_eq!(fqdn("Bob.rsk"), "bob.rsk");
    }

    #[test]
    fn test_label_node_matches_fqdn() {
        assert_eq!(label_node("Alice"), H256::from(namehash("alice.rsk")));
    }
}
