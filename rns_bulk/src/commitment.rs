//! Commitment generation for the FIFS commit-reveal protocol

use ethers::types::{Address, H256};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::chain::FifsRegistrar;
use crate::error::BulkError;
use crate::rns::{labelhash, normalize_label};

/// A submitted commitment and the secret needed to reveal it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commitment {
    /// Normalized label
    pub label: String,
    #[serde(skip)]
    pub secret: [u8; 32],
    pub commitment_hash: H256,
    pub commit_tx: H256,
}

/// Generate a fresh commitment secret from the OS random source
pub fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Hash a label the way the registrar expects it in `makeCommitment`
pub fn hash_label(label: &str) -> [u8; 32] {
    labelhash(&normalize_label(label))
}

/// Ask the registrar for the commitment hash of `(label, owner, secret)`
pub async fn make_commitment<R: FifsRegistrar>(
    registrar: &R,
    label: &str,
    owner: Address,
    secret: [u8; 32],
) -> Result<H256, BulkError> {
    registrar
        .make_commitment(hash_label(label), owner, secret)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    #[test]
    fn test_secrets_are_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_ne!(a, [0u8; 32]);
    }

    #[test]
    fn test_hash_label_normalizes() {
        assert_eq!(hash_label("Alice.rsk"), labelhash("alice"));
    }

    #[tokio::test]
    async fn test_commitment_depends_on_secret() {
        let chain = MockChain::new();
        let owner = Address::random();

        let a = make_commitment(&chain, "alice", owner, generate_secret()).await.unwrap();
        let b = make_commitment(&chain, "alice", owner, generate_secret()).await.unwrap();
        assert_ne!(a, b);

        let secret = generate_secret();
        let c = make_commitment(&chain, "alice", owner, secret).await.unwrap();
        let d = make_commitment(&chain, "alice", owner, secret).await.unwrap();
        assert_eq!(c, d);
    }
}
