//! Index of names the user registered through the bulk manager

use ethers::types::{Address, H256};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chain::{DomainRegistry, RegistrationHistory};
use crate::error::BulkError;
use crate::rns::{fqdn, label_node, normalize_label};
use crate::signing::bounded;

const DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedDomain {
    /// Label without the TLD
    pub name: String,
    pub fqdn: String,
    pub node: H256,
    pub owner: Address,
    pub registered_at: u64,
    /// Unix timestamp the registration runs out
    pub expires_at: u64,
}

impl OwnedDomain {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at < now
    }

    /// Whole days left, rounded up; negative once expired
    pub fn days_until_expiry(&self, now: u64) -> i64 {
        let remaining = i128::from(self.expires_at) - i128::from(now);
        let day = i128::from(DAY_SECS);
        let days = remaining.div_euclid(day) + i128::from(remaining.rem_euclid(day) != 0);
        i64::try_from(days).unwrap_or(if days < 0 { i64::MIN } else { i64::MAX })
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub struct DomainIndex<C> {
    chain: Arc<C>,
    call_timeout: Duration,
}

impl<C> DomainIndex<C>
where
    C: RegistrationHistory + DomainRegistry,
{
    pub fn new(chain: Arc<C>, call_timeout: Duration) -> Self {
        Self {
            chain,
            call_timeout,
        }
    }

    /// Names registered by `user` that the registry still attributes to them
    ///
    /// A zero registry owner is kept: the registry may lag behind a fresh
    /// registration. Names whose ownership cannot be read are skipped.
    pub async fn owned_domains(&self, user: Address) -> Result<Vec<OwnedDomain>, BulkError> {
        let records = bounded(
            "registrations",
            self.call_timeout,
            self.chain.registrations(user),
        )
        .await?;
        tracing::debug!(records = records.len(), user = ?user, "Scanning registration history");

        let mut seen = HashSet::new();
        let mut domains = Vec::new();
        for record in records {
            let name = normalize_label(&record.name);
            let node = label_node(&name);
            if !seen.insert(node) {
                continue;
            }

            let owner = match bounded("owner", self.call_timeout, self.chain.owner(node)).await {
                Ok(owner) => owner,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Skipping name with unreadable owner");
                    continue;
                }
            };
            if owner != user && !owner.is_zero() {
                tracing::debug!(name = %name, owner = ?owner, "Name no longer owned by user");
                continue;
            }

            domains.push(OwnedDomain {
                fqdn: fqdn(&name),
                name,
                node,
                owner: user,
                registered_at: record.registered_at,
                expires_at: record.registered_at.saturating_add(record.duration_secs),
            });
        }

        Ok(domains)
    }
}
