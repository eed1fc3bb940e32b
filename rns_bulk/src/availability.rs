//! Availability checks combining local caches with the registry and the registrar

use ethers::types::Address;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::chain::{DomainRegistry, FifsRegistrar};
use crate::error::BulkError;
use crate::rns::{label_node, normalize_label};
use crate::signing::bounded;
use crate::types::{AvailabilityState, DomainRequest, DomainRow};

/// Labels shorter than this are never queried
pub const MIN_LABEL_LEN: usize = 3;

/// How long a locally confirmed registration masks the registry
pub const RECENTLY_REGISTERED_WINDOW: Duration = Duration::from_secs(30);

/// Resolves whether a label can be registered
///
/// Precedence, highest first: names registered by this process in the last
/// [`RECENTLY_REGISTERED_WINDOW`], names known to be owned by the user, the
/// registry owner, then the registrar's `available()`. A zero registry owner is
/// authoritative even when the registrar disagrees or reverts. Only when the
/// registry cannot be read does the registrar decide, and with no signal at
/// all the name is reported unavailable.
pub struct AvailabilityResolver<C> {
    chain: Arc<C>,
    call_timeout: Duration,
    recent: Mutex<HashMap<String, Instant>>,
    owned: RwLock<HashSet<String>>,
}

impl<C> AvailabilityResolver<C>
where
    C: DomainRegistry + FifsRegistrar,
{
    pub fn new(chain: Arc<C>, call_timeout: Duration) -> Self {
        Self {
            chain,
            call_timeout,
            recent: Mutex::new(HashMap::new()),
            owned: RwLock::new(HashSet::new()),
        }
    }

    /// Mask a freshly registered name until the registry catches up
    pub fn mark_registered(&self, name: &str) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.insert(normalize_label(name), Instant::now());
    }

    pub fn is_recently_registered(&self, name: &str) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.retain(|_, at| at.elapsed() < RECENTLY_REGISTERED_WINDOW);
        recent.contains_key(&normalize_label(name))
    }

    /// Replace the list of names known to be owned by the user
    pub fn set_owned(&self, names: impl IntoIterator<Item = String>) {
        let mut owned = self.owned.write().unwrap_or_else(|e| e.into_inner());
        *owned = names.into_iter().map(|n| normalize_label(&n)).collect();
    }

    fn is_owned(&self, label: &str) -> bool {
        self.owned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(label)
    }

    pub async fn check(&self, name: &str) -> AvailabilityState {
        let label = normalize_label(name);
        if label.chars().count() < MIN_LABEL_LEN {
            return AvailabilityState::Unknown;
        }

        if self.is_recently_registered(&label) {
            tracing::debug!(name = %label, "Recently registered here");
            return AvailabilityState::Unavailable;
        }
        if self.is_owned(&label) {
            tracing::debug!(name = %label, "Already owned by user");
            return AvailabilityState::Unavailable;
        }

        let (registry, registrar) = tokio::join!(
            bounded("owner", self.call_timeout, self.chain.owner(label_node(&label))),
            bounded("available", self.call_timeout, self.chain.available(&label)),
        );

        let state = resolve(&label, registry, registrar);
        tracing::debug!(name = %label, ?state, "Availability resolved");
        state
    }

    /// Check every request in order
    pub async fn check_all(&self, requests: Vec<DomainRequest>) -> Vec<DomainRow> {
        let mut rows = Vec::with_capacity(requests.len());
        for request in requests {
            let availability = self.check(&request.name).await;
            rows.push(DomainRow {
                request,
                availability,
            });
        }
        rows
    }
}

fn resolve(
    label: &str,
    registry: Result<Address, BulkError>,
    registrar: Result<bool, BulkError>,
) -> AvailabilityState {
    match (registry, registrar) {
        (Ok(owner), _) if !owner.is_zero() => AvailabilityState::Unavailable,
        (Ok(_), Ok(false)) => {
            tracing::warn!(name = %label, "Registrar reports taken but registry owner is zero, trusting registry");
            AvailabilityState::Available
        }
        (Ok(_), Err(e)) => {
            tracing::debug!(name = %label, error = %e, "Registrar check inconclusive");
            AvailabilityState::Available
        }
        (Ok(_), Ok(true)) => AvailabilityState::Available,
        (Err(e), Ok(available)) => {
            tracing::warn!(name = %label, error = %e, "Registry unreadable, using registrar");
            if available {
                AvailabilityState::Available
            } else {
                AvailabilityState::Unavailable
            }
        }
        (Err(registry_err), Err(registrar_err)) => {
            tracing::warn!(
                name = %label,
                registry = %registry_err,
                registrar = %registrar_err,
                "No availability signal, assuming unavailable"
            );
            AvailabilityState::Unavailable
        }
    }
}
