use chrono::{DateTime, Utc};
use rns_bulk::session::AbandonHandle;
use rns_bulk::{
    AutoApprove, BatchStatus, DomainIndex, RegistrationSession, RnsClient, TransactionOrchestrator,
    WorkflowConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

/// A registration batch tracked by the service
pub struct BatchEntry {
    /// Held by the background task while the workflow runs
    pub session: Arc<Mutex<RegistrationSession>>,
    pub abandon: AbandonHandle,
    pub status: watch::Receiver<BatchStatus>,
    pub created_at: DateTime<Utc>,
}

impl BatchEntry {
    pub fn new(session: RegistrationSession) -> Self {
        Self {
            abandon: session.abandon_handle(),
            status: session.subscribe(),
            session: Arc::new(Mutex::new(session)),
            created_at: Utc::now(),
        }
    }

    /// Not held by a running workflow
    fn is_idle(&self) -> bool {
        self.session.try_lock().is_ok()
    }
}

/// How long an idle batch stays queryable after it was created
pub const DEFAULT_BATCH_RETENTION: Duration = Duration::from_secs(60 * 60);

pub type BatchStore = Arc<RwLock<HashMap<Uuid, Arc<BatchEntry>>>>;

/// Application state shared across handlers
///
/// The service signs with its own wallet, so every signing request is approved.
pub struct AppState<C> {
    pub orchestrator: Arc<TransactionOrchestrator<C, AutoApprove>>,
    pub index: Arc<DomainIndex<C>>,
    pub batches: BatchStore,
    pub retention: Duration,
}

impl<C: RnsClient + 'static> AppState<C> {
    pub fn new(chain: Arc<C>, workflow: WorkflowConfig) -> Self {
        let index = DomainIndex::new(chain.clone(), workflow.call_timeout);
        Self {
            orchestrator: Arc::new(TransactionOrchestrator::new(chain, AutoApprove, workflow)),
            index: Arc::new(index),
            batches: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_BATCH_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn chain(&self) -> &Arc<C> {
        self.orchestrator.chain()
    }

    pub async fn batch(&self, id: Uuid) -> Option<Arc<BatchEntry>> {
        self.batches.read().await.get(&id).cloned()
    }

    /// Store a new batch, evicting idle batches older than the retention window
    pub async fn insert_batch(&self, id: Uuid, entry: Arc<BatchEntry>) {
        let max_age = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let mut batches = self.batches.write().await;
        let before = batches.len();
        batches.retain(|_, e| now - e.created_at < max_age || !e.is_idle());
        let evicted = before - batches.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired batches");
        }
        batches.insert(id, entry);
    }

    /// Load the wallet's owned names into the availability resolver
    pub async fn seed_owned(&self) {
        let owner = self.chain().sender();
        match self.index.owned_domains(owner).await {
            Ok(domains) => {
                tracing::info!(count = domains.len(), "Seeded owned names");
                self.orchestrator
                    .availability()
                    .set_owned(domains.into_iter().map(|d| d.name));
            }
            Err(e) => tracing::warn!(error = %e, "Could not load owned names"),
        }
    }
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            index: self.index.clone(),
            batches: self.batches.clone(),
            retention: self.retention,
        }
    }
}
