//! Cost aggregation over a batch of rows
//!
//! Prices come from the batching contract's view functions. Rows that are not
//! confirmed available are never priced: the registrar's pricing reverts for
//! taken names, so the quote is zero and nothing is queried.

use ethers::types::U256;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chain::BulkManager;
use crate::error::BulkError;
use crate::signing::bounded;
use crate::types::{AvailabilityState, DomainRequest, DomainRow};

/// RIF has 18 decimals
pub const RIF_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuoteStatus {
    Priced,
    /// No rows to price
    Empty,
    /// A row is unknown or unavailable; nothing was queried
    NotAllAvailable,
    /// The pricing call failed; the batch cannot be priced right now
    Unpriceable { reason: String },
    /// Input changed and the new total is not settled yet
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostQuote {
    /// Zero unless `status` is `Priced`
    pub total: U256,
    #[serde(flatten)]
    pub status: QuoteStatus,
    #[serde(skip)]
    pub generation: u64,
}

impl CostQuote {
    fn zero(status: QuoteStatus) -> Self {
        Self {
            total: U256::zero(),
            status,
            generation: 0,
        }
    }

    pub fn is_priced(&self) -> bool {
        self.status == QuoteStatus::Priced
    }
}

pub struct CostAggregator<C> {
    chain: Arc<C>,
    call_timeout: Duration,
}

impl<C> Clone for CostAggregator<C> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

impl<C: BulkManager> CostAggregator<C> {
    pub fn new(chain: Arc<C>, call_timeout: Duration) -> Self {
        Self {
            chain,
            call_timeout,
        }
    }

    /// Total registration price, failing closed
    ///
    /// Any failure leaves the total at zero.
    pub async fn registration_cost(&self, rows: &[DomainRow]) -> CostQuote {
        if rows.is_empty() {
            return CostQuote::zero(QuoteStatus::Empty);
        }
        if rows
            .iter()
            .any(|r| r.availability != AvailabilityState::Available)
        {
            return CostQuote::zero(QuoteStatus::NotAllAvailable);
        }

        let requests: Vec<DomainRequest> = rows.iter().map(|r| r.request.clone()).collect();
        self.quote(self.price_registration(&requests).await)
    }

    pub async fn renewal_cost(&self, requests: &[DomainRequest]) -> CostQuote {
        if requests.is_empty() {
            return CostQuote::zero(QuoteStatus::Empty);
        }
        self.quote(self.price_renewal(requests).await)
    }

    fn quote(&self, priced: Result<U256, BulkError>) -> CostQuote {
        match priced {
            Ok(total) => CostQuote {
                total,
                status: QuoteStatus::Priced,
                generation: 0,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Cannot price batch");
                CostQuote::zero(QuoteStatus::Unpriceable {
                    reason: e.user_message(),
                })
            }
        }
    }

    /// Registration price with the underlying error, for callers that must stop on failure
    ///
    /// The caller is responsible for only passing names confirmed available.
    pub async fn price_registration(&self, requests: &[DomainRequest]) -> Result<U256, BulkError> {
        let (names, durations) = split(requests);
        bounded(
            "calculateRegistrationCost",
            self.call_timeout,
            self.chain.calculate_registration_cost(names, durations),
        )
        .await
    }

    pub async fn price_renewal(&self, requests: &[DomainRequest]) -> Result<U256, BulkError> {
        let (names, durations) = split(requests);
        bounded(
            "calculateRenewalCost",
            self.call_timeout,
            self.chain.calculate_renewal_cost(names, durations),
        )
        .await
    }
}

fn split(requests: &[DomainRequest]) -> (Vec<String>, Vec<U256>) {
    requests
        .iter()
        .map(|r| (r.name.clone(), U256::from(r.duration_secs)))
        .unzip()
}

/// Debounced registration pricing for a request set that is still being edited
///
/// Each [`CostWatcher::update`] resets the published quote to `Pending`; the
/// batch is priced once the input has been quiet for the configured period.
pub struct CostWatcher {
    input: watch::Sender<(u64, Vec<DomainRow>)>,
    output: watch::Receiver<CostQuote>,
    generation: AtomicU64,
    task: JoinHandle<()>,
}

impl CostWatcher {
    pub fn spawn<C>(aggregator: CostAggregator<C>, quiet: Duration) -> Self
    where
        C: BulkManager + 'static,
    {
        let (input, input_rx) = watch::channel((0, Vec::new()));
        let (output_tx, output) = watch::channel(CostQuote::zero(QuoteStatus::Empty));
        let task = tokio::spawn(debounce(aggregator, quiet, input_rx, output_tx));

        Self {
            input,
            output,
            generation: AtomicU64::new(0),
            task,
        }
    }

    /// Replace the request set; returns the generation its quote will carry
    pub fn update(&self, rows: Vec<DomainRow>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.input.send_replace((generation, rows));
        generation
    }

    pub fn current(&self) -> CostQuote {
        self.output.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CostQuote> {
        self.output.clone()
    }

    /// Wait for the settled quote of `generation` or any later input
    pub async fn settled(&self, generation: u64) -> CostQuote {
        let mut rx = self.output.clone();
        match rx
            .wait_for(|q| q.generation >= generation && q.status != QuoteStatus::Pending)
            .await
        {
            Ok(quote) => quote.clone(),
            Err(_) => CostQuote::zero(QuoteStatus::Unpriceable {
                reason: "cost watcher stopped".into(),
            }),
        }
    }
}

impl Drop for CostWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce<C: BulkManager>(
    aggregator: CostAggregator<C>,
    quiet: Duration,
    mut input: watch::Receiver<(u64, Vec<DomainRow>)>,
    output: watch::Sender<CostQuote>,
) {
    loop {
        if input.changed().await.is_err() {
            return;
        }

        // a changed request set invalidates the previous total
        let generation = input.borrow().0;
        output.send_replace(CostQuote {
            generation,
            ..CostQuote::zero(QuoteStatus::Pending)
        });

        loop {
            match tokio::time::timeout(quiet, input.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return,
                Err(_) => break,
            }
        }

        let (generation, rows) = input.borrow_and_update().clone();
        let mut quote = aggregator.registration_cost(&rows).await;
        if input.has_changed().unwrap_or(true) {
            continue;
        }

        tracing::debug!(generation, total = %quote.total, "Batch cost settled");
        quote.generation = generation;
        output.send_replace(quote);
    }
}

/// Format a RIF amount with up to four decimals
pub fn format_rif(amount: U256) -> String {
    if amount.is_zero() {
        return "0 RIF".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(RIF_DECIMALS));
    let integer_part = amount / divisor;
    let remainder = amount % divisor;

    let padded = format!("{:0>width$}", remainder.to_string(), width = RIF_DECIMALS as usize);
    let decimals = padded[..4].trim_end_matches('0');

    if decimals.is_empty() {
        format!("{integer_part} RIF")
    } else {
        format!("{integer_part}.{decimals} RIF")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DEFAULT_PRICE, MockChain};
    use crate::types::YEAR_SECS;
    use ethers::types::Address;

    fn row(name: &str, availability: AvailabilityState) -> DomainRow {
        DomainRow {
            request: DomainRequest::new(name, YEAR_SECS, Address::zero()),
            availability,
        }
    }

    fn aggregator(chain: &Arc<MockChain>) -> CostAggregator<MockChain> {
        CostAggregator::new(chain.clone(), Duration::from_secs(45))
    }

    #[tokio::test]
    async fn test_prices_available_rows() {
        let chain = Arc::new(MockChain::new());
        chain.set_price("bob", U256::from(5));
        let quote = aggregator(&chain)
            .registration_cost(&[
                row("alice", AvailabilityState::Available),
                row("bob", AvailabilityState::Available),
            ])
            .await;

        assert!(quote.is_priced());
        assert_eq!(quote.total, U256::from(DEFAULT_PRICE) + 5);
    }

    #[tokio::test]
    async fn test_zero_without_call_unless_all_available() {
        let chain = Arc::new(MockChain::new());
        let agg = aggregator(&chain);

        for other in [AvailabilityState::Unknown, AvailabilityState::Unavailable] {
            let quote = agg
                .registration_cost(&[row("alice", AvailabilityState::Available), row("bob", other)])
                .await;
            assert_eq!(quote.total, U256::zero());
            assert_eq!(quote.status, QuoteStatus::NotAllAvailable);
        }
        assert_eq!(chain.external_call_count(), 0);
    }

    #[tokio::test]
    async fn test_pricing_revert_is_unpriceable_zero() {
        let chain = Arc::new(MockChain::new());
        chain.set_owner("alice", Address::repeat_byte(1));

        // stale availability: the row claims available but the name was taken meanwhile
        let quote = aggregator(&chain)
            .registration_cost(&[row("alice", AvailabilityState::Available)])
            .await;
        assert_eq!(quote.total, U256::zero());
        assert!(matches!(quote.status, QuoteStatus::Unpriceable { .. }));
    }

    #[tokio::test]
    async fn test_renewal_cost() {
        let chain = Arc::new(MockChain::new());
        let quote = aggregator(&chain)
            .renewal_cost(&[DomainRequest::new("alice", YEAR_SECS, Address::zero())])
            .await;
        assert_eq!(quote.total, U256::from(DEFAULT_PRICE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_debounces_rapid_edits() {
        let chain = Arc::new(MockChain::new());
        let watcher = CostWatcher::spawn(aggregator(&chain), Duration::from_millis(500));

        watcher.update(vec![row("ali", AvailabilityState::Available)]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        watcher.update(vec![row("alic", AvailabilityState::Available)]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let last = watcher.update(vec![row("alice", AvailabilityState::Available)]);

        assert_eq!(watcher.current().total, U256::zero());
        let quote = watcher.settled(last).await;
        assert_eq!(quote.total, U256::from(DEFAULT_PRICE));

        let priced = chain
            .calls()
            .into_iter()
            .filter(|c| matches!(c, crate::mock::MockCall::RegistrationCost(_)))
            .count();
        assert_eq!(priced, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_resets_total_on_change() {
        let chain = Arc::new(MockChain::new());
        let watcher = CostWatcher::spawn(aggregator(&chain), Duration::from_millis(500));

        let first = watcher.update(vec![row("alice", AvailabilityState::Available)]);
        assert!(watcher.settled(first).await.is_priced());

        watcher.update(vec![row("alice", AvailabilityState::Unknown)]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(watcher.current().total, U256::zero());
        assert_eq!(watcher.current().status, QuoteStatus::Pending);
    }

    #[test]
    fn test_format_rif() {
        assert_eq!(format_rif(U256::zero()), "0 RIF");
        assert_eq!(format_rif(U256::from(DEFAULT_PRICE)), "2 RIF");
        assert_eq!(
            format_rif(U256::from(1_500_000_000_000_000_000u64)),
            "1.5 RIF"
        );
    }
}
