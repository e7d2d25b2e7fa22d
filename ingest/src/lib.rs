//! Public Request API: the facade a CLI driver or embedding application
//! talks to. Wraps the Request Governor, cache, quota tracker, and
//! Historical Range Loader behind one cheaply cloneable handle, and owns
//! the ambient persistence and background maintenance tasks none of those
//! components run on their own.

pub mod persistence;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use adapters::{HttpAdapter, ProviderAdapter};
use cache::{CacheStats, CacheStore};
use corelib::{
    DataType, FetchOutcome, HistoricalRange, IngestConfig, IngestError, ProviderDescriptor,
    ProviderId, Request, RequestId,
};
use governor::{RequestGovernor, RequestStatus, RetryConfig};
use loader::{HistoricalLoader, LoadingId, Progress};
use quota::{QuotaStats, QuotaTracker};
use registry::ProviderRegistry;

pub use persistence::Persistence;

/// Registers the providers this deployment talks to and builds the matching
/// `HttpAdapter` for each. A real deployment would load these from an
/// external providers manifest; this bootstraps a minimal two-provider
/// setup covering price, historical, news and sentiment lookups, shared by
/// the long-running `ingest` daemon and the one-shot `cli` driver.
pub fn default_registry(
    config: &IngestConfig,
) -> anyhow::Result<(ProviderRegistry, HashMap<ProviderId, Arc<dyn ProviderAdapter>>)> {
    let mut registry = ProviderRegistry::new();
    let mut adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();

    let providers = [
        ("cc", "https://min-api.cryptocompare.com"),
        ("av", "https://www.alphavantage.co"),
    ];

    for (id, base_url) in providers {
        let provider_id = ProviderId::new(id);
        let over = config.provider_overrides.get(&provider_id).cloned().unwrap_or_default();

        registry.register(ProviderDescriptor {
            id: provider_id.clone(),
            base_url: base_url.to_string(),
            daily_cap: over.daily_cap.unwrap_or(2_000),
            monthly_cap: over.monthly_cap.unwrap_or(60_000),
            max_requests_per_second: 5,
            min_interval: Duration::from_millis(over.min_interval_ms.unwrap_or(250)),
            auth_required: over.api_key.is_some(),
            supported_data_types: vec![
                "price".to_string(),
                "historical".to_string(),
                "news".to_string(),
                "sentiment".to_string(),
            ],
        })?;

        adapters.insert(provider_id, Arc::new(HttpAdapter::new(base_url, over.api_key)));
    }

    for data_type in [DataType::Price, DataType::Historical, DataType::News, DataType::Sentiment] {
        registry.set_fallback_chain(data_type, vec![ProviderId::new("cc"), ProviderId::new("av")]);
    }

    Ok((registry, adapters))
}

/// Bootstraps an `IngestService` wired to [`default_registry`] with the
/// default retry policy. Convenience entry point for binaries that don't
/// need a custom provider set.
pub async fn bootstrap_default(config: IngestConfig) -> anyhow::Result<IngestService> {
    let (registry, adapters) = default_registry(&config)?;
    IngestService::bootstrap(config, registry, adapters, RetryConfig::default()).await
}

/// Combined snapshot returned by `stats()`: one quota reading per
/// registered provider plus the cache's aggregate counters.
#[derive(Debug, Clone)]
pub struct Stats {
    pub per_provider: HashMap<ProviderId, QuotaStats>,
    pub cache: CacheStats,
}

struct Inner {
    governor: RequestGovernor,
    cache: Arc<CacheStore>,
    quota: Arc<QuotaTracker>,
    loader: HistoricalLoader,
    persistence: Arc<Persistence>,
    config: IngestConfig,
}

/// Cheaply cloneable handle; every clone shares the same governor, cache,
/// quota state, and loader.
#[derive(Clone)]
pub struct IngestService(Arc<Inner>);

impl IngestService {
    /// Wires up every component from a loaded config, a populated registry,
    /// and the provider adapters that registry describes, then restores
    /// quota usage from the last persisted snapshot and starts the
    /// background maintenance tasks (quota flush, emergency-mode refresh).
    pub async fn bootstrap(
        config: IngestConfig,
        registry: ProviderRegistry,
        adapters: HashMap<ProviderId, Arc<dyn adapters::ProviderAdapter>>,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(registry);
        let quota = Arc::new(QuotaTracker::from_registry(&registry, Utc::now()));
        let cache = Arc::new(CacheStore::connect(&config.db_path, config.cache_strategy).await?);
        let persistence = Arc::new(Persistence::connect(&config.db_path).await?);

        for snapshot in persistence.load_quota_snapshots().await? {
            quota.restore(&snapshot);
        }
        if let Err(e) = cache.cleanup_expired().await {
            tracing::warn!(error = %e, "startup cache cleanup failed");
        }

        let governor = RequestGovernor::new(
            registry,
            quota.clone(),
            cache.clone(),
            adapters,
            config.emergency_critical_symbols.clone(),
            retry,
        );
        governor.refresh_emergency_mode();

        let loader = HistoricalLoader::new(
            governor.clone(),
            cache.clone(),
            config.loading_strategy,
            config.emergency_critical_symbols.clone(),
        );

        let service = Self(Arc::new(Inner {
            governor,
            cache,
            quota,
            loader,
            persistence,
            config,
        }));
        service.spawn_background_tasks();
        Ok(service)
    }

    fn spawn_background_tasks(&self) {
        let governor = self.0.governor.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                governor.refresh_emergency_mode();
            }
        });

        let quota = self.0.quota.clone();
        let persistence = self.0.persistence.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                for snapshot in quota.snapshot_all() {
                    if let Err(e) = persistence.save_quota_snapshot(&snapshot).await {
                        tracing::error!(error = %e, "failed to persist quota snapshot");
                    }
                }
            }
        });
    }

    pub fn config(&self) -> &IngestConfig {
        &self.0.config
    }

    /// Submits `request` and waits for its outcome, honoring the request's
    /// own deadline.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, IngestError> {
        let deadline = request.deadline;
        let handle = self.0.governor.submit(request).await;
        handle.await_outcome(deadline).await
    }

    /// Fetches a batch of requests concurrently, coalescing requests that
    /// share a `(data_type, symbol)` key into a single governor submission
    /// and fanning the shared outcome back out to every index that asked
    /// for it. Preserves the input order of `requests`.
    pub async fn fetch_batch(&self, requests: Vec<Request>) -> Vec<Result<FetchOutcome, IngestError>> {
        let mut groups: HashMap<(DataType, String), Vec<usize>> = HashMap::new();
        for (index, request) in requests.iter().enumerate() {
            groups
                .entry((request.data_type, request.symbol.clone()))
                .or_default()
                .push(index);
        }

        let mut owned: Vec<Option<Request>> = requests.into_iter().map(Some).collect();
        let mut tasks = Vec::with_capacity(groups.len());
        for indices in groups.into_values() {
            let representative = indices[0];
            let request = owned[representative]
                .take()
                .expect("each request index belongs to exactly one group");
            tasks.push(async move {
                let outcome = self.fetch(request).await;
                (indices, outcome)
            });
        }

        let mut results: Vec<Option<Result<FetchOutcome, IngestError>>> =
            (0..owned.len()).map(|_| None).collect();
        for (indices, outcome) in futures::future::join_all(tasks).await {
            for index in indices {
                results[index] = Some(outcome.clone());
            }
        }

        results
            .into_iter()
            .map(|r| r.expect("every request index is covered by exactly one group"))
            .collect()
    }

    /// Fire-and-forget submission: returns the request id immediately and
    /// leaves the caller to poll `status`/look the outcome up another way.
    pub async fn submit(&self, request: Request) -> RequestId {
        let id = request.id;
        self.0.governor.submit(request).await;
        id
    }

    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.0.governor.cancel(request_id)
    }

    pub fn status(&self, request_id: RequestId) -> RequestStatus {
        self.0.governor.status(request_id)
    }

    pub async fn put_historical(
        &self,
        range: &HistoricalRange,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        blob: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.0
            .cache
            .put_historical(range, start, end, blob)
            .await
            .map_err(anyhow::Error::from)
    }

    pub async fn get_historical(
        &self,
        range: &HistoricalRange,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        self.0.cache.get_historical(range, start, end).await
    }

    pub async fn has_historical(
        &self,
        range: &HistoricalRange,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.0.cache.has_historical(range, start, end).await
    }

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        Ok(Stats {
            per_provider: self.0.quota.all_stats(Utc::now()),
            cache: self.0.cache.stats().await?,
        })
    }

    pub fn start_historical_load(&self, range: HistoricalRange) -> Result<LoadingId, IngestError> {
        self.0.loader.load(range)
    }

    pub fn loading_status(&self, id: LoadingId) -> Option<Progress> {
        self.0.loader.status(id)
    }

    pub fn pause_historical_load(&self, id: LoadingId) -> bool {
        self.0.loader.pause(id)
    }

    pub fn resume_historical_load(&self, id: LoadingId) -> bool {
        self.0.loader.resume(id)
    }

    pub fn cancel_historical_load(&self, id: LoadingId) -> bool {
        self.0.loader.cancel(id)
    }
}
