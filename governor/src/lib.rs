//! Request Governor: the single entry point that turns a [`Request`] into a
//! [`FetchOutcome`], walking the Degradation Planner's plan one step at a
//! time and dispatching network steps to a single-flight-per-provider
//! worker task.

pub mod emergency;
pub mod handle;
pub mod job;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use adapters::ProviderAdapter;
use cache::CacheStore;
use corelib::{DataType, FetchOutcome, IngestError, ProviderId, Quality, Request, RequestId, SourceKind};
use planner::{DegradationPlan, StepKind, build_plan};
use quota::QuotaTracker;
use registry::ProviderRegistry;

pub use emergency::EmergencyMode;
pub use handle::PendingHandle;
pub use job::Job;
pub use worker::RetryConfig;

/// Snapshot of whether a request is still being worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    InFlight,
    Unknown,
}

fn cache_key(data_type: DataType, symbol: &str) -> String {
    format!("{}:{}", data_type.as_str(), symbol)
}

struct Inner {
    registry: Arc<ProviderRegistry>,
    quota: Arc<QuotaTracker>,
    cache: Arc<CacheStore>,
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    emergency: EmergencyMode,
    emergency_critical_symbols: Vec<String>,
    workers: Mutex<HashMap<ProviderId, mpsc::UnboundedSender<Job>>>,
    inflight: Mutex<HashMap<RequestId, Arc<AtomicBool>>>,
    seq: AtomicU64,
    retry: RetryConfig,
}

/// Cheaply cloneable handle to the governor; every clone shares the same
/// provider workers, quota state, and in-flight request table.
#[derive(Clone)]
pub struct RequestGovernor(Arc<Inner>);

impl RequestGovernor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        quota: Arc<QuotaTracker>,
        cache: Arc<CacheStore>,
        adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
        emergency_critical_symbols: Vec<String>,
        retry: RetryConfig,
    ) -> Self {
        Self(Arc::new(Inner {
            registry,
            quota,
            cache,
            adapters,
            emergency: EmergencyMode::new(),
            emergency_critical_symbols,
            workers: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            retry,
        }))
    }

    pub fn emergency_mode(&self) -> &EmergencyMode {
        &self.0.emergency
    }

    /// Re-evaluates the quota tracker's exhaustion state and flips emergency
    /// mode accordingly. Callers run this on a timer or after every `record`.
    pub fn refresh_emergency_mode(&self) {
        let exhausted = self.0.quota.two_or_more_exhausted(Utc::now());
        self.0.emergency.set(exhausted);
    }

    fn get_or_spawn_worker(&self, provider: &ProviderId) -> mpsc::UnboundedSender<Job> {
        let mut workers = self.0.workers.lock();
        if let Some(tx) = workers.get(provider) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self
            .0
            .adapters
            .get(provider)
            .unwrap_or_else(|| panic!("no adapter registered for provider {provider}"))
            .clone();
        tokio::spawn(worker::run(provider.clone(), rx, adapter, self.0.quota.clone(), self.0.retry));
        workers.insert(provider.clone(), tx.clone());
        tx
    }

    fn primary_provider(&self, request: &Request) -> Option<ProviderId> {
        if let Some(hint) = &request.provider_hint {
            if self.0.registry.supported(hint, request.data_type) {
                return Some(hint.clone());
            }
        }
        self.0
            .registry
            .fallback_chain(request.data_type)
            .iter()
            .find(|p| self.0.registry.supported(p, request.data_type))
            .cloned()
    }

    fn fallback_providers(&self, request: &Request, primary: Option<&ProviderId>) -> Vec<ProviderId> {
        self.0
            .registry
            .fallback_chain(request.data_type)
            .iter()
            .filter(|p| self.0.registry.supported(p, request.data_type))
            .filter(|p| Some(*p) != primary)
            .cloned()
            .collect()
    }

    /// Submits a request and returns a handle to its eventual outcome.
    /// Emergency-mode denial and past-deadline rejection resolve
    /// synchronously; everything else runs on a spawned driver task so the
    /// caller never blocks on a provider round trip here.
    pub async fn submit(&self, request: Request) -> PendingHandle {
        let (tx, rx) = oneshot::channel();
        let now = Utc::now();

        if !self.0.emergency.should_serve(
            request.priority,
            &self.0.emergency_critical_symbols,
            &request.symbol,
        ) {
            let _ = tx.send(Err(IngestError::EmergencyDenied));
            return PendingHandle::new(rx);
        }
        if request.is_past_deadline(now) {
            let _ = tx.send(Err(IngestError::Timeout));
            return PendingHandle::new(rx);
        }

        let primary = self.primary_provider(&request);
        let fallback = self.fallback_providers(&request, primary.as_ref());
        let plan = build_plan(&request, primary, &fallback, self.0.emergency.is_active());

        let cancel = Arc::new(AtomicBool::new(false));
        self.0.inflight.lock().insert(request.id, cancel.clone());

        let governor = self.clone();
        let request_id = request.id;
        tokio::spawn(async move {
            let result = governor.execute_plan(&request, &plan, &cancel).await;
            governor.0.inflight.lock().remove(&request_id);
            let _ = tx.send(result);
        });

        PendingHandle::new(rx)
    }

    /// Marks `request_id` cancelled. The driver observes this at the next
    /// step boundary; an in-flight provider call is not interrupted
    /// mid-flight, only the advance to the next plan step is skipped.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        if let Some(flag) = self.0.inflight.lock().get(&request_id) {
            flag.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn status(&self, request_id: RequestId) -> RequestStatus {
        if self.0.inflight.lock().contains_key(&request_id) {
            RequestStatus::InFlight
        } else {
            RequestStatus::Unknown
        }
    }

    async fn execute_plan(
        &self,
        request: &Request,
        plan: &DegradationPlan,
        cancel: &Arc<AtomicBool>,
    ) -> Result<FetchOutcome, IngestError> {
        let key = cache_key(request.data_type, &request.symbol);
        let mut last_err = IngestError::DataQualityBelowFloor("no degradation step met its floor".into());

        for step in &plan.steps {
            if cancel.load(Ordering::Relaxed) {
                return Err(IngestError::Cancelled);
            }
            if request.is_past_deadline(Utc::now()) {
                return Err(IngestError::Timeout);
            }

            match &step.kind {
                StepKind::Cache => {
                    if let Ok(Some(entry)) = self.0.cache.get(&key).await {
                        let age = (Utc::now() - entry.cached_at).num_seconds();
                        let ttl = entry.expires_at.map(|e| (e - entry.cached_at).num_seconds());
                        let quality = planner::score(SourceKind::Cache, Some(age), ttl);
                        if quality.meets_floor(step.min_acceptable_quality) {
                            let _ = self.0.cache.update_access(&key).await;
                            return Ok(FetchOutcome {
                                payload: entry.blob,
                                quality,
                                source_kind: SourceKind::Cache,
                            });
                        }
                    }
                }
                StepKind::Primary(provider) | StepKind::Alternative(provider) => {
                    let source_kind = step.source_kind();
                    match self.dispatch(provider, request, source_kind).await {
                        Ok(outcome) => {
                            let _ = self.cache_fresh_result(&key, request, provider, &outcome).await;
                            return Ok(outcome);
                        }
                        Err(e) => last_err = e,
                    }
                }
                StepKind::Interpolation => {
                    if let Some(provider) = self.interpolation_provider(request) {
                        if let Ok(entries) = self
                            .0
                            .cache
                            .find_recent_for_symbol(request.data_type, provider.as_str(), &request.symbol, 24, 5)
                            .await
                        {
                            if let Some(outcome) = interpolate(&entries) {
                                if outcome.quality.meets_floor(step.min_acceptable_quality) {
                                    return Ok(outcome);
                                }
                            }
                        }
                    }
                }
                StepKind::Static => {
                    if let Ok(Some(entry)) = self.0.cache.get_any(&key).await {
                        return Ok(FetchOutcome {
                            payload: entry.blob,
                            quality: Quality::for_source(SourceKind::Static, None),
                            source_kind: SourceKind::Static,
                        });
                    }
                }
            }
        }

        Err(last_err)
    }

    fn interpolation_provider(&self, request: &Request) -> Option<ProviderId> {
        self.primary_provider(request)
            .or_else(|| self.0.registry.fallback_chain(request.data_type).first().cloned())
    }

    async fn cache_fresh_result(
        &self,
        key: &str,
        request: &Request,
        provider: &ProviderId,
        outcome: &FetchOutcome,
    ) -> anyhow::Result<()> {
        let policy = self.0.cache.policy_engine().policy_for(request.data_type);
        let entry = cache::CacheEntry::new(
            key.to_string(),
            outcome.payload.clone(),
            request.data_type,
            provider.as_str(),
            request.symbol.clone(),
            false,
            Some(policy.default_ttl_secs),
            Utc::now(),
        );
        self.0.cache.put(entry).await.map_err(anyhow::Error::from)
    }

    async fn dispatch(
        &self,
        provider: &ProviderId,
        request: &Request,
        source_kind: SourceKind,
    ) -> Result<FetchOutcome, IngestError> {
        let sender = self.get_or_spawn_worker(provider);
        let (tx, rx) = oneshot::channel();
        let seq = self.0.seq.fetch_add(1, Ordering::Relaxed);

        let mut params = request.parameters.clone();
        params.insert("symbol".to_string(), request.symbol.clone());

        let job = Job {
            request_id: request.id,
            endpoint: request.data_type.as_str().to_string(),
            params,
            priority: request.priority,
            seq,
            respond: tx,
        };

        sender.send(job).map_err(|_| IngestError::ProviderFailure {
            status: 0,
            message: format!("provider {provider} worker channel closed"),
        })?;

        let response = rx
            .await
            .map_err(|_| IngestError::ProviderFailure {
                status: 0,
                message: format!("provider {provider} worker dropped the request"),
            })??;

        let adapter = self
            .0
            .adapters
            .get(provider)
            .unwrap_or_else(|| panic!("no adapter registered for provider {provider}"));
        let normalized = adapter
            .parse(request.data_type.as_str(), &response.body)
            .map_err(|e| IngestError::ProviderFailure {
                status: response.status,
                message: e.to_string(),
            })?;
        let payload = serde_json::to_vec(&normalized.points).map_err(|e| IngestError::ProviderFailure {
            status: response.status,
            message: e.to_string(),
        })?;

        Ok(FetchOutcome {
            payload,
            quality: planner::score(source_kind, None, None),
            source_kind,
        })
    }
}

/// Averages the `price` field across `entries` (newest-first) into a single
/// interpolated point. `None` unless at least two entries carry a numeric
/// price — interpolation needs two neighbors to bracket a value from.
fn interpolate(entries: &[cache::CacheEntry]) -> Option<FetchOutcome> {
    let prices: Vec<f64> = entries
        .iter()
        .filter_map(|e| serde_json::from_slice::<serde_json::Value>(&e.blob).ok())
        .filter_map(|v| v.get("price").and_then(|p| p.as_f64()))
        .collect();
    if prices.len() < 2 {
        return None;
    }
    let avg = prices.iter().sum::<f64>() / prices.len() as f64;
    let payload = serde_json::to_vec(&json!({ "price": avg, "interpolated": true })).ok()?;
    Some(FetchOutcome {
        payload,
        quality: planner::score(SourceKind::Interpolated, None, None),
        source_kind: SourceKind::Interpolated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::MockAdapter;
    use cache::CacheEntry;
    use corelib::{CacheStrategy, Priority, ProviderDescriptor, RequestBuilder};
    use std::time::Duration;

    fn registry_with_mock(id: &str, daily_cap: u32) -> (Arc<ProviderRegistry>, Arc<QuotaTracker>) {
        let mut reg = ProviderRegistry::new();
        reg.register(ProviderDescriptor {
            id: ProviderId::new(id),
            base_url: "https://example.com".into(),
            daily_cap,
            monthly_cap: daily_cap.max(1) * 30,
            max_requests_per_second: 10,
            min_interval: Duration::ZERO,
            auth_required: false,
            supported_data_types: vec!["price".into()],
        })
        .unwrap();
        reg.set_fallback_chain(DataType::Price, vec![ProviderId::new(id)]);
        let quota = QuotaTracker::from_registry(&reg, Utc::now());
        (Arc::new(reg), Arc::new(quota))
    }

    async fn governor_with(
        provider: &str,
        daily_cap: u32,
        adapter: MockAdapter,
    ) -> (RequestGovernor, Arc<CacheStore>, Arc<QuotaTracker>) {
        let (registry, quota) = registry_with_mock(provider, daily_cap);
        let cache = Arc::new(CacheStore::connect_in_memory(CacheStrategy::Balanced).await.unwrap());
        let mut adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(ProviderId::new(provider), Arc::new(adapter));
        let governor = RequestGovernor::new(
            registry,
            quota.clone(),
            cache.clone(),
            adapters,
            vec![],
            RetryConfig {
                max_retries: 1,
                backoff_base: Duration::from_millis(1),
                backoff_multiplier: 1.0,
            },
        );
        (governor, cache, quota)
    }

    #[tokio::test]
    async fn primary_success_resolves_and_caches() {
        let (governor, cache, _quota) = governor_with("cc", 100, MockAdapter::new(50_000.0)).await;
        let request = RequestBuilder::new(DataType::Price, "BTC").priority(Priority::Medium).build();
        let handle = governor.submit(request).await;
        let outcome = handle.await_outcome(None).await.unwrap();
        assert_eq!(outcome.source_kind, SourceKind::FreshApi);

        let cached = cache.get("price:BTC").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_without_provider_call() {
        let (governor, cache, _quota) = governor_with("cc", 100, MockAdapter::new(50_000.0)).await;
        let entry = CacheEntry::new(
            "price:BTC",
            br#"{"price":49000}"#.to_vec(),
            DataType::Price,
            "cc",
            "BTC",
            false,
            Some(900),
            Utc::now(),
        );
        cache.put(entry).await.unwrap();

        let request = RequestBuilder::new(DataType::Price, "BTC").priority(Priority::Medium).build();
        let handle = governor.submit(request).await;
        let outcome = handle.await_outcome(None).await.unwrap();
        assert_eq!(outcome.source_kind, SourceKind::Cache);
    }

    #[tokio::test]
    async fn emergency_mode_denies_low_priority_non_critical_symbol() {
        let (governor, _cache, _quota) = governor_with("cc", 100, MockAdapter::new(50_000.0)).await;
        governor.emergency_mode().set(true);

        let request = RequestBuilder::new(DataType::Price, "ETH").priority(Priority::Low).build();
        let handle = governor.submit(request).await;
        let err = handle.await_outcome(None).await.unwrap_err();
        assert_eq!(err, IngestError::EmergencyDenied);
    }

    #[tokio::test]
    async fn status_reports_in_flight_then_unknown() {
        let (governor, _cache, _quota) = governor_with(
            "cc",
            100,
            MockAdapter::new(50_000.0).with_latency(Duration::from_millis(30)),
        )
        .await;
        let request = RequestBuilder::new(DataType::Price, "BTC").priority(Priority::Medium).build();
        let id = request.id;
        let handle = governor.submit(request).await;
        assert_eq!(governor.status(id), RequestStatus::InFlight);
        handle.await_outcome(None).await.unwrap();
        assert_eq!(governor.status(id), RequestStatus::Unknown);
    }

    #[tokio::test]
    async fn cancel_unknown_request_returns_false() {
        let (governor, _cache, _quota) = governor_with("cc", 100, MockAdapter::new(1.0)).await;
        assert!(!governor.cancel(RequestId(999_999)));
    }

    #[tokio::test]
    async fn falls_back_to_static_when_provider_quota_exhausted_and_no_cache() {
        let (governor, _cache, quota) = governor_with("cc", 1, MockAdapter::new(50_000.0)).await;
        quota.record(&ProviderId::new("cc"), Utc::now());

        let request = RequestBuilder::new(DataType::Price, "BTC").priority(Priority::Medium).build();
        let handle = governor.submit(request).await;
        let err = handle.await_outcome(None).await.unwrap_err();
        assert_eq!(err.kind(), "DATA_QUALITY_BELOW_FLOOR");
    }

    fn recent_price_entry(key: &str, price: f64) -> CacheEntry {
        CacheEntry::new(
            key,
            serde_json::to_vec(&serde_json::json!({ "price": price })).unwrap(),
            DataType::Price,
            "cc",
            "BTC",
            false,
            Some(900),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn single_cached_neighbor_is_not_enough_to_interpolate() {
        let (governor, cache, quota) = governor_with("cc", 1, MockAdapter::new(50_000.0)).await;
        quota.record(&ProviderId::new("cc"), Utc::now());
        cache.put(recent_price_entry("price:cc:BTC:0", 49_000.0)).await.unwrap();

        let request = RequestBuilder::new(DataType::Price, "BTC").priority(Priority::Medium).build();
        let handle = governor.submit(request).await;
        let err = handle.await_outcome(None).await.unwrap_err();
        assert_eq!(err.kind(), "DATA_QUALITY_BELOW_FLOOR");
    }

    #[tokio::test]
    async fn two_cached_neighbors_resolve_through_interpolation() {
        let (governor, cache, quota) = governor_with("cc", 1, MockAdapter::new(50_000.0)).await;
        quota.record(&ProviderId::new("cc"), Utc::now());
        cache.put(recent_price_entry("price:cc:BTC:0", 49_000.0)).await.unwrap();
        cache.put(recent_price_entry("price:cc:BTC:1", 51_000.0)).await.unwrap();

        let request = RequestBuilder::new(DataType::Price, "BTC").priority(Priority::Medium).build();
        let handle = governor.submit(request).await;
        let outcome = handle.await_outcome(None).await.unwrap();
        assert_eq!(outcome.source_kind, SourceKind::Interpolated);
    }
}
