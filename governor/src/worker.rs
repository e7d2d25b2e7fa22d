use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use adapters::ProviderAdapter;
use corelib::{IngestError, ProviderId};
use quota::{MayRequest, QuotaTracker};

use crate::job::{Job, ReadyJob};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

/// Single-flight worker for one provider: at most one adapter call is ever
/// in progress at a time for this provider, and jobs are served in
/// priority order among those currently queued.
pub async fn run(
    provider: ProviderId,
    mut rx: mpsc::UnboundedReceiver<Job>,
    adapter: Arc<dyn ProviderAdapter>,
    quota: Arc<QuotaTracker>,
    retry: RetryConfig,
) {
    let mut heap: BinaryHeap<ReadyJob> = BinaryHeap::new();

    loop {
        // Drain everything currently queued without blocking, so a burst
        // of submissions gets priority-sorted before any of it executes.
        while let Ok(job) = rx.try_recv() {
            heap.push(ReadyJob(job));
        }

        let Some(ReadyJob(job)) = heap.pop() else {
            match rx.recv().await {
                Some(job) => {
                    heap.push(ReadyJob(job));
                    continue;
                }
                None => return, // sender side dropped, provider worker retires
            }
        };

        match quota.may_request(&provider, chrono::Utc::now()) {
            MayRequest::Allowed => {
                let outcome = execute_with_retry(&provider, &job, adapter.as_ref(), &quota, retry).await;
                let _ = job.respond.send(outcome);
            }
            MayRequest::Wait(d) => {
                tokio::time::sleep(d).await;
                heap.push(ReadyJob(job));
            }
            MayRequest::DeniedDaily => {
                let _ = job
                    .respond
                    .send(Err(IngestError::QuotaExhausted(provider.to_string())));
            }
            MayRequest::DeniedMonthly => {
                let _ = job
                    .respond
                    .send(Err(IngestError::QuotaExhausted(provider.to_string())));
            }
        }
    }
}

async fn execute_with_retry(
    provider: &ProviderId,
    job: &Job,
    adapter: &dyn ProviderAdapter,
    quota: &Arc<QuotaTracker>,
    retry: RetryConfig,
) -> Result<adapters::AdapterResponse, IngestError> {
    let mut attempt = 0;
    loop {
        match adapter.call(&job.endpoint, &job.params).await {
            Ok(response) => {
                quota.record(provider, chrono::Utc::now());
                return Ok(response);
            }
            Err(e) if attempt < retry.max_retries => {
                let delay = retry
                    .backoff_base
                    .mul_f64(retry.backoff_multiplier.powi(attempt as i32));
                tracing::warn!(provider = %provider, attempt, error = %e, "provider call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(IngestError::ProviderFailure {
                    status: 0,
                    message: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::MockAdapter;
    use corelib::{Priority, ProviderDescriptor, RequestId};
    use registry::ProviderRegistry;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    fn descriptor(id: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::new(id),
            base_url: "https://example.com".into(),
            daily_cap: 100,
            monthly_cap: 1000,
            max_requests_per_second: 10,
            min_interval: Duration::ZERO,
            auth_required: false,
            supported_data_types: vec!["price".into()],
        }
    }

    #[tokio::test]
    async fn successful_call_responds_ok_and_records_quota() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("cc")).unwrap();
        let quota = Arc::new(QuotaTracker::from_registry(&reg, chrono::Utc::now()));
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter::new(1.0));
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = ProviderId::new("cc");

        let quota_clone = quota.clone();
        let handle = tokio::spawn(run(provider.clone(), rx, adapter, quota_clone, RetryConfig::default()));

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(Job {
            request_id: RequestId(1),
            endpoint: "price".into(),
            params: HashMap::new(),
            priority: Priority::Medium,
            seq: 0,
            respond: resp_tx,
        })
        .unwrap();

        let result = resp_rx.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(quota.stats(&provider, chrono::Utc::now()).daily_used, 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn quota_exhaustion_denies_without_calling_adapter() {
        let mut reg = ProviderRegistry::new();
        let mut d = descriptor("cc");
        d.daily_cap = 1;
        reg.register(d).unwrap();
        let quota = Arc::new(QuotaTracker::from_registry(&reg, chrono::Utc::now()));
        let provider = ProviderId::new("cc");
        quota.record(&provider, chrono::Utc::now());

        let adapter: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter::new(1.0));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(provider.clone(), rx, adapter, quota.clone(), RetryConfig::default()));

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(Job {
            request_id: RequestId(1),
            endpoint: "price".into(),
            params: HashMap::new(),
            priority: Priority::Medium,
            seq: 0,
            respond: resp_tx,
        })
        .unwrap();

        let err = resp_rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "QUOTA_EXHAUSTED");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let mut reg = ProviderRegistry::new();
        reg.register(descriptor("cc")).unwrap();
        let quota = Arc::new(QuotaTracker::from_registry(&reg, chrono::Utc::now()));
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter::new(1.0).with_failures(1));
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = ProviderId::new("cc");
        let handle = tokio::spawn(run(
            provider.clone(),
            rx,
            adapter,
            quota.clone(),
            RetryConfig {
                max_retries: 2,
                backoff_base: Duration::from_millis(1),
                backoff_multiplier: 1.0,
            },
        ));

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(Job {
            request_id: RequestId(1),
            endpoint: "price".into(),
            params: HashMap::new(),
            priority: Priority::Medium,
            seq: 0,
            respond: resp_tx,
        })
        .unwrap();

        assert!(resp_rx.await.unwrap().is_ok());
        drop(tx);
        handle.await.unwrap();
    }
}
