use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::types::{AdapterResponse, Normalized, ProviderAdapter};

/// Deterministic, in-memory adapter used by every other crate's tests and
/// by the end-to-end scenarios: no network access, configurable latency
/// and a configurable number of leading failures before it starts
/// succeeding.
pub struct MockAdapter {
    fail_first_n: usize,
    calls_made: AtomicUsize,
    latency: Duration,
    price: f64,
}

impl MockAdapter {
    pub fn new(price: f64) -> Self {
        Self {
            fail_first_n: 0,
            calls_made: AtomicUsize::new(0),
            latency: Duration::ZERO,
            price,
        }
    }

    pub fn with_failures(mut self, n: usize) -> Self {
        self.fail_first_n = n;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls_made(&self) -> usize {
        self.calls_made.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn call(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> anyhow::Result<AdapterResponse> {
        let call_index = self.calls_made.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if call_index < self.fail_first_n {
            anyhow::bail!("mock adapter: simulated failure on call {call_index}");
        }
        let symbol = params.get("symbol").cloned().unwrap_or_default();
        let body = json!({ "endpoint": endpoint, "symbol": symbol, "price": self.price }).to_string();
        Ok(AdapterResponse {
            status: 200,
            body: body.into_bytes(),
            headers: HashMap::new(),
            latency: self.latency,
        })
    }

    fn parse(&self, endpoint: &str, body: &[u8]) -> anyhow::Result<Normalized> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let mut metadata = HashMap::new();
        metadata.insert("endpoint".to_string(), endpoint.to_string());
        Ok(Normalized {
            points: value,
            metadata,
        })
    }
}
