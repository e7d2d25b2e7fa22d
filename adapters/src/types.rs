use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Raw HTTP outcome of a provider call, before parsing.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub latency: Duration,
}

/// A provider response normalized to a canonical shape, independent of
/// which provider produced it. The Cache Store only ever sees this
/// serialized form, never a provider-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalized {
    pub points: serde_json::Value,
    pub metadata: HashMap<String, String>,
}

/// Pluggable provider interface. Implementations own the HTTP client (or,
/// for tests, a deterministic in-memory stand-in) and the response parsing
/// for the endpoints they support.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn call(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> anyhow::Result<AdapterResponse>;

    fn parse(&self, endpoint: &str, body: &[u8]) -> anyhow::Result<Normalized>;
}
