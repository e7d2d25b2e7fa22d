use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;

use crate::types::{AdapterResponse, Normalized, ProviderAdapter};

/// Thin `reqwest`-backed adapter, showing how a real provider would be
/// wired in. Parsing is a minimal pass-through: a concrete provider would
/// replace `parse` with its own response-shape mapping. Out of scope per
/// the system's external-collaborator boundary; this exists so the
/// `ProviderAdapter` seam has one non-mock implementation.
pub struct HttpAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpAdapter {
    async fn call(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> anyhow::Result<AdapterResponse> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let mut request = self.client.get(&url).query(params);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();
        let latency = start.elapsed();

        Ok(AdapterResponse {
            status,
            body,
            headers,
            latency,
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
