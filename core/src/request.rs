use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::priority::Priority;
use crate::provider::ProviderId;

/// Monotonic request identifier, assigned by the Request Governor on
/// submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next process-wide unique request id.
pub fn next_request_id() -> RequestId {
    RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

/// A single data request. Does not carry callbacks: `submit` returns a
/// completion handle instead, so ownership of the terminal outcome is
/// explicit rather than threaded through mutable closure fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub data_type: DataType,
    pub provider_hint: Option<ProviderId>,
    pub symbol: String,
    pub parameters: HashMap<String, String>,
    pub priority: Priority,
    pub allow_cache: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Fluent builder mirroring the ergonomics of a request-builder pattern;
/// fills in `id`/`created_at` so callers only specify what varies.
pub struct RequestBuilder {
    data_type: DataType,
    symbol: String,
    provider_hint: Option<ProviderId>,
    parameters: HashMap<String, String>,
    priority: Priority,
    allow_cache: bool,
    deadline: Option<DateTime<Utc>>,
}

impl RequestBuilder {
    pub fn new(data_type: DataType, symbol: impl Into<String>) -> Self {
        Self {
            data_type,
            symbol: symbol.into(),
            provider_hint: None,
            parameters: HashMap::new(),
            priority: Priority::Medium,
            allow_cache: true,
            deadline: None,
        }
    }

    pub fn provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider_hint = Some(provider.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn allow_cache(mut self, allow: bool) -> Self {
        self.allow_cache = allow;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Request {
        Request {
            id: next_request_id(),
            data_type: self.data_type,
            provider_hint: self.provider_hint,
            symbol: self.symbol,
            parameters: self.parameters,
            priority: self.priority,
            allow_cache: self.allow_cache,
            deadline: self.deadline,
            created_at: Utc::now(),
        }
    }
}
