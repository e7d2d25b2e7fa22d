use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Stable identifier for a data provider, e.g. `"cc"` or `"av"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Static, immutable-after-registration description of a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub base_url: String,
    pub daily_cap: u32,
    pub monthly_cap: u32,
    pub max_requests_per_second: u32,
    pub min_interval: Duration,
    pub auth_required: bool,
    /// Data types this provider can serve, e.g. `["price", "historical"]`.
    pub supported_data_types: Vec<String>,
}

impl ProviderDescriptor {
    /// Validates the invariants a descriptor must satisfy before it can be
    /// registered: positive caps, a non-negative interval, a non-empty URL.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.daily_cap == 0 {
            return Err(IngestError::InvalidConfig(format!(
                "provider {}: daily_cap must be > 0",
                self.id
            )));
        }
        if self.monthly_cap == 0 {
            return Err(IngestError::InvalidConfig(format!(
                "provider {}: monthly_cap must be > 0",
                self.id
            )));
        }
        if self.monthly_cap < self.daily_cap {
            return Err(IngestError::InvalidConfig(format!(
                "provider {}: monthly_cap cannot be lower than daily_cap",
                self.id
            )));
        }
        if self.base_url.trim().is_empty() {
            return Err(IngestError::InvalidConfig(format!(
                "provider {}: base_url must not be empty",
                self.id
            )));
        }
        Ok(())
    }
}
