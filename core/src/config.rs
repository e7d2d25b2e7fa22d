use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::provider::ProviderId;

/// Deployment environment. Selects defaults for cache strategy and
/// credential encryption when the operator hasn't overridden them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    fn from_env_str(s: &str) -> Environment {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Environment::Staging,
            "prod" | "production" => Environment::Prod,
            _ => Environment::Dev,
        }
    }
}

/// Cache policy preset, applied on top of the per-data-type defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStrategy {
    Conservative,
    Balanced,
    Aggressive,
    HistoricalOnly,
}

impl CacheStrategy {
    fn from_env_str(s: &str) -> CacheStrategy {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => CacheStrategy::Conservative,
            "aggressive" => CacheStrategy::Aggressive,
            "historical_only" | "historical-only" => CacheStrategy::HistoricalOnly,
            _ => CacheStrategy::Balanced,
        }
    }
}

/// Historical Range Loader tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingStrategy {
    Conservative,
    Balanced,
    Aggressive,
    Emergency,
}

impl LoadingStrategy {
    fn from_env_str(s: &str) -> LoadingStrategy {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => LoadingStrategy::Conservative,
            "aggressive" => LoadingStrategy::Aggressive,
            "emergency" => LoadingStrategy::Emergency,
            _ => LoadingStrategy::Balanced,
        }
    }

    /// `(max_daily_calls, chunk_delay_ms)` for this preset.
    pub fn tuning(&self) -> (u32, u64) {
        match self {
            LoadingStrategy::Conservative => (200, 2_000),
            LoadingStrategy::Balanced => (1_000, 500),
            LoadingStrategy::Aggressive => (3_000, 100),
            LoadingStrategy::Emergency => (50, 5_000),
        }
    }
}

/// Per-provider overrides of the static registry descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverride {
    pub api_key: Option<String>,
    pub daily_cap: Option<u32>,
    pub monthly_cap: Option<u32>,
    pub min_interval_ms: Option<u64>,
}

/// Process-wide configuration, loaded once at startup from the
/// environment, then passed by reference
/// to every component that needs it.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub environment: Environment,
    pub cache_strategy: CacheStrategy,
    pub loading_strategy: LoadingStrategy,

    /// Symbols still served while emergency mode is active.
    pub emergency_critical_symbols: Vec<String>,

    pub provider_overrides: HashMap<ProviderId, ProviderOverride>,

    /// Whether `provider.*.api_key` values are obfuscated at rest. This is
    /// a placeholder for a real secret store; see DESIGN.md.
    pub encrypt_sensitive: bool,

    /// Path to the embedded SQLite database file backing the cache store,
    /// quota snapshots, and loader progress.
    pub db_path: String,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, IngestError> {
        let environment =
            Environment::from_env_str(&std::env::var("INGEST_ENV").unwrap_or_default());

        let (default_cache_strategy, default_encrypt) = match environment {
            Environment::Dev => (CacheStrategy::Aggressive, false),
            Environment::Staging => (CacheStrategy::Balanced, true),
            Environment::Prod => (CacheStrategy::Balanced, true),
        };

        let cache_strategy = std::env::var("INGEST_CACHE_STRATEGY")
            .ok()
            .map(|v| CacheStrategy::from_env_str(&v))
            .unwrap_or(default_cache_strategy);

        let loading_strategy = std::env::var("INGEST_LOADING_STRATEGY")
            .ok()
            .map(|v| LoadingStrategy::from_env_str(&v))
            .unwrap_or(LoadingStrategy::Balanced);

        let emergency_critical_symbols = std::env::var("INGEST_EMERGENCY_SYMBOLS")
            .unwrap_or_else(|_| "BTC,ETH".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let encrypt_sensitive = std::env::var("INGEST_ENCRYPT_SENSITIVE")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(default_encrypt);

        let db_path =
            std::env::var("INGEST_DB_PATH").unwrap_or_else(|_| "sqlite://ingest_dev.db".to_string());

        if matches!(environment, Environment::Prod) && db_path.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "db_path must be set explicitly in prod".to_string(),
            ));
        }

        Ok(Self {
            environment,
            cache_strategy,
            loading_strategy,
            emergency_critical_symbols,
            provider_overrides: HashMap::new(),
            encrypt_sensitive,
            db_path,
        })
    }

    pub fn with_provider_override(mut self, provider: ProviderId, over: ProviderOverride) -> Self {
        self.provider_overrides.insert(provider, over);
        self
    }
}
