use corelib::{CacheStrategy, DataType};

/// Per-data-type cache rules enforced by [`crate::store::CacheStore::put`].
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub data_type: DataType,
    pub default_ttl_secs: i64,
    pub allow_permanent: bool,
    pub max_entry_size_bytes: u64,
    pub max_entries_of_type: u64,
    pub dedupe: bool,
    pub compress: bool,
}

impl CachePolicy {
    const fn balanced(data_type: DataType) -> Self {
        match data_type {
            DataType::Historical => CachePolicy {
                data_type,
                default_ttl_secs: 365 * 24 * 3600,
                allow_permanent: true,
                max_entry_size_bytes: 20 * 1024 * 1024,
                max_entries_of_type: 500,
                dedupe: true,
                compress: true,
            },
            DataType::Price => CachePolicy {
                data_type,
                default_ttl_secs: 15 * 60,
                allow_permanent: false,
                max_entry_size_bytes: 1024 * 1024,
                max_entries_of_type: 500,
                dedupe: false,
                compress: false,
            },
            DataType::News => CachePolicy {
                data_type,
                default_ttl_secs: 6 * 3600,
                allow_permanent: false,
                max_entry_size_bytes: 5 * 1024 * 1024,
                max_entries_of_type: 200,
                dedupe: true,
                compress: true,
            },
            DataType::Sentiment => CachePolicy {
                data_type,
                default_ttl_secs: 12 * 3600,
                allow_permanent: false,
                max_entry_size_bytes: 512 * 1024,
                max_entries_of_type: 100,
                dedupe: false,
                compress: false,
            },
        }
    }
}

/// Holds the resolved policy per data type for one configured strategy.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policies: [CachePolicy; 4],
}

const ALL_TYPES: [DataType; 4] = [
    DataType::Historical,
    DataType::Price,
    DataType::News,
    DataType::Sentiment,
];

impl PolicyEngine {
    pub fn for_strategy(strategy: CacheStrategy) -> Self {
        let policies = ALL_TYPES.map(|dt| apply_strategy(CachePolicy::balanced(dt), strategy));
        Self { policies }
    }

    pub fn policy_for(&self, data_type: DataType) -> CachePolicy {
        let idx = ALL_TYPES
            .iter()
            .position(|t| t.as_str() == data_type.as_str())
            .expect("all four data types are always present");
        self.policies[idx]
    }
}

fn apply_strategy(mut policy: CachePolicy, strategy: CacheStrategy) -> CachePolicy {
    match strategy {
        CacheStrategy::Balanced => policy,
        CacheStrategy::Conservative => {
            policy.default_ttl_secs /= 2;
            policy.max_entries_of_type /= 2;
            if matches!(policy.data_type, DataType::Historical | DataType::News) {
                policy.compress = true;
            }
            policy
        }
        CacheStrategy::Aggressive => {
            policy.default_ttl_secs *= 2;
            policy.max_entries_of_type *= 2;
            if matches!(policy.data_type, DataType::Historical | DataType::News) {
                policy.compress = true;
            }
            policy
        }
        CacheStrategy::HistoricalOnly => {
            if !matches!(policy.data_type, DataType::Historical) {
                policy.allow_permanent = false;
                policy.max_entries_of_type = 0;
            }
            policy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_matches_default_table() {
        let engine = PolicyEngine::for_strategy(CacheStrategy::Balanced);
        let price = engine.policy_for(DataType::Price);
        assert_eq!(price.default_ttl_secs, 15 * 60);
        assert!(!price.allow_permanent);
    }

    #[test]
    fn conservative_halves_ttl_and_entries() {
        let engine = PolicyEngine::for_strategy(CacheStrategy::Conservative);
        let news = engine.policy_for(DataType::News);
        assert_eq!(news.default_ttl_secs, 3 * 3600);
        assert_eq!(news.max_entries_of_type, 100);
        assert!(news.compress);
    }

    #[test]
    fn historical_only_disables_other_types() {
        let engine = PolicyEngine::for_strategy(CacheStrategy::HistoricalOnly);
        let price = engine.policy_for(DataType::Price);
        assert_eq!(price.max_entries_of_type, 0);
        assert!(!price.allow_permanent);
        let historical = engine.policy_for(DataType::Historical);
        assert!(historical.allow_permanent);
    }
}
